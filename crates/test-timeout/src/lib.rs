//! Attribute macros that put a wall-clock deadline on tests.
//!
//! A hung test otherwise stalls the whole suite; these wrappers run the
//! body on a watchdog thread and panic with "test timed out" when the
//! deadline passes. `#[timeout]` wraps synchronous tests,
//! `#[tokio_timeout_test]` builds a current-thread runtime around an
//! async body. Both accept an optional seconds literal: `#[timeout(5)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn parse_timeout_secs(attr: TokenStream) -> u64 {
    if attr.is_empty() {
        return DEFAULT_TIMEOUT_SECS;
    }
    let lit: LitInt = syn::parse(attr).expect("timeout takes an integer number of seconds");
    let secs: u64 = lit
        .base10_parse()
        .expect("timeout seconds must fit in a u64");
    assert!(secs > 0, "timeout must be greater than zero");
    secs
}

fn strip_attr(attrs: Vec<Attribute>, predicate: fn(&Attribute) -> bool) -> Vec<Attribute> {
    attrs.into_iter().filter(|attr| !predicate(attr)).collect()
}

fn is_plain_test(attr: &Attribute) -> bool {
    attr.path().is_ident("test")
}

fn is_tokio_test(attr: &Attribute) -> bool {
    let segments: Vec<_> = attr
        .path()
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect();
    segments == ["tokio", "test"]
}

/// Run `body` on a spawned thread and wait at most `secs` for it to
/// finish, re-raising any panic from the body on the test thread.
fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let deadline = std::time::Duration::from_secs(#secs);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = done_tx.send(outcome);
        });
        match done_rx.recv_timeout(deadline) {
            Ok(Ok(())) => {}
            Ok(Err(panic)) => std::panic::resume_unwind(panic),
            Err(_) => panic!("test timed out after {}s", #secs),
        }
    }
}

/// Deadline wrapper for synchronous tests. Replaces `#[test]`.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_timeout_secs(attr);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout wraps synchronous tests; use tokio_timeout_test for async",
        )
        .to_compile_error()
        .into();
    }

    let kept = strip_attr(attrs, is_plain_test);
    let guarded = watchdog(secs, quote!( #block ));

    TokenStream::from(quote! {
        #[test]
        #(#kept)*
        #vis #sig {
            #guarded
        }
    })
}

/// Deadline wrapper for async tests. Replaces `#[tokio::test]` and runs
/// the body on a fresh current-thread runtime so the watchdog thread
/// owns the entire execution.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_timeout_secs(attr);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.ident, "tokio_timeout_test requires an async function")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let kept = strip_attr(attrs, is_tokio_test);
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build test runtime");
        runtime.block_on(async move #block );
    };
    let guarded = watchdog(secs, body);

    TokenStream::from(quote! {
        #[test]
        #(#kept)*
        #vis #sig {
            #guarded
        }
    })
}
