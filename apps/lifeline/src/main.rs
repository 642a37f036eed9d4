use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use lifeline::config::SupportConfig;
use lifeline::peer::PeerConnectionManager;
use lifeline::signaling::SignalingClient;
use lifeline_proto::{Role, Signal};

#[derive(Debug, Parser)]
#[command(name = "lifeline", about = "Ad-hoc remote-support sessions")]
struct Cli {
    /// Signaling relay base URL
    #[arg(long, env = "LIFELINE_RELAY_URL")]
    relay_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a session, print its code, and wait for a viewer
    Host,
    /// Join a session by its six-digit code
    Join { code: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SupportConfig::from_env();
    if let Some(url) = cli.relay_url {
        config.relay_url = url.trim_end_matches('/').to_string();
    }

    match cli.command {
        Commands::Host => run_host(config).await,
        Commands::Join { code } => run_viewer(config, code).await,
    }
}

async fn run_host(config: SupportConfig) -> Result<()> {
    let signaling = Arc::new(SignalingClient::new(&config));
    let grant = signaling.create_session().await?;
    let code = grant.code.as_deref().unwrap_or("??????");
    println!("Session code: {code}");
    println!("Share this code with the support agent, then leave this running.");

    let peer = Arc::new(
        PeerConnectionManager::initialize(Role::Host, signaling.clone(), &config).await?,
    );
    peer.set_status_handler(|status| info!(%status, "connection state"));

    // Replay of incoming control events is gated on the session's
    // remote-control flag, not inside the handler itself.
    let control_allowed = Arc::new(AtomicBool::new(false));
    let gate = control_allowed.clone();
    if let Some(mut events) = peer.remote_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if gate.load(Ordering::SeqCst) {
                    info!(?event, "applying remote control event");
                } else {
                    info!(?event, "remote control disabled; event ignored");
                }
            }
        });
    }

    drive_session(&signaling, peer.clone(), control_allowed).await;

    peer.close().await;
    if let Err(err) = signaling.end_session().await {
        warn!(%err, "session end not acknowledged by relay");
    }
    Ok(())
}

async fn run_viewer(config: SupportConfig, code: String) -> Result<()> {
    let signaling = Arc::new(SignalingClient::new(&config));
    signaling.join_session(&code).await?;
    println!("Joined session, negotiating direct connection...");

    let peer = Arc::new(
        PeerConnectionManager::initialize(Role::Viewer, signaling.clone(), &config).await?,
    );
    peer.set_status_handler(|status| info!(%status, "connection state"));
    peer.set_track_handler(|track| info!(kind = %track.kind(), "remote media track arrived"));

    let flag = Arc::new(AtomicBool::new(false));
    drive_session_with_offer(&signaling, peer.clone(), flag).await;

    peer.close().await;
    if let Err(err) = signaling.end_session().await {
        warn!(%err, "session end not acknowledged by relay");
    }
    Ok(())
}

/// Wire polling into the peer manager and block until Ctrl-C.
async fn drive_session(
    signaling: &Arc<SignalingClient>,
    peer: Arc<PeerConnectionManager>,
    control_allowed: Arc<AtomicBool>,
) {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Vec<Signal>>();
    let flag = control_allowed.clone();
    signaling.start_polling(
        move |signals| {
            let _ = signal_tx.send(signals);
        },
        Some(move |enabled: bool| {
            info!(enabled, "remote control flag changed");
            flag.store(enabled, Ordering::SeqCst);
        }),
    );

    let dispatcher = tokio::spawn(async move {
        while let Some(batch) = signal_rx.recv().await {
            for signal in batch {
                if let Err(err) = peer.handle_signal(signal).await {
                    error!(%err, "failed to apply signal");
                }
            }
        }
    });

    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    signaling.stop_polling();
    dispatcher.abort();
}

/// Viewer variant: start polling, then open the negotiation with our
/// offer (the viewer always offers; the host answers).
async fn drive_session_with_offer(
    signaling: &Arc<SignalingClient>,
    peer: Arc<PeerConnectionManager>,
    control_allowed: Arc<AtomicBool>,
) {
    let offerer = peer.clone();
    tokio::spawn(async move {
        if let Err(err) = offerer.create_offer().await {
            error!(%err, "failed to send offer");
        }
    });
    drive_session(signaling, peer, control_allowed).await;
}
