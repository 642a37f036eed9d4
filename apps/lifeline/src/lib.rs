//! Client side of Lifeline remote-support sessions.
//!
//! A host shares its screen with a support agent (the viewer) over a
//! direct WebRTC connection; a small HTTP relay brokers the handshake
//! through a six-digit code. This crate holds the three client pieces:
//!
//! - [`signaling::SignalingClient`] — the polling HTTP facade onto the
//!   relay, used identically by both roles;
//! - [`peer::PeerConnectionManager`] — the WebRTC transport wrapper
//!   driving offer/answer/ICE and the `control` data channel;
//! - [`control::RemoteControlHandler`] — input capture on the viewer,
//!   event replay on the host.
//!
//! Build one `SignalingClient` per active support session and inject it
//! where needed; nothing here is a process-wide singleton.

pub mod config;
pub mod control;
pub mod peer;
pub mod signaling;
