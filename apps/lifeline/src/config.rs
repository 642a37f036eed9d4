use std::env;
use std::time::Duration;

use webrtc::ice_transport::ice_server::RTCIceServer;

/// Client-side settings shared by the signaling client and the peer
/// connection manager.
#[derive(Debug, Clone)]
pub struct SupportConfig {
    /// Base URL of the signaling relay.
    pub relay_url: String,
    /// Cadence of the signal poll loop.
    pub poll_interval: Duration,
    /// Public STUN endpoints for NAT traversal. No TURN fallback: the
    /// session is pure peer-to-peer or it fails.
    pub stun_servers: Vec<String>,
    /// Label of the ordered data channel carrying control events.
    pub data_channel_label: String,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8080".to_string(),
            poll_interval: Duration::from_millis(1000),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            data_channel_label: "control".to_string(),
        }
    }
}

impl SupportConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("LIFELINE_RELAY_URL") {
            if !url.trim().is_empty() {
                config.relay_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Some(ms) = env::var("LIFELINE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect()
    }
}
