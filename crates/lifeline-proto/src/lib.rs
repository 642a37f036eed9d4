//! Wire vocabulary shared by the support relay and both client roles.
//!
//! Everything the relay ever sees is one of the JSON shapes defined here:
//! session actions, handshake signals, and the poll envelope. The remote
//! control events ride the peer data channel and never touch the relay,
//! but they live here too so host and viewer agree on one schema.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which end of a support session a party is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Viewer,
}

impl Role {
    /// The other end of the session. Signal reads are always addressed
    /// to the opposite role of the sender.
    pub fn opposite(self) -> Role {
        match self {
            Role::Host => Role::Viewer,
            Role::Viewer => Role::Host,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One handshake payload relayed between the peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
}

/// A signal as stored and relayed: sender role, payload, and the
/// sender-stamped unix-millisecond timestamp the poll cursor runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub from: Role,
    #[serde(flatten)]
    pub payload: SignalPayload,
    pub timestamp: i64,
}

/// Modifier key state carried on every forwarded keyboard event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modifiers {
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

/// One input-replay message on the control data channel.
///
/// Pointer coordinates are container-relative fractions in `[0, 1]` so
/// the two sides never need to agree on pixel geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteEvent {
    MouseMove {
        x: f64,
        y: f64,
    },
    MouseDown {
        x: f64,
        y: f64,
        button: u8,
    },
    MouseUp {
        x: f64,
        y: f64,
        button: u8,
    },
    Click {
        x: f64,
        y: f64,
        button: u8,
    },
    KeyDown {
        key: String,
        code: String,
        #[serde(flatten)]
        modifiers: Modifiers,
    },
    KeyUp {
        key: String,
        code: String,
        #[serde(flatten)]
        modifiers: Modifiers,
    },
    Scroll {
        delta_x: f64,
        delta_y: f64,
    },
}

/// Session lifecycle. Transitions are monotonic; expiry is enforced
/// lazily against `expires_at` rather than as a fourth state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Connected,
    Ended,
}

/// Request body for `POST /session`, discriminated by `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum SessionAction {
    Create,
    Join {
        code: String,
    },
    End {
        session_id: String,
    },
    EnableRemoteControl {
        session_id: String,
        secret: String,
    },
    DisableRemoteControl {
        session_id: String,
        secret: String,
    },
}

/// The session fields a party is allowed to see. Create responses carry
/// `code` and `host_secret`; join responses carry `viewer_secret`. A
/// secret is never serialized toward the opposite role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_secret: Option<String>,
    pub status: SessionStatus,
    pub remote_control_enabled: bool,
    pub expires_at: i64,
}

/// Response body for every `POST /session` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds until another join attempt is worth making; present only
    /// on rate-limited rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl SessionResponse {
    pub fn ok(session: SessionDescriptor) -> Self {
        Self {
            success: true,
            session: Some(session),
            error: None,
            retry_after: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            session: None,
            error: Some(message.into()),
            retry_after: None,
        }
    }
}

/// Request body for `POST /signal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub session_id: String,
    pub secret: String,
    pub signal: Signal,
}

/// Minimal `{success, error?}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Query string for `GET /signal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollQuery {
    pub session_id: String,
    pub role: Role,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<i64>,
}

/// Response body for `GET /signal`: the opposite-role signals past the
/// cursor plus the current remote-control flag, so pollers observe host
/// toggles without a second endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_control_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generate a fresh session id.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Unix time in milliseconds; the clock every signal timestamp and
/// expiry deadline is measured on.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn signal_payload_tags_match_wire_names() {
        let offer = serde_json::to_value(Signal {
            from: Role::Host,
            payload: SignalPayload::Offer {
                sdp: "v=0".to_string(),
            },
            timestamp: 17,
        })
        .unwrap();
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["from"], "host");
        assert_eq!(offer["timestamp"], 17);

        let ice = serde_json::to_value(SignalPayload::IceCandidate {
            candidate: "candidate:0 1 UDP 1 192.0.2.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        })
        .unwrap();
        assert_eq!(ice["type"], "ice-candidate");
    }

    #[test_timeout::timeout]
    fn session_action_tags_are_kebab_case() {
        let toggle = serde_json::to_value(SessionAction::EnableRemoteControl {
            session_id: "s".to_string(),
            secret: "k".to_string(),
        })
        .unwrap();
        assert_eq!(toggle["action"], "enable-remote-control");

        let parsed: SessionAction =
            serde_json::from_str(r#"{"action":"join","code":"123456"}"#).unwrap();
        assert!(matches!(parsed, SessionAction::Join { ref code } if code == "123456"));
    }

    #[test_timeout::timeout]
    fn remote_event_round_trips_normalized_coordinates() {
        let event = RemoteEvent::MouseMove { x: 0.42, y: 0.87 };
        let json = serde_json::to_string(&event).unwrap();
        let back: RemoteEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "mousemove");
    }

    #[test_timeout::timeout]
    fn key_events_flatten_modifier_flags() {
        let event = RemoteEvent::KeyDown {
            key: "a".to_string(),
            code: "KeyA".to_string(),
            modifiers: Modifiers {
                ctrl: true,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "keydown");
        assert_eq!(value["ctrl"], true);
        assert_eq!(value["shift"], false);

        // Missing flags default to false on the way back in.
        let sparse: RemoteEvent =
            serde_json::from_str(r#"{"type":"keyup","key":"a","code":"KeyA"}"#).unwrap();
        assert!(matches!(
            sparse,
            RemoteEvent::KeyUp { modifiers, .. } if modifiers == Modifiers::default()
        ));
    }

    #[test_timeout::timeout]
    fn opposite_role_is_involutive() {
        assert_eq!(Role::Host.opposite(), Role::Viewer);
        assert_eq!(Role::Viewer.opposite(), Role::Host);
        assert_eq!(Role::Host.opposite().opposite(), Role::Host);
    }

    #[test_timeout::timeout]
    fn secrets_are_omitted_when_absent() {
        let descriptor = SessionDescriptor {
            id: generate_session_id(),
            code: Some("042137".to_string()),
            host_secret: Some("hs".to_string()),
            viewer_secret: None,
            status: SessionStatus::Waiting,
            remote_control_enabled: false,
            expires_at: now_ms() + 1_000,
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert!(value.get("viewer_secret").is_none());
        assert_eq!(value["host_secret"], "hs");
    }
}
