use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lifeline_proto::{
    now_ms, AckResponse, PollResponse, Role, SessionAction, SessionResponse, Signal,
    SignalPayload, SignalRequest,
};

use crate::config::SupportConfig;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("no active session")]
    NoActiveSession,
    #[error("operation requires the {required} role")]
    WrongRole { required: Role },
    #[error("relay rejected the request: {message}")]
    Relay { message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// What create/join hand back to the caller: the session identity plus
/// the code when we are the host (the viewer already knows it).
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: String,
    pub role: Role,
    pub code: Option<String>,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
struct SessionAuth {
    session_id: String,
    role: Role,
    secret: String,
}

/// One poll's worth of opposite-role signals plus the current
/// remote-control flag from the relay.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub signals: Vec<Signal>,
    pub remote_control_enabled: bool,
}

/// State the poll task shares with the facade. The cursor only ever
/// moves forward; `fetch_max` keeps a slow response from rewinding it.
struct Shared {
    http: reqwest::Client,
    base_url: String,
    auth: Mutex<Option<SessionAuth>>,
    cursor: AtomicI64,
}

impl Shared {
    fn auth(&self) -> Result<SessionAuth, SignalingError> {
        self.auth
            .lock()
            .expect("auth lock poisoned")
            .clone()
            .ok_or(SignalingError::NoActiveSession)
    }

    fn install_auth(&self, auth: SessionAuth) {
        *self.auth.lock().expect("auth lock poisoned") = Some(auth);
        self.cursor.store(0, Ordering::SeqCst);
    }

    fn clear(&self) {
        *self.auth.lock().expect("auth lock poisoned") = None;
        self.cursor.store(0, Ordering::SeqCst);
    }

    async fn session_request(
        &self,
        action: &SessionAction,
    ) -> Result<SessionResponse, SignalingError> {
        let response: SessionResponse = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(action)
            .send()
            .await?
            .json()
            .await?;
        Ok(response)
    }

    async fn poll_once(&self) -> Result<PollOutcome, SignalingError> {
        let auth = self.auth()?;
        let cursor = self.cursor.load(Ordering::SeqCst).to_string();

        let response: PollResponse = self
            .http
            .get(format!("{}/signal", self.base_url))
            .query(&[
                ("session_id", auth.session_id.as_str()),
                ("role", auth.role.as_str()),
                ("secret", auth.secret.as_str()),
                ("after", cursor.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !response.success {
            return Err(SignalingError::Relay {
                message: response
                    .error
                    .unwrap_or_else(|| "poll rejected".to_string()),
            });
        }

        if let Some(last) = response.signals.last() {
            self.cursor.fetch_max(last.timestamp, Ordering::SeqCst);
        }

        Ok(PollOutcome {
            signals: response.signals,
            remote_control_enabled: response.remote_control_enabled.unwrap_or(false),
        })
    }
}

/// Transport-and-session facade used identically by host and viewer.
///
/// Owns the cached session credentials, the monotonic poll cursor, and
/// the recurring poll task. All relay failures come back as values; the
/// UI layer branches instead of unwinding.
pub struct SignalingClient {
    shared: Arc<Shared>,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingClient {
    pub fn new(config: &SupportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                http: reqwest::Client::new(),
                base_url: config.relay_url.trim_end_matches('/').to_string(),
                auth: Mutex::new(None),
                cursor: AtomicI64::new(0),
            }),
            poll_interval: config.poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// Register a new session with the relay and adopt the host role.
    pub async fn create_session(&self) -> Result<SessionGrant, SignalingError> {
        let response = self.shared.session_request(&SessionAction::Create).await?;
        let session = match (response.success, response.session) {
            (true, Some(session)) => session,
            _ => {
                return Err(SignalingError::Relay {
                    message: response
                        .error
                        .unwrap_or_else(|| "create rejected".to_string()),
                })
            }
        };
        let secret = session.host_secret.ok_or(SignalingError::Relay {
            message: "relay response missing host secret".to_string(),
        })?;

        self.shared.install_auth(SessionAuth {
            session_id: session.id.clone(),
            role: Role::Host,
            secret,
        });
        debug!(session = %session.id, "created support session");

        Ok(SessionGrant {
            session_id: session.id,
            role: Role::Host,
            code: session.code,
            expires_at: session.expires_at,
        })
    }

    /// Join a waiting session by its shareable code and adopt the
    /// viewer role.
    pub async fn join_session(&self, code: &str) -> Result<SessionGrant, SignalingError> {
        let response = self
            .shared
            .session_request(&SessionAction::Join {
                code: code.to_string(),
            })
            .await?;
        let session = match (response.success, response.session) {
            (true, Some(session)) => session,
            _ => {
                return Err(SignalingError::Relay {
                    message: response
                        .error
                        .unwrap_or_else(|| "invalid code".to_string()),
                })
            }
        };
        let secret = session.viewer_secret.ok_or(SignalingError::Relay {
            message: "relay response missing viewer secret".to_string(),
        })?;

        self.shared.install_auth(SessionAuth {
            session_id: session.id.clone(),
            role: Role::Viewer,
            secret,
        });
        debug!(session = %session.id, "joined support session");

        Ok(SessionGrant {
            session_id: session.id,
            role: Role::Viewer,
            code: None,
            expires_at: session.expires_at,
        })
    }

    /// Stamp and post one handshake signal. Fails closed when no
    /// session is active.
    pub async fn send_signal(&self, payload: SignalPayload) -> Result<(), SignalingError> {
        let auth = self.shared.auth()?;
        let request = SignalRequest {
            session_id: auth.session_id,
            secret: auth.secret,
            signal: Signal {
                from: auth.role,
                payload,
                timestamp: now_ms(),
            },
        };

        let response: AckResponse = self
            .shared
            .http
            .post(format!("{}/signal", self.shared.base_url))
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(SignalingError::Relay {
                message: response
                    .error
                    .unwrap_or_else(|| "signal rejected".to_string()),
            })
        }
    }

    /// One manual poll. `start_polling` drives this on a timer; tests
    /// and custom loops can call it directly.
    pub async fn poll_signals(&self) -> Result<PollOutcome, SignalingError> {
        self.shared.poll_once().await
    }

    /// Start the recurring poll task. Non-empty batches go to
    /// `on_signal`; transitions of the relay-side remote-control flag
    /// go to `on_remote_control_change`. Transient poll failures are
    /// logged and the loop keeps going.
    pub fn start_polling<F, G>(&self, on_signal: F, on_remote_control_change: Option<G>)
    where
        F: Fn(Vec<Signal>) + Send + 'static,
        G: Fn(bool) + Send + 'static,
    {
        self.stop_polling();

        let shared = self.shared.clone();
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_flag: Option<bool> = None;
            loop {
                ticker.tick().await;
                match shared.poll_once().await {
                    Ok(outcome) => {
                        if !outcome.signals.is_empty() {
                            on_signal(outcome.signals);
                        }
                        if let Some(callback) = on_remote_control_change.as_ref() {
                            if last_flag != Some(outcome.remote_control_enabled) {
                                last_flag = Some(outcome.remote_control_enabled);
                                callback(outcome.remote_control_enabled);
                            }
                        }
                    }
                    Err(SignalingError::NoActiveSession) => break,
                    Err(err) => warn!(%err, "signal poll failed"),
                }
            }
        });

        *self.poller.lock().expect("poller lock poisoned") = Some(handle);
    }

    /// Cancel the poll task. Safe to call repeatedly and before the
    /// first tick has fired.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().expect("poller lock poisoned").take() {
            handle.abort();
        }
    }

    /// Whether the poll task is currently live.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .expect("poller lock poisoned")
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn enable_remote_control(&self) -> Result<(), SignalingError> {
        self.toggle_remote_control(true).await
    }

    pub async fn disable_remote_control(&self) -> Result<(), SignalingError> {
        self.toggle_remote_control(false).await
    }

    /// Host-only. The relay enforces the secret; this check just stops
    /// a viewer from burning a round trip it can never win.
    async fn toggle_remote_control(&self, enabled: bool) -> Result<(), SignalingError> {
        let auth = self.shared.auth()?;
        if auth.role != Role::Host {
            return Err(SignalingError::WrongRole {
                required: Role::Host,
            });
        }

        let action = if enabled {
            SessionAction::EnableRemoteControl {
                session_id: auth.session_id,
                secret: auth.secret,
            }
        } else {
            SessionAction::DisableRemoteControl {
                session_id: auth.session_id,
                secret: auth.secret,
            }
        };
        let response = self.shared.session_request(&action).await?;
        if response.success {
            Ok(())
        } else {
            Err(SignalingError::Relay {
                message: response
                    .error
                    .unwrap_or_else(|| "toggle rejected".to_string()),
            })
        }
    }

    /// Terminate the session. Polling stops first so no tick races the
    /// closing session; local state is cleared whether or not the relay
    /// acknowledged.
    pub async fn end_session(&self) -> Result<(), SignalingError> {
        self.stop_polling();

        let auth = self.shared.auth();
        let result = match auth {
            Ok(auth) => {
                let response = self
                    .shared
                    .session_request(&SessionAction::End {
                        session_id: auth.session_id,
                    })
                    .await;
                match response {
                    Ok(body) if body.success => Ok(()),
                    Ok(body) => Err(SignalingError::Relay {
                        message: body.error.unwrap_or_else(|| "end rejected".to_string()),
                    }),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        self.shared.clear();
        result
    }

    /// Local teardown only: stop polling and forget the session without
    /// contacting the relay. For component unmount paths.
    pub fn cleanup(&self) {
        self.stop_polling();
        self.shared.clear();
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared
            .auth
            .lock()
            .expect("auth lock poisoned")
            .as_ref()
            .map(|auth| auth.session_id.clone())
    }

    pub fn role(&self) -> Option<Role> {
        self.shared
            .auth
            .lock()
            .expect("auth lock poisoned")
            .as_ref()
            .map(|auth| auth.role)
    }

    /// Current poll cursor (last delivered signal timestamp).
    pub fn cursor(&self) -> i64 {
        self.shared.cursor.load(Ordering::SeqCst)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
