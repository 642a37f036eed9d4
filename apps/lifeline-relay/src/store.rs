use std::net::IpAddr;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;
use tracing::{debug, error, warn};

use lifeline_proto::{generate_session_id, now_ms, Role, SessionStatus, Signal};

use crate::rate_limit::{JoinRateLimiter, RateLimitConfig};

/// Bounded retries for allocating a code that no active session holds.
/// With a six-digit space this only trips when the store is saturated.
const CODE_ALLOC_ATTEMPTS: u32 = 50;

const SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub session_ttl: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// One support engagement: the host's registration, the viewer slot,
/// and the append-only signal history both sides poll.
#[derive(Debug, Clone)]
pub struct SupportSession {
    pub id: String,
    pub code: String,
    pub host_secret: String,
    pub viewer_secret: Option<String>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub signals: Vec<Signal>,
    pub host_addr: Option<IpAddr>,
    pub viewer_addr: Option<IpAddr>,
    pub remote_control_enabled: bool,
}

impl SupportSession {
    fn expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    fn secret_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Host => Some(self.host_secret.as_str()),
            Role::Viewer => self.viewer_secret.as_deref(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("session not found")]
    SessionNotFound,
    #[error("invalid secret")]
    InvalidSecret,
    #[error("session has ended")]
    SessionEnded,
    #[error("invalid or expired code")]
    InvalidOrExpiredCode,
    #[error("too many join attempts")]
    RateLimited { retry_after: Duration },
    #[error("no free session code after bounded retries")]
    CodeSpaceExhausted,
}

/// Opposite-role signals past a cursor, plus the control flag the
/// poller piggybacks on.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    pub signals: Vec<Signal>,
    pub remote_control_enabled: bool,
}

/// In-memory registry of support sessions.
///
/// Sessions are keyed by id; `codes` is a reservation index from active
/// code to session id so concurrent creates can never hand out the same
/// code. Expired sessions are swept opportunistically on the access
/// paths that care (create, join), and expiry is additionally enforced
/// lazily on every validation so staleness never grants access.
pub struct SessionStore {
    sessions: DashMap<String, SupportSession>,
    codes: DashMap<String, String>,
    limiter: JoinRateLimiter,
    ttl_ms: i64,
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            codes: DashMap::new(),
            limiter: JoinRateLimiter::new(config.rate_limit),
            ttl_ms: config.session_ttl.as_millis() as i64,
        }
    }

    /// Register a new waiting session for a host. Issues the shareable
    /// code and the host secret.
    pub fn create_session(&self, source_addr: Option<IpAddr>) -> Result<SupportSession, StoreError> {
        self.cleanup_expired();

        let id = generate_session_id();
        let code = self.reserve_code(&id)?;
        let now = now_ms();

        let session = SupportSession {
            id: id.clone(),
            code,
            host_secret: generate_secret(),
            viewer_secret: None,
            status: SessionStatus::Waiting,
            created_at: now,
            expires_at: now + self.ttl_ms,
            signals: Vec::new(),
            host_addr: source_addr,
            viewer_addr: None,
            remote_control_enabled: false,
        };

        debug!(session = %session.id, code = %session.code, "created support session");
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a joinable session: matching code, still waiting, not
    /// expired. A connected session is not joinable again.
    pub fn session_by_code(&self, code: &str) -> Option<SupportSession> {
        let id = self.codes.get(code)?.value().clone();
        let session = self.sessions.get(&id)?;
        let now = now_ms();
        if session.status == SessionStatus::Waiting && !session.expired(now) {
            Some(session.clone())
        } else {
            None
        }
    }

    /// Claim the viewer slot on a waiting session. Applies the
    /// per-address rate limit before the code is even looked at, so
    /// guessing invalid codes burns attempts too.
    pub fn join_session(
        &self,
        code: &str,
        source_addr: Option<IpAddr>,
    ) -> Result<SupportSession, StoreError> {
        self.cleanup_expired();

        if let Some(addr) = source_addr {
            if let Err(retry_after) = self.limiter.check(addr) {
                warn!(%addr, ?retry_after, "join rate limit exceeded");
                return Err(StoreError::RateLimited { retry_after });
            }
        }

        let id = self
            .codes
            .get(code)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::InvalidOrExpiredCode)?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::InvalidOrExpiredCode)?;

        let now = now_ms();
        if session.status != SessionStatus::Waiting || session.expired(now) {
            return Err(StoreError::InvalidOrExpiredCode);
        }

        session.viewer_secret = Some(generate_secret());
        session.viewer_addr = source_addr;
        session.status = SessionStatus::Connected;
        debug!(session = %session.id, "viewer joined session");
        Ok(session.clone())
    }

    /// Gate for every signal read/write and any other authenticated
    /// operation: the claimed role's secret must match exactly. The
    /// viewer check fails closed while no viewer has joined.
    pub fn validate_signal_request(
        &self,
        session_id: &str,
        role: Role,
        secret: &str,
    ) -> Result<(), StoreError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(StoreError::SessionNotFound)?;
        if session.expired(now_ms()) {
            return Err(StoreError::SessionNotFound);
        }
        if session.status == SessionStatus::Ended {
            return Err(StoreError::SessionEnded);
        }
        match session.secret_for(role) {
            Some(expected) if expected == secret => Ok(()),
            _ => Err(StoreError::InvalidSecret),
        }
    }

    /// Append a signal in arrival order. Returns false when the session
    /// is gone (callers validate first, so this is the absent-race
    /// answer, not an auth check).
    pub fn add_signal(&self, session_id: &str, signal: Signal) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.signals.push(signal);
                true
            }
            None => false,
        }
    }

    /// Signals addressed to `role`: entries from the opposite role,
    /// ascending by timestamp, strictly after the cursor when given.
    pub fn signals_for(
        &self,
        session_id: &str,
        role: Role,
        after: Option<i64>,
    ) -> Option<SignalBatch> {
        let session = self.sessions.get(session_id)?;
        let sender = role.opposite();
        let mut signals: Vec<Signal> = session
            .signals
            .iter()
            .filter(|signal| signal.from == sender)
            .filter(|signal| after.map_or(true, |cursor| signal.timestamp > cursor))
            .cloned()
            .collect();
        signals.sort_by_key(|signal| signal.timestamp);
        Some(SignalBatch {
            signals,
            remote_control_enabled: session.remote_control_enabled,
        })
    }

    /// Toggle remote control. Only the exact host secret may flip the
    /// flag; a valid viewer secret is still rejected.
    pub fn set_remote_control(&self, session_id: &str, secret: &str, enabled: bool) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                if session.status == SessionStatus::Ended
                    || session.expired(now_ms())
                    || session.host_secret != secret
                {
                    return false;
                }
                session.remote_control_enabled = enabled;
                debug!(session = %session.id, enabled, "remote control toggled");
                true
            }
            None => false,
        }
    }

    /// Mark a session ended and release its code. Returns false when
    /// the session is already absent.
    pub fn end_session(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.status = SessionStatus::Ended;
                self.codes.remove(&session.code);
                debug!(session = %session.id, "session ended");
                true
            }
            None => false,
        }
    }

    /// Drop sessions whose TTL has passed and prune stale rate-limit
    /// windows. Runs on nearby access paths (create, join), never on a
    /// timer, so worst-case staleness is bounded by subsequent traffic.
    pub fn cleanup_expired(&self) {
        let now = now_ms();
        self.sessions.retain(|_, session| {
            if session.expired(now) {
                self.codes.remove(&session.code);
                debug!(session = %session.id, "sweeping expired session");
                false
            } else {
                true
            }
        });
        self.limiter.prune();
    }

    /// Reserve a code no other active session holds. The reservation
    /// goes through the `codes` entry API so two concurrent creates can
    /// never observe the same vacancy.
    fn reserve_code(&self, session_id: &str) -> Result<String, StoreError> {
        let mut rng = rand::thread_rng();
        for _ in 0..CODE_ALLOC_ATTEMPTS {
            let code = format!("{:06}", rng.gen_range(0..1_000_000u32));
            match self.codes.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(session_id.to_string());
                    return Ok(code);
                }
            }
        }
        error!("session code space exhausted after {CODE_ALLOC_ATTEMPTS} attempts");
        Err(StoreError::CodeSpaceExhausted)
    }

    /// Number of sessions currently held, expired or not. Reported by
    /// the health endpoint.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
