//! Connection lifecycle management.
//!
//! Owns one logical server connection per authenticated identity and tracks
//! its state across connect, disconnect, and automatic reconnection with
//! bounded exponential backoff.
//!
//! This module performs no I/O. The host transport layer reports what
//! happened (`transport_opened`, `transport_closed`, `transport_error`) and
//! acts on what this manager asks for (open the transport now, or at the
//! deadline returned by [`ConnectionManager::poll`]).

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// First reconnect delay after a transport failure.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(3);

/// Reconnect attempts before giving up. Tuned above the usual default to
/// ride out flaky mobile networks.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 20;

/// Connection state. Owned exclusively by [`ConnectionManager`]; transitions
/// here are the only source of truth for whether outbound emission is
/// permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport, no retry scheduled
    #[default]
    Disconnected,

    /// Transport open requested, waiting for the server to admit us
    Connecting,

    /// Transport established, emission permitted
    Connected,

    /// Transport lost, retry scheduled or in flight
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Check if outbound emission is permitted.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Notification surfaced to the session coordinator on a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// Transport (re)established. `reconnected` is true when this connection
    /// follows an earlier successful one, in which case the server has
    /// forgotten room membership and a fresh join must be announced.
    Connected { reconnected: bool },

    /// Transport lost; a retry is scheduled unless attempts are exhausted.
    Disconnected { reason: String },

    /// Terminal: retries exhausted. No automatic retry follows; a fresh
    /// `connect` starts the cycle over.
    ConnectionFailed { attempts: u32 },
}

/// Connection manager - one logical connection per authenticated identity.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,

    /// Opaque identity attached to the transport as an auth credential
    identity: Option<String>,

    /// Failed attempts in the current reconnect cycle
    attempts: u32,

    /// When the next reconnect attempt is due
    next_retry_at: Option<Instant>,

    /// Whether this identity has connected successfully at least once
    ever_connected: bool,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a connection for `identity`.
    ///
    /// No-op when already connected (or connecting) with the same identity.
    /// A different identity tears the existing connection down first.
    /// Returns the identity to attach to a fresh transport open, or `None`
    /// when nothing needs to happen.
    pub fn connect(&mut self, identity: impl Into<String>) -> Option<String> {
        let identity = identity.into();

        if self.identity.as_deref() == Some(identity.as_str())
            && !matches!(self.state, ConnectionState::Disconnected)
        {
            return None;
        }

        if self.identity.is_some() && self.identity.as_deref() != Some(identity.as_str()) {
            debug!(state = self.state.as_str(), "tearing down connection for new identity");
            self.disconnect();
        }

        self.identity = Some(identity.clone());
        self.state = ConnectionState::Connecting;
        self.attempts = 0;
        self.next_retry_at = None;
        self.ever_connected = false;
        Some(identity)
    }

    /// Tear down the connection. Idempotent.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.identity = None;
        self.attempts = 0;
        self.next_retry_at = None;
        self.ever_connected = false;
    }

    /// Check if outbound emission is currently permitted.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity the connection was requested with, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Failed attempts in the current reconnect cycle.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Transport reports a successful open.
    pub fn transport_opened(&mut self) -> ConnectionSignal {
        let reconnected = self.ever_connected;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.next_retry_at = None;
        self.ever_connected = true;
        debug!(reconnected, "transport opened");
        ConnectionSignal::Connected { reconnected }
    }

    /// Transport reports the connection closed.
    ///
    /// Schedules a retry unless the teardown was requested locally (state
    /// already `Disconnected`) or attempts are exhausted.
    pub fn transport_closed(&mut self, reason: &str, now: Instant) -> Option<ConnectionSignal> {
        if matches!(self.state, ConnectionState::Disconnected) {
            return None;
        }
        debug!(reason, "transport closed");
        Some(self.schedule_retry(reason.to_string(), now))
    }

    /// Transport reports a connect attempt failed.
    pub fn transport_error(&mut self, now: Instant) -> Option<ConnectionSignal> {
        if matches!(self.state, ConnectionState::Disconnected) {
            return None;
        }
        Some(self.schedule_retry("connect error".to_string(), now))
    }

    fn schedule_retry(&mut self, reason: String, now: Instant) -> ConnectionSignal {
        self.attempts += 1;

        if self.attempts >= MAX_RECONNECT_ATTEMPTS {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            let attempts = self.attempts;
            self.state = ConnectionState::Disconnected;
            self.next_retry_at = None;
            return ConnectionSignal::ConnectionFailed { attempts };
        }

        self.state = ConnectionState::Reconnecting;
        self.next_retry_at = Some(now + self.retry_delay());
        ConnectionSignal::Disconnected { reason }
    }

    /// Backoff delay for the current attempt count.
    pub fn retry_delay(&self) -> Duration {
        let doublings = self.attempts.saturating_sub(1).min(16);
        let delay = RECONNECT_INITIAL_DELAY.saturating_mul(1u32 << doublings);
        delay.min(RECONNECT_MAX_DELAY)
    }

    /// Deadline of the next scheduled reconnect attempt, if any.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    /// Fire a due reconnect attempt.
    ///
    /// Returns the identity to attach to the transport open when a retry is
    /// due, `None` otherwise.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let due = self.next_retry_at?;
        if now < due {
            return None;
        }
        self.next_retry_at = None;
        self.state = ConnectionState::Connecting;
        debug!(attempt = self.attempts, "reconnect attempt due");
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connect_disconnect() {
        let mut conn = ConnectionManager::new();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let identity = conn.connect("player-1").unwrap();
        assert_eq!(identity, "player-1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_connected());

        conn.transport_opened();
        assert!(conn.is_connected());

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.identity(), None);

        // Idempotent
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_same_identity_noop() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();
        conn.transport_opened();

        assert_eq!(conn.connect("player-1"), None);
        assert!(conn.is_connected());
    }

    #[test]
    fn test_connect_new_identity_tears_down() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();
        conn.transport_opened();

        let identity = conn.connect("player-2").unwrap();
        assert_eq!(identity, "player-2");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.identity(), Some("player-2"));
    }

    #[test]
    fn test_reconnect_signal_distinguishes_first_connect() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();

        let signal = conn.transport_opened();
        assert_eq!(signal, ConnectionSignal::Connected { reconnected: false });

        let now = Instant::now();
        conn.transport_closed("transport error", now);
        conn.poll(now + conn.retry_delay());

        let signal = conn.transport_opened();
        assert_eq!(signal, ConnectionSignal::Connected { reconnected: true });
    }

    #[test]
    fn test_backoff_is_bounded() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();

        let now = Instant::now();
        conn.transport_error(now);
        assert_eq!(conn.retry_delay(), RECONNECT_INITIAL_DELAY);

        conn.transport_error(now);
        assert_eq!(conn.retry_delay(), RECONNECT_INITIAL_DELAY * 2);

        conn.transport_error(now);
        assert_eq!(conn.retry_delay(), RECONNECT_INITIAL_DELAY * 4);

        // Capped
        for _ in 0..5 {
            conn.transport_error(now);
        }
        assert_eq!(conn.retry_delay(), RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_retry_not_due_before_deadline() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();

        let now = Instant::now();
        conn.transport_error(now);

        assert_eq!(conn.poll(now), None);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        let identity = conn.poll(now + RECONNECT_INITIAL_DELAY).unwrap();
        assert_eq!(identity, "player-1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_attempts_exhausted_is_terminal() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();

        let now = Instant::now();
        let mut last = None;
        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            last = conn.transport_error(now);
        }

        assert_eq!(
            last,
            Some(ConnectionSignal::ConnectionFailed {
                attempts: MAX_RECONNECT_ATTEMPTS
            })
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.next_retry_at(), None);

        // A fresh connect resets the cycle
        assert!(conn.connect("player-1").is_some());
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_local_disconnect_suppresses_retry() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();
        conn.transport_opened();

        conn.disconnect();
        assert_eq!(conn.transport_closed("io error", Instant::now()), None);
        assert_eq!(conn.next_retry_at(), None);
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut conn = ConnectionManager::new();
        conn.connect("player-1").unwrap();

        let now = Instant::now();
        conn.transport_error(now);
        conn.transport_error(now);
        assert_eq!(conn.attempts(), 2);

        conn.transport_opened();
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.retry_delay(), RECONNECT_INITIAL_DELAY);
    }
}
