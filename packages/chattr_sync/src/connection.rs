//! Connection Manager
//!
//! The transport lifecycle as a pure state machine. The async driver in
//! [`crate::client`] performs the I/O and reports what happened; the machine
//! decides what comes next and guarantees there is never more than one
//! reconnect timer outstanding.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──opened──▶ Connected
//!      ▲                      ▲                      │
//!      │                 timer_fired                 │
//!      └────────closed (schedules one timer)◀────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;

/// Path of the session socket on the server.
pub const SOCKET_PATH: &str = "/ws";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Identifies one scheduled reconnect. A fired timer whose id is no longer
/// pending is stale and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectTimer {
    pub id: TimerId,
    pub delay: Duration,
}

/// Reconnect delay policy.
///
/// With `max == base` the delay is flat. Otherwise it doubles per consecutive
/// failed attempt up to `max`, and resets after a successful open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn flat(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
        }
    }

    pub fn capped(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn delay(&self, failures: u32) -> Duration {
        if self.max <= self.base {
            return self.base;
        }
        let delay = self.base.saturating_mul(1 << failures.min(6));
        delay.min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::flat(Duration::from_secs(2))
    }
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: Backoff,
    pending: Option<TimerId>,
    next_timer: u64,
    /// Consecutive closes without a successful open in between
    failures: u32,
    stopped: bool,
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            pending: None,
            next_timer: 0,
            failures: 0,
            stopped: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Initial connect. Returns false if already running or stopped.
    pub fn start(&mut self) -> bool {
        if self.stopped || self.state != ConnectionState::Disconnected || self.pending.is_some() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The transport opened. Returns false if no attempt was in flight.
    pub fn opened(&mut self) -> bool {
        if self.stopped || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.pending = None;
        self.failures = 0;
        true
    }

    /// The transport closed or failed to open, for any reason.
    ///
    /// Schedules a reconnect unless one is already pending or the machine has
    /// been stopped.
    pub fn closed(&mut self) -> Option<ReconnectTimer> {
        self.state = ConnectionState::Disconnected;
        if self.stopped || self.pending.is_some() {
            return None;
        }
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        let delay = self.backoff.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.pending = Some(id);
        Some(ReconnectTimer { id, delay })
    }

    /// A reconnect timer elapsed. Returns true if a new attempt should start.
    pub fn timer_fired(&mut self, id: TimerId) -> bool {
        if self.stopped || self.pending != Some(id) {
            return false;
        }
        self.pending = None;
        self.state = ConnectionState::Connecting;
        true
    }

    /// Identity or credential changed: drop the current connection (if any)
    /// and any pending timer, and connect again right away.
    pub fn rebind(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.pending = None;
        self.failures = 0;
        self.state = ConnectionState::Connecting;
        true
    }

    /// Tear down. Returns the timer that was cancelled, if any. Nothing is
    /// scheduled after this.
    pub fn stop(&mut self) -> Option<TimerId> {
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
        self.pending.take()
    }
}

/// Where the session socket lives, derived from the serving origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Origin the client is served from, e.g. `https://chat.example.com`.
    pub origin: Url,
    /// When the origin is on this port (a frontend dev server), talk to
    /// `dev_backend` instead.
    pub dev_port: Option<u16>,
    pub dev_backend: String,
}

impl EndpointConfig {
    pub fn new(origin: &str) -> Result<Self, ClientError> {
        let origin = Url::parse(origin).map_err(|e| ClientError::InvalidOrigin {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;
        if origin.host_str().is_none() {
            return Err(ClientError::InvalidOrigin {
                origin: origin.to_string(),
                reason: "origin has no host".to_string(),
            });
        }
        Ok(Self {
            origin,
            dev_port: None,
            dev_backend: String::new(),
        })
    }

    pub fn with_dev_override(mut self, dev_port: u16, dev_backend: impl Into<String>) -> Self {
        self.dev_port = Some(dev_port);
        self.dev_backend = dev_backend.into();
        self
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.origin.scheme(), "https" | "wss")
    }

    /// `host[:port]` the socket connects to.
    pub fn target_host(&self) -> String {
        if self.dev_port.is_some() && self.origin.port() == self.dev_port {
            return self.dev_backend.clone();
        }
        let host = self.origin.host_str().unwrap_or_default();
        match self.origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Full socket URL for one connection attempt, with the credential as
    /// the `token` query parameter.
    pub fn socket_url(&self, token: &str) -> Result<Url, ClientError> {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        let raw = format!("{scheme}://{}{SOCKET_PATH}", self.target_host());
        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidOrigin {
            origin: raw.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}
