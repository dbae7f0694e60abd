//! Admission Control for markbench
//!
//! Every aggregated request fans out to every registered backend, so one
//! caller can multiply its load by the registry size. This module bounds that
//! with two rules, checked together for every incoming request:
//!
//! - **Per-client interval**: a client identity must wait at least
//!   `1 / max_requests_per_second` between requests
//! - **Client ceiling**: at most `max_clients` identities are tracked at once
//!
//! # Sliding Window
//!
//! A client's timestamp is refreshed on every request, including refused
//! ones. A client that keeps flooding keeps extending its own cool-down.
//!
//! # Expiry
//!
//! Records expire `client_expiry` after their last refresh. Expired records
//! count as absent on lookup, are purged when the ceiling is hit, and are
//! swept by a background task every half expiry window.
//!
//! # Example
//!
//! ```
//! use markbench_common::rate_limit::{AdmissionController, ThrottleConfig};
//! use std::time::{Duration, Instant};
//!
//! let controller = AdmissionController::new(ThrottleConfig::default());
//! let start = Instant::now();
//!
//! assert!(controller.admit_at(Some("10.0.0.1"), start).is_allowed());
//! assert!(!controller.admit_at(Some("10.0.0.1"), start + Duration::from_millis(100)).is_allowed());
//! assert!(controller.admit_at(Some("10.0.0.1"), start + Duration::from_secs(1)).is_allowed());
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Configuration for admission control.
///
/// # Fields
///
/// * `max_requests_per_second` - Per-client request rate; the minimum interval is its inverse
/// * `max_clients` - Ceiling on distinct tracked client identities
/// * `client_expiry` - Idle time after which a client record is dropped
///
/// # Example
///
/// ```
/// use markbench_common::rate_limit::ThrottleConfig;
/// use std::time::Duration;
///
/// let config = ThrottleConfig::default();
/// assert_eq!(config.min_interval(), Duration::from_millis(500));
/// assert_eq!(config.sweep_interval(), Duration::from_secs(30));
/// ```
#[derive(Clone, Debug)]
pub struct ThrottleConfig {
    pub max_requests_per_second: f64,
    pub max_clients: usize,
    pub client_expiry: Duration,
}

impl ThrottleConfig {
    /// Minimum time between two admitted requests of one client.
    ///
    /// A non-positive or non-finite rate disables the interval check. A rate
    /// so small that its interval does not fit a `Duration` admits one
    /// request per client record.
    pub fn min_interval(&self) -> Duration {
        if self.max_requests_per_second.is_finite() && self.max_requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.max_requests_per_second)
                .unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Period of the background expiry sweep, capped at one hour.
    pub fn sweep_interval(&self) -> Duration {
        (self.client_expiry / 2).clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 2.0,
            max_clients: 100,
            client_expiry: Duration::from_secs(60),
        }
    }
}

/// Reason a request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No client identity could be resolved
    Unidentified,
    /// The client's previous request was too recent
    RateExceeded,
    /// Too many distinct clients are tracked
    CapacityExceeded,
}

impl DenyReason {
    /// Message shown to the refused caller.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::Unidentified => {
                "Fatal: Unable to identify the connection. Client not allowed"
            }
            DenyReason::RateExceeded => {
                "Error: Requests exceeded for your IP/location. Please wait a few seconds before issuing another request."
            }
            DenyReason::CapacityExceeded => {
                "Error: Maximum number of clients reached. Please wait before issuing another request."
            }
        }
    }
}

/// Result of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(DenyReason),
}

impl Admission {
    /// Returns whether the request is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns the denial reason, if any.
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allowed => None,
            Self::Denied(reason) => Some(*reason),
        }
    }
}

/// Admission state of one client identity.
#[derive(Debug, Clone, Copy)]
struct ClientRecord {
    last_request_at: Instant,
    /// `None` when the expiry lies beyond what `Instant` can represent
    expires_at: Option<Instant>,
}

impl ClientRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Per-client admission controller.
///
/// # Thread Safety
///
/// The client table lives behind one `Arc<Mutex<HashMap>>`. The whole
/// check-then-update sequence of a request runs under a single lock
/// acquisition, so two concurrent requests of one client cannot both pass
/// the interval check. Cloning creates a new handle to the same table.
#[derive(Clone)]
pub struct AdmissionController {
    pub config: ThrottleConfig,
    clients: Arc<Mutex<HashMap<String, ClientRecord>>>,
}

impl AdmissionController {
    /// Creates a controller with an empty client table.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Decides whether a request from `identity` is admitted, at the current time.
    ///
    /// # Arguments
    ///
    /// * `identity` - The resolved client identity, `None` when nothing resolved
    pub fn admit(&self, identity: Option<&str>) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    /// Decides whether a request from `identity` is admitted at `now`.
    ///
    /// This method:
    /// 1. Refuses a missing or blank identity outright
    /// 2. Compares `now` with the client's last request (expired records count as absent)
    /// 3. Refreshes the client's record, whether or not the interval was respected
    /// 4. Refuses any request while more than `max_clients` live records are tracked;
    ///    a client first seen by this request is removed again
    ///
    /// # Returns
    ///
    /// `Admission::Allowed`, or the reason for refusal. A capacity refusal
    /// takes precedence over a rate refusal.
    pub fn admit_at(&self, identity: Option<&str>, now: Instant) -> Admission {
        let identity = match identity.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => {
                warn!("Refusing request without client identity");
                return Admission::Denied(DenyReason::Unidentified);
            }
        };

        let min_interval = self.config.min_interval();
        let mut clients = self.clients.lock();

        let previous = clients
            .get(identity)
            .filter(|record| record.is_live(now))
            .map(|record| record.last_request_at);
        let is_new = previous.is_none();
        let too_soon = previous
            .map(|last| now.saturating_duration_since(last) < min_interval)
            .unwrap_or(false);

        clients.insert(
            identity.to_string(),
            ClientRecord {
                last_request_at: now,
                expires_at: now.checked_add(self.config.client_expiry),
            },
        );

        if clients.len() > self.config.max_clients {
            clients.retain(|_, record| record.is_live(now));
        }

        if clients.len() > self.config.max_clients {
            if is_new {
                clients.remove(identity);
            }
            let tracked = clients.len();
            drop(clients);
            warn!(
                client = %identity,
                tracked,
                "Refusing request: maximum number of clients reached"
            );
            return Admission::Denied(DenyReason::CapacityExceeded);
        }
        drop(clients);

        if too_soon {
            warn!(client = %identity, "Refusing request: rate exceeded");
            return Admission::Denied(DenyReason::RateExceeded);
        }

        debug!(client = %identity, "Request admitted");
        Admission::Allowed
    }

    /// Drops every record expired at `now`.
    ///
    /// # Returns
    ///
    /// The number of records removed
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, record| record.is_live(now));
        before - clients.len()
    }

    /// Returns the number of client records live at `now`.
    pub fn tracked_clients(&self, now: Instant) -> usize {
        self.clients
            .lock()
            .values()
            .filter(|record| record.is_live(now))
            .count()
    }

    /// Spawns the background expiry sweep.
    ///
    /// The task runs every [`ThrottleConfig::sweep_interval`] until aborted.
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = controller.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, "Swept expired client records");
                }
            }
        })
    }
}
