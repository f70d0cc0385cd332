use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::HandleLease;
use crate::analytics::PoolCounters;
use crate::driver::{ConnectOptions, Driver, DriverError, Session};
use crate::endpoint::SessionMode;
use crate::errors::PoolError;

pub const PROBE_STATEMENT: &str = "SELECT 1";

// -----------------------------------------------------------------------------
// ----- PoolSettings ----------------------------------------------------------

/// Pool-wide knobs shared by both pool strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Minimum time between two liveness probes of the same handle.
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    /// Extra attempts after a transient connect failure.
    pub connect_retries: u32,
    /// First retry delay; doubles on every further attempt.
    pub connect_backoff: Duration,
    /// Longest wait for exclusive use of a handle.
    pub acquire_timeout: Duration,
    /// Deadline for one statement, commit or rollback. A session that misses
    /// it is discarded.
    pub query_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            connect_retries: 2,
            connect_backoff: Duration::from_millis(100),
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolSettings {
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.connect_backoff = backoff;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- CheckPolicy / CheckOutcome --------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckPolicy {
    /// Skip the probe if the handle was checked within the interval.
    Throttled,

    /// Batch refresh: always probe.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Checked recently; the cached session was returned unprobed.
    Throttled,

    /// Probe succeeded; the session was kept.
    Healthy,

    /// A new session replaced a missing, dead or aged one.
    Reconnected,
}

// -----------------------------------------------------------------------------
// ----- HealthCheck -----------------------------------------------------------

/// Decides whether a handle's session may be reused or must be replaced, and
/// replaces it. Runs with the handle's lease held, so probe and reconnect are
/// atomic with respect to every other caller of the same handle.
pub(crate) struct HealthCheck<'a> {
    pub(crate) driver: &'a dyn Driver,
    pub(crate) settings: &'a PoolSettings,
    pub(crate) counters: &'a PoolCounters,
}

impl HealthCheck<'_> {
    pub(crate) async fn run(
        &self,
        lease: &mut HandleLease,
        policy: CheckPolicy,
    ) -> Result<CheckOutcome, PoolError> {
        let now = Instant::now();
        let expired = lease.is_expired(now);
        let interrupted = lease.is_connected() && lease.was_interrupted();

        if policy == CheckPolicy::Throttled && lease.is_connected() && !expired && !interrupted {
            if let Some(last) = lease.last_checked_at() {
                let since = now.saturating_duration_since(last);
                if since < self.settings.health_check_interval {
                    self.counters.inc_throttled();
                    trace!("{}: checked {since:?} ago, skipping probe", lease.endpoint());
                    return Ok(CheckOutcome::Throttled);
                }
            }
        }

        // Stamped before the probe: a hung probe must not invite other
        // callers to probe the same handle again.
        lease.mark_checked(now);

        if expired {
            info!(
                "{}: retiring {} session after max_lifetime",
                lease.endpoint(),
                lease.mode().as_str()
            );
            self.counters.inc_lifetime_retirement();
        } else if interrupted {
            warn!(
                "{}: previous call on the {} session was abandoned, reconnecting",
                lease.endpoint(),
                lease.mode().as_str()
            );
        } else if self.probe(lease).await {
            return Ok(CheckOutcome::Healthy);
        }

        self.reconnect(lease).await?;
        Ok(CheckOutcome::Reconnected)
    }

    async fn probe(&self, lease: &mut HandleLease) -> bool {
        self.counters.inc_probe();
        let endpoint = lease.endpoint().clone();

        if !lease.is_connected() {
            debug!("{endpoint}: no session yet");
            return false;
        }

        lease.set_call_in_flight(true);
        let Some(session) = lease.session_mut() else {
            return false;
        };

        let transactional = session.mode() == SessionMode::Transactional;
        let attempt = async {
            session.execute(PROBE_STATEMENT, &[]).await?;
            if transactional {
                session.commit().await?;
            }
            Ok::<(), DriverError>(())
        };

        let result = timeout(self.settings.probe_timeout, attempt).await;
        lease.set_call_in_flight(false);

        match result {
            Ok(Ok(())) => {
                debug!("{endpoint}: probe ok");
                true
            }
            Ok(Err(err)) => {
                self.counters.inc_probe_failure();
                warn!("{endpoint}: probe failed, reconnecting: {err}");
                false
            }
            Err(_) => {
                self.counters.inc_probe_failure();
                warn!(
                    "{endpoint}: probe timed out after {:?}, reconnecting",
                    self.settings.probe_timeout
                );
                false
            }
        }
    }

    /// Discards the current session (never reused) and opens a new one.
    /// Transient connect errors are retried with backoff; the final failure is
    /// surfaced and leaves the handle unconnected.
    async fn reconnect(&self, lease: &mut HandleLease) -> Result<(), PoolError> {
        let endpoint = lease.endpoint().clone();

        if let Some(mut old) = lease.take_session() {
            match timeout(self.settings.probe_timeout, old.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!("{endpoint}: closing old session: {err}"),
                Err(_) => debug!("{endpoint}: closing old session timed out"),
            }
        }

        let options = ConnectOptions::for_endpoint(&endpoint, lease.mode());
        let mut backoff = self.settings.connect_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.connect_once(&options).await {
                Ok(session) => {
                    lease.adopt(session, Instant::now());
                    self.counters.inc_session_opened();
                    info!(
                        "{endpoint}: opened {} session",
                        lease.mode().as_str()
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_transient() && attempt <= self.settings.connect_retries {
                warn!("{endpoint}: connect attempt {attempt} failed, retrying in {backoff:?}: {err}");
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                continue;
            }

            self.counters.inc_connect_failure();
            error!("{endpoint}: connect failed after {attempt} attempt(s): {err}");
            return Err(PoolError::ConnectFailure {
                endpoint: endpoint.to_string(),
                transient: err.is_transient(),
                source: err,
            });
        }
    }

    async fn connect_once(
        &self,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Session>, DriverError> {
        match timeout(self.settings.connect_timeout, self.driver.connect(options)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(self.settings.connect_timeout)),
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
