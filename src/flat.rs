//! Flat pool: named groups of capability-tagged handles, kept warm by an
//! externally scheduled refresh, with one cursor scope per unit of work.
//!
//! ```text
//! refresh_connections()      // once per batch cycle
//! open_cursors()             // unit of work begins
//!   get_connection_for_writing_to("events") / ..._reading_from(..)
//! close_cursors()            // unit of work ends
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analytics::{PoolCounters, PoolStats};
use crate::driver::Driver;
use crate::endpoint::{Capability, ServerEndpoint};
use crate::errors::PoolError;
use crate::handle::{
    CheckOutcome, CheckPolicy, ConnectionHandle, HandleLease, HealthCheck, PoolSettings,
    shutdown_all,
};
use crate::routing::Picker;

// -----------------------------------------------------------------------------
// ----- FlatPool --------------------------------------------------------------

#[derive(Debug)]
pub struct FlatPool {
    driver: Arc<dyn Driver>,
    settings: PoolSettings,
    picker: Picker,
    counters: PoolCounters,
    groups: RwLock<HashMap<String, Vec<Arc<ConnectionHandle>>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Handles whose existing session passed the probe.
    pub checked: usize,
    pub reconnected: usize,
    pub failed: usize,
}

// -----------------------------------------------------------------------------
// ----- FlatPool: Static ------------------------------------------------------

impl FlatPool {
    pub fn new(driver: Arc<dyn Driver>, settings: PoolSettings) -> Self {
        Self {
            driver,
            settings,
            picker: Picker::default(),
            counters: PoolCounters::new(),
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_picker(mut self, picker: Picker) -> Self {
        self.picker = picker;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- FlatPool: Public ------------------------------------------------------

impl FlatPool {
    /// Appends an unconnected handle under `name`, in the endpoint's default
    /// session mode. The next refresh connects it.
    pub fn add_connection(&self, name: &str, endpoint: ServerEndpoint) {
        let mode = endpoint.default_mode;
        let handle = ConnectionHandle::new(Arc::new(endpoint), mode)
            .with_query_timeout(self.settings.query_timeout);
        let handle = Arc::new(handle);
        self.groups
            .write()
            .entry(name.to_string())
            .or_default()
            .push(handle);
    }

    pub fn len(&self, name: &str) -> usize {
        self.groups.read().get(name).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().values().all(Vec::is_empty)
    }

    /// Probes every handle (no throttle) and reconnects the dead or aged ones.
    /// Meant to run on the caller's schedule, between units of work. One
    /// endpoint failing does not stop the batch.
    pub async fn refresh_connections(&self) -> RefreshReport {
        let check = self.health_check();
        let mut report = RefreshReport::default();

        for handle in self.all_handles() {
            let outcome = match handle.lock(self.settings.acquire_timeout).await {
                Ok(mut lease) => check.run(&mut lease, CheckPolicy::Always).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(CheckOutcome::Reconnected) => report.reconnected += 1,
                Ok(_) => report.checked += 1,
                Err(err) => {
                    warn!("refresh of {} failed: {err}", handle.endpoint());
                    report.failed += 1;
                }
            }
        }

        info!(
            "refresh: {} healthy, {} reconnected, {} failed",
            report.checked, report.reconnected, report.failed
        );
        report
    }

    /// Opens a cursor on every connected handle that lacks one. Returns how
    /// many were opened.
    pub async fn open_cursors(&self) -> usize {
        let mut opened = 0;
        for handle in self.all_handles() {
            let Some(mut lease) = self.lock_for_bulk(&handle).await else {
                continue;
            };
            if lease.is_connected() && !lease.has_open_cursor() && lease.open_cursor().is_ok() {
                opened += 1;
            }
        }
        debug!("opened {opened} cursor(s)");
        opened
    }

    /// Closes every open cursor. Returns how many were closed.
    pub async fn close_cursors(&self) -> usize {
        let mut closed = 0;
        for handle in self.all_handles() {
            let Some(mut lease) = self.lock_for_bulk(&handle).await else {
                continue;
            };
            if lease.close_cursor().is_ok() {
                closed += 1;
            }
        }
        debug!("closed {closed} cursor(s)");
        closed
    }

    pub async fn get_connection_for_writing_to(
        &self,
        name: &str,
    ) -> Result<FlatConnection, PoolError> {
        self.route(name, Capability::Write).await
    }

    pub async fn get_connection_for_reading_from(
        &self,
        name: &str,
    ) -> Result<FlatConnection, PoolError> {
        self.route(name, Capability::Read).await
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub async fn close(&self) -> Result<(), PoolError> {
        shutdown_all(&self.all_handles(), &self.settings).await
    }
}

// -----------------------------------------------------------------------------
// ----- FlatPool: Private -----------------------------------------------------

impl FlatPool {
    /// Only handles with the capability and an open cursor are eligible: no
    /// routing outside a unit of work.
    async fn route(&self, name: &str, capability: Capability) -> Result<FlatConnection, PoolError> {
        let mut eligible: Vec<Arc<ConnectionHandle>> = {
            let guard = self.groups.read();
            let handles = guard.get(name).ok_or_else(|| PoolError::UnknownPool {
                name: name.to_string(),
            })?;
            handles
                .iter()
                .filter(|h| capability.allows(h.endpoint()) && h.has_open_cursor())
                .cloned()
                .collect()
        };

        let no_eligible = || PoolError::NoEligibleConnection {
            name: name.to_string(),
            capability,
        };

        if eligible.is_empty() {
            return Err(no_eligible());
        }
        self.picker.shuffle(&mut eligible);

        // A free handle wins; wait on one only when every candidate is busy.
        let free = eligible
            .iter()
            .filter_map(|h| h.try_lock())
            .find(|lease| lease.has_open_cursor());
        let lease = match free {
            Some(lease) => lease,
            None => eligible[0].lock(self.settings.acquire_timeout).await?,
        };

        // The unit of work may have ended between filtering and locking.
        if !lease.has_open_cursor() {
            return Err(no_eligible());
        }

        self.counters.inc_routed();
        Ok(FlatConnection { lease })
    }

    async fn lock_for_bulk(&self, handle: &Arc<ConnectionHandle>) -> Option<HandleLease> {
        match handle.lock(self.settings.acquire_timeout).await {
            Ok(lease) => Some(lease),
            Err(err) => {
                warn!("skipping {}: {err}", handle.endpoint());
                None
            }
        }
    }

    fn all_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.groups.read().values().flatten().cloned().collect()
    }

    fn health_check(&self) -> HealthCheck<'_> {
        HealthCheck {
            driver: self.driver.as_ref(),
            settings: &self.settings,
            counters: &self.counters,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FlatConnection --------------------------------------------------------

/// A routed flat-pool handle. The cursor belongs to the unit of work and
/// stays open when this is dropped.
#[derive(Debug)]
pub struct FlatConnection {
    lease: HandleLease,
}

impl Deref for FlatConnection {
    type Target = HandleLease;

    fn deref(&self) -> &Self::Target {
        &self.lease
    }
}

impl DerefMut for FlatConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.lease
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
