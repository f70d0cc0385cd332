use std::sync::atomic::{AtomicU64, Ordering};

// -----------------------------------------------------------------------------
// ----- PoolStats -------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Health checks that actually ran (not throttled away).
    pub probes: u64,
    pub probe_failures: u64,
    pub throttled_checks: u64,
    /// New underlying sessions, including the first one per handle.
    pub sessions_opened: u64,
    pub lifetime_retirements: u64,
    pub connect_failures: u64,
    pub routed: u64,
}

// -----------------------------------------------------------------------------
// ----- PoolCounters ----------------------------------------------------------

/// Per-pool counters. Relaxed ordering: these are for reporting only.
#[derive(Debug, Default)]
pub struct PoolCounters {
    probes: AtomicU64,
    probe_failures: AtomicU64,
    throttled_checks: AtomicU64,
    sessions_opened: AtomicU64,
    lifetime_retirements: AtomicU64,
    connect_failures: AtomicU64,
    routed: AtomicU64,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_throttled(&self) {
        self.throttled_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lifetime_retirement(&self) {
        self.lifetime_retirements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            probes: self.probes.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            throttled_checks: self.throttled_checks.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            lifetime_retirements: self.lifetime_retirements.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
        }
    }
}
