use thiserror::Error;

use crate::driver::DriverError;
use crate::endpoint::Capability;

// -----------------------------------------------------------------------------
// ----- PoolError -------------------------------------------------------------

/// Everything a pool operation can surface to its caller.
///
/// Failed liveness probes never show up here: they are handled inside the
/// health check by reconnecting. Only the reconnect's own failure does.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to connect to {endpoint}: {source}")]
    ConnectFailure {
        endpoint: String,
        transient: bool,
        #[source]
        source: DriverError,
    },

    #[error("unknown pool '{name}'")]
    UnknownPool { name: String },

    #[error("no slave registered for pool '{name}'")]
    NoSlaveAvailable { name: String },

    #[error("no connection in pool '{name}' is eligible for {capability}")]
    NoEligibleConnection { name: String, capability: Capability },

    #[error(transparent)]
    CursorState(#[from] CursorStateError),

    #[error("query failed: {0}")]
    Driver(#[from] DriverError),

    #[error("timed out waiting for exclusive use of {endpoint}")]
    AcquireTimeout { endpoint: String },

    #[error("teardown left {failed} session(s) not cleanly closed")]
    Teardown { failed: usize },
}

impl PoolError {
    /// True for connect failures that are worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            PoolError::ConnectFailure { transient, .. } => *transient,
            PoolError::Driver(err) => err.is_transient(),
            PoolError::AcquireTimeout { .. } => true,
            _ => false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- CursorStateError ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorStateError {
    #[error("a cursor is already open on this connection")]
    AlreadyOpen,

    #[error("no cursor is open on this connection")]
    NotOpen,

    #[error("connection has no live session")]
    NotConnected,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
