//! The database driver seam.
//!
//! Pools only ever talk to a [`Driver`] (to open sessions) and a [`Session`]
//! (to run statements and end transactions). [`PgDriver`] speaks the Postgres
//! wire protocol; tests plug in scripted drivers.

pub mod backend;
pub mod error_response;
pub mod frames;
pub mod pg;
pub mod ready_status;

use async_trait::async_trait;
use secrecy::SecretString;
use std::{fmt, io, time::Duration};
use thiserror::Error;

use crate::endpoint::{ServerEndpoint, SessionMode};
use crate::wire::ReadError;

pub use pg::PgDriver;
pub use ready_status::ReadyStatus;

/// Text-format statement parameter; `None` binds SQL NULL.
pub type Param<'a> = Option<&'a str>;

// -----------------------------------------------------------------------------
// ----- Driver / Session ------------------------------------------------------

#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Opens a brand-new session. Never reuses an earlier one.
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, DriverError>;
}

#[async_trait]
pub trait Session: Send + fmt::Debug {
    async fn execute(
        &mut self,
        statement: &str,
        params: &[Param<'_>],
    ) -> Result<QueryResult, DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;

    fn mode(&self) -> SessionMode;
}

// -----------------------------------------------------------------------------
// ----- ConnectOptions --------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: SecretString,
    pub mode: SessionMode,
}

impl ConnectOptions {
    pub fn for_endpoint(endpoint: &ServerEndpoint, mode: SessionMode) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            database: endpoint.database.clone(),
            user: endpoint.user.clone(),
            password: endpoint.password.clone(),
            mode,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Results ---------------------------------------------------------------

/// One result row, text values by column position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// `None` for SQL NULL or an out-of-range column.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub command_tag: String,
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error {code} ({severity}): {message}")]
    Server {
        severity: String,
        code: String,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The request could not be encoded; nothing was sent.
    #[error("cannot encode request: {0}")]
    Encode(String),

    #[error("session closed")]
    Closed,
}

impl DriverError {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Network trouble and server-side "not right now" conditions are
    /// transient; bad credentials, unknown databases and protocol mismatches
    /// will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Io(_) | DriverError::Timeout(_) | DriverError::Closed => true,
            DriverError::Server { code, .. } => {
                code.starts_with("08")
                    || code.starts_with("53")
                    || matches!(code.as_str(), "57P01" | "57P02" | "57P03")
            }
            DriverError::Auth(_)
            | DriverError::Protocol(_)
            | DriverError::Unsupported(_)
            | DriverError::Encode(_) => false,
        }
    }

    /// Whether the session that produced this error can no longer be used.
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            DriverError::Io(_)
            | DriverError::Timeout(_)
            | DriverError::Closed
            | DriverError::Protocol(_) => true,
            DriverError::Server { severity, .. } => severity == "FATAL" || severity == "PANIC",
            DriverError::Auth(_) | DriverError::Unsupported(_) | DriverError::Encode(_) => false,
        }
    }
}

impl From<ReadError> for DriverError {
    fn from(err: ReadError) -> Self {
        DriverError::Protocol(format!("malformed backend frame: {err}"))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
