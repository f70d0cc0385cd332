use secrecy::{ExposeSecret, SecretString};
use std::{fmt, time::Duration};

// -----------------------------------------------------------------------------
// ----- SessionMode -----------------------------------------------------------

/// How statements on a session are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Every statement commits on its own.
    Autocommit,

    /// Statements accumulate in a transaction until `commit`/`rollback`.
    Transactional,
}

impl SessionMode {
    pub fn from_autocommit(autocommit: bool) -> Self {
        if autocommit {
            SessionMode::Autocommit
        } else {
            SessionMode::Transactional
        }
    }

    pub fn is_autocommit(self) -> bool {
        matches!(self, SessionMode::Autocommit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Autocommit => "autocommit",
            SessionMode::Transactional => "transactional",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Capability ------------------------------------------------------------

/// The intent a caller routes by in the flat pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Write,
    Read,
}

impl Capability {
    pub fn allows(self, endpoint: &ServerEndpoint) -> bool {
        match self {
            Capability::Write => endpoint.accepts_writes,
            Capability::Read => endpoint.accepts_reads,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Write => f.write_str("writing"),
            Capability::Read => f.write_str("reading"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ServerEndpoint --------------------------------------------------------

/// Connection parameters and role capabilities of one database server.
///
/// Endpoints are built once at configuration time and shared behind an `Arc`
/// by every handle that connects to them; nothing mutates them afterwards.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub name: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub accepts_writes: bool,
    pub accepts_reads: bool,
    pub default_mode: SessionMode,
    pub max_lifetime: Option<Duration>,
}

// -----------------------------------------------------------------------------
// ----- ServerEndpoint: Static ------------------------------------------------

impl ServerEndpoint {
    /// A read/write autocommit endpoint with no lifetime limit.
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let password: String = password.into();
        Self {
            name: name.into(),
            database: database.into(),
            host: host.into(),
            port,
            user: user.into(),
            password: SecretString::new(password.into_boxed_str()),
            accepts_writes: true,
            accepts_reads: true,
            default_mode: SessionMode::Autocommit,
            max_lifetime: None,
        }
    }

    /// Masters take writes and reads.
    pub fn master(
        name: impl Into<String>,
        database: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(name, database, host, port, user, password).with_capabilities(true, true)
    }

    /// Slaves only serve reads.
    pub fn slave(
        name: impl Into<String>,
        database: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(name, database, host, port, user, password).with_capabilities(false, true)
    }
}

// -----------------------------------------------------------------------------
// ----- ServerEndpoint: Builder -----------------------------------------------

impl ServerEndpoint {
    pub fn with_capabilities(mut self, accepts_writes: bool, accepts_reads: bool) -> Self {
        self.accepts_writes = accepts_writes;
        self.accepts_reads = accepts_reads;
        self
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Option<Duration>) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ServerEndpoint: Public ------------------------------------------------

impl ServerEndpoint {
    pub fn password_exposed(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.name, self.host, self.port, self.database
        )
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
