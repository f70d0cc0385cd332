pub mod admin;
pub mod analytics;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod errors;
pub mod flat;
pub mod handle;
pub mod routing;
pub mod topology;
pub mod wire;

pub use config::Config;
pub use driver::{Driver, PgDriver, QueryResult, Row, Session};
pub use endpoint::{Capability, ServerEndpoint, SessionMode};
pub use errors::{CursorStateError, PoolError};
pub use flat::{FlatConnection, FlatPool, RefreshReport};
pub use handle::{CheckOutcome, ConnectionHandle, CursorHandle, HandleLease, PoolSettings};
pub use routing::Picker;
pub use topology::{Connection, TopologyPool, TransactionalConnection};
