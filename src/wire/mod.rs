//! Backend frame plumbing shared by the Postgres driver: locating complete
//! frames in a read buffer and decoding their bodies.

pub mod peek;
pub mod reader;

pub use peek::{FramePeek, peek_frame};
pub use reader::{FrameReader, ReadError};
