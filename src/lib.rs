/*!
 * mongo-driver-core: BSON codec, wire protocol, connection, authentication,
 * server monitoring/SDAM, topology/server selection, connection pooling,
 * cursors, and sessions/transactions for a MongoDB client driver.
 */

pub mod auth;
pub mod bson;
pub mod client;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod logger;
pub mod options;
pub mod pool;
pub mod sdam;
pub mod session;
pub mod topology;
pub mod wire;

pub use bson::{Bson, Document};
pub use client::{Client, Collection, Database};
pub use cursor::Cursor;
pub use error::{Error, ErrorKind, Result};
pub use options::ClientOptions;
pub use session::{Session, SessionOptions, SessionPool};
pub use topology::{OperationType, ReadPreference, ReadPreferenceMode, Topology};
