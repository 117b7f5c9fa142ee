//! cinder-core: the storage and concurrency engine.
//!
//! Owns the sharded keyspace dictionaries, the per-key lock manager,
//! version-based optimistic transactions (WATCH/MULTI/EXEC), key
//! expiration, the sorted-set index, and append-only-log persistence.
//! The wire protocol and TCP session lifecycle live in sibling crates;
//! the engine only sees decoded command vectors and a narrow connection
//! capability trait.

pub mod aof;
pub mod cmd;
pub mod commands;
pub mod conn;
pub mod db;
pub mod dict;
pub mod lock;
pub mod pubsub;
pub mod router;
pub mod txn;
pub mod types;
pub mod wheel;
pub mod zset;

pub use cmd::CommandTable;
pub use conn::{Connection, VirtualConnection};
pub use db::Db;
pub use router::{Router, RouterConfig, DB_COUNT};
pub use types::Value;
