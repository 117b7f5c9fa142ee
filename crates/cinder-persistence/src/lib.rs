//! cinder-persistence: durability layer.
//!
//! The append-only log is a flat sequential file of RESP-encoded command
//! arrays, optionally interleaved with `SELECT` records when the target
//! database changes. This crate owns the file format and I/O: appending
//! records, streaming them back for replay (optionally bounded to a
//! byte prefix), and the atomic file swap used by log rewrite.
//!
//! Orchestration — who writes which record when, replay into an embedded
//! database, compaction — lives in `cinder-core`; this crate knows
//! nothing about the engine.

pub mod log;

pub use log::{LogReader, LogWriter, PersistenceError};
