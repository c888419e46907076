//! Benchmarking harness for S3-compatible object stores.
//!
//! The crate drives a configured mix of object operations (upload, download,
//! delete, list, stat) against one or more endpoints at fixed concurrency for
//! a bounded duration, records per-request timing, and post-processes the
//! recorded log into segmented throughput and latency analyses that can be
//! merged across machines and compared across runs.

pub mod actions;
pub mod analyze;
pub mod collector;
pub mod compare;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod merge;
pub mod ops;
pub mod persist;
pub mod segment;

pub use error::{BenchError, Result};
pub use ops::{OpType, Operation, OperationLog, RunClock};

/// Bytes per mebibyte, used for all MB/s figures.
pub const MIB: f64 = 1_048_576.0;
