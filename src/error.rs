//! Error types for the benchmark harness.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the benchmark driver and the analysis engine.
///
/// Per-request S3 failures are not represented here: they are recorded
/// inside the failing [`crate::ops::Operation`] and treated as data.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The host specification could not be expanded into endpoints.
    #[error("invalid endpoint spec: {0}")]
    BadEndpointSpec(String),

    /// A flag value was rejected after parsing.
    #[error("invalid flag: {0}")]
    BadFlag(String),

    /// A duration or time-of-day value could not be parsed.
    #[error("invalid duration: {0}")]
    BadDuration(String),

    /// The target bucket could not be created or cleaned.
    #[error("bucket setup failed: {0}")]
    BucketSetup(String),

    /// No worker produced a successful operation inside the stall window.
    #[error("no successful operations within {0:?}, aborting benchmark")]
    AllWorkersFailing(Duration),

    /// A malformed non-terminal record was found while loading a log.
    #[error("corrupt benchmark log: {0}")]
    LogCorrupted(String),

    /// The merged clients have no overlapping active interval.
    #[error("no overlapping active interval between client logs")]
    NoOverlap,

    /// An S3 request failed outside the measured path (setup or teardown).
    #[error("S3 error: {0}")]
    S3(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a bucket setup error.
    pub fn bucket(msg: impl Into<String>) -> Self {
        Self::BucketSetup(msg.into())
    }

    /// Create an S3 error from anything displayable.
    pub fn s3(msg: impl Into<String>) -> Self {
        Self::S3(msg.into())
    }

    /// Create an endpoint spec error.
    pub fn endpoint(msg: impl Into<String>) -> Self {
        Self::BadEndpointSpec(msg.into())
    }

    /// Create a log corruption error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::LogCorrupted(msg.into())
    }

    /// The process exit code for this error kind.
    ///
    /// 1 for configuration errors, 2 for runtime errors during the
    /// benchmark, 3 for analysis errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BadEndpointSpec(_) | Self::BadFlag(_) | Self::BadDuration(_) => 1,
            Self::BucketSetup(_) | Self::AllWorkersFailing(_) | Self::S3(_) | Self::Io(_) => 2,
            Self::LogCorrupted(_) | Self::NoOverlap => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_kind() {
        assert_eq!(BenchError::endpoint("x").exit_code(), 1);
        assert_eq!(BenchError::BadFlag("x".into()).exit_code(), 1);
        assert_eq!(BenchError::bucket("x").exit_code(), 2);
        assert_eq!(
            BenchError::AllWorkersFailing(Duration::from_secs(30)).exit_code(),
            2
        );
        assert_eq!(BenchError::corrupt("x").exit_code(), 3);
        assert_eq!(BenchError::NoOverlap.exit_code(), 3);
    }
}
