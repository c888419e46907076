//! Benchmark configuration and flag-value parsing.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::{BenchError, Result};
use crate::ops::OpType;

/// Default target bucket.
pub const DEFAULT_BUCKET: &str = "warp-benchmark-bucket";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Window after which a run with zero successful operations is aborted.
pub const STALL_WINDOW: Duration = Duration::from_secs(30);

/// Accepted `--serverprof` values. The hint is forwarded to the server
/// admin API, which is outside this tool.
pub const SERVER_PROFILES: &[&str] = &["cpu", "mem", "block", "mutex", "trace"];

/// Connection parameters shared by every command that talks to S3.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Host spec, e.g. `10.0.0.{1...4}:9000`.
    pub host: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub tls: bool,
    /// Request server-side encryption on uploads.
    pub encrypt: bool,
    pub bucket: String,
}

impl ConnectConfig {
    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        Self {
            host: "127.0.0.1:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            tls: false,
            encrypt: false,
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

/// Everything the driver needs for one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub connect: ConnectConfig,
    pub op: OpType,
    /// Stable id of this client, stamped on every recorded operation.
    pub client_id: String,
    pub concurrent: usize,
    pub duration: Duration,
    /// Objects uploaded before the timed phase (GET/DELETE/LIST/STAT).
    pub objects: usize,
    pub obj_size: u64,
    /// Batch size for DELETE requests and page size for LIST.
    pub batch: usize,
    /// Disable the per-thread `T<thread>/` key prefix.
    pub noprefix: bool,
    /// Skip bucket cleaning before and after the run.
    pub noclear: bool,
    /// Local time-of-day barrier all clients wait on before measuring.
    pub sync_start: Option<NaiveTime>,
    /// Where the operation log is streamed; `None` keeps it in memory only.
    pub benchdata: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Optional GET byte range: read the first N bytes of each object.
    pub range: Option<u64>,
    /// Seed for the run's payload source.
    pub seed: u64,
}

impl BenchConfig {
    /// Validate cross-flag constraints before any work happens.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent == 0 {
            return Err(BenchError::BadFlag("concurrent must be at least 1".into()));
        }
        if self.duration.is_zero() {
            return Err(BenchError::BadDuration("duration must be positive".into()));
        }
        if self.op == OpType::Put && self.obj_size == 0 {
            return Err(BenchError::BadFlag("obj.size must be positive".into()));
        }
        if self.op.needs_prepared_data() && self.objects == 0 {
            return Err(BenchError::BadFlag(format!(
                "{} benchmarks need --objects > 0",
                self.op
            )));
        }
        if matches!(self.op, OpType::Delete | OpType::List) && self.batch == 0 {
            return Err(BenchError::BadFlag("batch must be at least 1".into()));
        }
        if let Some(range) = self.range {
            if range == 0 || range > self.obj_size {
                return Err(BenchError::BadFlag(format!(
                    "range must be in 1..={}",
                    self.obj_size
                )));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn test_default(op: OpType) -> Self {
        Self {
            connect: ConnectConfig::test_default(),
            op,
            client_id: "client-test".to_string(),
            concurrent: 2,
            duration: Duration::from_secs(1),
            objects: 10,
            obj_size: 1024,
            batch: 5,
            noprefix: false,
            noclear: false,
            sync_start: None,
            benchdata: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            range: None,
            seed: 42,
        }
    }
}

/// The default client id: unique enough to merge logs from several
/// machines without extra flags.
pub fn default_client_id() -> String {
    format!("warp-{}", std::process::id())
}

/// Parse an object size with IEC suffixes (`1MiB`, `64k`, plain bytes).
pub fn parse_obj_size(s: &str) -> Result<u64> {
    parse_size::parse_size(s).map_err(|e| BenchError::BadFlag(format!("obj.size {s:?}: {e}")))
}

/// Parse a duration flag (`5s`, `2m30s`).
pub fn parse_duration_flag(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).map_err(|e| BenchError::BadDuration(format!("{s:?}: {e}")))
}

/// Parse a `--syncstart HH:MM` local time of day.
pub fn parse_sync_start(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| BenchError::BadDuration(format!("syncstart {s:?}: {e}")))
}

/// Validate a `--serverprof` value.
pub fn parse_server_profile(s: &str) -> Result<String> {
    if SERVER_PROFILES.contains(&s) {
        Ok(s.to_string())
    } else {
        Err(BenchError::BadFlag(format!(
            "serverprof {s:?} not one of {}",
            SERVER_PROFILES.join(", ")
        )))
    }
}
