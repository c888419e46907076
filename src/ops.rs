//! The recorded data model: operations, operation logs and the run clock.

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Maximum length of the error string stored on an operation.
pub const MAX_ERROR_LEN: usize = 256;

/// The kind of S3 request an operation recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpType {
    Put,
    Get,
    Delete,
    List,
    Stat,
}

impl OpType {
    /// The uppercase wire name used in the persisted CSV.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Delete => "DELETE",
            Self::List => "LIST",
            Self::Stat => "STAT",
        }
    }

    /// Parse a wire name back into an op type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUT" => Some(Self::Put),
            "GET" => Some(Self::Get),
            "DELETE" => Some(Self::Delete),
            "LIST" => Some(Self::List),
            "STAT" => Some(Self::Stat),
            _ => None,
        }
    }

    /// Whether a benchmark of this type needs objects uploaded before the
    /// timed phase.
    pub fn needs_prepared_data(&self) -> bool {
        !matches!(self, Self::Put)
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded S3 request.
///
/// Timestamps are wall-clock nanoseconds since the Unix epoch, derived from
/// a monotonic clock with a wall offset captured once at run start (see
/// [`RunClock`]). Within one `(client_id, thread_id)` sequence operations
/// never overlap: each worker is strictly serial.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op_type: OpType,
    pub client_id: String,
    pub endpoint: String,
    pub thread_id: u32,
    /// Objects touched by this request: 1 for PUT/GET/STAT, the batch size
    /// for DELETE and the number of keys returned for LIST.
    pub obj_count: u64,
    /// Payload bytes actually transferred, including partial transfers that
    /// ended in an error.
    pub size_bytes: u64,
    pub start_ns: i64,
    /// First response byte, recorded for GET only.
    pub first_byte_ns: Option<i64>,
    pub end_ns: i64,
    /// Short error description; `None` on success.
    pub error: Option<String>,
}

impl Operation {
    pub fn duration_ns(&self) -> i64 {
        self.end_ns - self.start_ns
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ns() as f64 / 1e9
    }

    /// Time to first byte in nanoseconds, when recorded.
    pub fn ttfb_ns(&self) -> Option<i64> {
        self.first_byte_ns.map(|fb| fb - self.start_ns)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Nanoseconds of this operation falling inside `[from, to)`.
    pub fn overlap_ns(&self, from: i64, to: i64) -> i64 {
        (self.end_ns.min(to) - self.start_ns.max(from)).max(0)
    }
}

/// Truncate and sanitize an error message so it fits one CSV field.
pub fn short_error(err: impl std::fmt::Display) -> String {
    err.to_string()
        .chars()
        .map(|c| match c {
            ',' | '\n' | '\r' => ';',
            c => c,
        })
        .take(MAX_ERROR_LEN)
        .collect()
}

/// Monotonic clock with a wall-clock offset captured at construction.
///
/// Persisted timestamps are wall-clock so logs from NTP-synchronized
/// machines can be merged, while intervals measured within one run stay
/// monotonic.
#[derive(Debug, Clone)]
pub struct RunClock {
    wall_base_ns: i64,
    instant_base: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            wall_base_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            instant_base: Instant::now(),
        }
    }

    /// Current wall-clock time in nanoseconds, monotonic within the run.
    pub fn now_ns(&self) -> i64 {
        self.wall_base_ns + self.instant_base.elapsed().as_nanos() as i64
    }
}

/// Format a wall-clock nanosecond timestamp for reports.
pub fn format_ns(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(ns)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// An ordered collection of recorded operations.
///
/// Owned by the collector during a run and sealed (sorted by start time)
/// before analysis; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    client_id: String,
    ops: Vec<Operation>,
}

impl OperationLog {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ops: Vec::new(),
        }
    }

    pub fn from_ops(client_id: impl Into<String>, ops: Vec<Operation>) -> Self {
        let mut log = Self {
            client_id: client_id.into(),
            ops,
        };
        log.seal();
        log
    }

    /// The client that produced this log. Merged logs keep the per-row
    /// client ids; this is the id of the generating process.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sort by start time. Cross-thread log order carries no meaning, so
    /// analysis always runs on a sealed log.
    pub fn seal(&mut self) {
        self.ops
            .sort_by(|a, b| (a.start_ns, a.end_ns).cmp(&(b.start_ns, b.end_ns)));
    }

    /// Operations of one type, in sealed order.
    pub fn by_type(&self, op: OpType) -> Vec<&Operation> {
        self.ops.iter().filter(|o| o.op_type == op).collect()
    }

    /// Distinct op types present, in ascending enum order.
    pub fn op_types(&self) -> Vec<OpType> {
        let mut types: Vec<OpType> = self.ops.iter().map(|o| o.op_type).collect();
        types.sort();
        types.dedup();
        types
    }

    /// Number of distinct `(client_id, thread_id)` pairs.
    pub fn thread_count(&self) -> usize {
        let mut threads: Vec<(&str, u32)> = self
            .ops
            .iter()
            .map(|o| (o.client_id.as_str(), o.thread_id))
            .collect();
        threads.sort();
        threads.dedup();
        threads.len()
    }

    /// Distinct endpoints, in first-occurrence order.
    pub fn endpoints(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for op in &self.ops {
            if !seen.contains(&op.endpoint.as_str()) {
                seen.push(op.endpoint.as_str());
            }
        }
        seen
    }

    pub fn into_ops(self) -> Vec<Operation> {
        self.ops
    }
}

#[cfg(test)]
pub(crate) fn test_op(
    op_type: OpType,
    thread_id: u32,
    start_ns: i64,
    end_ns: i64,
    size_bytes: u64,
) -> Operation {
    Operation {
        op_type,
        client_id: "client-a".to_string(),
        endpoint: "http://127.0.0.1:9000".to_string(),
        thread_id,
        obj_count: 1,
        size_bytes,
        start_ns,
        first_byte_ns: None,
        end_ns,
        error: None,
    }
}
