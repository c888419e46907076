//! Per-request latency analysis: percentiles, size buckets and per-host
//! breakdowns.
//!
//! Statistics are computed over successful operations inside the active
//! range; errors only show up in segment error counts. Percentiles use the
//! order statistic at index `ceil(p * n) - 1`, clamped to the population.

use std::collections::BTreeMap;

use crate::ops::Operation;

/// Size-bucket span limit as a fraction of the run's average object size.
const BUCKET_SPAN_FRACTION: f64 = 0.05;

/// Request duration statistics in whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationStats {
    pub avg_ms: u64,
    pub median_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Time-to-first-byte statistics in whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtfbStats {
    pub avg_ms: u64,
    pub median_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Per-operation throughput statistics in bytes per second.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputStats {
    pub avg_bps: f64,
    pub median_bps: f64,
    pub p90_bps: f64,
    pub p99_bps: f64,
    pub min_bps: f64,
    pub max_bps: f64,
}

/// A contiguous `[min_size, max_size]` range of operations and its stats.
#[derive(Debug, Clone)]
pub struct SizeBucket {
    pub min_size: u64,
    pub max_size: u64,
    pub count: usize,
    pub avg_size: u64,
    pub avg_duration_ms: u64,
    pub throughput: ThroughputStats,
    pub ttfb: Option<TtfbStats>,
}

/// The latency analysis of one op type's operations.
#[derive(Debug, Clone)]
pub enum RequestAnalysis {
    /// Every operation moved the same number of bytes.
    SingleSized {
        count: usize,
        size: u64,
        durations: DurationStats,
        ttfb: Option<TtfbStats>,
    },
    /// Mixed sizes, clustered into buckets.
    MultiSized { buckets: Vec<SizeBucket> },
}

/// One endpoint's share of the same analysis.
#[derive(Debug, Clone)]
pub struct HostAnalysis {
    pub endpoint: String,
    pub count: usize,
    pub analysis: RequestAnalysis,
}

/// Order statistic at `ceil(p * n) - 1`, clamped to `[0, n - 1]`.
fn ordinal(n: usize, p: f64) -> usize {
    ((p * n as f64).ceil() as usize)
        .saturating_sub(1)
        .min(n.saturating_sub(1))
}

fn round_ms(ns: i64) -> u64 {
    ((ns.max(0) as f64) / 1e6).round() as u64
}

impl DurationStats {
    fn from_ns(mut durations: Vec<i64>) -> Self {
        durations.sort_unstable();
        let n = durations.len();
        let sum: i64 = durations.iter().sum();
        Self {
            avg_ms: round_ms(sum / n as i64),
            median_ms: round_ms(durations[ordinal(n, 0.5)]),
            p90_ms: round_ms(durations[ordinal(n, 0.9)]),
            p99_ms: round_ms(durations[ordinal(n, 0.99)]),
            min_ms: round_ms(durations[0]),
            max_ms: round_ms(durations[n - 1]),
        }
    }
}

impl TtfbStats {
    fn from_ops(ops: &[&Operation]) -> Option<Self> {
        let mut ttfbs: Vec<i64> = ops.iter().filter_map(|o| o.ttfb_ns()).collect();
        if ttfbs.is_empty() {
            return None;
        }
        ttfbs.sort_unstable();
        let n = ttfbs.len();
        let sum: i64 = ttfbs.iter().sum();
        Some(Self {
            avg_ms: round_ms(sum / n as i64),
            median_ms: round_ms(ttfbs[ordinal(n, 0.5)]),
            min_ms: round_ms(ttfbs[0]),
            max_ms: round_ms(ttfbs[n - 1]),
        })
    }
}

impl ThroughputStats {
    fn from_ops(ops: &[&Operation]) -> Self {
        let mut rates: Vec<f64> = ops
            .iter()
            .map(|o| o.size_bytes as f64 / o.duration_secs())
            .collect();
        rates.sort_by(f64::total_cmp);
        let n = rates.len();
        Self {
            avg_bps: rates.iter().sum::<f64>() / n as f64,
            median_bps: rates[ordinal(n, 0.5)],
            p90_bps: rates[ordinal(n, 0.9)],
            p99_bps: rates[ordinal(n, 0.99)],
            min_bps: rates[0],
            max_bps: rates[n - 1],
        }
    }
}

/// Analyze a set of operations of one type. Returns `None` when no
/// successful operation is present.
pub fn analyze_requests(ops: &[&Operation]) -> Option<RequestAnalysis> {
    let ok: Vec<&Operation> = ops.iter().filter(|o| !o.is_error()).copied().collect();
    let first = ok.first()?;
    if ok.iter().all(|o| o.size_bytes == first.size_bytes) {
        let durations: Vec<i64> = ok.iter().map(|o| o.duration_ns()).collect();
        return Some(RequestAnalysis::SingleSized {
            count: ok.len(),
            size: first.size_bytes,
            durations: DurationStats::from_ns(durations),
            ttfb: TtfbStats::from_ops(&ok),
        });
    }

    let buckets = split_sizes(&ok)
        .into_iter()
        .map(|bucket| {
            let sizes: Vec<u64> = bucket.iter().map(|o| o.size_bytes).collect();
            let total_dur: i64 = bucket.iter().map(|o| o.duration_ns()).sum();
            SizeBucket {
                min_size: *sizes.iter().min().unwrap_or(&0),
                max_size: *sizes.iter().max().unwrap_or(&0),
                count: bucket.len(),
                avg_size: sizes.iter().sum::<u64>() / bucket.len() as u64,
                avg_duration_ms: round_ms(total_dur / bucket.len() as i64),
                throughput: ThroughputStats::from_ops(&bucket),
                ttfb: TtfbStats::from_ops(&bucket),
            }
        })
        .collect();
    Some(RequestAnalysis::MultiSized { buckets })
}

/// Cluster operations by payload size.
///
/// Greedy sweep over the size-sorted operations: a bucket closes when
/// admitting the next operation would stretch its span past 5% of the
/// run-average object size.
fn split_sizes<'a>(ops: &[&'a Operation]) -> Vec<Vec<&'a Operation>> {
    let avg = ops.iter().map(|o| o.size_bytes).sum::<u64>() as f64 / ops.len() as f64;
    let span = ((avg * BUCKET_SPAN_FRACTION) as u64).max(1);

    let mut sorted: Vec<&Operation> = ops.to_vec();
    sorted.sort_by_key(|o| o.size_bytes);

    let mut buckets: Vec<Vec<&Operation>> = Vec::new();
    let mut bucket_base = 0u64;
    for op in sorted {
        match buckets.last_mut() {
            Some(bucket) if op.size_bytes - bucket_base <= span => bucket.push(op),
            _ => {
                bucket_base = op.size_bytes;
                buckets.push(vec![op]);
            }
        }
    }
    buckets
}

/// Repeat the request analysis per endpoint. Endpoints with one or fewer
/// requests are omitted.
pub fn analyze_hosts(ops: &[&Operation]) -> Vec<HostAnalysis> {
    let mut by_host: BTreeMap<&str, Vec<&Operation>> = BTreeMap::new();
    for op in ops {
        by_host.entry(op.endpoint.as_str()).or_default().push(op);
    }
    by_host
        .into_iter()
        .filter(|(_, ops)| ops.len() > 1)
        .filter_map(|(endpoint, ops)| {
            Some(HostAnalysis {
                endpoint: endpoint.to_string(),
                count: ops.len(),
                analysis: analyze_requests(&ops)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{test_op, OpType};

    const MS: i64 = 1_000_000;

    #[test]
    fn ordinal_clamps_to_population() {
        assert_eq!(ordinal(1, 0.5), 0);
        assert_eq!(ordinal(1, 0.99), 0);
        assert_eq!(ordinal(10, 0.5), 4);
        assert_eq!(ordinal(10, 0.9), 8);
        assert_eq!(ordinal(10, 0.99), 9);
        assert_eq!(ordinal(100, 0.99), 98);
        assert_eq!(ordinal(4, 0.0), 0);
        assert_eq!(ordinal(4, 1.0), 3);
    }

    #[test]
    fn single_sized_duration_stats() {
        let ops: Vec<Operation> = (1..=10)
            .map(|i| test_op(OpType::Put, 0, 0, i * 10 * MS, 4096))
            .collect();
        let refs: Vec<&Operation> = ops.iter().collect();
        let analysis = analyze_requests(&refs).unwrap();
        match analysis {
            RequestAnalysis::SingleSized {
                count,
                size,
                durations,
                ttfb,
            } => {
                assert_eq!(count, 10);
                assert_eq!(size, 4096);
                assert_eq!(durations.min_ms, 10);
                assert_eq!(durations.max_ms, 100);
                assert_eq!(durations.avg_ms, 55);
                assert_eq!(durations.median_ms, 50);
                assert_eq!(durations.p90_ms, 90);
                assert_eq!(durations.p99_ms, 100);
                assert!(ttfb.is_none());
                assert!(durations.min_ms <= durations.median_ms);
                assert!(durations.median_ms <= durations.max_ms);
            }
            RequestAnalysis::MultiSized { .. } => panic!("expected single-sized"),
        }
    }

    #[test]
    fn errors_are_excluded_from_latency() {
        let mut ops: Vec<Operation> = (1..=4)
            .map(|i| test_op(OpType::Put, 0, 0, i * 10 * MS, 4096))
            .collect();
        let mut bad = test_op(OpType::Put, 0, 0, 900 * MS, 0);
        bad.error = Some("timeout".to_string());
        ops.push(bad);
        let refs: Vec<&Operation> = ops.iter().collect();
        match analyze_requests(&refs).unwrap() {
            RequestAnalysis::SingleSized { count, durations, .. } => {
                assert_eq!(count, 4);
                assert_eq!(durations.max_ms, 40);
            }
            _ => panic!("expected single-sized"),
        }
    }

    #[test]
    fn ttfb_reported_when_present() {
        let ops: Vec<Operation> = (0..4)
            .map(|i| {
                let mut op = test_op(OpType::Get, 0, 0, 100 * MS, 1024);
                op.first_byte_ns = Some((i + 1) * 10 * MS);
                op
            })
            .collect();
        let refs: Vec<&Operation> = ops.iter().collect();
        match analyze_requests(&refs).unwrap() {
            RequestAnalysis::SingleSized { ttfb: Some(t), .. } => {
                assert_eq!(t.min_ms, 10);
                assert_eq!(t.max_ms, 40);
                assert_eq!(t.avg_ms, 25);
                assert_eq!(t.median_ms, 20);
            }
            _ => panic!("expected ttfb"),
        }
    }

    #[test]
    fn mixed_sizes_bucket_by_span() {
        // Two tight clusters far apart: must split into two buckets.
        let mut ops = Vec::new();
        for i in 0..10u64 {
            ops.push(test_op(OpType::Put, 0, 0, 50 * MS, 1_000 + i));
        }
        for i in 0..10u64 {
            ops.push(test_op(OpType::Put, 0, 0, 200 * MS, 1_000_000 + i));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        match analyze_requests(&refs).unwrap() {
            RequestAnalysis::MultiSized { buckets } => {
                assert_eq!(buckets.len(), 2);
                assert_eq!(buckets[0].count, 10);
                assert_eq!(buckets[0].min_size, 1_000);
                assert_eq!(buckets[0].max_size, 1_009);
                assert_eq!(buckets[1].count, 10);
                assert!(buckets[0].throughput.min_bps <= buckets[0].throughput.median_bps);
                assert!(buckets[0].throughput.median_bps <= buckets[0].throughput.max_bps);
            }
            _ => panic!("expected multi-sized"),
        }
    }

    #[test]
    fn bucket_span_tracks_average_size() {
        // Sizes inside one 5%-of-average window stay in one bucket.
        let mut ops = Vec::new();
        for i in 0..20u64 {
            ops.push(test_op(OpType::Put, 0, 0, 50 * MS, 100_000 + i * 10));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        match analyze_requests(&refs).unwrap() {
            RequestAnalysis::MultiSized { buckets } => assert_eq!(buckets.len(), 1),
            RequestAnalysis::SingleSized { .. } => panic!("sizes differ"),
        }
    }

    #[test]
    fn hosts_with_one_request_are_omitted() {
        let mut ops = Vec::new();
        for i in 0..3 {
            let mut op = test_op(OpType::Get, 0, 0, (i + 1) * 10 * MS, 512);
            op.endpoint = "http://a:9000".to_string();
            ops.push(op);
        }
        let mut lone = test_op(OpType::Get, 1, 0, 10 * MS, 512);
        lone.endpoint = "http://b:9000".to_string();
        ops.push(lone);

        let refs: Vec<&Operation> = ops.iter().collect();
        let hosts = analyze_hosts(&refs);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].endpoint, "http://a:9000");
        assert_eq!(hosts[0].count, 3);
    }

    #[test]
    fn all_errors_yields_none() {
        let mut op = test_op(OpType::Put, 0, 0, 10 * MS, 0);
        op.error = Some("refused".to_string());
        let refs: Vec<&Operation> = vec![&op];
        assert!(analyze_requests(&refs).is_none());
    }
}
