//! Comparing two benchmark runs of the same operation type.

use std::time::Duration;

use crate::analyze::{analyze_requests, RequestAnalysis};
use crate::error::{BenchError, Result};
use crate::ops::{OpType, OperationLog};
use crate::segment::{active_range, restrict_to_range, segment};

/// The comparable shape of one run's analysis for one op type.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub op: OpType,
    pub threads: usize,
    pub avg_obj_size: u64,
    pub active_secs: f64,
    /// Whether segment throughput is measured in MiB/s or objects/s.
    pub by_bytes: bool,
    pub avg_rate: f64,
    pub slowest_rate: f64,
    pub median_rate: f64,
    pub fastest_rate: f64,
    pub ttfb_avg_ms: Option<u64>,
}

impl RunSummary {
    pub fn rate_unit(&self) -> &'static str {
        if self.by_bytes {
            "MiB/s"
        } else {
            "obj/s"
        }
    }
}

/// Summarize one op type of a sealed log. Returns `None` when the log has
/// no positive active range or fewer than two segments for that type.
pub fn summarize(log: &OperationLog, op: OpType, seg_dur: Duration) -> Option<RunSummary> {
    let ops = log.by_type(op);
    let seg = segment(op, &ops, seg_dur, true)?;
    if seg.is_skipped() {
        return None;
    }
    let active = restrict_to_range(&ops, active_range(&ops, true)?);

    let threads = {
        let mut t: Vec<(&str, u32)> = ops
            .iter()
            .map(|o| (o.client_id.as_str(), o.thread_id))
            .collect();
        t.sort();
        t.dedup();
        t.len()
    };
    let avg_obj_size = if active.is_empty() {
        0
    } else {
        active.iter().map(|o| o.size_bytes).sum::<u64>() / active.len() as u64
    };
    let ttfb_avg_ms = match analyze_requests(&active) {
        Some(RequestAnalysis::SingleSized { ttfb: Some(t), .. }) => Some(t.avg_ms),
        _ => None,
    };

    let by_bytes = seg.ranked_by_bytes();
    let pick = |s: &crate::segment::Segment| {
        if by_bytes {
            s.mb_per_sec()
        } else {
            s.objs_per_sec()
        }
    };
    Some(RunSummary {
        op,
        threads,
        avg_obj_size,
        active_secs: (seg.active_end_ns - seg.active_start_ns) as f64 / 1e9,
        by_bytes,
        avg_rate: if by_bytes {
            seg.avg_mb_per_sec()
        } else {
            seg.avg_objs_per_sec()
        },
        slowest_rate: pick(seg.slowest()?),
        median_rate: pick(seg.median()?),
        fastest_rate: pick(seg.fastest()?),
        ttfb_avg_ms,
    })
}

/// One compared metric with absolute and signed relative deltas.
#[derive(Debug, Clone)]
pub struct MetricDelta {
    pub name: &'static str,
    pub before: f64,
    pub after: f64,
}

impl MetricDelta {
    pub fn absolute(&self) -> f64 {
        self.after - self.before
    }

    /// `(after - before) / before`; `None` when the baseline is zero.
    pub fn relative(&self) -> Option<f64> {
        (self.before != 0.0).then(|| (self.after - self.before) / self.before)
    }
}

/// A run parameter that differs between the two logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDiff {
    pub name: &'static str,
    pub before: String,
    pub after: String,
}

/// The full diff of two analyses.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub op: OpType,
    pub rate_unit: &'static str,
    pub metrics: Vec<MetricDelta>,
    pub params: Vec<ParamDiff>,
}

/// Diff `after` against `before`. The two summaries must describe the same
/// op type; chronological order is not required.
pub fn compare(before: &RunSummary, after: &RunSummary) -> Result<Comparison> {
    if before.op != after.op {
        return Err(BenchError::BadFlag(format!(
            "cannot compare {} against {}",
            after.op, before.op
        )));
    }

    let mut metrics = vec![
        MetricDelta {
            name: "average throughput",
            before: before.avg_rate,
            after: after.avg_rate,
        },
        MetricDelta {
            name: "fastest segment",
            before: before.fastest_rate,
            after: after.fastest_rate,
        },
        MetricDelta {
            name: "median segment",
            before: before.median_rate,
            after: after.median_rate,
        },
        MetricDelta {
            name: "slowest segment",
            before: before.slowest_rate,
            after: after.slowest_rate,
        },
    ];
    if let (Some(b), Some(a)) = (before.ttfb_avg_ms, after.ttfb_avg_ms) {
        metrics.push(MetricDelta {
            name: "average TTFB",
            before: b as f64,
            after: a as f64,
        });
    }

    let mut params = Vec::new();
    if before.threads != after.threads {
        params.push(ParamDiff {
            name: "concurrency",
            before: before.threads.to_string(),
            after: after.threads.to_string(),
        });
    }
    if before.avg_obj_size != after.avg_obj_size {
        params.push(ParamDiff {
            name: "object size",
            before: format!("{} B", before.avg_obj_size),
            after: format!("{} B", after.avg_obj_size),
        });
    }
    if (before.active_secs - after.active_secs).abs() >= 1.0 {
        params.push(ParamDiff {
            name: "duration",
            before: format!("{:.0}s", before.active_secs),
            after: format!("{:.0}s", after.active_secs),
        });
    }

    Ok(Comparison {
        op: before.op,
        rate_unit: before.rate_unit(),
        metrics,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_op;

    const SEC: i64 = 1_000_000_000;

    /// `threads` serial threads of one-second 1 MiB PUTs over `secs` seconds.
    fn put_log(threads: u32, secs: i64) -> OperationLog {
        let mut log = OperationLog::new("client-a");
        for t in 0..threads {
            for i in 0..secs {
                log.push(test_op(OpType::Put, t, i * SEC, (i + 1) * SEC, 1 << 20));
            }
        }
        log.seal();
        log
    }

    #[test]
    fn summary_reflects_load_shape() {
        let summary = summarize(&put_log(4, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        assert_eq!(summary.op, OpType::Put);
        assert_eq!(summary.threads, 4);
        assert_eq!(summary.avg_obj_size, 1 << 20);
        assert!(summary.by_bytes);
        // Four 1 MiB/s threads.
        assert!((summary.avg_rate - 4.0).abs() < 0.01);
        assert!(summary.slowest_rate <= summary.median_rate);
        assert!(summary.median_rate <= summary.fastest_rate);
    }

    #[test]
    fn doubled_concurrency_shows_positive_relative_delta() {
        let before = summarize(&put_log(4, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        let after = summarize(&put_log(8, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        let cmp = compare(&before, &after).unwrap();

        let avg = &cmp.metrics[0];
        assert_eq!(avg.name, "average throughput");
        assert!(avg.absolute() > 0.0);
        assert!(avg.relative().unwrap() > 0.9);

        // Identical object size: only concurrency differs.
        assert_eq!(cmp.params.len(), 1);
        assert_eq!(cmp.params[0].name, "concurrency");
        assert_eq!(cmp.params[0].before, "4");
        assert_eq!(cmp.params[0].after, "8");
    }

    #[test]
    fn order_of_runs_flips_the_sign() {
        let small = summarize(&put_log(4, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        let big = summarize(&put_log(8, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        let cmp = compare(&big, &small).unwrap();
        assert!(cmp.metrics[0].absolute() < 0.0);
        assert!(cmp.metrics[0].relative().unwrap() < 0.0);
    }

    #[test]
    fn mismatched_op_types_are_rejected() {
        let put = summarize(&put_log(2, 10), OpType::Put, Duration::from_secs(1)).unwrap();
        let mut get = put.clone();
        get.op = OpType::Get;
        assert!(matches!(
            compare(&put, &get),
            Err(BenchError::BadFlag(_))
        ));
    }

    #[test]
    fn relative_delta_absent_on_zero_baseline() {
        let m = MetricDelta {
            name: "average throughput",
            before: 0.0,
            after: 5.0,
        };
        assert_eq!(m.relative(), None);
        assert_eq!(m.absolute(), 5.0);
    }
}
