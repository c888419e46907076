//! Merging operation logs recorded by several clients.
//!
//! Only the interval where every client was actively running is kept:
//! per-client active ranges are intersected and each operation filtered to
//! that window. No global ordering is reconstructed; the merged log relies
//! on NTP-synchronized wall clocks, just as the timestamps do.

use std::collections::BTreeMap;

use crate::error::{BenchError, Result};
use crate::ops::{Operation, OperationLog};
use crate::segment::active_range;

/// Merge logs from distinct clients into one analyzable log.
///
/// Thread ids are reassigned so every `(client_id, thread_id)` pair maps to
/// a unique global thread, making the result look like one client running
/// the combined concurrency.
pub fn merge(logs: Vec<OperationLog>) -> Result<OperationLog> {
    if logs.len() <= 1 {
        return logs.into_iter().next().ok_or(BenchError::NoOverlap);
    }

    let mut window = (i64::MIN, i64::MAX);
    for log in &logs {
        let refs: Vec<&Operation> = log.ops().iter().collect();
        let (start, end) = active_range(&refs, true).ok_or(BenchError::NoOverlap)?;
        window.0 = window.0.max(start);
        window.1 = window.1.min(end);
    }
    if window.0 >= window.1 {
        return Err(BenchError::NoOverlap);
    }

    let client_ids: Vec<String> = logs.iter().map(|l| l.client_id().to_string()).collect();
    let mut thread_map: BTreeMap<(String, u32), u32> = BTreeMap::new();
    let mut merged = Vec::new();
    for log in logs {
        for op in log.into_ops() {
            if op.start_ns < window.0 || op.end_ns > window.1 {
                continue;
            }
            let next_id = thread_map.len() as u32;
            let thread_id = *thread_map
                .entry((op.client_id.clone(), op.thread_id))
                .or_insert(next_id);
            merged.push(Operation { thread_id, ..op });
        }
    }

    Ok(OperationLog::from_ops(client_ids.join("+"), merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{test_op, OpType};

    const SEC: i64 = 1_000_000_000;

    /// A single-thread log of back-to-back one-second PUTs covering
    /// `[from, to)` seconds.
    fn client_log(client_id: &str, from: i64, to: i64) -> OperationLog {
        let mut log = OperationLog::new(client_id);
        for i in from..to {
            let mut op = test_op(OpType::Put, 0, i * SEC, (i + 1) * SEC, 1000);
            op.client_id = client_id.to_string();
            log.push(op);
        }
        log.seal();
        log
    }

    #[test]
    fn merge_of_one_log_is_identity() {
        let log = client_log("client-a", 0, 10);
        let merged = merge(vec![log.clone()]).unwrap();
        assert_eq!(merged.ops(), log.ops());
    }

    #[test]
    fn disjoint_ranges_fail_with_no_overlap() {
        let a = client_log("client-a", 0, 10);
        let b = client_log("client-b", 20, 30);
        assert!(matches!(merge(vec![a, b]), Err(BenchError::NoOverlap)));
    }

    #[test]
    fn overlap_keeps_only_the_intersection() {
        // Active ranges [1s, 9s) and [6s, 14s): intersection [6s, 9s).
        let a = client_log("client-a", 0, 10);
        let b = client_log("client-b", 5, 15);
        let merged = merge(vec![a.clone(), b]).unwrap();

        assert!(merged
            .ops()
            .iter()
            .all(|op| op.start_ns >= 6 * SEC && op.end_ns <= 9 * SEC));
        // Three one-second ops per client fit the window.
        assert_eq!(merged.len(), 6);
        assert_eq!(merged.thread_count(), 2);
        assert_eq!(merged.client_id(), "client-a+client-b");

        // Throughput over the window is the sum of both clients' shares:
        // 2000 distributed bytes per second across the intersection.
        let refs: Vec<&Operation> = merged.ops().iter().collect();
        let seg =
            crate::segment::segment(OpType::Put, &refs, std::time::Duration::from_secs(1), true)
                .unwrap();
        for s in &seg.segments {
            assert!((s.bytes - 2000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn merged_subset_of_single_client_window_is_from_that_client() {
        let a = client_log("client-a", 0, 10);
        let b = client_log("client-b", 5, 15);
        let merged = merge(vec![a.clone(), b]).unwrap();
        for op in merged.ops().iter().filter(|o| o.client_id == "client-a") {
            assert!(a.ops().iter().any(|orig| {
                orig.start_ns == op.start_ns
                    && orig.end_ns == op.end_ns
                    && orig.size_bytes == op.size_bytes
            }));
        }
    }

    #[test]
    fn threads_are_relabelled_per_client_thread_pair() {
        let mut a = OperationLog::new("client-a");
        let mut b = OperationLog::new("client-b");
        for t in 0..2 {
            for i in 0..10 {
                let mut op = test_op(OpType::Put, t, i * SEC, (i + 1) * SEC, 10);
                op.client_id = "client-a".to_string();
                a.push(op);
                let mut op = test_op(OpType::Put, t, i * SEC, (i + 1) * SEC, 10);
                op.client_id = "client-b".to_string();
                b.push(op);
            }
        }
        a.seal();
        b.seal();
        let merged = merge(vec![a, b]).unwrap();
        assert_eq!(merged.thread_count(), 4);
        let mut ids: Vec<u32> = merged.ops().iter().map(|o| o.thread_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
