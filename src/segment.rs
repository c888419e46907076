//! Time-segmented throughput.
//!
//! The recorded log keeps warm-up and cool-down; analysis first trims to
//! the active range, then splits it into fixed-width segments. Bytes and
//! objects are distributed: an operation contributes to each segment in
//! proportion to the fraction of its runtime overlapping that segment.
//! Without that, any operation longer than the segment width (a large PUT
//! against 1-second segments) would leave most segments empty.

use std::collections::HashMap;
use std::time::Duration;

use crate::ops::{format_ns, OpType, Operation};
use crate::MIB;

/// Aggregate throughput over one `[start, start + dur)` slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    pub start_ns: i64,
    pub dur_ns: i64,
    /// Distributed byte count.
    pub bytes: f64,
    /// Distributed object count.
    pub objects: f64,
    /// Operations fully contained in the segment.
    pub full_ops: u64,
    /// Operations overlapping but not contained.
    pub partial_ops: u64,
    pub ops_started: u64,
    pub ops_ended: u64,
    /// Errors, attributed to the segment containing the operation's end.
    pub errors: u64,
}

impl Segment {
    pub fn end_ns(&self) -> i64 {
        self.start_ns + self.dur_ns
    }

    pub fn dur_secs(&self) -> f64 {
        self.dur_ns as f64 / 1e9
    }

    pub fn mb_per_sec(&self) -> f64 {
        self.bytes / MIB / self.dur_secs()
    }

    pub fn objs_per_sec(&self) -> f64 {
        self.objects / self.dur_secs()
    }

    pub fn ops_ended_per_sec(&self) -> f64 {
        self.ops_ended as f64 / self.dur_secs()
    }
}

/// The segmented view of one op type's operations.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub op: OpType,
    pub active_start_ns: i64,
    pub active_end_ns: i64,
    /// Chronological segments of equal width; a final slice shorter than
    /// the segment duration is dropped.
    pub segments: Vec<Segment>,
}

impl Segmentation {
    /// Fewer than two segments carry no comparative information; such an
    /// analysis is marked skipped rather than reported.
    pub fn is_skipped(&self) -> bool {
        self.segments.len() < 2
    }

    /// Whether segments are ranked by bytes or by objects per second.
    pub fn ranked_by_bytes(&self) -> bool {
        self.segments.iter().any(|s| s.bytes > 0.0)
    }

    fn rate(&self, seg: &Segment) -> f64 {
        if self.ranked_by_bytes() {
            seg.mb_per_sec()
        } else {
            seg.objs_per_sec()
        }
    }

    /// Segments sorted ascending by throughput.
    pub fn by_throughput(&self) -> Vec<&Segment> {
        let mut sorted: Vec<&Segment> = self.segments.iter().collect();
        sorted.sort_by(|a, b| self.rate(a).total_cmp(&self.rate(b)));
        sorted
    }

    pub fn slowest(&self) -> Option<&Segment> {
        self.by_throughput().first().copied()
    }

    pub fn median(&self) -> Option<&Segment> {
        let sorted = self.by_throughput();
        sorted.get(sorted.len() / 2).copied()
    }

    pub fn fastest(&self) -> Option<&Segment> {
        self.by_throughput().last().copied()
    }

    /// Nanoseconds covered by the segments (excludes the dropped tail).
    pub fn covered_ns(&self) -> i64 {
        self.segments.iter().map(|s| s.dur_ns).sum()
    }

    pub fn total_bytes(&self) -> f64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    pub fn total_objects(&self) -> f64 {
        self.segments.iter().map(|s| s.objects).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.segments.iter().map(|s| s.errors).sum()
    }

    pub fn avg_mb_per_sec(&self) -> f64 {
        let secs = self.covered_ns() as f64 / 1e9;
        if secs > 0.0 {
            self.total_bytes() / MIB / secs
        } else {
            0.0
        }
    }

    pub fn avg_objs_per_sec(&self) -> f64 {
        let secs = self.covered_ns() as f64 / 1e9;
        if secs > 0.0 {
            self.total_objects() / secs
        } else {
            0.0
        }
    }
}

/// The interval a set of operations was actively measured over.
///
/// With `all_threads` the range starts when the last thread completed its
/// first operation and ends when the first thread stopped accepting work,
/// so reported throughput reflects steady state with every worker engaged.
/// Without it (per-host analysis) the range simply spans the operations.
pub fn active_range(ops: &[&Operation], all_threads: bool) -> Option<(i64, i64)> {
    if ops.is_empty() {
        return None;
    }
    let (start, end) = if all_threads {
        // Per thread: end of its first completed op, start of its last.
        let mut per_thread: HashMap<(&str, u32), (i64, i64)> = HashMap::new();
        for op in ops {
            let entry = per_thread
                .entry((op.client_id.as_str(), op.thread_id))
                .or_insert((i64::MAX, i64::MIN));
            entry.0 = entry.0.min(op.end_ns);
            entry.1 = entry.1.max(op.start_ns);
        }
        let start = per_thread.values().map(|v| v.0).max()?;
        let end = per_thread.values().map(|v| v.1).min()?;
        (start, end)
    } else {
        let start = ops.iter().map(|o| o.start_ns).min()?;
        let end = ops.iter().map(|o| o.end_ns).max()?;
        (start, end)
    };
    (start < end).then_some((start, end))
}

/// Operations wholly inside `[from, to)` by start and end.
pub fn restrict_to_range<'a>(ops: &[&'a Operation], range: (i64, i64)) -> Vec<&'a Operation> {
    ops.iter()
        .filter(|o| o.start_ns >= range.0 && o.end_ns <= range.1)
        .copied()
        .collect()
}

/// Segment one op type's operations. Returns `None` when no positive
/// active range exists.
pub fn segment(
    op: OpType,
    ops: &[&Operation],
    seg_dur: Duration,
    all_threads: bool,
) -> Option<Segmentation> {
    let (t0, t1) = active_range(ops, all_threads)?;
    let d = seg_dur.as_nanos() as i64;
    if d <= 0 {
        return None;
    }
    let count = ((t1 - t0) / d) as usize;
    if count == 0 {
        // Active range shorter than one segment: nothing to attribute.
        return Some(Segmentation {
            op,
            active_start_ns: t0,
            active_end_ns: t1,
            segments: Vec::new(),
        });
    }
    let mut segments: Vec<Segment> = (0..count)
        .map(|k| Segment {
            start_ns: t0 + k as i64 * d,
            dur_ns: d,
            ..Segment::default()
        })
        .collect();
    let span_end = t0 + count as i64 * d;

    for op in ops {
        let dur = op.duration_ns();
        if dur <= 0 {
            continue;
        }
        if op.end_ns <= t0 || op.start_ns >= span_end {
            continue;
        }
        let lo = ((op.start_ns - t0).max(0) / d) as usize;
        let hi = (((op.end_ns - 1).min(span_end - 1) - t0) / d) as usize;
        for seg in &mut segments[lo..=hi] {
            let overlap = op.overlap_ns(seg.start_ns, seg.end_ns());
            if overlap <= 0 {
                continue;
            }
            let frac = overlap as f64 / dur as f64;
            seg.bytes += op.size_bytes as f64 * frac;
            seg.objects += op.obj_count as f64 * frac;
            if op.start_ns >= seg.start_ns && op.end_ns <= seg.end_ns() {
                seg.full_ops += 1;
            } else {
                seg.partial_ops += 1;
            }
            if op.start_ns >= seg.start_ns && op.start_ns < seg.end_ns() {
                seg.ops_started += 1;
            }
            if op.end_ns >= seg.start_ns && op.end_ns < seg.end_ns() {
                seg.ops_ended += 1;
                if op.is_error() {
                    seg.errors += 1;
                }
            }
        }
    }

    Some(Segmentation {
        op,
        active_start_ns: t0,
        active_end_ns: t1,
        segments,
    })
}

/// CSV header for segment exports.
pub const SEGMENTS_CSV_HEADER: &str = "index,op,duration_s,objects_per_op,bytes,full_ops,partial_ops,ops_started,ops_ended,errors,mb_per_sec,ops_ended_per_sec,objs_per_sec,start_time,end_time";

/// Render one segmentation as CSV rows (header not included).
pub fn segments_csv_rows(seg: &Segmentation, objects_per_op: f64) -> Vec<String> {
    seg.segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{},{},{:.2},{:.2},{:.0},{},{},{},{},{},{:.3},{:.3},{:.3},{},{}",
                i,
                seg.op.name(),
                s.dur_secs(),
                objects_per_op,
                s.bytes,
                s.full_ops,
                s.partial_ops,
                s.ops_started,
                s.ops_ended,
                s.errors,
                s.mb_per_sec(),
                s.ops_ended_per_sec(),
                s.objs_per_sec(),
                format_ns(s.start_ns),
                format_ns(s.end_ns()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_op;

    const SEC: i64 = 1_000_000_000;

    fn seg_dur() -> Duration {
        Duration::from_secs(1)
    }

    // Two threads: thread 0 active over [0s, 10s), thread 1 over [1s, 9s).
    // All-threads active range must be [first ends][..last starts).
    #[test]
    fn active_range_trims_to_slowest_starter_and_earliest_finisher() {
        let mut ops = Vec::new();
        for i in 0..10 {
            ops.push(test_op(OpType::Put, 0, i * SEC, (i + 1) * SEC, 100));
        }
        for i in 1..9 {
            ops.push(test_op(OpType::Put, 1, i * SEC, (i + 1) * SEC, 100));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        // Thread 0 first end: 1s; thread 1 first end: 2s -> start = 2s.
        // Thread 0 last start: 9s; thread 1 last start: 8s -> end = 8s.
        assert_eq!(active_range(&refs, true), Some((2 * SEC, 8 * SEC)));
        assert_eq!(active_range(&refs, false), Some((0, 10 * SEC)));
    }

    #[test]
    fn active_range_empty_or_inverted_is_none() {
        assert_eq!(active_range(&[], true), None);
        // One thread still preparing while the other already finished.
        let a = test_op(OpType::Put, 0, 0, 10 * SEC, 100);
        let b = test_op(OpType::Put, 1, 0, SEC, 100);
        let refs: Vec<&Operation> = [&a, &b].to_vec();
        // start = max(10s, 1s) = 10s, end = min(0, 0) = 0 -> inverted.
        assert_eq!(active_range(&refs, true), None);
    }

    #[test]
    fn straddling_op_is_distributed_proportionally() {
        // One 4-second op across four 1-second segments.
        let op = test_op(OpType::Put, 0, 0, 4 * SEC, 4000);
        let pad = test_op(OpType::Put, 1, 0, 4 * SEC, 0);
        let refs: Vec<&Operation> = vec![&op, &pad];
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        assert_eq!(seg.segments.len(), 4);
        for s in &seg.segments {
            assert!((s.bytes - 1000.0).abs() < 1e-6);
            assert_eq!(s.partial_ops, 2);
            assert_eq!(s.full_ops, 0);
        }
        assert_eq!(seg.segments[0].ops_started, 2);
        assert_eq!(seg.segments[3].ops_ended, 0); // end == span boundary
    }

    #[test]
    fn final_partial_segment_is_dropped() {
        // Active range [0, 3.5s): three full segments, half a second dropped.
        let a = test_op(OpType::Put, 0, 0, 3 * SEC + SEC / 2, 700);
        let refs: Vec<&Operation> = vec![&a];
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        assert_eq!(seg.segments.len(), 3);
        assert_eq!(seg.covered_ns(), 3 * SEC);
    }

    #[test]
    fn mass_is_conserved_over_covered_span() {
        let mut ops = Vec::new();
        for i in 0..7 {
            ops.push(test_op(OpType::Put, 0, i * SEC / 2, i * SEC / 2 + (3 * SEC) / 2, 999));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        let span = (seg.active_start_ns, seg.active_start_ns + seg.covered_ns());
        let expected: f64 = refs
            .iter()
            .map(|op| {
                op.size_bytes as f64 * op.overlap_ns(span.0, span.1) as f64
                    / op.duration_ns() as f64
            })
            .sum();
        assert!((seg.total_bytes() - expected).abs() < 1e-6);
    }

    #[test]
    fn errors_attribute_to_ending_segment() {
        let ok = test_op(OpType::Put, 0, 0, 3 * SEC, 300);
        let mut bad = test_op(OpType::Put, 1, SEC / 2, SEC + SEC / 2, 0);
        bad.error = Some("timeout".to_string());
        let refs: Vec<&Operation> = vec![&ok, &bad];
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        assert_eq!(seg.segments.len(), 3);
        assert_eq!(seg.segments[0].errors, 0);
        assert_eq!(seg.segments[1].errors, 1);
        assert_eq!(seg.segments[2].errors, 0);
    }

    #[test]
    fn ranking_surfaces_extremes_and_median() {
        // Three segments with increasing byte rates.
        let mut ops = Vec::new();
        for (i, bytes) in [100u64, 300, 200].iter().enumerate() {
            ops.push(test_op(OpType::Put, 0, i as i64 * SEC, (i as i64 + 1) * SEC, *bytes));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        assert!(!seg.is_skipped());
        assert!(seg.ranked_by_bytes());
        let slowest = seg.slowest().unwrap();
        let median = seg.median().unwrap();
        let fastest = seg.fastest().unwrap();
        assert!((slowest.bytes - 100.0).abs() < 1e-6);
        assert!((median.bytes - 200.0).abs() < 1e-6);
        assert!((fastest.bytes - 300.0).abs() < 1e-6);
        assert!(slowest.mb_per_sec() <= median.mb_per_sec());
        assert!(median.mb_per_sec() <= fastest.mb_per_sec());
    }

    #[test]
    fn zero_byte_ops_rank_by_objects() {
        let mut ops = Vec::new();
        for i in 0..4 {
            let mut op = test_op(OpType::Delete, 0, i * SEC, (i + 1) * SEC, 0);
            op.obj_count = 100;
            ops.push(op);
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        let seg = segment(OpType::Delete, &refs, seg_dur(), false).unwrap();
        assert!(!seg.ranked_by_bytes());
        assert!(seg.fastest().unwrap().objs_per_sec() > 0.0);
    }

    #[test]
    fn single_segment_is_skipped() {
        let a = test_op(OpType::Put, 0, 0, SEC, 100);
        let refs: Vec<&Operation> = vec![&a];
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        assert_eq!(seg.segments.len(), 1);
        assert!(seg.is_skipped());
    }

    #[test]
    fn restrict_filters_by_containment() {
        let ops = [
            test_op(OpType::Put, 0, 0, SEC, 1),
            test_op(OpType::Put, 0, SEC, 2 * SEC, 1),
            test_op(OpType::Put, 0, 2 * SEC, 4 * SEC, 1),
        ];
        let refs: Vec<&Operation> = ops.iter().collect();
        let inside = restrict_to_range(&refs, (SEC, 3 * SEC));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].start_ns, SEC);
    }

    #[test]
    fn csv_rows_match_segment_count() {
        let mut ops = Vec::new();
        for i in 0..3 {
            ops.push(test_op(OpType::Put, 0, i * SEC, (i + 1) * SEC, 1024));
        }
        let refs: Vec<&Operation> = ops.iter().collect();
        let seg = segment(OpType::Put, &refs, seg_dur(), false).unwrap();
        let rows = segments_csv_rows(&seg, 1.0);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("0,PUT,1.00,"));
        assert_eq!(
            rows[0].split(',').count(),
            SEGMENTS_CSV_HEADER.split(',').count()
        );
    }
}
