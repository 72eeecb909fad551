//! Segment count selection and range planning.

use super::{Segment, SegmentConfig};
use crate::types::Bytes;

/// Picks the segment count for a file.
///
/// The count is clamped into `[ceil(size/max_segment), size/min_segment]`;
/// when that interval is empty (small files) the transfer gets a single
/// segment. An explicit `num_connections` is honoured within the interval;
/// otherwise the planner starts from 4 and caps the automatic choice at 8.
pub fn plan_segment_count(file_size: Bytes, config: &SegmentConfig) -> usize {
    if file_size == 0 || file_size < config.min_file_size {
        return 1;
    }

    let min_seg = config.min_segment_size.max(1);
    let max_seg = config.max_segment_size.max(min_seg);
    let lower = ((file_size + max_seg - 1) / max_seg).max(1);
    let upper = file_size / min_seg;
    if upper < lower {
        return 1;
    }

    let desired = if config.num_connections > 0 {
        config.num_connections as Bytes
    } else {
        4u64.clamp(lower, upper.min(8))
    };
    desired.clamp(lower, upper) as usize
}

/// Builds the segment plan. The returned segments tile `[0, file_size)`
/// exactly; the last segment absorbs any remainder. Empty for a zero-size
/// file.
pub fn plan_segments(file_size: Bytes, config: &SegmentConfig) -> Vec<Segment> {
    if file_size == 0 {
        return Vec::new();
    }

    let count = plan_segment_count(file_size, config);
    if count <= 1 {
        return vec![Segment::new(0, 0, file_size - 1)];
    }

    if config.adaptive_sizing {
        plan_adaptive(file_size, count, config)
    } else {
        plan_equal(file_size, count)
    }
}

fn plan_equal(file_size: Bytes, count: usize) -> Vec<Segment> {
    let base = file_size / count as Bytes;
    let mut out = Vec::with_capacity(count);
    let mut pos = 0;
    for i in 0..count {
        let end = if i == count - 1 {
            file_size - 1
        } else {
            pos + base - 1
        };
        out.push(Segment::new(i, pos, end));
        pos = end + 1;
    }
    out
}

/// Non-uniform sizes growing across the plan: the multiplier interpolates
/// linearly over [0.5, 2.0], each size clamped to the configured bounds,
/// and the last segment extended to cover the remainder. Sizes are capped
/// so every later segment keeps at least one byte and tiling stays exact.
fn plan_adaptive(file_size: Bytes, count: usize, config: &SegmentConfig) -> Vec<Segment> {
    let base = file_size / count as Bytes;
    let mut out = Vec::with_capacity(count);
    let mut pos = 0;
    for i in 0..count {
        let end = if i == count - 1 {
            file_size - 1
        } else {
            let multiplier = 0.5 + 1.5 * i as f64 / (count as f64 - 1.0);
            let mut want = (base as f64 * multiplier) as Bytes;
            want = want.clamp(config.min_segment_size, config.max_segment_size);
            let remaining = file_size - pos;
            let later_segments = (count - 1 - i) as Bytes;
            want = want.min(remaining.saturating_sub(later_segments)).max(1);
            pos + want - 1
        };
        out.push(Segment::new(i, pos, end));
        pos = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles_exactly(segments: &[Segment], size: Bytes) {
        assert!(!segments.is_empty());
        assert_eq!(segments[0].start, 0);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1, "gap or overlap");
        }
        assert_eq!(segments.last().unwrap().end, size - 1);
    }

    fn config(connections: usize, min: Bytes, max: Bytes) -> SegmentConfig {
        SegmentConfig {
            num_connections: connections,
            min_segment_size: min,
            max_segment_size: max,
            min_file_size: min,
            ..SegmentConfig::default()
        }
    }

    #[test]
    fn small_file_single_segment() {
        let cfg = SegmentConfig::default();
        assert_eq!(plan_segment_count(1000, &cfg), 1);
        let segs = plan_segments(1000, &cfg);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, 0);
        assert_eq!(segs[0].end, 999);
    }

    #[test]
    fn zero_size_plans_nothing() {
        assert!(plan_segments(0, &SegmentConfig::default()).is_empty());
    }

    #[test]
    fn connection_count_honoured_within_bounds() {
        let cfg = config(4, 256 * 1024, 64 * 1024 * 1024);
        assert_eq!(plan_segment_count(1024 * 1024, &cfg), 4);
    }

    #[test]
    fn count_clamped_by_min_segment_size() {
        // 1 MiB file, 512 KiB minimum: at most 2 segments even with 8 wanted.
        let cfg = config(8, 512 * 1024, 64 * 1024 * 1024);
        assert_eq!(plan_segment_count(1024 * 1024, &cfg), 2);
    }

    #[test]
    fn count_raised_by_max_segment_size() {
        // 10 MiB file, 2 MiB maximum: at least 5 segments even with 2 wanted.
        let cfg = config(2, 1024, 2 * 1024 * 1024);
        assert_eq!(plan_segment_count(10 * 1024 * 1024, &cfg), 5);
    }

    #[test]
    fn auto_count_defaults_to_four() {
        let cfg = config(0, 1024, 64 * 1024 * 1024);
        assert_eq!(plan_segment_count(1024 * 1024, &cfg), 4);
    }

    #[test]
    fn equal_plan_tiles_with_remainder_on_last() {
        let cfg = config(4, 1, u64::MAX);
        let segs = plan_segments(1003, &cfg);
        assert_eq!(segs.len(), 4);
        tiles_exactly(&segs, 1003);
        assert_eq!(segs[0].len(), 250);
        assert_eq!(segs[3].len(), 253); // remainder absorbed by the last
    }

    #[test]
    fn equal_plan_exact_division() {
        let cfg = config(4, 1, u64::MAX);
        let segs = plan_segments(1000, &cfg);
        tiles_exactly(&segs, 1000);
        assert!(segs.iter().all(|s| s.len() == 250));
    }

    #[test]
    fn adaptive_plan_tiles_and_grows() {
        let mut cfg = config(4, 1, u64::MAX);
        cfg.adaptive_sizing = true;
        let segs = plan_segments(100_000, &cfg);
        assert_eq!(segs.len(), 4);
        tiles_exactly(&segs, 100_000);
        // Multiplier grows from 0.5 toward 2.0 across the plan.
        assert!(segs[0].len() < segs[1].len());
        assert!(segs[1].len() < segs[2].len());
    }

    #[test]
    fn adaptive_single_segment_ignores_multiplier() {
        let mut cfg = SegmentConfig::default();
        cfg.adaptive_sizing = true;
        let segs = plan_segments(1000, &cfg);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].end, 999);
    }

    #[test]
    fn adaptive_plan_respects_clamps() {
        let mut cfg = config(4, 20_000, 30_000);
        cfg.adaptive_sizing = true;
        let segs = plan_segments(100_000, &cfg);
        tiles_exactly(&segs, 100_000);
        for seg in &segs[..segs.len() - 1] {
            assert!(seg.len() >= 20_000 && seg.len() <= 30_000);
        }
    }
}
