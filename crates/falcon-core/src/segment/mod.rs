//! Segmented transfer: range planning and the concurrent per-segment
//! download loop.

mod downloader;
mod plan;

pub use downloader::{SegmentRequest, SegmentedDownloader, TransferOutcome};
pub use plan::{plan_segment_count, plan_segments};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::types::Bytes;

/// One contiguous byte range `[start, end]` (inclusive) of the resource.
///
/// `active` means exactly one worker currently holds the segment;
/// `completed` is monotonic. Together the segments of a plan tile
/// `[0, total_size)` without gaps or overlap.
#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub start: Bytes,
    pub end: Bytes,
    pub active: AtomicBool,
    pub completed: AtomicBool,
    pub downloaded: AtomicU64,
    pub retries: AtomicU32,
}

impl Segment {
    pub fn new(index: usize, start: Bytes, end: Bytes) -> Self {
        Self {
            index,
            start,
            end,
            active: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            downloaded: AtomicU64::new(0),
            retries: AtomicU32::new(0),
        }
    }

    /// Segment length in bytes; a segment always spans at least one byte.
    pub fn len(&self) -> Bytes {
        self.end - self.start + 1
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Tuning for segmentation and per-segment retries.
#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    /// Target concurrency; 0 lets the planner pick.
    pub num_connections: usize,
    pub min_segment_size: Bytes,
    pub max_segment_size: Bytes,
    /// Below this size the transfer is never split.
    pub min_file_size: Bytes,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Bytes/s below which the monitor logs a slow-transfer warning; 0 off.
    pub slow_speed_threshold: u64,
    /// Non-uniform segment sizes growing from first to last.
    pub adaptive_sizing: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            num_connections: 4,
            min_segment_size: 1024 * 1024,
            max_segment_size: 64 * 1024 * 1024,
            min_file_size: 1024 * 1024,
            max_retries: 3,
            retry_delay_ms: 1000,
            slow_speed_threshold: 0,
            adaptive_sizing: false,
        }
    }
}
