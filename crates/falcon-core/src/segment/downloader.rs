//! Concurrent execution of a segment plan.
//!
//! Workers pull segments from a forward-only cursor, fetch each range into
//! its own temp file with linear-backoff retries, and the finished plan is
//! concatenated into the final output. Pause and cancel are observed
//! between attempts and inside the transport callbacks; cancellation
//! leaves the segment temp files on disk for inspection.

use std::fs;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::FalconError;
use crate::event::{Event, EventDispatcher};
use crate::task::{segment_temp_path, DownloadTask};
use crate::types::Bytes;

use super::{plan_segments, Segment, SegmentConfig};

/// How a segmented run ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All segments fetched and merged into the final path.
    Finished,
    /// The pause flag stopped the run; temp files remain for resume.
    Paused,
    /// The cancel flag stopped the run; temp files remain for inspection.
    Cancelled,
}

/// Everything a transport needs to fetch one segment range.
pub struct SegmentRequest<'a> {
    pub url: &'a str,
    /// Absolute range of the whole segment, inclusive.
    pub start: Bytes,
    pub end: Bytes,
    /// Bytes already on disk for this segment; the transport appends from
    /// `start + resume_from`.
    pub resume_from: Bytes,
    pub path: &'a Path,
    /// Source of the cooperative pause/cancel flags.
    pub task: &'a DownloadTask,
    /// Shared counter of bytes landed this run, fed by the write path.
    pub progress: &'a AtomicU64,
}

pub struct SegmentedDownloader {
    task: Arc<DownloadTask>,
    url: String,
    output_path: PathBuf,
    config: SegmentConfig,
    segments: Vec<Segment>,
    cursor: AtomicUsize,
    total_downloaded: AtomicU64,
    last_error: Mutex<Option<FalconError>>,
}

impl std::fmt::Debug for SegmentedDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedDownloader")
            .field("url", &self.url)
            .field("output_path", &self.output_path)
            .finish_non_exhaustive()
    }
}

impl SegmentedDownloader {
    /// Plans segments for the task's known total size and picks up any
    /// bytes already present in segment temp files from an earlier run:
    /// a full-length file marks its segment completed without refetching,
    /// a shorter one becomes that segment's resume offset.
    pub fn new(task: Arc<DownloadTask>, config: SegmentConfig) -> Result<Self, FalconError> {
        let total = task.total_bytes();
        if total == 0 {
            return Err(FalconError::Filesystem(
                "segmented download requires a known file size".into(),
            ));
        }

        let url = task.url().to_string();
        let output_path = task.output_path().to_path_buf();
        let segments = plan_segments(total, &config);
        let mut already_present: Bytes = 0;
        for seg in &segments {
            let path = segment_temp_path(&output_path, seg.index);
            if let Ok(meta) = fs::metadata(&path) {
                let len = meta.len().min(seg.len());
                if len == seg.len() {
                    seg.completed.store(true, Ordering::Release);
                }
                seg.downloaded.store(len, Ordering::Relaxed);
                already_present += len;
            }
        }

        Ok(Self {
            task,
            url,
            output_path,
            config,
            segments,
            cursor: AtomicUsize::new(0),
            total_downloaded: AtomicU64::new(already_present),
            last_error: Mutex::new(None),
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn completed_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_completed()).count()
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        segment_temp_path(&self.output_path, index)
    }

    /// Runs the plan to completion, pause, or cancellation.
    pub fn run<F>(
        &self,
        listener: &EventDispatcher,
        fetch: F,
    ) -> Result<TransferOutcome, FalconError>
    where
        F: Fn(&SegmentRequest<'_>) -> Result<(), FalconError> + Sync,
    {
        let incomplete = self.segments.iter().filter(|s| !s.is_completed()).count();
        if incomplete > 0 {
            let workers = self.config.num_connections.max(1).min(incomplete);
            let monitor_done = AtomicBool::new(false);
            std::thread::scope(|scope| {
                let monitor = scope.spawn(|| self.monitor(listener, &monitor_done));
                let handles: Vec<_> = (0..workers)
                    .map(|_| scope.spawn(|| self.worker(&fetch)))
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
                monitor_done.store(true, Ordering::Release);
                let _ = monitor.join();
            });
        }

        if self.task.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }
        if self.task.is_paused() {
            return Ok(TransferOutcome::Paused);
        }
        if !self.segments.iter().all(|s| s.is_completed()) {
            let err = self.last_error.lock().unwrap().take();
            return Err(err.unwrap_or_else(|| {
                FalconError::Network("download incomplete: not all segments finished".into())
            }));
        }

        self.merge()?;
        let total = self.task.total_bytes();
        self.task.update_progress(total, total, 0);
        Ok(TransferOutcome::Finished)
    }

    /// Worker loop: claim the next unstarted segment, fetch it with
    /// retries, repeat until the cursor is exhausted or a flag stops us.
    fn worker<F>(&self, fetch: &F)
    where
        F: Fn(&SegmentRequest<'_>) -> Result<(), FalconError> + Sync,
    {
        loop {
            if self.task.is_cancelled() || self.task.is_paused() {
                return;
            }
            let seg = match self.allocate() {
                Some(seg) => seg,
                None => return,
            };
            self.run_segment(seg, fetch);
        }
    }

    /// Advances the cursor to the next segment that is neither completed
    /// nor held by another worker, marking it active.
    fn allocate(&self) -> Option<&Segment> {
        loop {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            let seg = self.segments.get(i)?;
            if !seg.is_completed() && !seg.active.swap(true, Ordering::AcqRel) {
                return Some(seg);
            }
        }
    }

    fn run_segment<F>(&self, seg: &Segment, fetch: &F)
    where
        F: Fn(&SegmentRequest<'_>) -> Result<(), FalconError> + Sync,
    {
        let path = self.segment_path(seg.index);
        loop {
            if self.task.is_cancelled() || self.task.is_paused() {
                break;
            }

            let resume_from = fs::metadata(&path)
                .map(|m| m.len())
                .unwrap_or(0)
                .min(seg.len());
            let request = SegmentRequest {
                url: &self.url,
                start: seg.start,
                end: seg.end,
                resume_from,
                path: &path,
                task: &self.task,
                progress: &self.total_downloaded,
            };

            match fetch(&request) {
                Ok(()) => {
                    seg.downloaded.store(seg.len(), Ordering::Relaxed);
                    seg.completed.store(true, Ordering::Release);
                    break;
                }
                Err(FalconError::Cancelled) => break,
                Err(e) => {
                    let retries = seg.retries.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        segment = seg.index,
                        attempt = retries,
                        "segment fetch failed: {}",
                        e
                    );
                    let retryable = e.is_retryable();
                    *self.last_error.lock().unwrap() = Some(e);
                    if !retryable || retries > self.config.max_retries {
                        break;
                    }
                    self.backoff(retries);
                }
            }
        }
        seg.active.store(false, Ordering::Release);
    }

    /// Linear backoff (`retry_delay_ms × retry_count`), short-circuited by
    /// the cancel flag.
    fn backoff(&self, retries: u32) {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.retry_delay_ms * retries as u64);
        while Instant::now() < deadline {
            if self.task.is_cancelled() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Once per second: refresh the rolling speed estimate and publish a
    /// progress event, unless the task is paused.
    fn monitor(&self, listener: &EventDispatcher, done: &AtomicBool) {
        let total = self.task.total_bytes();
        let mut last_bytes = self.total_downloaded.load(Ordering::Relaxed);
        let mut last_tick = Instant::now();
        while !done.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
            let elapsed = last_tick.elapsed();
            if elapsed < Duration::from_secs(1) {
                continue;
            }
            let downloaded = self.total_downloaded.load(Ordering::Relaxed);
            let speed =
                ((downloaded.saturating_sub(last_bytes)) as f64 / elapsed.as_secs_f64()) as u64;
            last_bytes = downloaded;
            last_tick = Instant::now();

            self.task.update_progress(downloaded, total, speed);
            if self.config.slow_speed_threshold > 0 && speed < self.config.slow_speed_threshold {
                tracing::debug!(task = self.task.id(), speed, "transfer below speed threshold");
            }
            if !self.task.is_paused() && !self.task.is_cancelled() {
                listener.publish(Event::Progress(self.task.progress()));
            }
        }
    }

    /// Concatenates segment files in index order into the final path, then
    /// deletes them. Only runs after every segment completed.
    fn merge(&self) -> Result<(), FalconError> {
        let mut out = File::create(&self.output_path)?;
        for seg in &self.segments {
            let path = self.segment_path(seg.index);
            let file = File::open(&path)?;
            let copied = io::copy(&mut file.take(seg.len()), &mut out)?;
            if copied != seg.len() {
                return Err(FalconError::Filesystem(format!(
                    "segment {} truncated: {} of {} bytes",
                    seg.index,
                    copied,
                    seg.len()
                )));
            }
        }
        out.sync_all()?;
        drop(out);
        for seg in &self.segments {
            let _ = fs::remove_file(self.segment_path(seg.index));
        }
        Ok(())
    }
}
