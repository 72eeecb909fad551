//! HTTP/HTTPS protocol handler.
//!
//! Chooses between a single-connection transfer and the segmented
//! downloader: segmentation requires more than one allowed connection, a
//! server that advertises byte ranges, and a known size at least one
//! minimum segment.

mod probe;
mod transfer;

use std::sync::Arc;

use crate::error::FalconError;
use crate::event::{Event, EventDispatcher};
use crate::registry::extract_scheme;
use crate::segment::{SegmentConfig, SegmentedDownloader, TransferOutcome};
use crate::task::DownloadTask;
use crate::types::{DownloadOptions, FileInfo, TaskStatus};

use super::ProtocolHandler;

#[derive(Default)]
pub struct HttpHandler;

impl HttpHandler {
    pub fn new() -> Self {
        Self
    }

    fn download_segmented(
        &self,
        task: &Arc<DownloadTask>,
        listener: &EventDispatcher,
        options: &DownloadOptions,
    ) -> Result<TransferOutcome, FalconError> {
        let config = SegmentConfig {
            num_connections: options.max_connections,
            min_segment_size: options.min_segment_size,
            min_file_size: options.min_segment_size,
            max_retries: options.max_retries,
            retry_delay_ms: options.retry_delay_seconds.saturating_mul(1000),
            ..SegmentConfig::default()
        };
        let downloader = SegmentedDownloader::new(Arc::clone(task), config)?;
        downloader.run(listener, |req| transfer::fetch_segment(req, options))
    }
}

impl ProtocolHandler for HttpHandler {
    fn protocol_name(&self) -> &str {
        "http"
    }

    fn supported_schemes(&self) -> &[&str] {
        &["http", "https"]
    }

    fn supports_resume(&self) -> bool {
        true
    }

    fn supports_segments(&self) -> bool {
        true
    }

    fn can_handle(&self, url: &str) -> bool {
        matches!(
            extract_scheme(url).as_deref(),
            Some("http") | Some("https")
        )
    }

    fn file_info(&self, url: &str, options: &DownloadOptions) -> Result<FileInfo, FalconError> {
        probe::probe(url, options)
    }

    fn download(
        &self,
        task: &Arc<DownloadTask>,
        listener: &EventDispatcher,
    ) -> Result<(), FalconError> {
        let options = task.options().clone();

        let info = match task.file_info() {
            Some(info) => info,
            None => {
                // Resume path: the engine probes on first start only.
                let info = probe::probe(task.url(), &options)?;
                task.set_file_info(info.clone());
                listener.publish(Event::FileInfo {
                    task_id: task.id(),
                    info: info.clone(),
                });
                info
            }
        };

        let use_segments = options.max_connections > 1
            && info.supports_resume
            && info.total_size > 0
            && info.total_size >= options.min_segment_size;

        let outcome = if use_segments {
            self.download_segmented(task, listener, &options)?
        } else {
            transfer::fetch_single(task, listener, &info, &options)?
        };

        match outcome {
            TransferOutcome::Finished => {
                task.transition(TaskStatus::Completed);
                listener.publish(Event::Completed {
                    task_id: task.id(),
                    path: task.output_path().to_path_buf(),
                });
                Ok(())
            }
            // Pause and cancel already moved the status; temp files stay.
            TransferOutcome::Paused | TransferOutcome::Cancelled => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_http_and_https_only() {
        let h = HttpHandler::new();
        assert!(h.can_handle("http://example.com/a"));
        assert!(h.can_handle("HTTPS://example.com/a"));
        assert!(!h.can_handle("ftp://example.com/a"));
        assert!(!h.can_handle("magnet:?xt=x"));
    }

    #[test]
    fn advertises_capabilities() {
        let h = HttpHandler::new();
        assert_eq!(h.protocol_name(), "http");
        assert_eq!(h.supported_schemes(), &["http", "https"]);
        assert!(h.supports_resume());
        assert!(h.supports_segments());
        assert_eq!(h.priority(), 0);
    }
}
