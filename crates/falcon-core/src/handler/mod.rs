//! Protocol handler capability interface and built-in implementations.

pub mod http;

use std::sync::Arc;

use crate::error::FalconError;
use crate::event::EventDispatcher;
use crate::task::DownloadTask;
use crate::types::{DownloadOptions, FileInfo};

/// Scheme-specific fetch primitives.
///
/// `download` blocks and drives the task to a terminal status, emitting
/// progress/error/completion events through the listener. `pause` and
/// `cancel` are cross-thread signals observed cooperatively by the running
/// `download` at its next suspension point.
pub trait ProtocolHandler: Send + Sync {
    fn protocol_name(&self) -> &str;

    fn supported_schemes(&self) -> &[&str];

    /// Higher wins when several handlers claim the same scheme.
    fn priority(&self) -> i32 {
        0
    }

    fn supports_resume(&self) -> bool;

    fn supports_segments(&self) -> bool;

    fn can_handle(&self, url: &str) -> bool;

    /// Probes resource metadata without transferring the body.
    fn file_info(&self, url: &str, options: &DownloadOptions)
        -> Result<FileInfo, FalconError>;

    fn download(
        &self,
        task: &Arc<DownloadTask>,
        listener: &EventDispatcher,
    ) -> Result<(), FalconError>;

    fn pause(&self, task: &Arc<DownloadTask>) {
        task.pause();
    }

    fn resume(
        &self,
        task: &Arc<DownloadTask>,
        listener: &EventDispatcher,
    ) -> Result<(), FalconError> {
        self.download(task, listener)
    }

    fn cancel(&self, task: &Arc<DownloadTask>) {
        task.cancel();
    }
}
