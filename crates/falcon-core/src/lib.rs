pub mod config;
pub mod logging;

pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod segment;
pub mod task;
pub mod types;
pub mod url_model;

pub use engine::DownloadEngine;
pub use error::FalconError;
pub use event::{DispatchMode, Event, EventDispatcher, EventListener};
pub use handler::ProtocolHandler;
pub use task::DownloadTask;
pub use types::{
    DownloadOptions, EngineConfig, EngineStats, FileInfo, ProgressInfo, ProxyType, TaskId,
    TaskStatus,
};
