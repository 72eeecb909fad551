//! `falcon`: single-shot download CLI.

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use falcon_core::logging;
use falcon_core::types::{EngineConfig, TaskStatus};
use falcon_core::DownloadEngine;

use crate::cli::{Cli, ProgressPrinter};

/// Exit code for a user interrupt, matching shell convention (128+SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Cli::parse();
    let options = match args.to_options() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("falcon: {}", err);
            return 1;
        }
    };

    let engine = DownloadEngine::with_default_handlers(EngineConfig {
        max_concurrent_tasks: 1,
        ..EngineConfig::default()
    });
    if !args.quiet {
        engine.add_listener(Arc::new(ProgressPrinter));
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let engine = engine.clone();
        let interrupted = Arc::clone(&interrupted);
        if let Err(err) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            engine.cancel_all();
        }) {
            tracing::warn!("failed to install signal handler: {}", err);
        }
    }

    let task = match engine.add_task(&args.url, options) {
        Ok(task) => task,
        Err(err) => {
            eprintln!("falcon: {}", err);
            return 1;
        }
    };

    task.wait_finished(None);
    engine.shutdown();

    match task.status() {
        TaskStatus::Completed => 0,
        TaskStatus::Cancelled if interrupted.load(Ordering::SeqCst) => EXIT_INTERRUPTED,
        TaskStatus::Cancelled => 1,
        _ => {
            let message = task.error_message();
            if !message.is_empty() {
                eprintln!("falcon: {}", message);
            }
            1
        }
    }
}
