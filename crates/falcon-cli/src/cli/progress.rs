//! Console progress rendering, driven by engine events.

use std::io::Write;

use falcon_core::event::{Event, EventListener};
use falcon_core::types::TaskStatus;

use super::units::format_bytes;

const BAR_WIDTH: usize = 30;

/// Prints a single-line progress bar that redraws in place, plus one-shot
/// status lines on start, completion, and failure.
pub struct ProgressPrinter;

impl EventListener for ProgressPrinter {
    fn on_event(&self, event: &Event) {
        match event {
            Event::StatusChanged { task_id, new, .. } => match new {
                TaskStatus::Downloading => {
                    clear_line();
                    println!("downloading task {}", task_id);
                }
                TaskStatus::Paused => {
                    clear_line();
                    println!("paused task {}", task_id);
                }
                TaskStatus::Cancelled => {
                    clear_line();
                    println!("cancelled task {}", task_id);
                }
                _ => {}
            },
            Event::Progress(info) => {
                let filled = (info.fraction() * BAR_WIDTH as f64) as usize;
                let bar: String = (0..BAR_WIDTH)
                    .map(|i| {
                        if i < filled {
                            '='
                        } else if i == filled {
                            '>'
                        } else {
                            ' '
                        }
                    })
                    .collect();
                let total = if info.total_bytes > 0 {
                    format_bytes(info.total_bytes)
                } else {
                    "???".to_string()
                };
                let eta = match info.eta_seconds() {
                    Some(secs) => format_eta(secs),
                    None => "--:--".to_string(),
                };
                print!(
                    "\r\x1b[K[{}] {:3}% {}/{} | {}/s | ETA {}",
                    bar,
                    (info.fraction() * 100.0) as u32,
                    format_bytes(info.downloaded_bytes),
                    total,
                    format_bytes(info.speed),
                    eta
                );
                let _ = std::io::stdout().flush();
            }
            Event::Completed { path, .. } => {
                clear_line();
                println!("saved to {}", path.display());
            }
            Event::Error { task_id, message } => {
                clear_line();
                eprintln!("task {} failed: {}", task_id, message);
            }
            Event::FileInfo { info, .. } => {
                if info.total_size > 0 {
                    println!(
                        "{} ({})",
                        info.filename,
                        format_bytes(info.total_size)
                    );
                }
            }
        }
    }
}

fn clear_line() {
    print!("\r\x1b[K");
    let _ = std::io::stdout().flush();
}

fn format_eta(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
