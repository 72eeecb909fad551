//! libcurl plumbing shared by the probe, the single-connection transfer,
//! and the per-segment range fetch.

use std::cell::{Cell, RefCell};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curl::easy::{Easy, List, ProxyType as CurlProxyType};

use crate::error::{classify_curl_error, FalconError};
use crate::event::{Event, EventDispatcher};
use crate::segment::{SegmentRequest, TransferOutcome};
use crate::task::DownloadTask;
use crate::types::{DownloadOptions, FileInfo, ProxyType};

/// Minimum interval between progress events in single-connection mode.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

pub(crate) fn setup_error(e: curl::Error) -> FalconError {
    FalconError::Network(format!("curl setup: {}", e))
}

/// Applies every request-shaping option to a curl handle: redirects,
/// timeout, user agent, referer, proxy (type and credentials), basic auth,
/// SSL verification, cookies, speed limit, and custom headers.
pub(crate) fn apply_request_options(
    easy: &mut Easy,
    options: &DownloadOptions,
) -> Result<(), FalconError> {
    easy.follow_location(options.follow_redirects)
        .map_err(setup_error)?;
    if options.follow_redirects {
        easy.max_redirections(options.max_redirects)
            .map_err(setup_error)?;
    }
    easy.timeout(Duration::from_secs(options.timeout_seconds))
        .map_err(setup_error)?;
    easy.useragent(&options.user_agent).map_err(setup_error)?;
    if !options.referer.is_empty() {
        easy.referer(&options.referer).map_err(setup_error)?;
    }

    if !options.proxy.is_empty() {
        easy.proxy(&options.proxy).map_err(setup_error)?;
        let kind = match options.proxy_type {
            ProxyType::Http => CurlProxyType::Http,
            ProxyType::Socks4 => CurlProxyType::Socks4,
            ProxyType::Socks5 => CurlProxyType::Socks5,
            ProxyType::Socks5h => CurlProxyType::Socks5Hostname,
        };
        easy.proxy_type(kind).map_err(setup_error)?;
        if !options.proxy_username.is_empty() {
            easy.proxy_username(&options.proxy_username)
                .map_err(setup_error)?;
            easy.proxy_password(&options.proxy_password)
                .map_err(setup_error)?;
        }
    }

    if !options.http_username.is_empty() {
        easy.username(&options.http_username).map_err(setup_error)?;
        easy.password(&options.http_password).map_err(setup_error)?;
    }

    if !options.verify_ssl {
        easy.ssl_verify_peer(false).map_err(setup_error)?;
        easy.ssl_verify_host(false).map_err(setup_error)?;
    }

    if !options.cookie_file.is_empty() {
        easy.cookie_file(&options.cookie_file).map_err(setup_error)?;
    }
    if !options.cookie_jar.is_empty() {
        easy.cookie_jar(&options.cookie_jar).map_err(setup_error)?;
    }

    if options.speed_limit > 0 {
        easy.max_recv_speed(options.speed_limit)
            .map_err(setup_error)?;
    }

    if !options.headers.is_empty() {
        let mut list = List::new();
        for (name, value) in &options.headers {
            list.append(&format!("{}: {}", name.trim(), value.trim()))
                .map_err(setup_error)?;
        }
        easy.http_headers(list).map_err(setup_error)?;
    }

    Ok(())
}

/// Status code from an `HTTP/…` status line, if it is one.
fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Fetches one segment range into its temp file, appending when the
/// segment resumes from a previous partial attempt. A 200 response to a
/// non-zero range request means the server ignored `Range`; the transfer
/// is aborted rather than corrupting the segment file.
pub(crate) fn fetch_segment(
    req: &SegmentRequest<'_>,
    options: &DownloadOptions,
) -> Result<(), FalconError> {
    let range_start = req.start + req.resume_from;
    if range_start > req.end {
        return Ok(()); // nothing left to fetch
    }

    let mut file = if req.resume_from > 0 {
        OpenOptions::new().append(true).open(req.path)?
    } else {
        File::create(req.path)?
    };

    let mut easy = Easy::new();
    easy.url(req.url)
        .map_err(|_| FalconError::InvalidUrl(req.url.to_string()))?;
    apply_request_options(&mut easy, options)?;
    easy.progress(true).map_err(setup_error)?;
    easy.range(&format!("{}-{}", range_start, req.end))
        .map_err(setup_error)?;

    let wrote = Cell::new(0u64);
    let status = Cell::new(0u32);
    let range_violated = Cell::new(false);
    let write_failed: RefCell<Option<io::Error>> = RefCell::new(None);

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    if let Some(code) = parse_status_line(line.trim()) {
                        status.set(code);
                        range_violated.set(code == 200 && range_start > 0);
                    }
                }
                true
            })
            .map_err(setup_error)?;
        transfer
            .write_function(|data| {
                if range_violated.get() {
                    return Ok(0);
                }
                if status.get() >= 400 {
                    // Swallow the error body; the status check after
                    // perform turns this into a retryable failure.
                    return Ok(data.len());
                }
                match file.write_all(data) {
                    Ok(()) => {
                        wrote.set(wrote.get() + data.len() as u64);
                        req.progress
                            .fetch_add(data.len() as u64, std::sync::atomic::Ordering::Relaxed);
                        Ok(data.len())
                    }
                    Err(e) => {
                        *write_failed.borrow_mut() = Some(e);
                        Ok(0)
                    }
                }
            })
            .map_err(setup_error)?;
        transfer
            .progress_function(|_, _, _, _| {
                !(req.task.is_cancelled() || req.task.is_paused())
            })
            .map_err(setup_error)?;

        if let Err(e) = transfer.perform() {
            if e.is_write_error() {
                if let Some(io_err) = write_failed.borrow_mut().take() {
                    return Err(FalconError::Filesystem(io_err.to_string()));
                }
                if range_violated.get() {
                    return Err(FalconError::Network(
                        "server ignored range request".into(),
                    ));
                }
            }
            if e.is_aborted_by_callback() {
                return Err(FalconError::Cancelled);
            }
            return Err(classify_curl_error(&e));
        }
    }

    let code = easy
        .response_code()
        .map_err(|e| FalconError::Network(e.to_string()))?;
    if code >= 400 {
        return Err(FalconError::Network(format!("HTTP {}", code)));
    }

    let expected = req.end - range_start + 1;
    if wrote.get() != expected {
        return Err(FalconError::Network(format!(
            "partial transfer: expected {} bytes, got {}",
            expected,
            wrote.get()
        )));
    }

    Ok(())
}

/// Single-connection transfer into `<output>.falcon.tmp`, resuming from
/// the temp file's length when the server supports ranges. On success the
/// temp file is renamed to the final path.
pub(crate) fn fetch_single(
    task: &Arc<DownloadTask>,
    listener: &EventDispatcher,
    info: &FileInfo,
    options: &DownloadOptions,
) -> Result<TransferOutcome, FalconError> {
    let temp = task.temp_path();

    let mut start_offset = 0u64;
    if options.resume_enabled && info.supports_resume {
        if let Ok(meta) = fs::metadata(&temp) {
            start_offset = meta.len();
        }
        if info.total_size > 0 && start_offset > info.total_size {
            start_offset = 0; // stale temp from a different resource
        }
    }

    let mut file = if start_offset > 0 {
        OpenOptions::new().append(true).open(&temp)?
    } else {
        File::create(&temp)?
    };

    let mut easy = Easy::new();
    easy.url(task.url())
        .map_err(|_| FalconError::InvalidUrl(task.url().to_string()))?;
    apply_request_options(&mut easy, options)?;
    easy.progress(true).map_err(setup_error)?;
    if start_offset > 0 {
        easy.resume_from(start_offset).map_err(setup_error)?;
    }

    task.update_progress(start_offset, info.total_size, 0);

    let wrote = Cell::new(start_offset);
    let status = Cell::new(0u32);
    let write_failed: RefCell<Option<io::Error>> = RefCell::new(None);
    let last_emit = Cell::new(Instant::now());
    let last_bytes = Cell::new(start_offset);

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    if let Some(code) = parse_status_line(line.trim()) {
                        status.set(code);
                    }
                }
                true
            })
            .map_err(setup_error)?;
        transfer
            .write_function(|data| {
                if status.get() >= 400 {
                    return Ok(data.len()); // drop the error body
                }
                match file.write_all(data) {
                    Ok(()) => {
                        wrote.set(wrote.get() + data.len() as u64);
                        Ok(data.len())
                    }
                    Err(e) => {
                        *write_failed.borrow_mut() = Some(e);
                        Ok(0)
                    }
                }
            })
            .map_err(setup_error)?;
        transfer
            .progress_function(|dltotal, dlnow, _, _| {
                if task.is_cancelled() || task.is_paused() {
                    return false;
                }
                let elapsed = last_emit.get().elapsed();
                if elapsed >= PROGRESS_INTERVAL {
                    let current = start_offset + dlnow as u64;
                    let total = if dltotal > 0.0 {
                        start_offset + dltotal as u64
                    } else {
                        info.total_size
                    };
                    let speed = ((current.saturating_sub(last_bytes.get())) as f64
                        / elapsed.as_secs_f64()) as u64;
                    task.update_progress(current, total, speed);
                    listener.publish(Event::Progress(task.progress()));
                    last_emit.set(Instant::now());
                    last_bytes.set(current);
                }
                true
            })
            .map_err(setup_error)?;

        if let Err(e) = transfer.perform() {
            if e.is_write_error() {
                if let Some(io_err) = write_failed.borrow_mut().take() {
                    return Err(FalconError::Filesystem(io_err.to_string()));
                }
            }
            if e.is_aborted_by_callback() {
                if task.is_cancelled() {
                    return Ok(TransferOutcome::Cancelled);
                }
                if task.is_paused() {
                    return Ok(TransferOutcome::Paused);
                }
                return Err(FalconError::Cancelled);
            }
            return Err(classify_curl_error(&e));
        }
    }

    let code = easy
        .response_code()
        .map_err(|e| FalconError::Network(e.to_string()))?;
    if code >= 400 {
        return Err(FalconError::Network(format!("HTTP {}", code)));
    }

    file.sync_all()?;
    drop(file);

    let written = wrote.get();
    task.update_progress(written, written.max(info.total_size), 0);
    listener.publish(Event::Progress(task.progress()));

    fs::rename(&temp, task.output_path()).map_err(|e| {
        FalconError::Filesystem(format!(
            "failed to move {} into place: {}",
            temp.display(),
            e
        ))
    })?;

    Ok(TransferOutcome::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 206 Partial Content"), Some(206));
        assert_eq!(parse_status_line("HTTP/2 200"), Some(200));
        assert_eq!(parse_status_line("Content-Length: 5"), None);
    }

    #[test]
    fn request_options_apply_cleanly() {
        let mut easy = Easy::new();
        let mut options = DownloadOptions::default();
        options.referer = "http://ref".into();
        options.http_username = "user".into();
        options.http_password = "pass".into();
        options.speed_limit = 1024;
        options.verify_ssl = false;
        options.set_header("X-Custom", "1");
        apply_request_options(&mut easy, &options).unwrap();
    }

    #[test]
    fn proxy_options_apply_cleanly() {
        let mut easy = Easy::new();
        let mut options = DownloadOptions::default();
        options.proxy = "http://127.0.0.1:8888".into();
        options.proxy_type = ProxyType::Socks5h;
        options.proxy_username = "u".into();
        options.proxy_password = "p".into();
        apply_request_options(&mut easy, &options).unwrap();
    }
}
