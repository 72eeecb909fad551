//! Minimal HTTP/1.1 server that supports HEAD and Range GET for
//! integration tests.
//!
//! Serves a single static body with switches for the behaviours the engine
//! must cope with: HEAD blocked, ranges unsupported or unadvertised,
//! missing Content-Length, throttled body writes, and forced error
//! statuses. Records the ranges clients actually requested.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// If false, omit `Content-Length` from HEAD responses.
    pub send_length: bool,
    /// Every GET fails with this status and an empty body.
    pub fail_gets_with: Option<u16>,
    /// Write the body in `chunk`-byte pieces sleeping `delay_ms` between.
    pub throttle: Option<Throttle>,
}

#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub chunk: usize,
    pub delay_ms: u64,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            send_length: true,
            fail_gets_with: None,
            throttle: None,
        }
    }
}

/// Counters and request log shared with the test.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub head_requests: AtomicUsize,
    pub get_requests: AtomicUsize,
    /// Start offsets of the `Range` headers seen on GETs (None = no Range).
    pub ranges: Mutex<Vec<Option<u64>>>,
}

pub struct RangeServer {
    pub url: String,
    pub stats: Arc<ServerStats>,
}

/// Starts a server in a background thread serving `body` with default
/// options. The server runs until the process exits.
#[allow(dead_code)]
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let stats = Arc::new(ServerStats::default());
    let stats_srv = Arc::clone(&stats);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let stats = Arc::clone(&stats_srv);
            thread::spawn(move || handle(stream, &body, opts, &stats));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/data.bin", port),
        stats,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    stats: &ServerStats,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
        if buf.len() > 64 * 1024 {
            return;
        }
    }
    let request = match std::str::from_utf8(&buf) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        stats.head_requests.fetch_add(1, Ordering::SeqCst);
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let length = if opts.send_length {
            format!("Content-Length: {}\r\n", total)
        } else {
            String::new()
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\n{}Content-Type: application/octet-stream\r\n{}\r\n",
            length, accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        stats.get_requests.fetch_add(1, Ordering::SeqCst);
        stats.ranges.lock().unwrap().push(range.map(|(s, _)| s));

        if let Some(code) = opts.fail_gets_with {
            let response = format!(
                "HTTP/1.1 {} Injected Error\r\nContent-Length: 0\r\n\r\n",
                code
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }

        let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
            Some((start, end_incl)) => {
                let start = start.min(total);
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl {
                    let _ = stream.write_all(
                        format!(
                            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                            total
                        )
                        .as_bytes(),
                    );
                    return;
                }
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    format!("Content-Range: bytes {}-{}/{}\r\n", start, end_incl, total),
                    slice,
                )
            }
            None => ("200 OK", String::new(), body),
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}\r\n",
            status,
            slice.len(),
            content_range,
            accept_ranges
        );
        if stream.write_all(response.as_bytes()).is_err() {
            return;
        }
        match opts.throttle {
            None => {
                let _ = stream.write_all(slice);
            }
            Some(t) => {
                for piece in slice.chunks(t.chunk.max(1)) {
                    if stream.write_all(piece).is_err() {
                        return; // client went away (cancel/pause)
                    }
                    thread::sleep(Duration::from_millis(t.delay_ms));
                }
            }
        }
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(bounds) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = bounds.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
