//! Minimal HTTP/1.1 framing for the one-request-per-connection RPC model.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;

/// Hard cap on request size (headers plus body).
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Reads one HTTP request from the stream. Returns `None` on malformed or
/// oversized input; the caller just drops the connection.
pub(crate) fn read_request(stream: &mut TcpStream) -> Option<HttpRequest> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return None;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    };

    let header_part = std::str::from_utf8(&buf[..header_end]).ok()?.to_string();
    let body_start = header_end + 4;

    let mut lines = header_part.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return None;
    }

    while buf.len() < body_start + content_length {
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    }

    let body = String::from_utf8_lossy(&buf[body_start..body_start + content_length]).into_owned();
    Some(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Writes a full response and lets the caller close the connection.
pub(crate) fn write_response(
    stream: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    extra_headers: &[(&str, &str)],
    body: &str,
) {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status_code, status_text);
    out.push_str("Server: falcon-daemon\r\n");
    out.push_str("Content-Type: application/json\r\n");
    out.push_str("Connection: close\r\n");
    for (name, value) in extra_headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    out.push_str(body);
    let _ = stream.write_all(out.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_detection() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n"), Some(16));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
