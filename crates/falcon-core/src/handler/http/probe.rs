//! HEAD-equivalent metadata probe.
//!
//! Collects response headers via libcurl and parses the handful the engine
//! cares about: length, range support, content type, filename hint, and
//! the last-modified stamp for resume heuristics.

use crate::error::{classify_curl_error, FalconError};
use crate::types::{DownloadOptions, FileInfo};
use crate::url_model;

use super::transfer::{apply_request_options, setup_error};

/// Issues the probe and assembles a `FileInfo`. An HTTP status >= 400 is a
/// `Network` failure.
pub(crate) fn probe(url: &str, options: &DownloadOptions) -> Result<FileInfo, FalconError> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|_| FalconError::InvalidUrl(url.to_string()))?;
    easy.nobody(true).map_err(setup_error)?;
    apply_request_options(&mut easy, options)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = std::str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(setup_error)?;
        transfer
            .perform()
            .map_err(|e| classify_curl_error(&e))?;
    }

    let code = easy
        .response_code()
        .map_err(|e| FalconError::Network(e.to_string()))?;
    if code >= 400 {
        return Err(FalconError::Network(format!("HTTP {}", code)));
    }

    let final_url = easy
        .effective_url()
        .ok()
        .flatten()
        .unwrap_or(url)
        .to_string();

    Ok(parse_head(&final_url, &lines))
}

/// Parses collected header lines into a `FileInfo` for `final_url`.
pub(crate) fn parse_head(final_url: &str, lines: &[String]) -> FileInfo {
    let mut total_size = 0u64;
    let mut supports_resume = false;
    let mut content_type = String::new();
    let mut content_disposition: Option<String> = None;
    let mut last_modified: Option<String> = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                total_size = n;
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            supports_resume = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = value.to_string();
        } else if name.eq_ignore_ascii_case("content-disposition") {
            content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            last_modified = Some(value.to_string());
        }
    }

    let filename = url_model::derive_filename(final_url, content_disposition.as_deref());

    FileInfo {
        url: final_url.to_string(),
        filename,
        total_size,
        supports_resume,
        content_type,
        last_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_length_and_range_support() {
        let info = parse_head(
            "http://h/file.bin",
            &lines(&[
                "HTTP/1.1 200 OK",
                "Content-Length: 12345",
                "Accept-Ranges: bytes",
                "Content-Type: application/octet-stream",
            ]),
        );
        assert_eq!(info.total_size, 12345);
        assert!(info.supports_resume);
        assert_eq!(info.content_type, "application/octet-stream");
        assert_eq!(info.filename, "file.bin");
    }

    #[test]
    fn accept_ranges_none_means_no_resume() {
        let info = parse_head(
            "http://h/x",
            &lines(&["Content-Length: 9", "Accept-Ranges: none"]),
        );
        assert!(!info.supports_resume);
    }

    #[test]
    fn missing_length_stays_zero() {
        let info = parse_head("http://h/x", &lines(&["HTTP/1.1 200 OK"]));
        assert_eq!(info.total_size, 0);
    }

    #[test]
    fn content_disposition_drives_filename() {
        let info = parse_head(
            "http://h/ignored.bin",
            &lines(&["Content-Disposition: attachment; filename=\"report.pdf\""]),
        );
        assert_eq!(info.filename, "report.pdf");
    }

    #[test]
    fn bare_host_defaults_filename() {
        let info = parse_head("http://h/", &lines(&[]));
        assert_eq!(info.filename, "download");
    }

    #[test]
    fn last_modified_is_captured() {
        let info = parse_head(
            "http://h/x",
            &lines(&["Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT"]),
        );
        assert_eq!(
            info.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }
}
