//! CLI argument surface and its projection onto `DownloadOptions`.

mod progress;
mod units;

pub use progress::ProgressPrinter;
pub use units::parse_size;

use anyhow::{anyhow, Result};
use clap::Parser;

use falcon_core::types::{DownloadOptions, ProxyType};

/// Multi-protocol segmented download tool.
#[derive(Debug, Parser)]
#[command(name = "falcon", version)]
#[command(about = "falcon: multi-protocol segmented download tool", long_about = None)]
pub struct Cli {
    /// URL to download.
    pub url: String,

    /// Output filename (default: derived from the URL).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Output directory (default: current directory).
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<String>,

    /// Concurrent connections for segmented transfers.
    #[arg(short, long, value_name = "N", default_value_t = 4)]
    pub connections: usize,

    /// Download speed limit, with optional K/M/G/T suffix (e.g. 1M, 512K).
    #[arg(short, long, value_name = "SPEED")]
    pub limit: Option<String>,

    /// Per-request network timeout in seconds.
    #[arg(short, long, value_name = "SEC", default_value_t = 30)]
    pub timeout: u64,

    /// Retries per segment before the task fails.
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retry: u32,

    /// Proxy server URL.
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    #[arg(long, value_name = "USER")]
    pub proxy_username: Option<String>,

    #[arg(long, value_name = "PASS")]
    pub proxy_password: Option<String>,

    /// One of: http, socks4, socks5, socks5h.
    #[arg(long, value_name = "TYPE", default_value = "http")]
    pub proxy_type: String,

    /// Disable resume from partial temp files.
    #[arg(long)]
    pub no_resume: bool,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub no_verify_ssl: bool,

    /// Suppress the progress display.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Projects the flags onto engine options. Fails on a malformed speed
    /// limit or proxy type.
    pub fn to_options(&self) -> Result<DownloadOptions> {
        let mut options = DownloadOptions {
            max_connections: self.connections.max(1),
            timeout_seconds: self.timeout.max(1),
            max_retries: self.retry,
            resume_enabled: !self.no_resume,
            verify_ssl: !self.no_verify_ssl,
            ..DownloadOptions::default()
        };
        if let Some(output) = &self.output {
            options.output_filename = output.clone();
        }
        if let Some(dir) = &self.dir {
            options.output_directory = dir.clone();
        }
        if let Some(limit) = &self.limit {
            options.speed_limit = parse_size(limit).map_err(|e| anyhow!(e))?;
        }
        if let Some(proxy) = &self.proxy {
            options.proxy = proxy.clone();
            options.proxy_type = self
                .proxy_type
                .parse::<ProxyType>()
                .map_err(|e| anyhow!(e))?;
            if let Some(user) = &self.proxy_username {
                options.proxy_username = user.clone();
            }
            if let Some(pass) = &self.proxy_password {
                options.proxy_password = pass.clone();
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("falcon").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_follow_engine_defaults() {
        let cli = parse(&["http://example.com/f.iso"]);
        let options = cli.to_options().unwrap();
        assert_eq!(options.max_connections, 4);
        assert_eq!(options.timeout_seconds, 30);
        assert_eq!(options.max_retries, 3);
        assert!(options.resume_enabled);
        assert!(options.verify_ssl);
        assert_eq!(options.speed_limit, 0);
        assert_eq!(options.output_directory, ".");
        assert!(options.output_filename.is_empty());
    }

    #[test]
    fn flags_map_onto_options() {
        let cli = parse(&[
            "-o",
            "out.bin",
            "-d",
            "/downloads",
            "-c",
            "8",
            "-l",
            "2M",
            "-t",
            "10",
            "--retry",
            "5",
            "--no-resume",
            "--no-verify-ssl",
            "http://example.com/f.iso",
        ]);
        let options = cli.to_options().unwrap();
        assert_eq!(options.output_filename, "out.bin");
        assert_eq!(options.output_directory, "/downloads");
        assert_eq!(options.max_connections, 8);
        assert_eq!(options.speed_limit, 2 * 1024 * 1024);
        assert_eq!(options.timeout_seconds, 10);
        assert_eq!(options.max_retries, 5);
        assert!(!options.resume_enabled);
        assert!(!options.verify_ssl);
    }

    #[test]
    fn proxy_flags() {
        let cli = parse(&[
            "--proxy",
            "socks5://127.0.0.1:1080",
            "--proxy-type",
            "socks5h",
            "--proxy-username",
            "u",
            "--proxy-password",
            "p",
            "http://example.com/f",
        ]);
        let options = cli.to_options().unwrap();
        assert_eq!(options.proxy, "socks5://127.0.0.1:1080");
        assert_eq!(options.proxy_type, ProxyType::Socks5h);
        assert_eq!(options.proxy_username, "u");
        assert_eq!(options.proxy_password, "p");
    }

    #[test]
    fn bad_limit_is_rejected() {
        let cli = parse(&["-l", "fast", "http://example.com/f"]);
        assert!(cli.to_options().is_err());
    }

    #[test]
    fn bad_proxy_type_is_rejected() {
        let cli = parse(&[
            "--proxy",
            "http://p",
            "--proxy-type",
            "carrier-pigeon",
            "http://example.com/f",
        ]);
        assert!(cli.to_options().is_err());
    }
}
