//! On-disk configuration, loaded from `~/.config/falcon/config.toml`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::types::EngineConfig;

/// Engine- and daemon-level settings persisted between runs. Per-task
/// options come from the caller, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FalconConfig {
    /// Admission cap on concurrently running tasks.
    pub max_concurrent_tasks: usize,
    /// Start admitted tasks immediately while below the cap.
    pub auto_start: bool,
    /// Advisory aggregate download budget in bytes/s; 0 = unlimited.
    pub global_speed_limit: u64,
    /// JSON-RPC daemon settings.
    pub rpc: RpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub bind_address: String,
    pub listen_port: u16,
    /// aria2-style shared secret; empty disables authentication.
    pub secret: String,
    pub enable_cors: bool,
}

impl Default for FalconConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            auto_start: true,
            global_speed_limit: 0,
            rpc: RpcConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            listen_port: 6800,
            secret: String::new(),
            enable_cors: false,
        }
    }
}

impl FalconConfig {
    /// Projects the file settings onto a runtime engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            auto_start: self.auto_start,
            global_speed_limit: self.global_speed_limit,
            ..EngineConfig::default()
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("falcon")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FalconConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FalconConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FalconConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = FalconConfig::default();
        assert_eq!(cfg.max_concurrent_tasks, 5);
        assert!(cfg.auto_start);
        assert_eq!(cfg.global_speed_limit, 0);
        assert_eq!(cfg.rpc.bind_address, "127.0.0.1");
        assert_eq!(cfg.rpc.listen_port, 6800);
        assert!(cfg.rpc.secret.is_empty());
        assert!(!cfg.rpc.enable_cors);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = FalconConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: FalconConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_tasks, cfg.max_concurrent_tasks);
        assert_eq!(parsed.rpc.listen_port, cfg.rpc.listen_port);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml = r#"
            max_concurrent_tasks = 3

            [rpc]
            listen_port = 7000
            secret = "s3cret"
        "#;
        let cfg: FalconConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert!(cfg.auto_start);
        assert_eq!(cfg.rpc.listen_port, 7000);
        assert_eq!(cfg.rpc.secret, "s3cret");
        assert_eq!(cfg.rpc.bind_address, "127.0.0.1");
    }

    #[test]
    fn engine_config_projection() {
        let mut cfg = FalconConfig::default();
        cfg.max_concurrent_tasks = 2;
        cfg.auto_start = false;
        let engine = cfg.engine_config();
        assert_eq!(engine.max_concurrent_tasks, 2);
        assert!(!engine.auto_start);
    }
}
