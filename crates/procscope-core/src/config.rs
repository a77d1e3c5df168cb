//! Application settings and TOML configuration parsing.
//!
//! Defaults are chosen so the daemon runs with no config file at all; the
//! environment variables `HOST`, `PORT`, `LOG_LEVEL`, and `PROCSCOPE_TOKEN`
//! override whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Top-level procscope configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcscopeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Path to the JSON-lines suspicious-event log.
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// Tracing filter when neither `PROCSCOPE_LOG` nor `LOG_LEVEL` is set.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required by the kill endpoint. Empty disables it.
    #[serde(default)]
    pub kill_token: String,

    /// Maximum concurrent push subscribers.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    /// Server heartbeat cadence, seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Close a subscriber whose last inbound frame is older than this.
    #[serde(default = "default_client_idle_secs")]
    pub client_idle_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_subscribers() -> usize {
    100
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_client_idle_secs() -> u64 {
    35
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            kill_token: String::new(),
            max_subscribers: default_max_subscribers(),
            heartbeat_secs: default_heartbeat_secs(),
            client_idle_secs: default_client_idle_secs(),
        }
    }
}

/// Scan-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Load-shedding cap on processes considered per scan, in collector
    /// order (no re-rank by suspicion; rows past the cap are dropped).
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Enrichment batch width.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Codesign worker pool size.
    #[serde(default = "default_pool_workers")]
    pub pool_workers: usize,

    /// Overall deadline for the concurrent collector triple, seconds.
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    /// Caller-side wait on a pooled signature lookup, milliseconds.
    #[serde(default = "default_signature_wait_ms")]
    pub signature_wait_ms: u64,

    /// Outbound-socket count beyond which a signature lookup is requested.
    #[serde(default = "default_signature_outbound_threshold")]
    pub signature_outbound_threshold: u32,
}

fn default_max_processes() -> usize {
    200
}

fn default_batch_size() -> usize {
    10
}

fn default_pool_workers() -> usize {
    2
}

fn default_scan_timeout_secs() -> u64 {
    15
}

fn default_signature_wait_ms() -> u64 {
    2000
}

fn default_signature_outbound_threshold() -> u32 {
    50
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_processes: default_max_processes(),
            batch_size: default_batch_size(),
            pool_workers: default_pool_workers(),
            scan_timeout_secs: default_scan_timeout_secs(),
            signature_wait_ms: default_signature_wait_ms(),
            signature_outbound_threshold: default_signature_outbound_threshold(),
        }
    }
}

fn default_audit_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".procscope/suspicious-processes.log")
}

impl Default for ProcscopeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scan: ScanConfig::default(),
            audit_log_path: default_audit_log_path(),
            log_level: None,
        }
    }
}

impl ProcscopeConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `HOST`, `PORT`, `LOG_LEVEL`, and `PROCSCOPE_TOKEN` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = Some(level);
            }
        }
        if let Ok(token) = std::env::var("PROCSCOPE_TOKEN") {
            if !token.is_empty() {
                self.server.kill_token = token;
            }
        }
    }
}
