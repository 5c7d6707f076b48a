use crate::cost::ModelPrice;
use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Durable storage
    pub db_path: String,

    // Debug & logging
    pub debug: bool,
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    // Request body size limit (bytes)
    pub max_request_body_bytes: usize,

    // Retry transport
    pub retry: RetryConfig,

    // Streaming timeouts
    pub timeout: TimeoutConfig,

    // SSE keep-alive comment interval (seconds)
    pub keep_alive_secs: u64,

    // Request detail capture
    pub request_detail_enabled: bool,
    pub detail: DetailConfig,

    /// Prompt-cache TTL forced onto the `cache_control` blocks of
    /// Claude-bound requests: "" (leave as sent), "5m", or "1h".
    pub cache_ttl_override: String,

    // Pending log sweep
    pub pending_sweep: PendingSweepConfig,

    // Price overrides, keyed by model name
    pub model_prices: HashMap<String, ModelPrice>,

    // Channel cache refresh interval (seconds)
    pub channel_refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8410,
            db_path: "conduit.db".to_string(),
            debug: false,
            logging_to_file: false,
            log_dir: None,
            max_request_body_bytes: 10 * 1024 * 1024,
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
            keep_alive_secs: 15,
            request_detail_enabled: true,
            detail: DetailConfig::default(),
            cache_ttl_override: String::new(),
            pending_sweep: PendingSweepConfig::default(),
            model_prices: HashMap::new(),
            channel_refresh_secs: 30,
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml_ng::from_str(&contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            matches!(self.cache_ttl_override.as_str(), "" | "5m" | "1h"),
            "cache-ttl-override must be \"\", \"5m\", or \"1h\""
        );
        anyhow::ensure!(self.retry.max_attempts >= 1, "retry.max-attempts must be >= 1");
        anyhow::ensure!(
            self.max_request_body_bytes > 0,
            "max-request-body-bytes must be positive"
        );
        anyhow::ensure!(self.detail.max_entries > 0, "detail.max-entries must be positive");
        Ok(())
    }

    fn sanitize(&mut self) {
        if self.keep_alive_secs == 0 {
            self.keep_alive_secs = 15;
        }
        if self.channel_refresh_secs == 0 {
            self.channel_refresh_secs = 30;
        }
    }
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

/// Retry transport configuration. Live-reloadable through the config
/// watcher; in-flight requests keep the settings they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    /// First-byte gate deadline for SSE responses.
    pub gate_timeout_ms: u64,
    /// Bodies above this are not buffered for replay (single attempt).
    pub max_body_bytes: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub retry_on_429: bool,
    pub retry_on_5xx: bool,
    pub respect_retry_after: bool,
    /// Retry JSON 2xx responses that arrive with an empty body.
    pub retry_on_empty_body: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            gate_timeout_ms: 10_000,
            max_body_bytes: 60 * 1024 * 1024,
            backoff_base_ms: 500,
            backoff_max_ms: 15_000,
            retry_on_429: true,
            retry_on_5xx: true,
            respect_retry_after: true,
            retry_on_empty_body: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimeoutConfig {
    /// Close the stream when no upstream byte arrives for this long.
    pub read_idle_ms: u64,
    pub write_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_idle_ms: 300_000,
            write_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DetailConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
    /// Per-field byte cap for stored request/response bodies.
    pub max_field_bytes: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
            max_field_bytes: 1024 * 1024,
            cleanup_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PendingSweepConfig {
    pub interval_secs: u64,
    /// Pending rows older than this are swept to error.
    pub orphan_after_secs: u64,
}

impl Default for PendingSweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            orphan_after_secs: 600,
        }
    }
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching a config file. On changes (debounced 150ms, SHA256
    /// dedup), reload the config and atomically swap it in via ArcSwap.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.blocking_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        let path_clone = path.clone();
        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            let mut debounce: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    Some(()) = rx.recv() => {
                        debounce = Some(tokio::time::Instant::now() + Duration::from_millis(150));
                    }
                    _ = async {
                        match debounce {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce = None;
                        match std::fs::read(&path_clone) {
                            Ok(contents) => {
                                let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                                if last_hash.as_ref() == Some(&hash) {
                                    continue;
                                }
                                last_hash = Some(hash);

                                match Config::load(&path_clone) {
                                    Ok(new_cfg) => {
                                        tracing::info!("Configuration reloaded successfully");
                                        on_reload(&new_cfg);
                                        config.store(Arc::new(new_cfg));
                                    }
                                    Err(e) => {
                                        tracing::error!("Config reload failed: {e}");
                                    }
                                }
                            }
                            Err(e) => tracing::error!("Config file read failed: {e}"),
                        }
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8410);
        assert_eq!(cfg.max_request_body_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.max_body_bytes, 60 * 1024 * 1024);
        assert_eq!(cfg.timeout.read_idle_ms, 300_000);
        assert_eq!(cfg.keep_alive_secs, 15);
        assert_eq!(cfg.detail.max_entries, 10_000);
        assert_eq!(cfg.detail.ttl_secs, 300);
        assert_eq!(cfg.pending_sweep.interval_secs, 300);
        assert_eq!(cfg.pending_sweep.orphan_after_secs, 600);
    }

    #[test]
    fn test_yaml_deserialization() {
        let yaml = r#"
host: "127.0.0.1"
port: 9000
retry:
  max-attempts: 5
  gate-timeout-ms: 2000
  retry-on-429: false
timeout:
  read-idle-ms: 60000
detail:
  max-entries: 50
model-prices:
  gpt-4o:
    input: 2.5
    output: 10.0
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.gate_timeout_ms, 2000);
        assert!(!config.retry.retry_on_429);
        assert_eq!(config.timeout.read_idle_ms, 60_000);
        assert_eq!(config.detail.max_entries, 50);
        assert_eq!(config.model_prices["gpt-4o"].output, 10.0);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = Config::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cache_ttl_override_values() {
        let mut cfg = Config::default();
        for value in ["", "5m", "1h"] {
            cfg.cache_ttl_override = value.into();
            assert!(cfg.validate().is_ok());
        }

        cfg.cache_ttl_override = "2d".into();
        assert!(cfg.validate().is_err());
        // The override never touches the detail retention window.
        cfg.cache_ttl_override = "1h".into();
        cfg.sanitize();
        assert_eq!(cfg.detail.ttl_secs, DetailConfig::default().ttl_secs);
    }
}
