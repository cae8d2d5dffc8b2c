//! Application configuration — a small `key=value` file in the platform
//! config directory, loaded at startup and written back whenever the user
//! changes a setting. Unknown keys are ignored so older files keep working.

use std::path::PathBuf;

/// Runtime configuration for the playground client.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Base URL of the segmentation backend, no trailing slash.
    pub backend_url: String,
    /// Per-request timeout for inference calls, in seconds.
    pub request_timeout_secs: u64,
    /// Re-run inference automatically (debounced) after prompt changes.
    pub auto_run: bool,
    /// Upper bound on accumulated boxes in multi-box mode.
    pub max_boxes: usize,
    /// Byte budget for the on-disk playground namespace.
    pub storage_budget_bytes: u64,
    /// Seconds between backend health polls.
    pub health_poll_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 60,
            auto_run: false,
            max_boxes: 16,
            storage_budget_bytes: 50 * 1024 * 1024,
            health_poll_secs: 30,
        }
    }
}

impl AppConfig {
    /// Path to the config file (`<config>/segpad/segpad.cfg`).
    pub fn config_path() -> Option<PathBuf> {
        crate::paths::app_config_dir().map(|d| d.join("segpad.cfg"))
    }

    /// Load config from disk (returns defaults if file missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        Self::parse(&content)
    }

    fn parse(content: &str) -> Self {
        let mut c = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let val = val.trim();
            match key {
                "backend_url" => {
                    if !val.is_empty() {
                        c.backend_url = val.trim_end_matches('/').to_string();
                    }
                }
                "request_timeout_secs" => {
                    if let Ok(v) = val.parse::<u64>() {
                        c.request_timeout_secs = v.max(1);
                    }
                }
                "auto_run" => {
                    c.auto_run = val == "true";
                }
                "max_boxes" => {
                    if let Ok(v) = val.parse::<usize>() {
                        c.max_boxes = v.max(1);
                    }
                }
                "storage_budget_bytes" => {
                    if let Ok(v) = val.parse::<u64>() {
                        c.storage_budget_bytes = v;
                    }
                }
                "health_poll_secs" => {
                    if let Ok(v) = val.parse::<u64>() {
                        c.health_poll_secs = v.max(5);
                    }
                }
                _ => {}
            }
        }
        c
    }

    /// Save config to disk. Best-effort; failures are logged only.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        let content = format!(
            "backend_url={}\n\
             request_timeout_secs={}\n\
             auto_run={}\n\
             max_boxes={}\n\
             storage_budget_bytes={}\n\
             health_poll_secs={}\n",
            self.backend_url,
            self.request_timeout_secs,
            self.auto_run,
            self.max_boxes,
            self.storage_budget_bytes,
            self.health_poll_secs,
        );
        if let Err(e) = std::fs::write(&path, content) {
            crate::log_warn!("failed to write config {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_keys() {
        let c = AppConfig::parse(
            "backend_url=http://box:9000/\nrequest_timeout_secs=30\nauto_run=true\nmax_boxes=4\n",
        );
        assert_eq!(c.backend_url, "http://box:9000");
        assert_eq!(c.request_timeout_secs, 30);
        assert!(c.auto_run);
        assert_eq!(c.max_boxes, 4);
        // untouched keys keep defaults
        assert_eq!(c.health_poll_secs, AppConfig::default().health_poll_secs);
    }

    #[test]
    fn parse_ignores_garbage_and_unknown_keys() {
        let c = AppConfig::parse("nonsense\nfuture_key=1\nrequest_timeout_secs=abc\n");
        assert_eq!(c, AppConfig::default());
    }
}
