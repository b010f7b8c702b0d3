use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_opt_f64(key: &str) -> Result<Option<f64>> {
    match get_env(key) {
        None => Ok(None),
        Some(v) => Ok(Some(
            v.parse::<f64>()
                .map_err(|e| anyhow!("{key} invalid float: {e}"))?,
        )),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Backend
    pub api_base_url: String,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,

    // Local overrides for the exit thresholds (backend settings otherwise)
    pub sell_multiplier: Option<f64>,
    pub trailing_stop_percent: Option<f64>,
    pub stop_loss_multiplier: Option<f64>,

    // Storage / refresh
    pub sqlite_path: String,
    pub refresh_secs: u64,
    pub alert_history_limit: usize,

    // Dashboard
    pub dashboard_host: String,
    pub dashboard_port: u16,
    pub dashboard_open_browser: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let s = Self {
            api_base_url: get_env_string("API_BASE_URL", "http://127.0.0.1:8000")
                .trim_end_matches('/')
                .to_string(),
            api_token: get_env("API_TOKEN"),
            request_timeout_ms: get_env_usize("REQUEST_TIMEOUT_MS", 10_000)? as u64,
            sell_multiplier: get_env_opt_f64("SELL_MULTIPLIER")?,
            trailing_stop_percent: get_env_opt_f64("TRAILING_STOP_PERCENT")?,
            stop_loss_multiplier: get_env_opt_f64("STOP_LOSS_MULTIPLIER")?,
            sqlite_path: get_env_string("SQLITE_PATH", "./data/solbot_dashboard.sqlite"),
            refresh_secs: get_env_usize("REFRESH_SECS", 15)? as u64,
            alert_history_limit: get_env_usize("ALERT_HISTORY_LIMIT", 200)?,
            dashboard_host: get_env_string("DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: get_env_usize("DASHBOARD_PORT", 8080)? as u16,
            dashboard_open_browser: get_env_bool("DASHBOARD_OPEN_BROWSER", false),
        };

        s.validate()?;
        Ok(s)
    }

    /// Point at another backend (the `--api-url` flag) and re-check the result.
    pub fn override_api_url(&mut self, url: &str) -> Result<()> {
        self.api_base_url = url.trim().trim_end_matches('/').to_string();
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(anyhow!(
                "API_BASE_URL must start with http:// or https:// (got {})",
                self.api_base_url
            ));
        }
        if self.request_timeout_ms < 1 {
            return Err(anyhow!(
                "REQUEST_TIMEOUT_MS must be >= 1 (got {})",
                self.request_timeout_ms
            ));
        }
        if self.refresh_secs < 1 {
            return Err(anyhow!("REFRESH_SECS must be >= 1 (got {})", self.refresh_secs));
        }
        if self.alert_history_limit < 1 {
            return Err(anyhow!(
                "ALERT_HISTORY_LIMIT must be >= 1 (got {})",
                self.alert_history_limit
            ));
        }
        if let Some(v) = self.sell_multiplier {
            if !v.is_finite() || v <= 0.0 {
                return Err(anyhow!("SELL_MULTIPLIER must be > 0 (got {v})"));
            }
        }
        if let Some(v) = self.trailing_stop_percent {
            if !v.is_finite() || !(0.0..1.0).contains(&v) {
                return Err(anyhow!("TRAILING_STOP_PERCENT must be in [0, 1) (got {v})"));
            }
        }
        if let Some(v) = self.stop_loss_multiplier {
            if !v.is_finite() || v < 0.0 {
                return Err(anyhow!("STOP_LOSS_MULTIPLIER must be >= 0 (got {v})"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    pub fn for_tests(api_base_url: &str, sqlite_path: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_token: None,
            request_timeout_ms: 2_000,
            sell_multiplier: None,
            trailing_stop_percent: None,
            stop_loss_multiplier: None,
            sqlite_path: sqlite_path.to_string(),
            refresh_secs: 1,
            alert_history_limit: 50,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 0,
            dashboard_open_browser: false,
        }
    }
}
