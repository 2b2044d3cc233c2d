use std::path::PathBuf;
use std::time::Duration;

use illustrify_comfyui::client::ws_url_from_api_url;
use illustrify_comfyui::{WatchStrategy, WatcherConfig};
use illustrify_core::error::CoreError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// ComfyUI instance on the same machine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `900`). Must exceed the
    /// generation timeout or long jobs are cut off by the middleware.
    pub request_timeout_secs: u64,
    /// Directory holding the workflow templates (default: `workflows`).
    pub workflow_dir: PathBuf,
    /// Executor connection and watch settings.
    pub comfyui: WatcherConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                        |
    /// |---------------------------|--------------------------------|
    /// | `HOST`                    | `0.0.0.0`                      |
    /// | `PORT`                    | `5000`                         |
    /// | `CORS_ORIGINS`            | `http://localhost:3000`        |
    /// | `REQUEST_TIMEOUT_SECS`    | `900`                          |
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`        |
    /// | `COMFYUI_WS_URL`          | derived from `COMFYUI_URL`     |
    /// | `GENERATION_TIMEOUT_SECS` | `300`                          |
    /// | `POLL_INTERVAL_MS`        | `500`                          |
    /// | `WATCH_STRATEGY`          | `auto`                         |
    /// | `WORKFLOW_DIR`            | `workflows`                    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Used by [`from_env`](Self::from_env)
    /// and by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port: u16 = parse_var("PORT", &var("PORT", "5000"))?;

        let cors_origins: Vec<String> = var("CORS_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 =
            parse_var("REQUEST_TIMEOUT_SECS", &var("REQUEST_TIMEOUT_SECS", "900"))?;

        let api_url = var("COMFYUI_URL", "http://127.0.0.1:8188");
        let ws_url = lookup("COMFYUI_WS_URL").unwrap_or_else(|| ws_url_from_api_url(&api_url));
        let timeout_secs: u64 =
            parse_var("GENERATION_TIMEOUT_SECS", &var("GENERATION_TIMEOUT_SECS", "300"))?;
        let poll_interval_ms: u64 = parse_var("POLL_INTERVAL_MS", &var("POLL_INTERVAL_MS", "500"))?;
        if poll_interval_ms == 0 {
            return Err(CoreError::Validation(
                "POLL_INTERVAL_MS must be greater than 0".into(),
            ));
        }
        let strategy: WatchStrategy = var("WATCH_STRATEGY", "auto").parse()?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            workflow_dir: PathBuf::from(var("WORKFLOW_DIR", "workflows")),
            comfyui: WatcherConfig {
                api_url,
                ws_url,
                timeout: Duration::from_secs(timeout_secs),
                poll_interval: Duration::from_millis(poll_interval_ms),
                strategy,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, CoreError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CoreError::Validation(format!("{key} has invalid value '{raw}': {e}")))
}
