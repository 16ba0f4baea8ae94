use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};

use crate::http_client::DEFAULT_TIMEOUT_SECS;

const DEFAULT_API_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub group_id: Option<String>,
    pub date: NaiveDate,
    pub token_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Loads `.env.local` / `.env`, then reads `KEIBA_*` variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let api_base_url = env_string("KEIBA_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let group_id = env_string("KEIBA_GROUP_ID");
        let date = env_string("KEIBA_DATE")
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())
            .unwrap_or_else(|| Local::now().date_naive());
        let token_path = env_string("KEIBA_TOKEN_PATH").map(PathBuf::from);
        let timeout_secs = env::var("KEIBA_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(2, 60);
        let log_dir = env_string("KEIBA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        Self {
            api_base_url,
            group_id,
            date,
            token_path,
            http_timeout: Duration::from_secs(timeout_secs),
            log_dir,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn default_log_dir() -> PathBuf {
    // Prefer XDG state, then ~/.local/state, then the working directory.
    if let Some(base) = env_string("XDG_STATE_HOME") {
        return PathBuf::from(base).join("keiba_terminal");
    }
    match env_string("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("keiba_terminal"),
        None => PathBuf::from("."),
    }
}
