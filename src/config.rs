use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_LABEL: &str = "Auto/Job-Tracked";

/// Subject line of failure alerts; the default search query excludes it so
/// the tracker never tries to classify its own alarms.
pub const ALERT_SUBJECT: &str = "Job Application Tracker - Run Failed";

const API_KEY_FILE: &str = "gemini_api_key";

/// Everything a run needs, assembled once in main and passed by reference
/// into each component.
pub struct Config {
    pub label_name: String,
    pub search_query: String,
    pub max_per_run: usize,
    pub username: String,
    pub app_password: String,
    pub gemini_api_key: String,
    pub model_id: String,
}

/// Gmail query for candidate emails: application-confirmation keywords or
/// known ATS senders, minus our own alerts, already-labeled threads, and
/// anything outside the search window.
pub fn default_search_query(label: &str, window_days: u32) -> String {
    format!(
        "(subject:(\"application\" OR \"applying\" OR \"submission\" OR \"thank you for applying\" \
         OR \"thank you for your interest\" OR \"follow up\" OR \"thanks for applying\") \
         OR from:(greenhouse.io OR lever.co OR myworkdayjobs.com OR myworkday.com \
         OR workday.com OR ashbyhq.com OR workable.com)) \
         -subject:\"{ALERT_SUBJECT}\" \
         -label:{label} \
         newer_than:{window_days}d"
    )
}

fn config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("", "", "apptrack")
        .ok_or_else(|| anyhow!("Could not determine a config directory"))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

pub fn api_key_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(API_KEY_FILE))
}

/// One-time setup: persist the key under the platform config dir.
pub fn store_api_key(key: &str) -> Result<PathBuf> {
    let path = api_key_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, key.trim())
        .with_context(|| format!("Failed to write API key to {}", path.display()))?;
    Ok(path)
}

/// The environment variable wins; otherwise the stored key file.
pub fn load_api_key() -> Result<String> {
    if let Ok(key) = env::var("GEMINI_API_KEY") {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }
    let path = api_key_path()?;
    let key = fs::read_to_string(&path).with_context(|| {
        format!(
            "No Gemini API key found. Set GEMINI_API_KEY or run 'apptrack setup-key' \
             (expected key file at {})",
            path.display()
        )
    })?;
    Ok(key.trim().to_string())
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        PathBuf::from(path)
    }
}
