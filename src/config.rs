use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "MEMEPICKER";
const APP_DIR: &str = "meme-picker";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Environment override keys that matched no setting, reported once logging is up.
    #[serde(skip)]
    pub ignored_env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_reddit_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_reddit_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::reddit::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!(
        "meme-picker/{} (+https://github.com/danielmerja/meme-picker)",
        crate::VERSION
    )
}

fn default_reddit_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_media_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            timeout: default_media_timeout(),
            max_size_bytes: default_max_size_bytes(),
            workers: default_workers(),
        }
    }
}

fn default_media_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_size_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(APP_DIR).join("meme-picker.log"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = merge_config(cfg, read_config_file(path)?);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = merge_config(cfg, read_config_file(&default_path)?);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.reddit.base_url.trim().is_empty() {
        base.reddit.base_url = other.reddit.base_url;
    }
    if !other.reddit.user_agent.trim().is_empty() {
        base.reddit.user_agent = other.reddit.user_agent;
    }
    if !other.reddit.timeout.is_zero() {
        base.reddit.timeout = other.reddit.timeout;
    }

    if !other.media.timeout.is_zero() {
        base.media.timeout = other.media.timeout;
    }
    if other.media.max_size_bytes != 0 {
        base.media.max_size_bytes = other.media.max_size_bytes;
    }
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }

    if !other.log.level.trim().is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

/// Applies `PREFIX_SECTION__KEY=value` overrides directly on top of `cfg`.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    let map: HashMap<String, String> = env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.base_url" => cfg.reddit.base_url = value,
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.timeout = duration;
            }
        }
        "media.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.timeout = duration;
            }
        }
        "media.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.media.max_size_bytes = parsed;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => cfg.ignored_env.push(key.to_string()),
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}
