//! Configuration loader and validator for the materials sync service.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub supabase: Supabase,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Supabase project credentials and resource names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Supabase {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_categories_table")]
    pub categories_table: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_bucket() -> String {
    "materials".to_string()
}

fn default_table() -> String {
    "materials".to_string()
}

fn default_categories_table() -> String {
    "categories".to_string()
}

impl App {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` if set, otherwise the SQLite file inside the data directory.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/materials.db", self.app.resolved_data_dir()))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SUPABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.supabase.url = url;
        }
        if let Some(key) = lookup(ENV_SUPABASE_ANON_KEY).filter(|v| !v.trim().is_empty()) {
            self.supabase.anon_key = key;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides, and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }

    if cfg.supabase.url.trim().is_empty() {
        return Err(ConfigError::Invalid("supabase.url must be non-empty"));
    }
    if Url::parse(cfg.supabase.url.trim()).is_err() {
        return Err(ConfigError::Invalid("supabase.url must be an absolute URL"));
    }
    if cfg.supabase.anon_key.trim().is_empty() {
        return Err(ConfigError::Invalid("supabase.anon_key must be non-empty"));
    }
    if cfg.supabase.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("supabase.bucket must be non-empty"));
    }
    if cfg.supabase.table.trim().is_empty() {
        return Err(ConfigError::Invalid("supabase.table must be non-empty"));
    }
    if cfg.supabase.categories_table.trim().is_empty() {
        return Err(ConfigError::Invalid("supabase.categories_table must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the service.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 10000
  request_timeout_secs: 30

supabase:
  url: "https://YOUR_PROJECT.supabase.co"
  anon_key: "YOUR_SUPABASE_ANON_KEY"
  bucket: "materials"
  table: "materials"
  categories_table: "categories"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.supabase.bucket, "materials");
    }

    #[test]
    fn bucket_and_table_default_when_omitted() {
        let cfg: Config = serde_yaml::from_str(
            "app:\n  data_dir: ./d\n  poll_interval_ms: 5\nsupabase:\n  url: https://x.supabase.co\n  anon_key: k\n",
        )
        .unwrap();
        assert_eq!(cfg.supabase.bucket, "materials");
        assert_eq!(cfg.supabase.table, "materials");
        assert_eq!(cfg.supabase.categories_table, "categories");
        assert_eq!(cfg.app.request_timeout_secs, 30);
    }

    #[test]
    fn invalid_poll_interval() {
        let mut cfg = example_cfg();
        cfg.app.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_ms")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_supabase_credentials() {
        let mut cfg = example_cfg();
        cfg.supabase.anon_key = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("anon_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.supabase.url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.supabase.bucket = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_replace_credentials() {
        let mut cfg = example_cfg();
        cfg.apply_env_overrides(|key| match key {
            ENV_SUPABASE_URL => Some("https://override.supabase.co".into()),
            ENV_SUPABASE_ANON_KEY => Some("".into()),
            _ => None,
        });
        assert_eq!(cfg.supabase.url, "https://override.supabase.co");
        assert_eq!(cfg.supabase.anon_key, "YOUR_SUPABASE_ANON_KEY");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.supabase.table, "materials");
    }
}
