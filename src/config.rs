//! Configuration for SplitFair.
//!
//! Settings are read from `splitfair.toml` in the config directory
//! (`--config <dir>`, otherwise the platform config dir, e.g.
//! `~/.config/splitfair`). Layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [backend]
//! url = "https://project.supabase.co"
//! anon_key = "public-anon-key"
//! request_timeout_secs = 15
//!
//! [realtime]
//! channel_capacity = 256
//!
//! [[penalties.thresholds]]
//! points = 3
//! extra_tasks = 1
//! message = "3 points reached: one extra chore this week"
//!
//! [logging]
//! level = "info"
//! json = false
//! debug_buffer = 500
//! file = "/tmp/splitfair.log"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::penalty::{Threshold, default_thresholds};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "splitfair.toml";

/// Hosted backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL; `None` means only the in-memory backend is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Public (anon) API key sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Live channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Buffered change events per open channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Penalty threshold table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltiesConfig {
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<Threshold>,
}

impl Default for PenaltiesConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "splitfair=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Entries kept in the in-memory debug log
    #[serde(default = "default_debug_buffer")]
    pub debug_buffer: usize,
    /// Optional file to append logs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_debug_buffer() -> usize {
    500
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            debug_buffer: default_debug_buffer(),
            file: None,
        }
    }
}

/// The complete splitfair.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SplitfairToml {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub penalties: PenaltiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SplitfairToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse splitfair.toml")
    }

    /// Load `splitfair.toml` from `config_dir`, or defaults if it is absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the configuration to `path`, creating the directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize splitfair.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.penalties.thresholds.is_empty() {
            anyhow::bail!("[penalties] thresholds must not be empty");
        }
        let mut seen = HashSet::new();
        for threshold in &self.penalties.thresholds {
            if threshold.points == 0 {
                anyhow::bail!("[penalties] threshold points must be greater than zero");
            }
            if !seen.insert(threshold.points) {
                anyhow::bail!(
                    "[penalties] duplicate threshold at {} points",
                    threshold.points
                );
            }
        }
        if self.realtime.channel_capacity == 0 {
            anyhow::bail!("[realtime] channel_capacity must be greater than zero");
        }
        if self.logging.debug_buffer == 0 {
            anyhow::bail!("[logging] debug_buffer must be greater than zero");
        }
        if let Some(url) = &self.backend.url
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            anyhow::bail!("[backend] url must start with http:// or https:// (got '{}')", url);
        }
        Ok(())
    }
}

/// Resolved configuration: file contents plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct SplitfairConfig {
    pub config_dir: PathBuf,
    pub toml: SplitfairToml,
    verbose: bool,
}

impl SplitfairConfig {
    /// Load from `config_dir` (or the platform default) and apply overrides.
    pub fn new(config_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => default_config_dir()?,
        };
        let toml = SplitfairToml::load_or_default(&config_dir)?;
        Ok(Self {
            config_dir,
            toml,
            verbose,
        })
    }

    /// Build from an already-parsed file, mainly for tests.
    pub fn from_toml(config_dir: PathBuf, toml: SplitfairToml) -> Self {
        Self {
            config_dir,
            toml,
            verbose: false,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Backend URL (`SPLITFAIR_BACKEND_URL` overrides the file).
    pub fn backend_url(&self) -> Option<String> {
        std::env::var("SPLITFAIR_BACKEND_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.toml.backend.url.clone())
    }

    /// Anon key (`SPLITFAIR_ANON_KEY` overrides the file).
    pub fn anon_key(&self) -> Option<String> {
        std::env::var("SPLITFAIR_ANON_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.toml.backend.anon_key.clone())
    }

    /// Log filter: `--verbose` wins, then `SPLITFAIR_LOG`, then the file.
    pub fn log_level(&self) -> String {
        if self.verbose {
            return "debug".to_string();
        }
        std::env::var("SPLITFAIR_LOG")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.toml.logging.level.clone())
    }

    /// Logging section with the resolved level filled in.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level(),
            ..self.toml.logging.clone()
        }
    }

    pub fn thresholds(&self) -> Vec<Threshold> {
        self.toml.penalties.thresholds.clone()
    }

    pub fn channel_capacity(&self) -> usize {
        self.toml.realtime.channel_capacity
    }
}

/// Platform config directory for SplitFair.
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("splitfair"))
        .context("Could not determine the platform config directory; pass --config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let toml = SplitfairToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.realtime.channel_capacity, 256);
        assert_eq!(toml.logging.level, "info");
        assert_eq!(toml.backend.request_timeout_secs, 15);
        let points: Vec<u32> = toml.penalties.thresholds.iter().map(|t| t.points).collect();
        assert_eq!(points, vec![3, 5, 8, 10]);
        toml.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let toml = SplitfairToml::parse(
            r#"
            [backend]
            url = "https://example.supabase.co"

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(toml.backend.url.as_deref(), Some("https://example.supabase.co"));
        assert!(toml.logging.json);
        assert_eq!(toml.logging.debug_buffer, 500);
        assert_eq!(toml.penalties.thresholds.len(), 4);
    }

    #[test]
    fn test_custom_thresholds() {
        let toml = SplitfairToml::parse(
            r#"
            [[penalties.thresholds]]
            points = 2
            extra_tasks = 1
            message = "two strikes"
            "#,
        )
        .unwrap();
        assert_eq!(toml.penalties.thresholds.len(), 1);
        assert_eq!(toml.penalties.thresholds[0].message, "two strikes");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[realtime]\nchannel_capacity = 8\n",
        )
        .unwrap();
        let toml = SplitfairToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.realtime.channel_capacity, 8);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(SplitfairToml::parse("[realtime\n").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_thresholds() {
        let mut toml = SplitfairToml::default();
        toml.penalties.thresholds.push(Threshold {
            points: 3,
            extra_tasks: 9,
            message: String::new(),
        });
        let err = toml.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate threshold at 3"));
    }

    #[test]
    fn test_validate_rejects_empty_thresholds_and_zero_capacity() {
        let mut toml = SplitfairToml::default();
        toml.penalties.thresholds.clear();
        assert!(toml.validate().is_err());

        let mut toml = SplitfairToml::default();
        toml.realtime.channel_capacity = 0;
        assert!(toml.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut toml = SplitfairToml::default();
        toml.backend.url = Some("ftp://nope".to_string());
        assert!(toml.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut toml = SplitfairToml::default();
        toml.realtime.channel_capacity = 32;
        toml.save(&path).unwrap();
        let loaded = SplitfairToml::load(&path).unwrap();
        assert_eq!(loaded.realtime.channel_capacity, 32);
        assert_eq!(loaded.penalties.thresholds, toml.penalties.thresholds);
    }

    #[test]
    fn test_verbose_forces_debug_level() {
        let dir = TempDir::new().unwrap();
        let config = SplitfairConfig::new(Some(dir.path().to_path_buf()), true).unwrap();
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.config_path(), dir.path().join(CONFIG_FILE));
    }
}
