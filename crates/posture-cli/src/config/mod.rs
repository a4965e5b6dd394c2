//! Configuration management.

use anyhow::{Context as _, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "POSTURE_CONFIG";

/// CLI configuration.
///
/// Every field is a default that run plans and command-line flags override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default output format.
    pub output_format: Option<OutputFormat>,

    /// Inventory snapshot used when `--inventory` is absent.
    pub inventory: Option<PathBuf>,

    /// Scopes audited at the same time.
    pub max_concurrent_scopes: Option<usize>,

    /// Checks running at the same time across all scopes.
    pub max_concurrent_checks: Option<usize>,

    /// Per-check timeout in seconds.
    pub check_timeout_secs: Option<u64>,

    /// Maximum check starts per second.
    pub checks_per_second: Option<u32>,
}

/// Keys accepted by `posture config set`
pub const KEYS: &[(&str, &str)] = &[
    ("output_format", "Default output format (pretty/json/jsonl/csv/yaml)"),
    ("inventory", "Default inventory snapshot path"),
    ("max_concurrent_scopes", "Scopes audited at the same time"),
    ("max_concurrent_checks", "Checks running at the same time"),
    ("check_timeout_secs", "Per-check timeout in seconds"),
    ("checks_per_second", "Maximum check starts per second"),
];

impl Config {
    /// Get the config file path.
    pub fn path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("rs", "posture", "posture")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load configuration from a file, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Set a key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "output_format" | "output" => self.output_format = Some(value.parse()?),
            "inventory" => self.inventory = Some(PathBuf::from(value)),
            "max_concurrent_scopes" => self.max_concurrent_scopes = Some(positive(key, value)?),
            "max_concurrent_checks" => self.max_concurrent_checks = Some(positive(key, value)?),
            "check_timeout_secs" | "timeout" => {
                self.check_timeout_secs = Some(positive(key, value)?);
            }
            "checks_per_second" | "rate" => self.checks_per_second = Some(positive(key, value)?),
            _ => {
                let available: Vec<String> = KEYS
                    .iter()
                    .map(|(name, help)| format!("  {name:<22} - {help}"))
                    .collect();
                anyhow::bail!(
                    "Unknown config key: {}\n\nAvailable keys:\n{}",
                    key,
                    available.join("\n")
                );
            }
        }
        Ok(())
    }
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .parse()
        .with_context(|| format!("{key} expects a number, got {value:?}"))?;
    if parsed == T::default() {
        anyhow::bail!("{key} must be at least 1");
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_set_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("output", "csv").unwrap();
        config.set("max_concurrent_checks", "8").unwrap();
        config.set("timeout", "30").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.output_format, Some(OutputFormat::Csv));
        assert_eq!(loaded.max_concurrent_checks, Some(8));
        assert_eq!(loaded.check_timeout_secs, Some(30));
        assert_eq!(loaded.inventory, None);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("max_concurrent_scopes", "0").is_err());
        assert!(config.set("checks_per_second", "fast").is_err());
        let err = config.set("api_key", "x").unwrap_err().to_string();
        assert!(err.contains("Unknown config key"));
        assert!(err.contains("output_format"));
    }
}
