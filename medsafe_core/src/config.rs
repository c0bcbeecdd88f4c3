//! Configuration file support for Medsafe.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medsafe/config.toml`.

use crate::{Error, Region, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub interactions: InteractionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Regulatory compliance checks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub region: Region,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: Region::default(),
        }
    }
}

/// Audit trail configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Identifier recorded as the actor of every audit entry
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Mirror entries to `log_file`; off keeps the trail in memory only
    #[serde(default = "default_true")]
    pub persist: bool,

    /// JSONL audit file, relative to `data.data_dir` unless absolute
    #[serde(default = "default_audit_log_file")]
    pub log_file: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            actor: default_actor(),
            persist: true,
            log_file: default_audit_log_file(),
        }
    }
}

/// External drug interaction service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Tracing output
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for this crate's events; RUST_LOG overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("medsafe")
}

fn default_true() -> bool {
    true
}

fn default_actor() -> String {
    "local-user".into()
}

fn default_audit_log_file() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load `config.toml` from the user config directory, or defaults when
    /// there is none
    pub fn load() -> Result<Self> {
        let path = Self::default_config_path();
        if !path.exists() {
            tracing::info!("No medsafe config at {:?}, running with defaults", path);
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Parse and validate a config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        tracing::info!(
            "Loaded medsafe config from {:?} (region {}, audit {})",
            path,
            config.compliance.region,
            if config.audit.enabled { "on" } else { "off" }
        );
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/medsafe/config.toml`
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("medsafe").join("config.toml")
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Write the config atomically: temp file in the same directory, then rename
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let rendered = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Cannot render config as TOML: {}", e)))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(rendered.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Wrote medsafe config to {:?}", path);
        Ok(())
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.audit.actor.trim().is_empty() {
            return Err(Error::Config("audit.actor must not be empty".into()));
        }
        if self.audit.persist && self.audit.log_file.as_os_str().is_empty() {
            return Err(Error::Config(
                "audit.log_file must be set when audit.persist is on".into(),
            ));
        }
        if self.interactions.timeout_secs == 0 {
            return Err(Error::Config(
                "interactions.timeout_secs must be greater than zero".into(),
            ));
        }
        if let Some(url) = &self.interactions.service_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "interactions.service_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        if !crate::logging::LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {}, got '{}'",
                crate::logging::LEVELS.join(", "),
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Resolved path of the JSONL audit file, or None when persistence is off
    pub fn audit_log_path(&self) -> Option<PathBuf> {
        if !self.audit.persist {
            return None;
        }
        let file = &self.audit.log_file;
        Some(if file.is_absolute() {
            file.clone()
        } else {
            self.data.data_dir.join(file)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.compliance.enabled);
        assert_eq!(config.compliance.region, Region::Us);
        assert!(config.audit.enabled);
        assert_eq!(config.audit.actor, "local-user");
        assert_eq!(config.interactions.timeout_secs, 10);
        assert!(config.interactions.service_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.compliance.region = Region::Both;
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.compliance.region, Region::Both);
        assert_eq!(config.audit.actor, parsed.audit.actor);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[compliance]
region = "CA"

[interactions]
service_url = "https://interactions.example.org/api"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.compliance.region, Region::Ca);
        assert!(config.compliance.enabled); // default
        assert_eq!(config.interactions.timeout_secs, 10); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_region_rejected() {
        let toml_str = r#"
[compliance]
region = "EU"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.interactions.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.interactions.service_url = Some("ftp://nope".into());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.audit.actor = "  ".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_audit_log_path_is_relative_to_data_dir() {
        let mut config = Config::default();
        config.data.data_dir = PathBuf::from("/tmp/medsafe-test");
        assert_eq!(
            config.audit_log_path(),
            Some(PathBuf::from("/tmp/medsafe-test/audit.jsonl"))
        );

        config.audit.persist = false;
        assert_eq!(config.audit_log_path(), None);
    }

    #[test]
    fn test_persistence_off_survives_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let parsed: Config = toml::from_str("[audit]\npersist = false\n").unwrap();
        assert_eq!(parsed.audit_log_path(), None);

        parsed.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert!(!loaded.audit.persist);
        assert_eq!(loaded.audit_log_path(), None);
    }

    #[test]
    fn test_empty_log_file_rejected() {
        let mut config = Config::default();
        config.audit.log_file = PathBuf::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.audit.persist = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audit.actor = "dr-smith".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.audit.actor, "dr-smith");
    }
}
