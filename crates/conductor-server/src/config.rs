//! Configuration file management for conductor.
//!
//! Provides a TOML-based config file at `~/.config/conductor/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conductor_core::janitor::JanitorConfig;

/// Connection URL used when nothing is configured.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5432/conductor";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub janitor: JanitorSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Base URL of an Ollama-compatible generation endpoint.
    pub base_url: String,
    /// Model name passed through to the endpoint.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_owned(),
            model: "llama3.1".to_owned(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JanitorSection {
    pub interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for JanitorSection {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the conductor config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/conductor` or
/// `~/.config/conductor`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("conductor")
}

/// Return the path to the conductor config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ConductorConfig {
    pub database_url: String,
    pub provider: ProviderSection,
    pub janitor: JanitorConfig,
}

impl ConductorConfig {
    /// Resolve configuration using the chain:
    /// CLI flag > env var > config file > default.
    ///
    /// - Database URL: `database_url_flag` > `CONDUCTOR_DATABASE_URL` >
    ///   `config_file.database.url` > [`DEFAULT_DATABASE_URL`]
    /// - Provider endpoint/model: `CONDUCTOR_PROVIDER_URL` /
    ///   `CONDUCTOR_PROVIDER_MODEL` > config file > built-in defaults
    /// - Janitor cadence: config file > built-in defaults
    pub fn resolve(database_url_flag: Option<&str>) -> Result<Self> {
        let file = load_config().ok();

        let database_url = database_url_flag
            .map(str::to_owned)
            .or_else(|| std::env::var("CONDUCTOR_DATABASE_URL").ok())
            .or_else(|| file.as_ref().map(|f| f.database.url.clone()))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let mut provider = file
            .as_ref()
            .map(|f| ProviderSection {
                base_url: f.provider.base_url.clone(),
                model: f.provider.model.clone(),
                timeout_secs: f.provider.timeout_secs,
            })
            .unwrap_or_default();
        if let Ok(url) = std::env::var("CONDUCTOR_PROVIDER_URL") {
            provider.base_url = url;
        }
        if let Ok(model) = std::env::var("CONDUCTOR_PROVIDER_MODEL") {
            provider.model = model;
        }

        let janitor_section = file.map(|f| f.janitor).unwrap_or_default();
        let janitor = JanitorConfig {
            interval: Duration::from_secs(janitor_section.interval_secs),
            max_age: Duration::from_secs(janitor_section.max_age_secs),
        };

        Ok(Self {
            database_url,
            provider,
            janitor,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Serialize access to process environment and the config path; env
    /// vars are process-global and these tests mutate them.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    const ENV_VARS: &[&str] = &[
        "CONDUCTOR_DATABASE_URL",
        "CONDUCTOR_PROVIDER_URL",
        "CONDUCTOR_PROVIDER_MODEL",
        "XDG_CONFIG_HOME",
    ];

    /// Snapshot the env vars these tests touch, clear them, and point the
    /// config dir at a temp location. Restores everything on drop so a
    /// failing assertion cannot leak state into other tests.
    struct EnvSandbox {
        saved: Vec<(&'static str, Option<String>)>,
        _tmp: tempfile::TempDir,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvSandbox {
        fn new() -> Self {
            let lock = lock_env();
            let saved = ENV_VARS
                .iter()
                .map(|&name| (name, std::env::var(name).ok()))
                .collect();
            let tmp = tempfile::TempDir::new().unwrap();
            for &name in ENV_VARS {
                unsafe { std::env::remove_var(name) };
            }
            unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
            Self {
                saved,
                _tmp: tmp,
                _lock: lock,
            }
        }
    }

    impl Drop for EnvSandbox {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => unsafe { std::env::set_var(name, v) },
                    None => unsafe { std::env::remove_var(name) },
                }
            }
        }
    }

    fn sample_config() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://filehost:5432/filedb".to_owned(),
            },
            provider: ProviderSection {
                base_url: "http://models.internal:11434".to_owned(),
                model: "mistral".to_owned(),
                timeout_secs: 45,
            },
            janitor: JanitorSection {
                interval_secs: 120,
                max_age_secs: 600,
            },
        }
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let _sandbox = EnvSandbox::new();
        let path = config_path();
        assert!(
            path.ends_with("conductor/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _sandbox = EnvSandbox::new();

        let original = sample_config();
        save_config(&original).expect("save should succeed");

        let loaded = load_config().expect("load should succeed");
        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.provider.base_url, original.provider.base_url);
        assert_eq!(loaded.provider.model, original.provider.model);
        assert_eq!(loaded.provider.timeout_secs, original.provider.timeout_secs);
        assert_eq!(loaded.janitor.interval_secs, original.janitor.interval_secs);
        assert_eq!(loaded.janitor.max_age_secs, original.janitor.max_age_secs);
    }

    #[test]
    fn load_config_errors_when_absent() {
        let _sandbox = EnvSandbox::new();
        assert!(load_config().is_err());
    }

    #[test]
    fn config_file_sections_are_optional() {
        // A minimal file with only [database] parses with defaults.
        let parsed: ConfigFile =
            toml::from_str("[database]\nurl = \"postgresql://h:5432/db\"\n").unwrap();
        assert_eq!(parsed.provider.model, ProviderSection::default().model);
        assert_eq!(
            parsed.janitor.max_age_secs,
            JanitorSection::default().max_age_secs
        );
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _sandbox = EnvSandbox::new();

        // Even with the env var set and a config file present, the CLI
        // flag wins.
        save_config(&sample_config()).unwrap();
        unsafe { std::env::set_var("CONDUCTOR_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = ConductorConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.database_url, "postgresql://cli:5432/clidb");
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _sandbox = EnvSandbox::new();

        save_config(&sample_config()).unwrap();
        unsafe { std::env::set_var("CONDUCTOR_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = ConductorConfig::resolve(None).unwrap();
        assert_eq!(config.database_url, "postgresql://env:5432/envdb");
    }

    #[test]
    fn resolve_reads_config_file_when_no_flag_or_env() {
        let _sandbox = EnvSandbox::new();

        save_config(&sample_config()).unwrap();

        let config = ConductorConfig::resolve(None).unwrap();
        assert_eq!(config.database_url, "postgresql://filehost:5432/filedb");
        assert_eq!(config.provider.base_url, "http://models.internal:11434");
        assert_eq!(config.provider.model, "mistral");
        assert_eq!(config.janitor.interval, Duration::from_secs(120));
        assert_eq!(config.janitor.max_age, Duration::from_secs(600));
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _sandbox = EnvSandbox::new();

        let config = ConductorConfig::resolve(None).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.provider.base_url, ProviderSection::default().base_url);
        assert_eq!(config.provider.model, ProviderSection::default().model);
        assert_eq!(
            config.janitor.max_age,
            Duration::from_secs(JanitorSection::default().max_age_secs)
        );
    }

    #[test]
    fn resolve_provider_env_overrides_config_file() {
        let _sandbox = EnvSandbox::new();

        save_config(&sample_config()).unwrap();
        unsafe { std::env::set_var("CONDUCTOR_PROVIDER_URL", "http://other:11434") };
        unsafe { std::env::set_var("CONDUCTOR_PROVIDER_MODEL", "qwen2.5") };

        let config = ConductorConfig::resolve(None).unwrap();
        // Provider endpoint and model come from the env; the file still
        // supplies the database URL and timeout.
        assert_eq!(config.provider.base_url, "http://other:11434");
        assert_eq!(config.provider.model, "qwen2.5");
        assert_eq!(config.provider.timeout_secs, 45);
        assert_eq!(config.database_url, "postgresql://filehost:5432/filedb");
    }
}
