//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::locking::{LockConfig, WaitPolicy};

/// Keylock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub lock: LockDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
}

/// Defaults applied to every lock built from this configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDefaults {
    pub timeout_secs: u64,
    pub policy: String,
    pub ticks: u32,
    pub fail_on_timeout: bool,
    pub jitter_ms: u64,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            lock: LockDefaults {
                timeout_secs: 300,
                policy: "staleness".to_string(),
                ticks: WaitPolicy::DEFAULT_TICKS,
                fail_on_timeout: false,
                jitter_ms: 1000,
                verbose: false,
            },
        }
    }
}

impl StoreConfig {
    /// Store URL, with `KEYLOCK_REDIS_URL` taking precedence over the file
    pub fn resolved_url(&self) -> String {
        env::var("KEYLOCK_REDIS_URL").unwrap_or_else(|_| self.url.clone())
    }
}

impl LockDefaults {
    /// Wait policy described by these defaults
    pub fn wait_policy(&self) -> Result<WaitPolicy> {
        match self.policy.parse::<WaitPolicy>().map_err(Error::ConfigError)? {
            WaitPolicy::FixedAttempts { .. } => {
                Ok(WaitPolicy::fixed(self.ticks, self.fail_on_timeout))
            }
            WaitPolicy::StalenessAware => Ok(WaitPolicy::StalenessAware),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KEYLOCK_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("keylock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.lock_config()?;
        Ok(())
    }

    /// Build the lock configuration these settings describe
    pub fn lock_config(&self) -> Result<LockConfig> {
        if self.lock.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "lock.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.lock.timeout_secs > LockConfig::MAX_TIMEOUT.as_secs() {
            return Err(Error::ConfigError(format!(
                "lock.timeout_secs must be at most {} (30 days)",
                LockConfig::MAX_TIMEOUT.as_secs()
            )));
        }
        if self.lock.jitter_ms == 0 {
            return Err(Error::ConfigError(
                "lock.jitter_ms must be greater than zero".to_string(),
            ));
        }

        Ok(LockConfig::default()
            .with_timeout(Duration::from_secs(self.lock.timeout_secs))
            .with_policy(self.lock.wait_policy()?)
            .with_jitter_max(Duration::from_millis(self.lock.jitter_ms))
            .with_verbose(self.lock.verbose))
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Store settings
            "store.url" => Ok(self.store.url.clone()),

            // Lock settings
            "lock.timeout_secs" => Ok(self.lock.timeout_secs.to_string()),
            "lock.policy" => Ok(self.lock.policy.clone()),
            "lock.ticks" => Ok(self.lock.ticks.to_string()),
            "lock.fail_on_timeout" => Ok(self.lock.fail_on_timeout.to_string()),
            "lock.jitter_ms" => Ok(self.lock.jitter_ms.to_string()),
            "lock.verbose" => Ok(self.lock.verbose.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `keylock config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.url" => {
                if !value.starts_with("redis://") && !value.starts_with("rediss://") {
                    return Err(anyhow!(
                        "Store URL must start with redis:// or rediss://"
                    ));
                }
                self.store.url = value.to_string();
            }

            "lock.timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Timeout must be at least one second"));
                }
                if secs > LockConfig::MAX_TIMEOUT.as_secs() {
                    return Err(anyhow!(
                        "Timeout must be at most {} seconds (30 days)",
                        LockConfig::MAX_TIMEOUT.as_secs()
                    ));
                }
                self.lock.timeout_secs = secs;
            }
            "lock.policy" => {
                let valid_policies = ["staleness", "fixed"];
                if !valid_policies.contains(&value) {
                    return Err(anyhow!(
                        "Invalid wait policy: {}. Valid options: {}",
                        value,
                        valid_policies.join(", ")
                    ));
                }
                self.lock.policy = value.to_string();
            }
            "lock.ticks" => {
                let ticks: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid ticks value: {}", value))?;
                if ticks == 0 {
                    return Err(anyhow!("Ticks must be at least 1"));
                }
                self.lock.ticks = ticks;
            }
            "lock.fail_on_timeout" => {
                self.lock.fail_on_timeout = value
                    .parse()
                    .with_context(|| format!("Invalid fail_on_timeout value: {}", value))?;
            }
            "lock.jitter_ms" => {
                let jitter: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid jitter_ms value: {}", value))?;
                if jitter == 0 {
                    return Err(anyhow!("Jitter must be at least 1 ms"));
                }
                self.lock.jitter_ms = jitter;
            }
            "lock.verbose" => {
                self.lock.verbose = value
                    .parse()
                    .with_context(|| format!("Invalid verbose value: {}", value))?;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `keylock config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "store.url",
            "lock.timeout_secs",
            "lock.policy",
            "lock.ticks",
            "lock.fail_on_timeout",
            "lock.jitter_ms",
            "lock.verbose",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
