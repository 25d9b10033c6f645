//! Configuration management for the live-set bridge
//!
//! Handles loading, validating, and hot-reloading the YAML configuration file.
//! Every section and field is optional; missing values take their defaults.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Where the host's datagram listener lives
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default = "default_host_address")]
    pub address: String,
    #[serde(default = "default_host_port")]
    pub port: u16,
    /// Local socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// State cache tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

/// Retry tuning for transient host failures
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Export destinations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_host_address(),
            port: default_host_port(),
            bind: default_bind(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl HostConfig {
    /// `address:port` of the host listener
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults config
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.host.address.is_empty() {
            anyhow::bail!("host.address cannot be empty");
        }
        if self.host.port == 0 {
            anyhow::bail!("host.port must be non-zero");
        }
        if self.host.bind.is_empty() {
            anyhow::bail!("host.bind cannot be empty");
        }
        if self.host.timeout_ms == 0 {
            anyhow::bail!("host.timeout_ms must be positive");
        }

        if self.cache.ttl_ms == 0 {
            anyhow::bail!("cache.ttl_ms must be positive");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }

        if self.export.output_dir.is_empty() {
            anyhow::bail!("export.output_dir cannot be empty");
        }

        Ok(())
    }
}

// Default value functions
fn default_host_address() -> String { "127.0.0.1".to_string() }
fn default_host_port() -> u16 { 11000 }
fn default_bind() -> String { "0.0.0.0:0".to_string() }
fn default_timeout_ms() -> u64 { 1000 }
fn default_ttl_ms() -> u64 { 500 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 2000 }
fn default_output_dir() -> String { "exports".to_string() }
