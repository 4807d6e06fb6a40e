//! Configuration file handling for lstream-cli

use anyhow::{Context, Result};
use lstream_client::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

const DEFAULT_SERVER: &str = "http://localhost:8080";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default server URL
    pub server: Option<String>,
    /// Default user name
    pub username: Option<String>,
    /// Default password
    pub password: Option<String>,
    /// Default adapter set
    pub adapter_set: Option<String>,
    /// Bandwidth limit in kbit/s
    pub max_bandwidth: Option<f64>,
    /// Default output format
    pub output: Option<OutputFormat>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("lstream-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &ConnectionArgs, no_color: bool) -> MergedConfig {
        MergedConfig {
            server: args
                .server
                .clone()
                .or_else(|| self.server.clone())
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            username: args.username.clone().or_else(|| self.username.clone()),
            password: args.password.clone().or_else(|| self.password.clone()),
            adapter_set: args.adapter_set.clone().or_else(|| self.adapter_set.clone()),
            max_bandwidth: args.max_bandwidth.or(self.max_bandwidth).unwrap_or(0.0),
            output: args.output.or(self.output).unwrap_or_default(),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Connection-related values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub adapter_set: Option<String>,
    pub max_bandwidth: Option<f64>,
    pub output: Option<OutputFormat>,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub adapter_set: Option<String>,
    pub max_bandwidth: f64,
    pub output: OutputFormat,
    pub no_color: bool,
}

impl MergedConfig {
    /// Session configuration for the client library
    pub fn session_config(&self) -> SessionConfig {
        let mut config =
            SessionConfig::new(&self.server).with_requested_max_bandwidth(self.max_bandwidth);
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            config = config.with_credentials(user, password);
        } else {
            config.username = self.username.clone();
        }
        if let Some(ref adapter_set) = self.adapter_set {
            config = config.with_adapter_set(adapter_set);
        }
        config
    }
}
