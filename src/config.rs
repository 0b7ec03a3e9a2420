//! Configuration file for the `tickshell` binary.
//!
//! ```toml
//! [runner]
//! worker_threads = 4
//!
//! [debug]
//! trace_level = "debug"
//!
//! [host]
//! tick_interval_ms = 16
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tickshell_runner::RunnerConfig;
use tracing::debug;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "TICKSHELL_CONFIG";
/// File picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "tickshell.toml";

/// Trace level for structured logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    /// Raise the level by `steps` (one per `-v`), saturating at trace.
    pub fn raised(self, steps: u8) -> Self {
        const ORDER: [TraceLevel; 5] = [
            TraceLevel::Error,
            TraceLevel::Warn,
            TraceLevel::Info,
            TraceLevel::Debug,
            TraceLevel::Trace,
        ];
        let current = ORDER.iter().position(|level| *level == self).unwrap_or(1);
        let target = (current + usize::from(steps)).min(ORDER.len() - 1);
        ORDER.get(target).copied().unwrap_or(Self::Trace)
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TraceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DebugConfig {
    /// Level used when `RUST_LOG` is unset.
    #[serde(default)]
    pub trace_level: TraceLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    /// Period of the host loop that drains the dispatch queue.
    #[serde(default = "HostConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval_ms(),
        }
    }
}

impl HostConfig {
    const fn default_tick_interval_ms() -> u64 {
        16
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TickshellConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub host: HostConfig,
}

impl TickshellConfig {
    pub fn validate(&self) -> Result<()> {
        self.runner.validate()?;
        ensure!(
            self.host.tick_interval_ms > 0,
            "host.tick_interval_ms must be at least 1"
        );
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate().context("Configuration failed validation")?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Configuration plus the file it came from, if any.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TickshellConfig,
    pub path: Option<PathBuf>,
}

/// Resolve the configuration: `explicit`, then `$TICKSHELL_CONFIG`, then
/// `./tickshell.toml`, else defaults.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let from_env = std::env::var(CONFIG_ENV_VAR).ok();
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    load_with(explicit, from_env.as_deref(), &cwd)
}

pub fn load_with(explicit: Option<&Path>, from_env: Option<&str>, cwd: &Path) -> Result<LoadedConfig> {
    let chosen = explicit.map(Path::to_path_buf).or_else(|| {
        from_env
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    });

    let path = match chosen {
        Some(path) => path,
        None => {
            let candidate = cwd.join(DEFAULT_CONFIG_FILE);
            if !candidate.is_file() {
                debug!("no configuration file found; using defaults");
                return Ok(LoadedConfig::default());
            }
            candidate
        }
    };

    let config = TickshellConfig::load_from_file(&path)?;
    debug!(path = %path.display(), "loaded configuration");
    Ok(LoadedConfig {
        config,
        path: Some(path),
    })
}
