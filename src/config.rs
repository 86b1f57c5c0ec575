// Configuration File Support
//
// TOML configuration for the toolwarden gateway, with environment variable
// overrides. Loaded from <config dir>/toolwarden/config.toml unless a path is
// given explicitly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tools::{
    CallSerializer, GatewayBuilder, ResultCache, ShellDialect, Tool, ToolGateway, ToolSettings,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Result cache configuration
    pub cache: CacheConfig,

    /// Serialized-call gate configuration
    pub serializer: SerializerConfig,

    /// Shell dialect selection
    pub shell: ShellConfig,

    /// Per-tool settings, keyed by tool name
    pub tools: HashMap<String, ToolConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live of cached results in seconds
    pub ttl_secs: u64,

    /// Interval of the background sweep in seconds
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerializerConfig {
    /// Bound on waiting for the serialized-call slot in seconds
    pub acquire_timeout_secs: u64,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// auto, posix, cmd or powershell
    pub dialect: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            dialect: "auto".to_string(),
        }
    }
}

/// Settings for a single tool
///
/// Unset fields fall back to the tool's built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    /// Wall-clock budget per call in seconds
    pub timeout_secs: Option<u64>,

    /// Ceiling for each of stdout and stderr in bytes
    pub max_output_bytes: Option<usize>,

    /// Absolute path override for the executable
    pub executable: Option<PathBuf>,

    /// Replaces the built-in known install locations
    pub known_locations: Option<Vec<PathBuf>>,

    /// Extra stderr substrings to treat as benign
    pub benign_stderr: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
            serializer: SerializerConfig::default(),
            shell: ShellConfig::default(),
            tools: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the result (after environment overrides) is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    ///
    /// `~/.config/toolwarden/config.toml` on Linux, the platform equivalent
    /// elsewhere.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("toolwarden")
            .join("config.toml")
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TOOLWARDEN_LOG_LEVEL
    /// - TOOLWARDEN_LOG_FORMAT
    /// - TOOLWARDEN_CACHE_TTL_SECS
    /// - TOOLWARDEN_SHELL
    /// - TOOLWARDEN_NPM_PATH / TOOLWARDEN_GH_PATH
    /// - TOOLWARDEN_NPM_TIMEOUT_SECS / TOOLWARDEN_GH_TIMEOUT_SECS
    ///
    /// Numeric values that do not parse are ignored.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("TOOLWARDEN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TOOLWARDEN_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(ttl) = std::env::var("TOOLWARDEN_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_secs = ttl;
            }
        }
        if let Ok(dialect) = std::env::var("TOOLWARDEN_SHELL") {
            self.shell.dialect = dialect;
        }

        for tool in Tool::ALL {
            let prefix = format!("TOOLWARDEN_{}", tool.as_str().to_uppercase());
            if let Ok(path) = std::env::var(format!("{}_PATH", prefix)) {
                self.tool_entry(tool).executable = Some(PathBuf::from(path));
            }
            if let Ok(secs) = std::env::var(format!("{}_TIMEOUT_SECS", prefix)) {
                if let Ok(secs) = secs.parse::<u64>() {
                    self.tool_entry(tool).timeout_secs = Some(secs);
                }
            }
        }

        self
    }

    fn tool_entry(&mut self, tool: Tool) -> &mut ToolConfig {
        self.tools.entry(tool.as_str().to_string()).or_default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("Cache TTL must be > 0");
        }
        if self.cache.sweep_interval_secs == 0 {
            anyhow::bail!("Cache sweep interval must be > 0");
        }
        if self.serializer.acquire_timeout_secs == 0 {
            anyhow::bail!("Serializer acquire timeout must be > 0");
        }

        self.dialect_override()?;

        for (name, tool) in &self.tools {
            if name.parse::<Tool>().is_err() {
                anyhow::bail!("Unknown tool section: [tools.{}]. Must be one of: npm, gh", name);
            }
            if tool.timeout_secs == Some(0) {
                anyhow::bail!("Tool '{}' timeout must be > 0", name);
            }
            if tool.max_output_bytes == Some(0) {
                anyhow::bail!("Tool '{}' max_output_bytes must be > 0", name);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Requested dialect, or `None` for auto-detection
    pub fn dialect_override(&self) -> Result<Option<ShellDialect>> {
        if self.shell.dialect.eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        self.shell
            .dialect
            .to_lowercase()
            .parse::<ShellDialect>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid shell dialect: {}", e))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.serializer.acquire_timeout_secs)
    }

    /// Resolved settings for `tool`, merging its section over the defaults
    pub fn tool_settings(&self, tool: Tool) -> ToolSettings {
        let defaults = ToolSettings::for_tool(tool);
        let Some(section) = self.tools.get(tool.as_str()).cloned() else {
            return defaults;
        };

        let mut benign_patterns = defaults.benign_patterns;
        benign_patterns.extend(section.benign_stderr);

        ToolSettings {
            timeout: section
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_output_bytes: section.max_output_bytes.unwrap_or(defaults.max_output_bytes),
            executable: section.executable,
            known_locations: section.known_locations,
            benign_patterns,
        }
    }

    /// Gateway builder carrying every setting from this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the shell dialect does not parse.
    pub fn gateway_builder(&self) -> Result<GatewayBuilder> {
        let dialect = ShellDialect::detect().with_override(self.dialect_override()?);
        let mut builder = ToolGateway::builder()
            .dialect(dialect)
            .serializer(CallSerializer::new(self.acquire_timeout()))
            .cache(ResultCache::new(self.cache_ttl()));
        for tool in Tool::ALL {
            builder = builder.tool_settings(tool, self.tool_settings(tool));
        }
        Ok(builder)
    }
}
