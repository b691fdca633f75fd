//! TOML Configuration File Support
//!
//! Loads the stage configuration (timing, clip pools, the credential issuer
//! and the persona list) from `~/.config/stage/stage.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/stage/stage.toml` (typically `~/.config/stage/stage.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [timing]
//! fallback_ms = 8000
//! poll_interval_ms = 500
//! poll_attempts = 20
//! ready_timeout_ms = 10000
//! status_interval_ms = 2500
//!
//! [ambient]
//! clips = ["forest_day.mp4", "forest_dusk.mp4"]
//! policy = "sequential"
//!
//! [overlays]
//! top = ["fireflies.mp4"]
//! bottom = ["fog.mp4"]
//!
//! [clips]
//! "forest_day.mp4" = 12000
//! "bigfoot_in.mp4" = 2000
//!
//! [issuer]
//! url = "https://tokens.example.net/session"
//! timeout_ms = 10000
//!
//! [[personas]]
//! id = "bigfoot"
//! credential_ref = "cred-bigfoot"
//! entry_clips = ["bigfoot_in.mp4"]
//! status_messages = ["Sniffing the air...", "Checking the trail..."]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::SelectionPolicy;
use crate::compositor::{ClipCatalog, PerpetualPools};
use crate::persona::{AssetRef, Persona, PersonaRegistry};
use crate::session::ReadinessConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Timing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingToml {
    /// Rendezvous fallback in milliseconds
    pub fallback_ms: Option<u64>,

    /// Readiness poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Maximum readiness polls
    pub poll_attempts: Option<u32>,

    /// Readiness hard timeout in milliseconds
    pub ready_timeout_ms: Option<u64>,

    /// Status rotation interval in milliseconds
    pub status_interval_ms: Option<u64>,

    /// Delay before retrying a perpetual clip that failed, in milliseconds
    pub retry_delay_ms: Option<u64>,
}

/// Ambient section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientToml {
    /// Candidate ambient clips
    pub clips: Option<Vec<AssetRef>>,

    /// How the pool advances on each loop restart
    pub policy: Option<SelectionPolicy>,
}

/// Overlays section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaysToml {
    /// Candidate clips for the top overlay
    pub top: Option<Vec<AssetRef>>,

    /// Candidate clips for the bottom overlay
    pub bottom: Option<Vec<AssetRef>>,
}

/// Issuer section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerToml {
    /// Credential endpoint
    pub url: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToml {
    /// Timing section
    pub timing: TimingToml,

    /// Ambient section
    pub ambient: AmbientToml,

    /// Overlays section
    pub overlays: OverlaysToml,

    /// Clip durations in milliseconds, keyed by asset name
    pub clips: HashMap<String, u64>,

    /// Issuer section
    pub issuer: IssuerToml,

    /// Persona list
    pub personas: Vec<Persona>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Stage timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    /// Bound on the wait for the rendezvous after activation
    pub fallback: Duration,
    /// Readiness detector tuning
    pub readiness: ReadinessConfig,
    /// Status rotation interval
    pub status_interval: Duration,
    /// Delay before retrying a perpetual clip that failed to play
    pub retry_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fallback: Duration::from_millis(8000),
            readiness: ReadinessConfig::default(),
            status_interval: Duration::from_millis(2500),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Centralized configuration for the stage
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct StageConfig {
    /// Timing
    pub timing: TimingConfig,

    /// Ambient candidates
    pub ambient: Vec<AssetRef>,

    /// Ambient selection policy
    pub ambient_policy: SelectionPolicy,

    /// Top overlay candidates
    pub overlay_top: Vec<AssetRef>,

    /// Bottom overlay candidates
    pub overlay_bottom: Vec<AssetRef>,

    /// Known clip durations
    pub clip_durations: HashMap<AssetRef, Duration>,

    /// Credential endpoint (`None` = in-process issuer)
    pub issuer_url: Option<String>,

    /// Credential request timeout
    pub issuer_timeout: Duration,

    /// Configured personas
    pub personas: Vec<Persona>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            ambient: Vec::new(),
            ambient_policy: SelectionPolicy::Random,
            overlay_top: Vec::new(),
            overlay_bottom: Vec::new(),
            clip_durations: HashMap::new(),
            issuer_url: None,
            issuer_timeout: Duration::from_secs(10),
            personas: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StageConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Candidate pools for the perpetual layers
    #[must_use]
    pub fn perpetual_pools(&self) -> PerpetualPools {
        PerpetualPools {
            ambient: self.ambient.clone(),
            ambient_policy: self.ambient_policy,
            overlay_top: self.overlay_top.clone(),
            overlay_bottom: self.overlay_bottom.clone(),
        }
    }

    /// Clip catalog for the clocked player
    #[must_use]
    pub fn clip_catalog(&self) -> ClipCatalog {
        ClipCatalog::from_durations(self.clip_durations.clone())
    }

    /// Persona registry
    #[must_use]
    pub fn registry(&self) -> PersonaRegistry {
        PersonaRegistry::new(self.personas.clone())
    }

    /// Check the configuration for values the stage cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timing = &self.timing;
        for (name, value) in [
            ("fallback_ms", timing.fallback),
            ("poll_interval_ms", timing.readiness.poll_interval),
            ("ready_timeout_ms", timing.readiness.timeout),
            ("status_interval_ms", timing.status_interval),
            ("retry_delay_ms", timing.retry_delay),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "timing.{name} must be greater than zero"
                )));
            }
        }
        if timing.readiness.poll_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "timing.poll_attempts must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for persona in &self.personas {
            if persona.id.as_str().trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "persona id must not be empty".into(),
                ));
            }
            if !seen.insert(&persona.id) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }
            if persona.status_messages.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "persona '{}' needs at least one status message",
                    persona.id
                )));
            }
        }

        if !self.personas.is_empty() && self.ambient.is_empty() {
            return Err(ConfigError::ValidationError(
                "ambient.clips must not be empty when personas are configured".into(),
            ));
        }

        if let Some(url) = &self.issuer_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "issuer.url must be an http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stage/stage.toml` or
/// `~/.config/stage/stage.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stage").join("stage.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting configuration does not validate.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<StageConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StageConfig, ConfigError> {
    let mut config = StageConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: StageToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                personas = config.personas.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Load configuration from TOML text, without consulting the environment
///
/// # Errors
///
/// Returns an error if the text cannot be parsed or does not validate.
pub fn load_config_from_str(content: &str) -> Result<StageConfig, ConfigError> {
    let toml_config: StageToml = toml::from_str(content)?;
    let mut config = StageConfig::default();
    apply_toml_config(&mut config, toml_config);
    config.source = ConfigSource::File;
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut StageConfig, toml: StageToml) {
    let timing = &toml.timing;
    if let Some(ms) = timing.fallback_ms {
        config.timing.fallback = Duration::from_millis(ms);
    }
    if let Some(ms) = timing.poll_interval_ms {
        config.timing.readiness.poll_interval = Duration::from_millis(ms);
    }
    if let Some(n) = timing.poll_attempts {
        config.timing.readiness.poll_attempts = n;
    }
    if let Some(ms) = timing.ready_timeout_ms {
        config.timing.readiness.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = timing.status_interval_ms {
        config.timing.status_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = timing.retry_delay_ms {
        config.timing.retry_delay = Duration::from_millis(ms);
    }

    if let Some(clips) = toml.ambient.clips {
        config.ambient = clips;
    }
    if let Some(policy) = toml.ambient.policy {
        config.ambient_policy = policy;
    }
    if let Some(top) = toml.overlays.top {
        config.overlay_top = top;
    }
    if let Some(bottom) = toml.overlays.bottom {
        config.overlay_bottom = bottom;
    }

    config.clip_durations.extend(
        toml.clips
            .into_iter()
            .map(|(name, ms)| (AssetRef::new(name), Duration::from_millis(ms))),
    );

    if toml.issuer.url.is_some() {
        config.issuer_url = toml.issuer.url;
    }
    if let Some(ms) = toml.issuer.timeout_ms {
        config.issuer_timeout = Duration::from_millis(ms);
    }

    if !toml.personas.is_empty() {
        config.personas = toml.personas;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut StageConfig) {
    if let Some(ms) = env_u64("STAGE_FALLBACK_MS") {
        config.timing.fallback = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_u64("STAGE_POLL_INTERVAL_MS") {
        config.timing.readiness.poll_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Ok(attempts) = std::env::var("STAGE_POLL_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.timing.readiness.poll_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(ms) = env_u64("STAGE_READY_TIMEOUT_MS") {
        config.timing.readiness.timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_u64("STAGE_STATUS_INTERVAL_MS") {
        config.timing.status_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Ok(url) = std::env::var("STAGE_ISSUER_URL") {
        config.issuer_url = Some(url);
        config.source = ConfigSource::Env;
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Fallback override (milliseconds)
    pub fallback_ms: Option<u64>,

    /// Issuer URL override
    pub issuer_url: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set fallback override
    #[must_use]
    pub fn with_fallback_ms(mut self, ms: u64) -> Self {
        self.fallback_ms = Some(ms);
        self
    }

    /// Set issuer URL override
    #[must_use]
    pub fn with_issuer_url(mut self, url: String) -> Self {
        self.issuer_url = Some(url);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut StageConfig) {
        if self.fallback_ms.is_some() || self.issuer_url.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ms) = self.fallback_ms {
            config.timing.fallback = Duration::from_millis(ms);
        }

        if let Some(ref url) = self.issuer_url {
            config.issuer_url = Some(url.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
