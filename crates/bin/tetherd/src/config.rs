//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `tether.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;

use tether_domain::model::ModelDescriptor;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Discovery settings.
    pub discovery: DiscoveryConfig,
    /// Virtual adapter settings.
    #[serde(rename = "virtual")]
    pub virtual_devices: VirtualSection,
    /// Model descriptors to register. When empty, a built-in demo
    /// model is used.
    pub models: Vec<ModelDescriptor>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Discovery behaviour.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run nearby discovery automatically once setup completes.
    pub auto: bool,
}

/// Virtual adapter toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VirtualSection {
    /// Enable the virtual/demo adapter.
    pub enabled: bool,
    /// How many simulated devices to surface.
    pub count: u16,
}

impl Config {
    /// Load configuration from `tether.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("tether.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TETHER_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("TETHER_DISCOVER")
            && let Ok(auto) = val.parse()
        {
            self.discovery.auto = auto;
        }
        if let Ok(val) = std::env::var("TETHER_VIRTUAL_COUNT")
            && let Ok(count) = val.parse()
        {
            self.virtual_devices.count = count;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.virtual_devices.enabled && self.virtual_devices.count == 0 {
            return Err(ConfigError::Validation(
                "virtual count must be non-zero when enabled".to_string(),
            ));
        }
        for descriptor in &self.models {
            descriptor
                .validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "tetherd=info,tether_app=info,tether_adapter_virtual=info".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { auto: true }
    }
}

impl Default for VirtualSection {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 1,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert!(config.discovery.auto);
        assert!(config.virtual_devices.enabled);
        assert_eq!(config.virtual_devices.count, 1);
        assert!(config.models.is_empty());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.discovery.auto);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = r#"
            [logging]
            filter = 'debug'

            [discovery]
            auto = false

            [virtual]
            enabled = true
            count = 3

            [[models]]
            code = "demo-light"

            [models.bridge_filter]
            driver = "virtual"

            [[models.attributes]]
            code = "brightness"
            validator = "percent"

            [models.attributes.properties]
            purpose = "level"
            role = ["reading", "control"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert!(!config.discovery.auto);
        assert_eq!(config.virtual_devices.count, 3);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].code, "demo-light");
        config.validate().unwrap();
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert!(config.virtual_devices.enabled);
    }

    #[test]
    fn should_reject_zero_virtual_count_when_enabled() {
        let mut config = Config::default();
        config.virtual_devices.count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_invalid_model_descriptor() {
        let toml = r#"
            [[models]]
            code = ""
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
