//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Plugin identity advertised to the orchestrator.
pub const PLUGIN_NAME: &str = "csi.hetzner.cloud";
/// Semantic version advertised to the orchestrator.
pub const PLUGIN_VERSION: &str = "1.3.0";
/// Hard ceiling of volumes attached to a single server.
pub const MAX_VOLUMES_PER_NODE: usize = 16;
/// Smallest volume the provider accepts, in gigabytes.
pub const MIN_VOLUME_SIZE_GB: u32 = 10;
/// Size used when a create request names none.
pub const DEFAULT_VOLUME_SIZE_GB: u32 = MIN_VOLUME_SIZE_GB;
/// Default Hetzner Cloud API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.hetzner.cloud/v1";
/// Longest accepted operation or lock wait, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Driver settings derived from environment variables, configuration files
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HCSI",
    discovery(
        app_name = "hcsi",
        env_var = "HCSI_CONFIG_PATH",
        config_file_name = "hcsi.toml",
        dotfile_name = ".hcsi.toml",
        project_file_name = "hcsi.toml"
    )
)]
pub struct DriverConfig {
    /// API token for the cloud project. Required by controller operations.
    #[serde(default, deserialize_with = "text_or_number")]
    pub api_token: Option<String>,
    /// Base URL of the cloud API.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Plugin name reported by the identity surface.
    #[ortho_config(default = PLUGIN_NAME.to_owned())]
    pub plugin_name: String,
    /// Plugin version reported by the identity surface.
    #[ortho_config(default = PLUGIN_VERSION.to_owned())]
    pub plugin_version: String,
    /// Server identifier of the node this process runs on. Hetzner server
    /// ids are numeric, so integers are accepted and kept as text.
    #[serde(default, deserialize_with = "text_or_number")]
    pub node_id: Option<String>,
    /// Location of the node this process runs on; also the default location
    /// for new volumes.
    pub node_location: Option<String>,
    /// Per-node attachment ceiling.
    #[ortho_config(default = 16)]
    pub max_volumes_per_node: usize,
    /// Minimum volume size in gigabytes.
    #[ortho_config(default = 10)]
    pub min_volume_size_gb: u32,
    /// Size used when a request omits one, in gigabytes.
    #[ortho_config(default = 10)]
    pub default_volume_size_gb: u32,
    /// Interval between operation status polls, in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// Maximum time spent waiting on one provider operation, in seconds.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
    /// Maximum time spent waiting for a per-key lock, in seconds.
    #[ortho_config(default = 60)]
    pub lock_timeout_secs: u64,
    /// Attempts made for a provider call that fails transiently.
    #[ortho_config(default = 5)]
    pub retry_attempts: u32,
    /// Filesystem created on unformatted volumes.
    #[ortho_config(default = "ext4".to_owned())]
    pub default_fs_type: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to hcsi.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const API_TOKEN: FieldMetadata = FieldMetadata::new("API token", "HCSI_API_TOKEN", "api_token");
const NODE_ID: FieldMetadata = FieldMetadata::new("node identifier", "HCSI_NODE_ID", "node_id");
const NODE_LOCATION: FieldMetadata =
    FieldMetadata::new("node location", "HCSI_NODE_LOCATION", "node_location");

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_owned(),
            plugin_name: PLUGIN_NAME.to_owned(),
            plugin_version: PLUGIN_VERSION.to_owned(),
            node_id: None,
            node_location: None,
            max_volumes_per_node: MAX_VOLUMES_PER_NODE,
            min_volume_size_gb: MIN_VOLUME_SIZE_GB,
            default_volume_size_gb: DEFAULT_VOLUME_SIZE_GB,
            poll_interval_ms: 1000,
            wait_timeout_secs: 300,
            lock_timeout_secs: 60,
            retry_attempts: 5,
            default_fs_type: String::from("ext4"),
        }
    }
}

impl DriverConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hcsi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation of the numeric limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a limit is zero or out of range,
    /// or the default size falls below the minimum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_volumes_per_node == 0 || self.max_volumes_per_node > MAX_VOLUMES_PER_NODE {
            return Err(ConfigError::Invalid(format!(
                "max_volumes_per_node must be between 1 and {MAX_VOLUMES_PER_NODE}, got {}",
                self.max_volumes_per_node
            )));
        }
        if self.min_volume_size_gb == 0 {
            return Err(ConfigError::Invalid(String::from(
                "min_volume_size_gb must be greater than zero",
            )));
        }
        if self.default_volume_size_gb < self.min_volume_size_gb {
            return Err(ConfigError::Invalid(format!(
                "default_volume_size_gb ({}) is below min_volume_size_gb ({})",
                self.default_volume_size_gb, self.min_volume_size_gb
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll_interval_ms must be greater than zero",
            )));
        }
        for (key, secs) in [
            ("wait_timeout_secs", self.wait_timeout_secs),
            ("lock_timeout_secs", self.lock_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"
                )));
            }
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "api_endpoint must not be empty",
            )));
        }
        Ok(())
    }

    /// Returns the API token, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming `HCSI_API_TOKEN`.
    pub fn api_token(&self) -> Result<&str, ConfigError> {
        non_blank(self.api_token.as_deref(), &API_TOKEN)
    }

    /// Returns the node identifier, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming `HCSI_NODE_ID`.
    pub fn node_id(&self) -> Result<&str, ConfigError> {
        non_blank(self.node_id.as_deref(), &NODE_ID)
    }

    /// Returns the node location, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming `HCSI_NODE_LOCATION`.
    pub fn node_location(&self) -> Result<&str, ConfigError> {
        non_blank(self.node_location.as_deref(), &NODE_LOCATION)
    }

    /// Identity advertised to the orchestrator.
    #[must_use]
    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: self.plugin_name.clone(),
            version: self.plugin_version.clone(),
        }
    }

    /// Key under which the location is advertised as a topology segment.
    #[must_use]
    pub fn topology_key(&self) -> String {
        format!("{}/location", self.plugin_name)
    }

    /// Polling interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Operation wait bound as a [`Duration`].
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Lock wait bound as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Plugin name and version pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `csi.hetzner.cloud`.
    pub name: String,
    /// Semantic version string.
    pub version: String,
}

/// Accepts a string or an integer. Environment values such as
/// `HCSI_NODE_ID=4711` arrive as integers.
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TextOrNumber;

    impl<'de> Visitor<'de> for TextOrNumber {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a string or an integer")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, inner: D2) -> Result<Self::Value, D2::Error> {
            inner.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_owned()))
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }
    }

    deserializer.deserialize_any(TextOrNumber)
}

fn non_blank<'a>(value: Option<&'a str>, metadata: &FieldMetadata) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
        _ => Err(metadata.missing()),
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
