use crate::error::ConfigError;
use crate::ids::DEFAULT_ID_FORMAT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the configuration file location.
pub const CONFIG_FILE_ENV: &str = "SWEEPRUN_CONFIG_FILE";
/// When set, the missing-configuration warning is suppressed.
pub const NO_CONFIG_WARNING_ENV: &str = "SWEEPRUN_NO_CONFIG_WARNING";
/// Prefix used when naming test entities.
pub const TEST_PREFIX_ENV: &str = "SWEEPRUN_TEST_PREFIX";

pub const DEFAULT_CONFIG_FILE: &str = "sweeprun.yml";

/// Declared type of one backend configuration field, driving coercion of
/// scalar strings into typed values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Path,
}

impl FieldType {
    fn expected(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Path => "path",
        }
    }
}

/// One entry of a backend's declared configuration schema.
#[derive(Clone, Debug)]
pub struct ConfigField {
    pub name: &'static str,
    pub field_type: FieldType,
    pub default: Option<&'static str>,
    pub required: bool,
    pub help: &'static str,
}

impl ConfigField {
    pub const fn new(name: &'static str, field_type: FieldType, help: &'static str) -> Self {
        Self {
            name,
            field_type,
            default: None,
            required: false,
            help,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// A coerced configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Path(PathBuf),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(value) => Some(value),
            _ => None,
        }
    }
}

/// Coerce one raw string against a declared field type.
pub fn coerce(field: &ConfigField, raw: &str) -> Result<FieldValue, ConfigError> {
    let fail = || ConfigError::Coerce {
        field: field.name.to_owned(),
        expected: field.field_type.expected(),
        value: raw.to_owned(),
    };
    match field.field_type {
        FieldType::Text => Ok(FieldValue::Text(raw.to_owned())),
        FieldType::Path => Ok(FieldValue::Path(PathBuf::from(raw))),
        FieldType::Integer => raw.trim().parse().map(FieldValue::Integer).map_err(|_| fail()),
        FieldType::Float => raw.trim().parse().map(FieldValue::Float).map_err(|_| fail()),
        FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(FieldValue::Boolean(true)),
            "false" | "no" | "off" | "0" => Ok(FieldValue::Boolean(false)),
            _ => Err(fail()),
        },
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate a block's fields against a plugin schema.
///
/// Declared fields are coerced to their declared types, defaults fill the
/// gaps, missing required fields fail, and unknown fields only warn.
pub fn validate_block(
    plugin: &str,
    schema: &[ConfigField],
    fields: &BTreeMap<String, serde_yaml::Value>,
) -> Result<BTreeMap<String, FieldValue>, ConfigError> {
    let mut values = BTreeMap::new();

    for (name, raw) in fields {
        let Some(field) = schema.iter().find(|field| field.name == *name) else {
            warn!(plugin, field = name.as_str(), "Ignoring unknown configuration field");
            continue;
        };
        let raw = scalar_to_string(raw).ok_or_else(|| ConfigError::Coerce {
            field: field.name.to_owned(),
            expected: field.field_type.expected(),
            value: format!("{raw:?}"),
        })?;
        values.insert(field.name.to_owned(), coerce(field, &raw)?);
    }

    for field in schema {
        if values.contains_key(field.name) {
            continue;
        }
        if let Some(default) = field.default {
            values.insert(field.name.to_owned(), coerce(field, default)?);
        } else if field.required {
            return Err(ConfigError::MissingField {
                plugin: plugin.to_owned(),
                field: field.name.to_owned(),
            });
        }
    }

    Ok(values)
}

/// One named platform block: a `type` key naming the plugin plus free-form
/// fields validated against that plugin's schema.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PlatformBlock {
    #[serde(rename = "type")]
    pub platform_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_yaml::Value>,
}

/// The `common` section: process-wide settings, notably the id strategy.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CommonConfig {
    #[serde(default = "default_id_generator")]
    pub id_generator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_sequence: Option<SequenceConfig>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            id_generator: default_id_generator(),
            item_sequence: None,
        }
    }
}

fn default_id_generator() -> String {
    "uuid".to_owned()
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SequenceConfig {
    pub sequence_file: PathBuf,
    #[serde(default = "default_id_format")]
    pub id_format_str: String,
}

fn default_id_format() -> String {
    DEFAULT_ID_FORMAT.to_owned()
}

/// The parsed configuration file: a `common` section plus named platform
/// blocks.
#[derive(Deserialize, Debug, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub blocks: BTreeMap<String, PlatformBlock>,
}

impl ConfigFile {
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_owned()));
        }
        Self::from_str(&fs::read_to_string(path)?)
    }

    /// Load from `SWEEPRUN_CONFIG_FILE` or the default location. A missing
    /// file yields an empty configuration with a warning unless
    /// `SWEEPRUN_NO_CONFIG_WARNING` is set.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.is_file() {
            Self::from_file(&path)
        } else {
            if env::var(NO_CONFIG_WARNING_ENV).is_err() {
                warn!(path = ?path, "No configuration file found, using defaults");
            }
            Ok(Self::default())
        }
    }

    pub fn block(&self, name: &str) -> Result<&PlatformBlock, ConfigError> {
        self.blocks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBlock(name.to_owned()))
    }
}

/// Prefix used when naming entities created by test helpers.
pub fn test_prefix() -> String {
    env::var(TEST_PREFIX_ENV).unwrap_or_else(|_| "test".to_owned())
}
