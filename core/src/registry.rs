//! Build-time plugin registry.
//!
//! Backends and id strategies register themselves at startup (the `mock`
//! backend and the two builtin id generators are pre-registered); the
//! registry is effectively read-only afterwards. A configuration block's
//! `type` key resolves here to a schema and a factory.

use crate::config::{CommonConfig, ConfigField, FieldValue};
use crate::error::ConfigError;
use crate::ids::{IdGenerators, SequenceIdGenerator};
use crate::ops::PlatformBackend;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A registered platform implementation: its schema and its factory.
#[derive(Clone)]
pub struct PlatformPlugin {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: fn() -> Vec<ConfigField>,
    pub factory:
        fn(&BTreeMap<String, FieldValue>) -> Result<Arc<dyn PlatformBackend>, ConfigError>,
}

/// A registered id-generation strategy.
#[derive(Clone)]
pub struct IdGeneratorPlugin {
    pub name: &'static str,
    pub factory: fn(&CommonConfig) -> Result<IdGenerators, ConfigError>,
}

struct Registry {
    platforms: BTreeMap<&'static str, PlatformPlugin>,
    id_generators: BTreeMap<&'static str, IdGeneratorPlugin>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| {
    let mut registry = Registry {
        platforms: BTreeMap::new(),
        id_generators: BTreeMap::new(),
    };
    registry
        .platforms
        .insert(crate::mock::PLUGIN_NAME, crate::mock::plugin());
    registry.id_generators.insert(
        "uuid",
        IdGeneratorPlugin {
            name: "uuid",
            factory: |_common| Ok(IdGenerators::Uuid),
        },
    );
    registry.id_generators.insert(
        "item_sequence",
        IdGeneratorPlugin {
            name: "item_sequence",
            factory: |common| {
                let sequence = common
                    .item_sequence
                    .as_ref()
                    .ok_or(ConfigError::MissingSequenceSection)?;
                Ok(IdGenerators::ItemSequence(SequenceIdGenerator::new(
                    sequence.sequence_file.clone(),
                    sequence.id_format_str.clone(),
                )))
            },
        },
    );
    RwLock::new(registry)
});

/// Register a platform plugin. Re-registering a name replaces the previous
/// entry with a warning.
pub fn register_platform(plugin: PlatformPlugin) {
    let mut registry = REGISTRY.write();
    if registry.platforms.insert(plugin.name, plugin.clone()).is_some() {
        warn!(plugin = plugin.name, "Replacing already registered platform plugin");
    } else {
        debug!(plugin = plugin.name, "Registered platform plugin");
    }
}

pub fn register_id_generator(plugin: IdGeneratorPlugin) {
    let mut registry = REGISTRY.write();
    if registry.id_generators.insert(plugin.name, plugin.clone()).is_some() {
        warn!(plugin = plugin.name, "Replacing already registered id generator");
    }
}

pub fn platform_plugin(name: &str) -> Result<PlatformPlugin, ConfigError> {
    REGISTRY
        .read()
        .platforms
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownPlugin(name.to_owned()))
}

pub fn registered_platforms() -> Vec<&'static str> {
    REGISTRY.read().platforms.keys().copied().collect()
}

/// Resolve the configured id generator and install it process-wide.
pub fn install_id_strategy(common: &CommonConfig) -> Result<(), ConfigError> {
    let plugin = REGISTRY
        .read()
        .id_generators
        .get(common.id_generator.as_str())
        .cloned()
        .ok_or_else(|| ConfigError::UnknownIdGenerator(common.id_generator.clone()))?;
    let strategy = (plugin.factory)(common)?;
    crate::ids::set_strategy(strategy);
    debug!(strategy = plugin.name, "Installed id strategy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_platform_is_preregistered() {
        assert!(registered_platforms().contains(&"mock"));
        assert!(platform_plugin("mock").is_ok());
        assert!(matches!(
            platform_plugin("definitely-not-a-backend"),
            Err(ConfigError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn item_sequence_requires_its_section() {
        let common = CommonConfig {
            id_generator: "item_sequence".to_owned(),
            item_sequence: None,
        };
        assert!(matches!(
            install_id_strategy(&common),
            Err(ConfigError::MissingSequenceSection)
        ));
    }
}
