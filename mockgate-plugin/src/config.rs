//! Configuration boundary: environment substitution and validation
//!
//! Schema validation is an external service; the core only needs the
//! `validate(name, config) -> errors` shape captured by [`ConfigValidator`].

use crate::error::{PluginError, Result};
use crate::registry::PluginRegistry;
use crate::traits::Plugin;
use mockgate_common::{PluginConfig, PluginSpec};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

/// Validates a plugin configuration; an empty list means valid
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, plugin: &str, config: &PluginConfig) -> Vec<String>;
}

impl<F> ConfigValidator for F
where
    F: Fn(&str, &PluginConfig) -> Vec<String> + Send + Sync,
{
    fn validate(&self, plugin: &str, config: &PluginConfig) -> Vec<String> {
        self(plugin, config)
    }
}

/// Rewrites a configuration before it reaches a plugin
pub trait ConfigSubstitutor: Send + Sync {
    fn substitute(&self, config: &PluginConfig) -> PluginConfig;
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Expands `${VAR}` and `${VAR:default}` in every string of a config,
/// recursing through nested objects and arrays.
///
/// A variable that is unset and has no default is left as written.
#[derive(Clone)]
pub struct EnvSubstitutor {
    lookup: Lookup,
}

impl std::fmt::Debug for EnvSubstitutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSubstitutor").finish_non_exhaustive()
    }
}

impl Default for EnvSubstitutor {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSubstitutor {
    /// Substitutor backed by the process environment
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn expand_str(&self, input: &str) -> String {
        let Some(placeholder) = PLACEHOLDER.as_ref() else {
            return input.to_string();
        };
        placeholder
            .replace_all(input, |caps: &Captures<'_>| {
                match (self.lookup)(&caps[1]) {
                    Some(value) => value,
                    None => caps
                        .get(2)
                        .map_or(&caps[0], |default| default.as_str())
                        .to_string(),
                }
            })
            .into_owned()
    }
}

// `${NAME}` or `${NAME:default}`; the default runs to the closing brace
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)(?::([^}]*))?\}").ok());

impl ConfigSubstitutor for EnvSubstitutor {
    fn substitute(&self, config: &PluginConfig) -> PluginConfig {
        config
            .iter()
            .map(|(k, v)| (k.clone(), self.expand_value(v)))
            .collect()
    }
}

/// Substitute, then validate. Validator errors are propagated unchanged.
pub fn prepare_config(
    plugin: &str,
    config: &PluginConfig,
    substitutor: Option<&dyn ConfigSubstitutor>,
    validator: Option<&dyn ConfigValidator>,
) -> Result<PluginConfig> {
    let config = match substitutor {
        Some(substitutor) => substitutor.substitute(config),
        None => config.clone(),
    };

    if let Some(validator) = validator {
        let errors = validator.validate(plugin, &config);
        if !errors.is_empty() {
            return Err(PluginError::InvalidConfig {
                plugin: plugin.to_string(),
                errors,
            });
        }
    }
    Ok(config)
}

/// Prepare a spec's configuration and build a fresh instance for it.
///
/// The instance is not initialized; `PluginManager::load_plugin` does that.
pub fn create_plugin_from_config(
    registry: &PluginRegistry,
    spec: &PluginSpec,
    substitutor: Option<&dyn ConfigSubstitutor>,
    validator: Option<&dyn ConfigValidator>,
) -> Result<(Box<dyn Plugin>, PluginConfig)> {
    let config = prepare_config(&spec.name, &spec.config, substitutor, validator)?;
    let plugin = registry.create(&spec.name)?;
    Ok((plugin, config))
}
