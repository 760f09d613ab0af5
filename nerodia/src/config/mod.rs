//! Configuration document.
//!
//! The document is a YAML file with four top-level sections:
//!
//! ```yaml
//! producers:
//!   active: poller
//!   poller: { streams: [...], client_id: ..., client_secret: ... }
//! consumers:
//!   enabled: [discordbot]
//!   discordbot: { token: ..., announce_channel: ... }
//! modules:
//!   enabled: [discordbot.admin]
//!   discordbot:
//!     admin: { owners: [...] }
//! dispatcher:
//!   escalation_threshold: 5
//! ```
//!
//! It is loaded once, `${NAME}` references are expanded, and it is never
//! mutated afterwards.

mod dispatcher;
mod env;
pub(crate) mod ids;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{Error, Result};

pub use dispatcher::DispatcherConfig;
pub use env::expand_env;

static SERDE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:missing|unknown|duplicate) field `([^`]+)`").expect("field regex is valid")
});

/// The frozen configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Read and parse a YAML file, resolving `${NAME}` from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(path.display().to_string(), format!("cannot read file: {e}"))
        })?;
        let document = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(document)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_yaml_str_with(text, |name| std::env::var(name).ok())
    }

    /// Parse YAML, resolving `${NAME}` through `lookup`.
    pub fn from_yaml_str_with<F>(text: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut root: Value = serde_yaml::from_str(text)?;
        expand_env(&mut root, &lookup)?;
        Self::from_value(root)
    }

    /// Wrap an already-built tree. An empty document is an empty mapping.
    pub fn from_value(root: Value) -> Result<Self> {
        match root {
            Value::Null => Ok(Self {
                root: Value::Object(Map::new()),
            }),
            Value::Object(_) => Ok(Self { root }),
            _ => Err(Error::invalid_config(
                "<root>",
                "configuration must be a mapping",
            )),
        }
    }

    fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.root, |node, key| node.as_object()?.get(*key))
    }

    /// The single producer named by `producers.active`.
    pub fn active_producer(&self) -> Result<String> {
        match self.get(&["producers", "active"]) {
            None | Some(Value::Null) => Err(Error::invalid_config(
                "producers.active",
                "exactly one producer must be active",
            )),
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            Some(Value::String(_)) => Err(Error::invalid_config(
                "producers.active",
                "producer name is empty",
            )),
            Some(Value::Array(_)) => Err(Error::invalid_config(
                "producers.active",
                "only one producer may be active at a time",
            )),
            Some(other) => Err(Error::invalid_config(
                "producers.active",
                format!("expected a producer name, found {}", type_name(other)),
            )),
        }
    }

    /// Consumer names from `consumers.enabled`, in configuration order.
    pub fn enabled_consumers(&self) -> Result<Vec<String>> {
        let names = self.enabled_set(&["consumers", "enabled"])?;
        if names.is_none() {
            warn!("consumers.enabled is not set, no consumer will receive events");
        }
        Ok(names.unwrap_or_default())
    }

    /// Module bindings (`<consumer>.<module>`) from `modules.enabled`, in configuration order.
    pub fn enabled_modules(&self) -> Result<Vec<String>> {
        Ok(self
            .enabled_set(&["modules", "enabled"])?
            .unwrap_or_default())
    }

    fn enabled_set(&self, path: &[&str]) -> Result<Option<Vec<String>>> {
        let key = path.join(".");
        let items = match self.get(path) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::invalid_config(
                    key,
                    format!("expected a list of names, found {}", type_name(other)),
                ));
            }
        };

        let mut names: Vec<String> = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let Some(name) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return Err(Error::invalid_config(
                    format!("{key}[{index}]"),
                    "expected a non-empty name",
                ));
            };
            if names.iter().any(|seen| seen == name) {
                warn!(key = %key, name, "Duplicate entry ignored");
                continue;
            }
            names.push(name.to_string());
        }
        Ok(Some(names))
    }

    /// Subtree `producers.<name>`; absent means an empty mapping.
    pub fn producer_config(&self, name: &str) -> Value {
        self.subtree(&["producers", name])
    }

    /// Subtree `consumers.<name>`; absent means an empty mapping.
    pub fn consumer_config(&self, name: &str) -> Value {
        self.subtree(&["consumers", name])
    }

    /// Subtree `modules.<host>.<module>`; absent means an empty mapping.
    pub fn module_config(&self, host: &str, module: &str) -> Value {
        self.subtree(&["modules", host, module])
    }

    fn subtree(&self, path: &[&str]) -> Value {
        match self.get(path) {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) => value.clone(),
        }
    }

    /// The optional `dispatcher` section, validated.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig> {
        let config: DispatcherConfig = parse_section(&self.subtree(&["dispatcher"]), "dispatcher")?;
        config.validate()?;
        Ok(config)
    }
}

/// Deserialize a component's config subtree into its typed form.
///
/// Errors become `InvalidConfig`; when serde names the offending field the key
/// is `<key>.<field>`, otherwise `key` itself.
pub fn parse_section<T: DeserializeOwned>(value: &Value, key: &str) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| {
        let message = e.to_string();
        let key = match SERDE_FIELD.captures(&message) {
            Some(caps) => format!("{key}.{}", &caps[1]),
            None => key.to_string(),
        };
        Error::invalid_config(key, message)
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
