//! Registry of available producers, consumers and modules.
//!
//! Components are looked up by `(kind, name)` and built from their config
//! subtree. Everything is resolved at startup, see [`topology`].

pub mod topology;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::consumer::{DiscordBotConsumer, NotificationConsumer};
use crate::logging::LoggingConfig;
use crate::modules::{AdminModule, ConsumerModule};
use crate::producer::{StatusProducer, TwitchPoller};
use crate::{Error, Result};

pub use topology::Topology;

/// Component kinds, one namespace each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Producer,
    Consumer,
    Module,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => f.write_str("producer"),
            Self::Consumer => f.write_str("consumer"),
            Self::Module => f.write_str("module"),
        }
    }
}

/// A component to build: its registered name, its kind, and the config
/// subtree found at `key`.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub kind: ComponentKind,
    /// Dotted path of `config`, used in error messages.
    pub key: String,
    pub config: Value,
}

impl ComponentSpec {
    pub fn new(
        name: impl Into<String>,
        kind: ComponentKind,
        key: impl Into<String>,
        config: Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            key: key.into(),
            config,
        }
    }
}

/// Shared resources handed to every factory.
#[derive(Clone)]
pub struct ComponentServices {
    pub http: reqwest::Client,
    /// Present when the global subscriber was installed by this process.
    pub logging: Option<Arc<LoggingConfig>>,
}

impl ComponentServices {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            logging: None,
        }
    }

    pub fn with_logging(mut self, logging: Arc<LoggingConfig>) -> Self {
        self.logging = Some(logging);
        self
    }
}

pub type ProducerFactory =
    Arc<dyn Fn(&ComponentSpec, &ComponentServices) -> Result<Box<dyn StatusProducer>> + Send + Sync>;
pub type ConsumerFactory = Arc<
    dyn Fn(&ComponentSpec, &ComponentServices) -> Result<Arc<dyn NotificationConsumer>>
        + Send
        + Sync,
>;
pub type ModuleFactory =
    Arc<dyn Fn(&ComponentSpec, &ComponentServices) -> Result<Box<dyn ConsumerModule>> + Send + Sync>;

/// A constructor for one component kind.
#[derive(Clone)]
pub enum ComponentFactory {
    Producer(ProducerFactory),
    Consumer(ConsumerFactory),
    Module(ModuleFactory),
}

impl ComponentFactory {
    pub fn producer<F>(factory: F) -> Self
    where
        F: Fn(&ComponentSpec, &ComponentServices) -> Result<Box<dyn StatusProducer>>
            + Send
            + Sync
            + 'static,
    {
        Self::Producer(Arc::new(factory))
    }

    pub fn consumer<F>(factory: F) -> Self
    where
        F: Fn(&ComponentSpec, &ComponentServices) -> Result<Arc<dyn NotificationConsumer>>
            + Send
            + Sync
            + 'static,
    {
        Self::Consumer(Arc::new(factory))
    }

    pub fn module<F>(factory: F) -> Self
    where
        F: Fn(&ComponentSpec, &ComponentServices) -> Result<Box<dyn ConsumerModule>>
            + Send
            + Sync
            + 'static,
    {
        Self::Module(Arc::new(factory))
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Producer(_) => ComponentKind::Producer,
            Self::Consumer(_) => ComponentKind::Consumer,
            Self::Module(_) => ComponentKind::Module,
        }
    }
}

/// Name → factory, per component kind.
#[derive(Default, Clone)]
pub struct Registry {
    producers: HashMap<String, ProducerFactory>,
    consumers: HashMap<String, ConsumerFactory>,
    modules: HashMap<String, ModuleFactory>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the shipped components: the `poller` producer,
    /// the `discordbot` consumer and the `admin` module.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "poller",
            ComponentFactory::producer(|spec, services| {
                Ok(Box::new(TwitchPoller::from_spec(spec, services)?))
            }),
        );
        registry.register(
            "discordbot",
            ComponentFactory::consumer(|spec, services| {
                Ok(Arc::new(DiscordBotConsumer::from_spec(spec, services)?))
            }),
        );
        registry.register(
            "admin",
            ComponentFactory::module(|spec, services| {
                Ok(Box::new(AdminModule::from_spec(spec, services)?))
            }),
        );
        registry
    }

    /// Register `factory` under `name` in its kind's namespace, replacing any
    /// previous registration.
    pub fn register(&mut self, name: impl Into<String>, factory: ComponentFactory) {
        let name = name.into();
        let kind = factory.kind();
        let replaced = match factory {
            ComponentFactory::Producer(f) => self.producers.insert(name.clone(), f).is_some(),
            ComponentFactory::Consumer(f) => self.consumers.insert(name.clone(), f).is_some(),
            ComponentFactory::Module(f) => self.modules.insert(name.clone(), f).is_some(),
        };
        if replaced {
            warn!(kind = %kind, name = %name, "Replaced existing component registration");
        }
    }

    pub fn contains(&self, kind: ComponentKind, name: &str) -> bool {
        match kind {
            ComponentKind::Producer => self.producers.contains_key(name),
            ComponentKind::Consumer => self.consumers.contains_key(name),
            ComponentKind::Module => self.modules.contains_key(name),
        }
    }

    /// Registered names of `kind`, sorted.
    pub fn names(&self, kind: ComponentKind) -> Vec<&str> {
        let mut names: Vec<&str> = match kind {
            ComponentKind::Producer => self.producers.keys().map(String::as_str).collect(),
            ComponentKind::Consumer => self.consumers.keys().map(String::as_str).collect(),
            ComponentKind::Module => self.modules.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }

    pub fn build_producer(
        &self,
        spec: &ComponentSpec,
        services: &ComponentServices,
    ) -> Result<Box<dyn StatusProducer>> {
        let factory = self
            .producers
            .get(&spec.name)
            .ok_or_else(|| Error::unknown_component(ComponentKind::Producer, &spec.name))?;
        factory(spec, services)
    }

    pub fn build_consumer(
        &self,
        spec: &ComponentSpec,
        services: &ComponentServices,
    ) -> Result<Arc<dyn NotificationConsumer>> {
        let factory = self
            .consumers
            .get(&spec.name)
            .ok_or_else(|| Error::unknown_component(ComponentKind::Consumer, &spec.name))?;
        factory(spec, services)
    }

    pub fn build_module(
        &self,
        spec: &ComponentSpec,
        services: &ComponentServices,
    ) -> Result<Box<dyn ConsumerModule>> {
        let factory = self
            .modules
            .get(&spec.name)
            .ok_or_else(|| Error::unknown_component(ComponentKind::Module, &spec.name))?;
        factory(spec, services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn services() -> ComponentServices {
        nerodia_platforms::http::install_rustls_provider();
        ComponentServices::new(reqwest::Client::new())
    }

    #[test]
    fn test_registry_with_defaults() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.names(ComponentKind::Producer), vec!["poller"]);
        assert_eq!(registry.names(ComponentKind::Consumer), vec!["discordbot"]);
        assert_eq!(registry.names(ComponentKind::Module), vec!["admin"]);

        // Namespaces are separate.
        assert!(!registry.contains(ComponentKind::Consumer, "poller"));
    }

    #[test]
    fn test_unknown_component() {
        let registry = Registry::new();
        let spec = ComponentSpec::new("poller", ComponentKind::Producer, "producers.poller", json!({}));
        match registry.build_producer(&spec, &services()) {
            Err(Error::UnknownComponent { kind, name }) => {
                assert_eq!(kind, ComponentKind::Producer);
                assert_eq!(name, "poller");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("empty registry built a producer"),
        }
    }

    #[test]
    fn test_builds_default_components() {
        let registry = Registry::with_defaults();
        let services = services();

        let producer = registry
            .build_producer(
                &ComponentSpec::new(
                    "poller",
                    ComponentKind::Producer,
                    "producers.poller",
                    json!({ "streams": ["a"], "client_id": "id", "access_token": "tok", "interval_secs": 30 }),
                ),
                &services,
            )
            .unwrap();
        assert_eq!(producer.name(), "poller");
        assert_eq!(producer.interval(), std::time::Duration::from_secs(30));

        let consumer = registry
            .build_consumer(
                &ComponentSpec::new(
                    "discordbot",
                    ComponentKind::Consumer,
                    "consumers.discordbot",
                    json!({ "token": "t", "announce_channel": "1" }),
                ),
                &services,
            )
            .unwrap();
        assert_eq!(consumer.name(), "discordbot");

        let module = registry
            .build_module(
                &ComponentSpec::new(
                    "admin",
                    ComponentKind::Module,
                    "modules.discordbot.admin",
                    json!({}),
                ),
                &services,
            )
            .unwrap();
        assert_eq!(module.name(), "admin");
    }

    #[test]
    fn test_factory_config_errors_surface() {
        let registry = Registry::with_defaults();
        let spec = ComponentSpec::new(
            "discordbot",
            ComponentKind::Consumer,
            "consumers.discordbot",
            json!({ "announce_channel": "1" }),
        );
        match registry.build_consumer(&spec, &services()) {
            Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "consumers.discordbot.token"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("built a consumer without a token"),
        }
    }
}
