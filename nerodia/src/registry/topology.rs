//! Startup resolution of the configured components.
//!
//! Every name in the configuration is resolved and every component is built
//! here, before the dispatcher runs. Any failure aborts the whole resolution,
//! so a running pipeline is always complete.

use std::sync::Arc;

use tracing::{debug, info};

use super::{ComponentKind, ComponentServices, ComponentSpec, Registry};
use crate::config::{ConfigDocument, DispatcherConfig};
use crate::consumer::{CommandTable, NotificationConsumer};
use crate::modules::{ModuleBinding, ModuleCommands};
use crate::producer::StatusProducer;
use crate::{Error, Result};

/// The resolved pipeline: one producer, the enabled consumers in
/// configuration order, and the bindings that were attached.
pub struct Topology {
    pub producer: Box<dyn StatusProducer>,
    pub consumers: Vec<Arc<dyn NotificationConsumer>>,
    pub bindings: Vec<ModuleBinding>,
    pub dispatcher: DispatcherConfig,
}

impl Topology {
    pub fn resolve(
        document: &ConfigDocument,
        registry: &Registry,
        services: &ComponentServices,
    ) -> Result<Self> {
        let dispatcher = document.dispatcher_config()?;

        let producer = build_producer(document, registry, services)?;
        let consumers = build_consumers(document, registry, services)?;

        let mut tables: Vec<CommandTable> = Vec::with_capacity(consumers.len());
        for consumer in &consumers {
            let mut table = CommandTable::new();
            for (command, handler) in consumer.builtin_commands() {
                table.insert(&command, consumer.name(), handler)?;
            }
            tables.push(table);
        }

        let mut bindings = Vec::new();
        for (index, raw) in document.enabled_modules()?.iter().enumerate() {
            let binding = ModuleBinding::parse(raw, &format!("modules.enabled[{index}]"))?;

            let Some(position) = consumers
                .iter()
                .position(|c| c.name() == binding.host_consumer)
            else {
                info!(
                    binding = %binding,
                    "Host consumer is not enabled, module binding is inert"
                );
                continue;
            };

            let commands = attach_module(
                document,
                registry,
                services,
                &binding,
                consumers[position].as_ref(),
            )?;

            let owner = binding.to_string();
            for (command, handler) in commands {
                tables[position].insert(&command, &owner, handler)?;
            }
            bindings.push(binding);
        }

        for (consumer, table) in consumers.iter().zip(tables) {
            debug!(consumer = %consumer.name(), commands = table.len(), "Command table ready");
            consumer.install_commands(table)?;
        }

        info!(
            producer = %producer.name(),
            consumers = consumers.len(),
            modules = bindings.len(),
            "Topology resolved"
        );

        Ok(Self {
            producer,
            consumers,
            bindings,
            dispatcher,
        })
    }
}

fn build_producer(
    document: &ConfigDocument,
    registry: &Registry,
    services: &ComponentServices,
) -> Result<Box<dyn StatusProducer>> {
    let name = document.active_producer()?;
    if !registry.contains(ComponentKind::Producer, &name) {
        return Err(Error::unknown_component(ComponentKind::Producer, name));
    }

    let spec = ComponentSpec::new(
        name.clone(),
        ComponentKind::Producer,
        format!("producers.{name}"),
        document.producer_config(&name),
    );
    registry.build_producer(&spec, services)
}

fn build_consumers(
    document: &ConfigDocument,
    registry: &Registry,
    services: &ComponentServices,
) -> Result<Vec<Arc<dyn NotificationConsumer>>> {
    let names = document.enabled_consumers()?;

    // Unknown names fail before anything is constructed.
    if let Some(unknown) = names
        .iter()
        .find(|name| !registry.contains(ComponentKind::Consumer, name))
    {
        return Err(Error::unknown_component(
            ComponentKind::Consumer,
            unknown.as_str(),
        ));
    }

    names
        .iter()
        .map(|name| {
            let spec = ComponentSpec::new(
                name.clone(),
                ComponentKind::Consumer,
                format!("consumers.{name}"),
                document.consumer_config(name),
            );
            registry.build_consumer(&spec, services)
        })
        .collect()
}

fn attach_module(
    document: &ConfigDocument,
    registry: &Registry,
    services: &ComponentServices,
    binding: &ModuleBinding,
    host: &dyn NotificationConsumer,
) -> Result<ModuleCommands> {
    let spec = ComponentSpec::new(
        binding.module.clone(),
        ComponentKind::Module,
        binding.config_key(),
        document.module_config(&binding.host_consumer, &binding.module),
    );
    let module = registry.build_module(&spec, services)?;
    module.attach(host)
}
