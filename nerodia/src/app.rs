//! Application assembly and lifecycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::config::{ConfigDocument, DispatcherConfig};
use crate::consumer::NotificationConsumer;
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::modules::ModuleBinding;
use crate::producer::StatusProducer;
use crate::registry::{ComponentServices, Registry, Topology};

/// A fully resolved pipeline, ready to run.
pub struct App {
    producer: Box<dyn StatusProducer>,
    consumers: Vec<Arc<dyn NotificationConsumer>>,
    bindings: Vec<ModuleBinding>,
    dispatcher: DispatcherConfig,
}

impl App {
    /// Resolve every configured component. Nothing is started yet.
    pub fn build(
        document: &ConfigDocument,
        registry: &Registry,
        services: ComponentServices,
    ) -> Result<Self> {
        Ok(Self::from(Topology::resolve(document, registry, &services)?))
    }

    pub fn producer_name(&self) -> &str {
        self.producer.name()
    }

    pub fn consumer_names(&self) -> Vec<&str> {
        self.consumers.iter().map(|c| c.name()).collect()
    }

    pub fn bindings(&self) -> &[ModuleBinding] {
        &self.bindings
    }

    /// Run until `shutdown` is cancelled or the dispatcher gives up.
    ///
    /// Consumers are started first. One that fails to start is logged and
    /// kept, so it still receives events. On exit the dispatcher is stopped
    /// before the consumers are shut down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let consumer_token = shutdown.child_token();

        for consumer in &self.consumers {
            match consumer.start(consumer_token.clone()).await {
                Ok(()) => info!(consumer = %consumer.name(), "Consumer started"),
                Err(e) => warn!(consumer = %consumer.name(), error = %e, "Consumer failed to start"),
            }
        }

        let consumers = self.consumers.clone();
        let handle = Dispatcher::new(self.producer, self.consumers, self.dispatcher).start();
        let mut state = handle.watch_state();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested");
            }
            _ = state.wait_for(|s| *s == DispatcherState::Shutdown) => {}
        }

        handle.stop();
        let result = handle.join().await;

        consumer_token.cancel();
        for consumer in &consumers {
            consumer.shutdown().await;
        }

        match &result {
            Ok(()) => info!("Stopped"),
            Err(e) => warn!(error = %e, "Stopped with error"),
        }
        result
    }
}

impl From<Topology> for App {
    fn from(topology: Topology) -> Self {
        Self {
            producer: topology.producer,
            consumers: topology.consumers,
            bindings: topology.bindings,
            dispatcher: topology.dispatcher,
        }
    }
}
