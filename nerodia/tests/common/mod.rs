//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nerodia::config::ConfigDocument;
use nerodia::consumer::{
    ChatTransport, CommandContext, CommandHandler, CommandTable, ConsumerContext, DeliveryLog,
    DiscordBotConfig, DiscordBotConsumer, InboundMessage, NotificationConsumer, StartTime,
    TransportEvent,
};
use nerodia::modules::{ConsumerModule, ModuleCommands};
use nerodia::producer::{StatusEvent, StatusProducer, StreamStatus};
use nerodia::registry::{ComponentFactory, ComponentServices, Registry};
use nerodia::{Error, Result};
use nerodia_platforms::discord::CreateMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Polls = Arc<Mutex<VecDeque<Result<Vec<StatusEvent>>>>>;
pub type Seen = Arc<Mutex<Vec<(String, String)>>>;

pub fn services() -> ComponentServices {
    nerodia_platforms::http::install_rustls_provider();
    ComponentServices::new(reqwest::Client::new())
}

pub fn document(yaml: &str) -> ConfigDocument {
    ConfigDocument::from_yaml_str_with(yaml, |_| None).unwrap()
}

pub fn live(subject: &str) -> StatusEvent {
    StatusEvent::new(subject, Some(StreamStatus::Offline), StreamStatus::Live)
}

/// Poll until `check` holds, for at most five seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Replays queued poll results, then reports no changes.
pub struct ScriptedProducer {
    polls: Polls,
}

#[async_trait]
impl StatusProducer for ScriptedProducer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn detect_changes(&mut self) -> Result<Vec<StatusEvent>> {
        self.polls.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Records every event; `fail` or `panic` in its config makes it misbehave
/// after recording.
pub struct RecordingConsumer {
    name: String,
    fail: bool,
    panic: bool,
    seen: Seen,
}

#[async_trait]
impl NotificationConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> ConsumerContext {
        ConsumerContext {
            name: self.name.clone(),
            deliveries: DeliveryLog::new(),
            started_at: StartTime::new(),
        }
    }

    fn install_commands(&self, _table: CommandTable) -> Result<()> {
        Ok(())
    }

    async fn on_event(&self, event: &StatusEvent) -> Result<()> {
        self.seen
            .lock()
            .push((self.name.clone(), event.subject.clone()));
        if self.panic {
            panic!("{} blew up", self.name);
        }
        if self.fail {
            return Err(Error::Other("webhook unreachable".to_string()));
        }
        Ok(())
    }
}

/// In-memory chat service.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<(String, CreateMessage)>>,
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn push_message(&self, author_id: &str, content: &str) {
        let message = InboundMessage {
            channel_id: "chat".to_string(),
            guild_id: Some("guild".to_string()),
            author_id: author_id.to_string(),
            author_name: "tester".to_string(),
            content: content.to_string(),
        };
        let sender = self.inbound.lock().clone().expect("transport not subscribed");
        sender.try_send(TransportEvent::Message(message)).unwrap();
    }

    pub fn is_subscribed(&self) -> bool {
        self.inbound.lock().is_some()
    }

    pub fn sent_to(&self, channel: &str) -> Vec<CreateMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == channel)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
        self.sent
            .lock()
            .push((channel_id.to_string(), message.clone()));
        Ok(())
    }

    async fn subscribe(&self, _shutdown: CancellationToken) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(16);
        *self.inbound.lock() = Some(tx);
        Ok(rx)
    }

    async fn current_user_id(&self) -> Result<String> {
        Ok("999".to_string())
    }
}

/// A module contributing one fixed command.
pub struct SingleCommandModule {
    name: String,
    command: String,
}

struct Canned(String);

#[async_trait]
impl CommandHandler for Canned {
    fn summary(&self) -> &str {
        "Canned reply"
    }

    async fn handle(&self, _ctx: CommandContext<'_>) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

impl ConsumerModule for SingleCommandModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, _host: &dyn NotificationConsumer) -> Result<ModuleCommands> {
        Ok(vec![(
            self.command.clone(),
            Arc::new(Canned(format!("{} says hi", self.name))) as Arc<dyn CommandHandler>,
        )])
    }
}

/// Handles into a [`test_registry`].
pub struct Fakes {
    pub polls: Polls,
    pub seen: Seen,
    pub transport: Arc<FakeTransport>,
    pub consumers_built: Arc<AtomicUsize>,
}

impl Fakes {
    pub fn consumers_built(&self) -> usize {
        self.consumers_built.load(Ordering::SeqCst)
    }
}

/// Shipped components plus `scripted` (producer), `recorder` and `bot`
/// (consumers) and `pinger`/`helper` (modules).
///
/// `bot` is the real Discord consumer on top of a [`FakeTransport`].
pub fn test_registry() -> (Registry, Fakes) {
    let fakes = Fakes {
        polls: Arc::new(Mutex::new(VecDeque::new())),
        seen: Arc::new(Mutex::new(Vec::new())),
        transport: Arc::new(FakeTransport::default()),
        consumers_built: Arc::new(AtomicUsize::new(0)),
    };

    let mut registry = Registry::with_defaults();

    let polls = fakes.polls.clone();
    registry.register(
        "scripted",
        ComponentFactory::producer(move |_spec, _services| {
            Ok(Box::new(ScriptedProducer {
                polls: polls.clone(),
            }))
        }),
    );

    for name in ["recorder", "flaky", "broken"] {
        let seen = fakes.seen.clone();
        let built = fakes.consumers_built.clone();
        registry.register(
            name,
            ComponentFactory::consumer(move |spec, _services| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(RecordingConsumer {
                    name: spec.name.clone(),
                    fail: spec.config["fail"].as_bool().unwrap_or(false),
                    panic: spec.config["panic"].as_bool().unwrap_or(false),
                    seen: seen.clone(),
                }))
            }),
        );
    }

    let transport = fakes.transport.clone();
    let built = fakes.consumers_built.clone();
    registry.register(
        "bot",
        ComponentFactory::consumer(move |spec, _services| {
            built.fetch_add(1, Ordering::SeqCst);
            let config = DiscordBotConfig::parse(&spec.config, &spec.key)?;
            Ok(Arc::new(DiscordBotConsumer::new(
                spec.name.clone(),
                config,
                transport.clone(),
            )))
        }),
    );

    for (module, command) in [("pinger", "ping"), ("helper", "help")] {
        registry.register(
            module,
            ComponentFactory::module(move |spec, _services| {
                Ok(Box::new(SingleCommandModule {
                    name: spec.name.clone(),
                    command: command.to_string(),
                }))
            }),
        );
    }

    (registry, fakes)
}
