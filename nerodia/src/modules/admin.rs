//! Administrative commands for a bot consumer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::{ConsumerModule, ModuleCommands};
use crate::Result;
use crate::config::parse_section;
use crate::consumer::{
    CommandContext, CommandHandler, ConsumerContext, DeliveryLog, NotificationConsumer, StartTime,
};
use crate::logging::LoggingConfig;
use crate::registry::{ComponentServices, ComponentSpec};

/// `modules.<consumer>.admin` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// User ids allowed to run admin commands; empty allows everyone.
    #[serde(deserialize_with = "crate::config::ids::id_list")]
    pub owners: Vec<String>,
}

pub struct AdminModule {
    name: String,
    owners: Arc<Vec<String>>,
    logging: Option<Arc<LoggingConfig>>,
}

impl AdminModule {
    pub fn new(
        name: impl Into<String>,
        config: AdminConfig,
        logging: Option<Arc<LoggingConfig>>,
    ) -> Self {
        Self {
            name: name.into(),
            owners: Arc::new(config.owners),
            logging,
        }
    }

    /// Registry factory.
    pub fn from_spec(spec: &ComponentSpec, services: &ComponentServices) -> Result<Self> {
        let config: AdminConfig = parse_section(&spec.config, &spec.key)?;
        Ok(Self::new(spec.name.clone(), config, services.logging.clone()))
    }

    fn restricted(&self, handler: impl CommandHandler + 'static) -> Arc<dyn CommandHandler> {
        Arc::new(Restricted {
            owners: self.owners.clone(),
            inner: handler,
        })
    }
}

impl ConsumerModule for AdminModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, host: &dyn NotificationConsumer) -> Result<ModuleCommands> {
        let ConsumerContext {
            name,
            deliveries,
            started_at,
        } = host.context();
        info!(module = %self.name, consumer = %name, "Attaching admin commands");

        Ok(vec![
            ("ping".to_string(), self.restricted(Ping)),
            ("uptime".to_string(), self.restricted(Uptime { started_at })),
            ("tracked".to_string(), self.restricted(Tracked { deliveries })),
            (
                "loglevel".to_string(),
                self.restricted(LogLevel {
                    logging: self.logging.clone(),
                }),
            ),
        ])
    }
}

/// Rejects authors that are not owners.
struct Restricted<H> {
    owners: Arc<Vec<String>>,
    inner: H,
}

#[async_trait]
impl<H: CommandHandler> CommandHandler for Restricted<H> {
    fn summary(&self) -> &str {
        self.inner.summary()
    }

    async fn handle(&self, ctx: CommandContext<'_>) -> Result<Option<String>> {
        if !self.owners.is_empty() && !self.owners.contains(&ctx.message.author_id) {
            return Ok(Some("You are not allowed to use this command.".to_string()));
        }
        self.inner.handle(ctx).await
    }
}

struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    fn summary(&self) -> &str {
        "Check that the bot is responsive"
    }

    async fn handle(&self, _ctx: CommandContext<'_>) -> Result<Option<String>> {
        Ok(Some("pong".to_string()))
    }
}

struct Uptime {
    started_at: StartTime,
}

#[async_trait]
impl CommandHandler for Uptime {
    fn summary(&self) -> &str {
        "Show how long the bot has been running"
    }

    async fn handle(&self, _ctx: CommandContext<'_>) -> Result<Option<String>> {
        let elapsed = Utc::now().signed_duration_since(self.started_at.get());
        Ok(Some(format!("Up for {}", format_duration(elapsed))))
    }
}

struct Tracked {
    deliveries: DeliveryLog,
}

#[async_trait]
impl CommandHandler for Tracked {
    fn summary(&self) -> &str {
        "List the last announced state of every stream"
    }

    async fn handle(&self, _ctx: CommandContext<'_>) -> Result<Option<String>> {
        let entries = self.deliveries.snapshot();
        if entries.is_empty() {
            return Ok(Some("No stream has been seen yet.".to_string()));
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|(subject, state)| format!("`{subject}`: {state}"))
            .collect();
        Ok(Some(lines.join("\n")))
    }
}

struct LogLevel {
    logging: Option<Arc<LoggingConfig>>,
}

#[async_trait]
impl CommandHandler for LogLevel {
    fn summary(&self) -> &str {
        "Show or change the log filter"
    }

    async fn handle(&self, ctx: CommandContext<'_>) -> Result<Option<String>> {
        let Some(logging) = &self.logging else {
            return Ok(Some("Log filter control is not available.".to_string()));
        };

        if ctx.args.is_empty() {
            return Ok(Some(format!("Current filter: `{}`", logging.get_filter())));
        }

        let directive = ctx.args.join(",");
        match logging.set_filter(&directive) {
            Ok(()) => Ok(Some(format!("Filter set to `{}`", logging.get_filter()))),
            Err(e) => Ok(Some(e.to_string())),
        }
    }
}

/// `1d 2h 3m 4s`, leaving out leading zero units.
fn format_duration(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
