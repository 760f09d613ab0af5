//! Command table and routing.
//!
//! A consumer's command table is assembled once at startup from its built-in
//! commands and the commands of every module bound to it. After installation
//! it is only ever read.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::transport::InboundMessage;
use crate::{Error, Result};

/// Everything a handler gets to see about one invocation.
pub struct CommandContext<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub message: &'a InboundMessage,
    pub table: &'a CommandTable,
}

/// Handles a single named command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// One-line description shown by `help`.
    fn summary(&self) -> &str;

    /// Run the command; `Some` is sent back to the channel it came from.
    async fn handle(&self, ctx: CommandContext<'_>) -> Result<Option<String>>;
}

struct CommandEntry {
    owner: String,
    handler: Arc<dyn CommandHandler>,
}

/// Command name → handler, with the component that contributed each entry.
#[derive(Default)]
pub struct CommandTable {
    entries: BTreeMap<String, CommandEntry>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Names are case-insensitive; a name that is already
    /// taken fails with `CommandConflict`.
    pub fn insert(
        &mut self,
        command: &str,
        owner: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        let command = command.trim().to_lowercase();
        if command.is_empty() || command.contains(char::is_whitespace) {
            return Err(Error::invalid_config(
                owner,
                format!("invalid command name `{command}`"),
            ));
        }

        if let Some(existing) = self.entries.get(&command) {
            return Err(Error::CommandConflict {
                command,
                first: existing.owner.clone(),
                second: owner.to_string(),
            });
        }

        self.entries.insert(
            command,
            CommandEntry {
                owner: owner.to_string(),
                handler,
            },
        );
        Ok(())
    }

    pub fn get(&self, command: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.entries
            .get(&command.to_lowercase())
            .map(|entry| &entry.handler)
    }

    /// `(name, summary)` pairs in name order.
    pub fn commands(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.handler.summary()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split a message into `(command, args)` when it is addressed to the bot,
/// either with `prefix` or by mentioning `bot_user_id`.
pub fn parse_invocation(
    content: &str,
    prefix: &str,
    bot_user_id: Option<&str>,
) -> Option<(String, Vec<String>)> {
    let content = content.trim();

    let rest = if !prefix.is_empty() && content.starts_with(prefix) {
        &content[prefix.len()..]
    } else {
        let id = bot_user_id?;
        let mention = format!("<@{id}>");
        let nick_mention = format!("<@!{id}>");
        content
            .strip_prefix(mention.as_str())
            .or_else(|| content.strip_prefix(nick_mention.as_str()))?
    };

    let mut words = rest.split_whitespace();
    let command = words.next()?.to_lowercase();
    let args = words.map(str::to_string).collect();
    Some((command, args))
}

/// Routes inbound messages to the installed command table.
pub struct CommandRouter {
    prefix: String,
    bot_user_id: RwLock<Option<String>>,
    table: OnceLock<Arc<CommandTable>>,
}

impl CommandRouter {
    pub fn new(prefix: impl Into<String>, bot_user_id: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            bot_user_id: RwLock::new(bot_user_id),
            table: OnceLock::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_bot_user_id(&self, user_id: impl Into<String>) {
        *self.bot_user_id.write() = Some(user_id.into());
    }

    pub fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().clone()
    }

    /// Install the table. Only the first call succeeds.
    pub fn install(&self, table: CommandTable) -> Result<()> {
        self.table
            .set(Arc::new(table))
            .map_err(|_| Error::Other("command table is already installed".to_string()))
    }

    pub fn table(&self) -> Option<&Arc<CommandTable>> {
        self.table.get()
    }

    /// Handle one message. Messages that are not commands, and unknown
    /// commands, yield `Ok(None)`.
    pub async fn route(&self, message: &InboundMessage) -> Result<Option<String>> {
        let bot_user_id = self.bot_user_id();
        let Some((command, args)) =
            parse_invocation(&message.content, &self.prefix, bot_user_id.as_deref())
        else {
            return Ok(None);
        };

        let Some(table) = self.table.get() else {
            debug!(command = %command, "Command received before the table was installed");
            return Ok(None);
        };

        let Some(handler) = table.get(&command) else {
            debug!(command = %command, "Unknown command");
            return Ok(None);
        };

        debug!(
            command = %command,
            author = %message.author_id,
            channel = %message.channel_id,
            "Running command"
        );
        handler
            .handle(CommandContext {
                command: &command,
                args: &args,
                message,
                table,
            })
            .await
    }
}

/// Built-in `help`: lists every installed command.
pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn summary(&self) -> &str {
        "List the available commands"
    }

    async fn handle(&self, ctx: CommandContext<'_>) -> Result<Option<String>> {
        let lines: Vec<String> = ctx
            .table
            .commands()
            .map(|(name, summary)| format!("`{name}` - {summary}"))
            .collect();
        Ok(Some(format!("Available commands:\n{}", lines.join("\n"))))
    }
}
