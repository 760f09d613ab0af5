//! Consumer modules.
//!
//! A module is bound to one consumer through a `<consumer>.<module>` entry in
//! `modules.enabled` and contributes commands to that consumer's table.

mod admin;

use std::fmt;
use std::sync::Arc;

pub use admin::{AdminConfig, AdminModule};

use crate::consumer::{CommandHandler, NotificationConsumer};
use crate::{Error, Result};

/// Commands contributed by a module, keyed by name.
pub type ModuleCommands = Vec<(String, Arc<dyn CommandHandler>)>;

/// Optional behavior attached to one consumer at startup.
pub trait ConsumerModule: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the commands to merge into `host`'s table.
    fn attach(&self, host: &dyn NotificationConsumer) -> Result<ModuleCommands>;
}

/// A parsed `<consumer>.<module>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBinding {
    pub host_consumer: String,
    pub module: String,
}

impl ModuleBinding {
    /// Parse `binding`; `key` names the config entry it came from.
    pub fn parse(binding: &str, key: &str) -> Result<Self> {
        let invalid = || {
            Error::invalid_config(
                key,
                format!("module binding `{binding}` must look like `<consumer>.<module>`"),
            )
        };

        let (host, module) = binding.split_once('.').ok_or_else(invalid)?;
        let (host, module) = (host.trim(), module.trim());
        if host.is_empty() || module.is_empty() || module.contains('.') {
            return Err(invalid());
        }

        Ok(Self {
            host_consumer: host.to_string(),
            module: module.to_string(),
        })
    }

    /// Config path of the module's own settings.
    pub fn config_key(&self) -> String {
        format!("modules.{}.{}", self.host_consumer, self.module)
    }
}

impl fmt::Display for ModuleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.host_consumer, self.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        let binding = ModuleBinding::parse("discordbot.admin", "modules.enabled[0]").unwrap();
        assert_eq!(binding.host_consumer, "discordbot");
        assert_eq!(binding.module, "admin");
        assert_eq!(binding.to_string(), "discordbot.admin");
        assert_eq!(binding.config_key(), "modules.discordbot.admin");
    }

    #[test]
    fn test_malformed_bindings() {
        for raw in ["admin", ".admin", "discordbot.", "a.b.c"] {
            match ModuleBinding::parse(raw, "modules.enabled[2]") {
                Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "modules.enabled[2]"),
                other => panic!("{raw} produced {other:?}"),
            }
        }
    }
}
