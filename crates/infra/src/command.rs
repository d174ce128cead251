//! Command execution: runs the named action a rock carries.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Why an action attempt failed.
///
/// Both variants count as a failed attempt for retry purposes.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no handler registered for action '{0}'")]
    NoHandler(String),

    #[error("action '{action}' failed: {source}")]
    Failed {
        action: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Executes an action by name. Opaque to the queue; side effects are the
/// action's business.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, action: &str, args: Option<JsonValue>) -> Result<JsonValue, CommandError>;
}

#[async_trait]
impl<X> CommandExecutor for Arc<X>
where
    X: CommandExecutor + ?Sized,
{
    async fn execute(&self, action: &str, args: Option<JsonValue>) -> Result<JsonValue, CommandError> {
        (**self).execute(action, args).await
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<JsonValue>> + Send>>;

/// Action handler function type.
pub type CommandHandler = Arc<dyn Fn(Option<JsonValue>) -> HandlerFuture + Send + Sync>;

/// Name-routed executor.
///
/// Lookup order: exact name, then `"prefix.*"` category patterns
/// (`"mail.*"` matches `"mail.send"`), then the `"*"` wildcard.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action name or pattern.
    pub fn register<F, Fut>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(Option<JsonValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(pattern.into(), handler);
    }

    /// Builder form of `register`.
    pub fn with_handler<F, Fut>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<JsonValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        self.register(pattern, handler);
        self
    }

    fn get_handler(&self, action: &str) -> Option<&CommandHandler> {
        if let Some(h) = self.handlers.get(action) {
            return Some(h);
        }

        // Longest matching category wins so "mail.bulk.*" beats "mail.*".
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = action.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);
        if category.is_some() {
            return category;
        }

        self.handlers.get("*")
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut patterns: Vec<_> = self.handlers.keys().collect();
        patterns.sort();
        f.debug_struct("CommandRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}

#[async_trait]
impl CommandExecutor for CommandRegistry {
    async fn execute(&self, action: &str, args: Option<JsonValue>) -> Result<JsonValue, CommandError> {
        let handler = self
            .get_handler(action)
            .cloned()
            .ok_or_else(|| CommandError::NoHandler(action.to_string()))?;

        handler(args).await.map_err(|source| CommandError::Failed {
            action: action.to_string(),
            source,
        })
    }
}
