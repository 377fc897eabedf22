//! Crate-wide error type.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("failed to render template '{template}': {message}")]
    TemplateRender { template: String, message: String },

    #[error("failed to evaluate condition '{expression}': {message}")]
    ConditionEvaluation { expression: String, message: String },

    #[error("host not found in inventory: {0}")]
    HostNotFound(String),

    #[error("result channel closed")]
    ChannelClosed,

    #[error("a worker stopped without reporting a result")]
    DeadWorker,

    #[error("prompt failed: {0}")]
    PromptFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn template_render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn condition(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionEvaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// True for errors that should abort the whole run rather than a
    /// single host or task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ChannelClosed | Error::DeadWorker | Error::Internal(_)
        )
    }
}
