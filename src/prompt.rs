//! Interactive input.
//!
//! Workers never read the terminal themselves. They post a prompt
//! request over the result channel and the controlling task answers it
//! through whatever [`PromptHandler`] the embedder installed.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{Error, Result};

/// Answers prompt requests forwarded from workers.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Asks the user for input. `private` marks secrets; `timeout_secs`
    /// bounds the wait.
    async fn prompt(
        &self,
        message: &str,
        private: bool,
        timeout_secs: Option<u64>,
    ) -> Result<String>;
}

/// Reads answers from standard input.
pub struct StdinPrompt;

impl StdinPrompt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptHandler for StdinPrompt {
    async fn prompt(
        &self,
        message: &str,
        _private: bool,
        timeout_secs: Option<u64>,
    ) -> Result<String> {
        {
            use std::io::Write;
            let mut out = std::io::stdout();
            write!(out, "{message}: ")?;
            out.flush()?;
        }
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        let read = reader.read_line(&mut line);
        let n = match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), read)
                .await
                .map_err(|_| {
                    Error::PromptFailed("timed out waiting for input".to_string())
                })??,
            None => read.await?,
        };
        if n == 0 {
            return Err(Error::PromptFailed("end of input".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Always answers with a fixed string. Used by tests and unattended
/// runs where prompting is not possible.
pub struct CannedPrompt {
    answer: String,
}

impl CannedPrompt {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl PromptHandler for CannedPrompt {
    async fn prompt(
        &self,
        _message: &str,
        _private: bool,
        _timeout_secs: Option<u64>,
    ) -> Result<String> {
        Ok(self.answer.clone())
    }
}
