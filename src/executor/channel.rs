//! The result channel between workers and the controlling task.
//!
//! Workers never touch shared engine state. Everything they produce
//! (final results, per-item callback events, display lines, prompt
//! requests) flows through one multi-producer channel that the queue
//! manager drains. Prompt requests carry a one-shot reply channel so a
//! worker can block on the answer without holding any lock.

use tokio::sync::{mpsc, oneshot};

use crate::callback::EngineEvent;
use crate::error::{Error, Result};
use crate::executor::task_result::TaskResult;

/// Severity for display lines forwarded from workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// A display line a worker wants shown without interleaving.
#[derive(Debug)]
pub struct DisplaySend {
    pub level: DisplayLevel,
    pub message: String,
}

/// A callback event raised mid-task (loop item results, retries).
#[derive(Debug)]
pub struct CallbackSend {
    pub event: EngineEvent,
}

/// A request for interactive input, answered over `reply`.
#[derive(Debug)]
pub struct PromptSend {
    pub prompt: String,
    pub private: bool,
    pub timeout_secs: Option<u64>,
    pub reply: oneshot::Sender<Result<String>>,
}

/// Everything a worker can post to the controlling task.
#[derive(Debug)]
pub enum WorkerMessage {
    Result(TaskResult),
    Callback(CallbackSend),
    Display(DisplaySend),
    Prompt(PromptSend),
}

/// Cloneable sending half handed to each worker.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ResultSender {
    pub fn post_result(&self, result: TaskResult) -> Result<()> {
        self.send(WorkerMessage::Result(result))
    }

    pub fn post_callback(&self, event: EngineEvent) -> Result<()> {
        self.send(WorkerMessage::Callback(CallbackSend { event }))
    }

    pub fn post_display(&self, level: DisplayLevel, message: impl Into<String>) -> Result<()> {
        self.send(WorkerMessage::Display(DisplaySend {
            level,
            message: message.into(),
        }))
    }

    /// Posts a prompt request and waits for the controlling task to
    /// reply with the user's input.
    pub async fn post_prompt(
        &self,
        prompt: impl Into<String>,
        private: bool,
        timeout_secs: Option<u64>,
    ) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WorkerMessage::Prompt(PromptSend {
            prompt: prompt.into(),
            private,
            timeout_secs,
            reply: reply_tx,
        }))?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    fn send(&self, message: WorkerMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelClosed)
    }
}

/// Creates the worker-to-controller channel pair.
pub fn result_channel() -> (ResultSender, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResultSender { tx }, rx)
}
