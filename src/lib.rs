//! Taskmill is an async task execution and queue-management engine for
//! declarative automation: plays fan tasks out to a bounded worker
//! pool, results flow back over a single channel, and pluggable
//! strategies decide the scheduling order.
//!
//! # Architecture
//!
//! ```text
//!                 +--------------------+
//!   Play ------>  |  TaskQueueManager  |  ----> CallbackRegistry
//!                 +--------------------+
//!                   |                ^
//!        queue_task |                | WorkerMessage
//!                   v                |   (result channel)
//!               +---------+   +-------------+
//!               | Strategy|   |  Workers    |
//!               | (linear |   | (TaskRunner |
//!               |  / free)|   |  per task)  |
//!               +---------+   +-------------+
//! ```
//!
//! The manager owns the worker pool, statistics, and the persistent
//! failed/unreachable host sets; a [`strategy::Strategy`] drives it
//! through a [`executor::PlayIterator`]. Workers run one
//! [`executor::TaskRunner`] each and post exactly one final result.
//!
//! # Example
//!
//! ```no_run
//! use taskmill::prelude::*;
//!
//! # async fn demo() -> taskmill::error::Result<()> {
//! let mut inventory = Inventory::new();
//! inventory.add_host(Host::new("localhost"));
//!
//! let play = Play::new("demo", "all")
//!     .with_task(Task::new("say hi", "debug").with_arg("msg", "hello".into()));
//!
//! let mut tqm = TaskQueueManager::new(Config::default(), inventory);
//! let outcome = tqm.run(&play).await?;
//! tqm.send_stats();
//! tqm.cleanup().await;
//! assert_eq!(outcome.status(), RUN_OK);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod actions;
pub mod callback;
pub mod config;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod playbook;
pub mod prompt;
pub mod strategy;
pub mod template;
pub mod vars;

pub use config::Config;
pub use error::{Error, Result};
pub use executor::{PlayOutcome, TaskQueueManager, TaskResult};
pub use inventory::{Host, Inventory};
pub use playbook::{Handler, Play, Task};
pub use vars::{VariableManager, Variables};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::actions::{ActionHandler, ActionRegistry};
    pub use crate::callback::{CallbackPlugin, CallbackType, EngineEvent};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        PlayIterator, PlayOutcome, RunStats, TaskQueueManager, TaskResult, RUN_FAILED_BREAK_PLAY,
        RUN_FAILED_HOSTS, RUN_OK, RUN_UNREACHABLE_HOSTS,
    };
    pub use crate::inventory::{Host, Inventory};
    pub use crate::playbook::{Handler, Play, Task};
    pub use crate::strategy::{Strategy, StrategyRegistry};
    pub use crate::template::Templar;
    pub use crate::vars::{VariableManager, Variables};
}
