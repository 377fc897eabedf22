//! The execution engine: worker pool, result channel, per-play
//! iteration, and run bookkeeping.

pub mod async_jobs;
pub mod channel;
pub mod play_iterator;
pub mod queue_manager;
pub mod stats;
pub mod task_result;
pub mod task_runner;
pub mod worker;

pub use channel::{result_channel, DisplayLevel, ResultSender, WorkerMessage};
pub use play_iterator::{PlayIterator, RunState};
pub use queue_manager::{
    PlayOutcome, TaskQueueManager, RUN_ERROR, RUN_FAILED_BREAK_PLAY, RUN_FAILED_HOSTS, RUN_OK,
    RUN_UNKNOWN_ERROR, RUN_UNREACHABLE_HOSTS,
};
pub use stats::{HostStats, RunStats, StatKind};
pub use task_result::TaskResult;
pub use task_runner::TaskRunner;
