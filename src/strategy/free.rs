//! The free-running strategy.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::callback::EngineEvent;
use crate::error::{Error, Result};
use crate::executor::play_iterator::PlayIterator;
use crate::executor::queue_manager::TaskQueueManager;
use crate::strategy::{execute_meta, finalize, run_handlers, Strategy};

/// Lets every host advance through the task list at its own pace.
/// Each host has at most one task in flight at a time.
pub struct FreeStrategy;

#[async_trait]
impl Strategy for FreeStrategy {
    fn name(&self) -> &str {
        "free"
    }

    async fn run(
        &self,
        iterator: &mut PlayIterator,
        tqm: &mut TaskQueueManager,
    ) -> Result<u32> {
        let play = Arc::clone(iterator.play());
        let mut blocked: HashSet<String> = HashSet::new();

        loop {
            if iterator.end_play {
                break;
            }
            let active = iterator.active_hosts();
            if active.is_empty() && tqm.pending_results() == 0 {
                break;
            }

            let mut progressed = false;
            for host_name in active {
                if blocked.contains(&host_name) {
                    continue;
                }
                let task = match iterator.peek_task_for_host(&host_name) {
                    Some(task) => task,
                    None => {
                        // Out of tasks; advance once to reach the
                        // terminal state.
                        iterator.next_task_for_host(&host_name);
                        progressed = true;
                        continue;
                    }
                };
                iterator.next_task_for_host(&host_name);

                if task.is_meta() {
                    execute_meta(iterator, tqm, &host_name, &task).await?;
                    progressed = true;
                    if iterator.end_play {
                        break;
                    }
                    continue;
                }

                let host = match tqm.inventory().get_host(&host_name).cloned() {
                    Some(host) => host,
                    None => continue,
                };
                tqm.send_callback(EngineEvent::TaskStart {
                    task: Arc::clone(&task),
                });
                tqm.queue_task(&play, &host, task).await?;
                blocked.insert(host_name);
                progressed = true;
            }

            for result in tqm.process_pending_results(iterator).await? {
                blocked.remove(&result.host);
                progressed = true;
            }

            if !progressed {
                if tqm.has_dead_workers() {
                    return Err(Error::DeadWorker);
                }
                tokio::time::sleep(tqm.config().internal_poll_interval()).await;
            }
        }

        for result in tqm.wait_on_pending_results(iterator).await? {
            blocked.remove(&result.host);
        }
        if iterator.has_notifications() {
            run_handlers(iterator, tqm).await?;
        }
        Ok(finalize(iterator, tqm))
    }
}
