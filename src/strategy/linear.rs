//! The lockstep strategy.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::callback::EngineEvent;
use crate::error::Result;
use crate::executor::play_iterator::PlayIterator;
use crate::executor::queue_manager::{
    TaskQueueManager, RUN_FAILED_BREAK_PLAY, RUN_FAILED_HOSTS,
};
use crate::playbook::Task;
use crate::strategy::{execute_meta, finalize, run_handlers, Strategy};

/// Runs each task across every host before moving to the next task.
pub struct LinearStrategy;

#[async_trait]
impl Strategy for LinearStrategy {
    fn name(&self) -> &str {
        "linear"
    }

    async fn run(
        &self,
        iterator: &mut PlayIterator,
        tqm: &mut TaskQueueManager,
    ) -> Result<u32> {
        let play = Arc::clone(iterator.play());

        loop {
            if iterator.end_play {
                break;
            }
            let hosts = iterator.active_hosts();
            if hosts.is_empty() {
                break;
            }

            // One round: every active host gets its next task. Cursors
            // normally stay aligned, but `clear_host_errors` can leave
            // resumed hosts behind, so each entry is dispatched on its
            // own merits.
            let mut round: Vec<(String, Arc<Task>)> = Vec::new();
            for host in &hosts {
                if let Some(task) = iterator.next_task_for_host(host) {
                    round.push((host.clone(), task));
                }
            }
            if round.is_empty() {
                break;
            }

            let mut announced: HashSet<Uuid> = HashSet::new();
            for (host_name, task) in round {
                if task.is_meta() {
                    execute_meta(iterator, tqm, &host_name, &task).await?;
                    if iterator.end_play {
                        break;
                    }
                    continue;
                }
                if announced.insert(task.uuid) {
                    tqm.send_callback(EngineEvent::TaskStart {
                        task: Arc::clone(&task),
                    });
                }
                let host = match tqm.inventory().get_host(&host_name).cloned() {
                    Some(host) => host,
                    None => continue,
                };
                tqm.queue_task(&play, &host, task).await?;
                tqm.process_pending_results(iterator).await?;
            }
            tqm.wait_on_pending_results(iterator).await?;

            if play.any_errors_fatal && !iterator.get_failed_hosts().is_empty() {
                for host in iterator.active_hosts() {
                    iterator.mark_host_failed(&host);
                }
                return Ok(RUN_FAILED_BREAK_PLAY | RUN_FAILED_HOSTS);
            }
        }

        if iterator.has_notifications() {
            run_handlers(iterator, tqm).await?;
        }
        Ok(finalize(iterator, tqm))
    }
}
