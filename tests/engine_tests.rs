//! End-to-end engine behavior: queueing, results, retries, loops,
//! facts, and the callback stream.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use common::{
    inventory, quiet_tqm, FailingCallback, FlakyAction, RecordingCallback, SlowAction, StubAction,
};
use taskmill::prelude::*;

fn actions_with(extra: Vec<Arc<dyn ActionHandler>>) -> ActionRegistry {
    let mut registry = ActionRegistry::with_defaults();
    for action in extra {
        registry.register(action);
    }
    registry
}

#[tokio::test]
async fn every_host_reports_exactly_one_result() {
    let (action, calls) = StubAction::new("probe", json!({"changed": false}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1", "h2"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(Task::new("probe things", "probe"));
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(tqm.stats().host("h1").ok, 1);
    assert_eq!(tqm.stats().host("h2").ok, 1);
    assert_eq!(tqm.pending_results(), 0);
    tqm.cleanup().await;
}

#[tokio::test]
async fn loop_results_keep_item_order_and_or_their_flags() {
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![Arc::new(FlakyAction)]));

    let play = Play::new("p", "all").with_task(
        Task::new("flaky loop", "flaky")
            .with_loop(json!(["good", "bad", "also-good"]))
            .with_register("outcome"),
    );
    tqm.run(&play).await.unwrap();

    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("outcome"))
        .cloned()
        .unwrap();
    let items = registered["results"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["item"], json!("good"));
    assert_eq!(items[1]["item"], json!("bad"));
    assert_eq!(items[2]["item"], json!("also-good"));
    // One failed item fails the aggregate; one changed item marks it
    // changed.
    assert_eq!(registered["failed"], json!(true));
    assert_eq!(registered["changed"], json!(true));
    assert_eq!(tqm.stats().host("h1").failures, 1);
    tqm.cleanup().await;
}

#[tokio::test]
async fn empty_loop_skips_without_invoking_the_action() {
    let (action, calls) = StubAction::new("probe", json!({"changed": true}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("nothing to do", "probe")
            .with_loop(json!([]))
            .with_register("out"),
    );
    tqm.run(&play).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(tqm.stats().host("h1").skipped, 1);
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("out"))
        .cloned()
        .unwrap();
    assert_eq!(registered["results"], json!([]));
    tqm.cleanup().await;
}

#[tokio::test]
async fn retries_invoke_the_action_exactly_retries_times() {
    let (action, calls) = StubAction::new("wobbly", json!({"failed": true, "msg": "nope"}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("keep trying", "wobbly")
            .with_retries(3)
            .with_delay(0),
    );
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome, PlayOutcome::Completed(RUN_FAILED_HOSTS));
    assert!(tqm.failed_hosts().contains("h1"));
    tqm.cleanup().await;
}

#[tokio::test]
async fn failed_when_does_not_retry() {
    let (action, calls) = StubAction::new("fine", json!({"rc": 0}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let mut task = Task::new("asserted failure", "fine")
        .with_retries(5)
        .with_delay(0);
    task.failed_when = Some("true".to_string());
    let play = Play::new("p", "all").with_task(task);
    tqm.run(&play).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(tqm.stats().host("h1").failures, 1);
    tqm.cleanup().await;
}

#[tokio::test]
async fn until_polls_to_the_retry_bound_and_records_attempts() {
    let (action, calls) = StubAction::new("status", json!({"rc": 1}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("wait for service", "status")
            .with_retries(3)
            .with_delay(0)
            .with_until("result.rc == 0")
            .with_register("result"),
    );
    tqm.run(&play).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("result"))
        .cloned()
        .unwrap();
    assert_eq!(registered["attempts"], json!(3));
    assert_eq!(registered["failed"], json!(true));
    tqm.cleanup().await;
}

#[tokio::test]
async fn until_success_stops_after_one_attempt() {
    let (action, calls) = StubAction::new("status", json!({"rc": 0}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("wait for service", "status")
            .with_delay(0)
            .with_until("result.rc == 0")
            .with_register("result"),
    );
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    tqm.cleanup().await;
}

#[tokio::test]
async fn a_broken_callback_cannot_stop_the_run() {
    let recording = RecordingCallback::new();
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.callbacks_mut().register(Arc::new(FailingCallback));
    tqm.callbacks_mut()
        .register(Arc::clone(&recording) as Arc<dyn CallbackPlugin>);

    let play = Play::new("p", "all")
        .with_task(Task::new("say hi", "debug").with_arg("msg", json!("hi")));
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    let labels = recording.labels();
    assert!(labels.contains(&"task_start:say hi".to_string()));
    assert!(labels.contains(&"ok:h1".to_string()));
    tqm.cleanup().await;
}

#[tokio::test]
async fn failed_hosts_carry_over_between_plays() {
    let recording = RecordingCallback::new();
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1", "h2"]));
    tqm.callbacks_mut()
        .register(Arc::clone(&recording) as Arc<dyn CallbackPlugin>);

    let play1 = Play::new("first", "all").with_task(
        Task::new("break h1", "fail").with_when("inventory_hostname == 'h1'"),
    );
    tqm.run(&play1).await.unwrap();
    assert!(tqm.failed_hosts().contains("h1"));

    let play2 = Play::new("second", "all").with_task(Task::new("follow-up", "debug"));
    tqm.run(&play2).await.unwrap();

    let labels = recording.labels();
    assert!(labels.contains(&"start:h2:follow-up".to_string()));
    assert!(!labels.contains(&"start:h1:follow-up".to_string()));

    tqm.clear_failed_hosts();
    assert!(tqm.failed_hosts().is_empty());
    tqm.cleanup().await;
}

#[tokio::test]
async fn worker_pool_is_bounded_by_batch_size() {
    let config = Config {
        forks: 10,
        ..Config::default()
    };
    let mut tqm = quiet_tqm(config, inventory(&["h1", "h2", "h3"]));
    let play = Play::new("p", "all").with_task(Task::new("t", "debug"));
    tqm.run(&play).await.unwrap();
    assert_eq!(tqm.worker_pool_size(), 3);
    tqm.cleanup().await;
}

#[tokio::test]
async fn ignore_errors_keeps_the_host_in_the_play() {
    let (action, calls) = StubAction::new("after", json!({"changed": false}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all")
        .with_task(Task::new("allowed to fail", "fail").ignoring_errors())
        .with_task(Task::new("still runs", "after"));
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(tqm.stats().host("h1").ignored, 1);
    assert!(tqm.failed_hosts().is_empty());
    tqm.cleanup().await;
}

#[tokio::test]
async fn unreachable_hosts_are_removed_and_recorded() {
    let (down, _) = StubAction::new("connect", json!({"unreachable": true, "msg": "no route"}));
    let (after, after_calls) = StubAction::new("after", json!({}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![down, after]));

    let play = Play::new("p", "all")
        .with_task(Task::new("reach out", "connect"))
        .with_task(Task::new("never runs", "after"));
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_UNREACHABLE_HOSTS));
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tqm.stats().host("h1").dark, 1);
    assert!(tqm.unreachable_hosts().contains("h1"));
    tqm.cleanup().await;
}

#[tokio::test]
async fn set_fact_results_feed_later_templates() {
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));

    let play = Play::new("p", "all")
        .with_task(Task::new("pin release", "set_fact").with_arg("release", json!("1.2.3")))
        .with_task(
            Task::new("use release", "debug")
                .with_arg("msg", json!("deploying {{ release }}"))
                .with_register("out"),
        );
    tqm.run(&play).await.unwrap();

    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("out"))
        .cloned()
        .unwrap();
    assert_eq!(registered["msg"], json!("deploying 1.2.3"));
    tqm.cleanup().await;
}

#[tokio::test]
async fn changed_tasks_notify_handlers_once_per_host() {
    let (changer, _) = StubAction::new("bump", json!({"changed": true}));
    let (restart, restart_calls) = StubAction::new("restart", json!({"changed": true}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1", "h2"]));
    tqm.set_actions(actions_with(vec![changer, restart]));

    let play = Play::new("p", "all")
        .with_task(
            Task::new("update config", "bump")
                .with_notify("restart service")
                .with_notify("restart service"),
        )
        .with_handler(Handler::new(Task::new("restart service", "restart")));
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    assert_eq!(restart_calls.load(Ordering::SeqCst), 2);
    tqm.cleanup().await;
}

#[tokio::test]
async fn register_records_even_failed_results() {
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    let play = Play::new("p", "all").with_task(
        Task::new("doomed", "fail")
            .with_arg("msg", json!("expected"))
            .with_register("doom"),
    );
    tqm.run(&play).await.unwrap();

    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("doom"))
        .cloned()
        .unwrap();
    assert_eq!(registered["failed"], json!(true));
    assert_eq!(registered["msg"], json!("expected"));
    tqm.cleanup().await;
}

#[tokio::test]
async fn squashable_actions_collapse_the_loop_into_one_invocation() {
    let (action, calls) = StubAction::new("bulkpkg", json!({"changed": true}));
    let config = Config {
        squash_actions: vec!["bulkpkg".to_string()],
        ..Config::default()
    };
    let mut tqm = quiet_tqm(config, inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("install packages", "bulkpkg")
            .with_loop(json!(["pkg-a", "pkg-b", "pkg-c"]))
            .with_register("out"),
    );
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("out"))
        .cloned()
        .unwrap();
    // A squashed loop produces one plain result, not an item list.
    assert!(registered.get("results").is_none());
    assert_eq!(registered["changed"], json!(true));
    tqm.cleanup().await;
}

#[tokio::test]
async fn squashing_a_conditional_loop_still_runs_the_handler() {
    let (action, calls) = StubAction::new("bulkpkg", json!({"changed": true}));
    let config = Config {
        squash_actions: vec!["bulkpkg".to_string()],
        ..Config::default()
    };
    let mut tqm = quiet_tqm(config, inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    // The conditional holds per item but not for the whole item list,
    // so it must not be re-evaluated after squashing.
    let play = Play::new("p", "all").with_task(
        Task::new("install one", "bulkpkg")
            .with_loop(json!(["a"]))
            .with_when("item == 'a'")
            .with_register("out"),
    );
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("out"))
        .cloned()
        .unwrap();
    assert_eq!(registered["changed"], json!(true));
    assert!(registered.get("skipped").is_none());
    tqm.cleanup().await;
}

#[tokio::test]
async fn until_does_not_turn_a_failed_result_into_a_success() {
    let (action, calls) = StubAction::new("status", json!({"failed": true, "rc": 0}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![action]));

    let play = Play::new("p", "all").with_task(
        Task::new("wait for service", "status")
            .with_retries(5)
            .with_delay(0)
            .with_until("result.rc == 0")
            .with_register("result"),
    );
    let outcome = tqm.run(&play).await.unwrap();

    // The condition stops the retry loop after one attempt but the
    // result's own failure stands.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome, PlayOutcome::Completed(RUN_FAILED_HOSTS));
    assert!(tqm.failed_hosts().contains("h1"));
    tqm.cleanup().await;
}

#[tokio::test]
async fn fire_and_forget_reports_started_without_waiting() {
    let slow = SlowAction::new("bake", 30_000, json!({"changed": true}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![slow]));

    let mut task = Task::new("kick off bake", "bake").with_register("job");
    task.async_secs = 600;
    task.poll_secs = 0;
    let play = Play::new("p", "all").with_task(task);
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("job"))
        .cloned()
        .unwrap();
    assert_eq!(registered["started"], json!(1));
    assert_eq!(registered["finished"], json!(0));
    assert!(registered["job_id"].is_string());
    tqm.cleanup().await;
}

#[tokio::test]
async fn polled_async_task_finishes_within_budget() {
    let slow = SlowAction::new("bake", 50, json!({"changed": true, "rc": 0}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![slow]));

    let mut task = Task::new("bake and wait", "bake").with_register("job");
    task.async_secs = 10;
    task.poll_secs = 1;
    let play = Play::new("p", "all").with_task(task);
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_OK));
    let registered = tqm
        .variable_manager()
        .host_facts("h1")
        .and_then(|f| f.get("job"))
        .cloned()
        .unwrap();
    assert_eq!(registered["finished"], json!(1));
    assert_eq!(registered["rc"], json!(0));
    tqm.cleanup().await;
}

#[tokio::test]
async fn polled_async_task_fails_when_the_budget_runs_out() {
    let slow = SlowAction::new("bake", 30_000, json!({"changed": true}));
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    tqm.set_actions(actions_with(vec![slow]));

    let mut task = Task::new("bake too long", "bake");
    task.async_secs = 1;
    task.poll_secs = 1;
    let play = Play::new("p", "all").with_task(task);
    let outcome = tqm.run(&play).await.unwrap();

    assert_eq!(outcome, PlayOutcome::Completed(RUN_FAILED_HOSTS));
    assert_eq!(tqm.stats().host("h1").failures, 1);
    tqm.cleanup().await;
}

#[tokio::test]
async fn unknown_strategy_is_an_error() {
    let mut tqm = quiet_tqm(Config::default(), inventory(&["h1"]));
    let play = Play::new("p", "all")
        .with_strategy("wishful")
        .with_task(Task::new("t", "debug"));
    let err = tqm.run(&play).await.unwrap_err();
    assert!(matches!(err, Error::StrategyNotFound(name) if name == "wishful"));
    tqm.cleanup().await;
}
