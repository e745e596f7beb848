//! End-to-end lifecycle tests driving the task manager with mocks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;

use scopehub_core::autofocus::{AutofocusManager, AutofocusPhase, FocusState, NullJournal};
use scopehub_core::config::{AutofocusConfig, TasksConfig};
use scopehub_core::manager::TaskManager;
use scopehub_core::processors::ProcessorChain;
use scopehub_core::status::StatusHub;
use scopehub_core::task::{Stage, Task};
use scopehub_core::testing::{fixtures, MockBackend, MockHardware, RecordingProcessor};

struct Harness {
    manager: Arc<TaskManager>,
    backend: Arc<MockBackend>,
    hardware: Arc<MockHardware>,
}

fn harness_with(
    hardware: MockHardware,
    tasks_config: TasksConfig,
    processors: Vec<Arc<RecordingProcessor>>,
) -> Harness {
    let backend = Arc::new(MockBackend::new());
    let hardware = Arc::new(hardware);
    let chain = ProcessorChain::new(
        processors
            .into_iter()
            .map(|p| p as Arc<dyn scopehub_core::processors::ImageProcessor>)
            .collect(),
    );
    let autofocus = Arc::new(AutofocusManager::new(
        Arc::new(FocusState::new(None)),
        hardware.clone(),
        Arc::new(NullJournal),
        AutofocusConfig::default(),
    ));
    let manager = Arc::new(TaskManager::new(
        tasks_config,
        backend.clone(),
        hardware.clone(),
        chain,
        autofocus,
    ));
    Harness {
        manager,
        backend,
        hardware,
    }
}

fn harness() -> Harness {
    harness_with(MockHardware::new(), TasksConfig::default(), Vec::new())
}

fn due_task(id: &str) -> Task {
    let mut task = fixtures::task(id);
    task.start_at = Utc::now() - ChronoDuration::seconds(1);
    task
}

/// Wait until the board has evicted the task (terminal outcome reached).
/// The cap is generous because paused-clock tests sleep through minutes
/// of retry backoff in 10ms steps.
async fn wait_for_terminal(harness: &Harness, task_id: &str) {
    for _ in 0..30_000 {
        if harness.manager.board().stage_of(task_id).is_none() {
            // Give the terminal hooks a beat to finish reporting.
            tokio::time::sleep(Duration::from_millis(20)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached a terminal outcome", task_id);
}

#[tokio::test]
async fn test_full_success_lifecycle() {
    let processors = vec![
        Arc::new(RecordingProcessor::new("p1")),
        Arc::new(RecordingProcessor::new("p2")),
        Arc::new(RecordingProcessor::new("p3")),
    ];
    let h = harness_with(MockHardware::new(), TasksConfig::default(), processors.clone());

    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;
    assert_eq!(h.manager.board().stage_of("t-1"), Some(Stage::Pending));

    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    // Slewed to the task target, observed it, processed both frames and
    // uploaded both artifacts.
    assert_eq!(h.hardware.slews(), vec![(10.0, 20.0)]);
    assert_eq!(h.hardware.observed_tasks(), vec!["t-1"]);
    for p in &processors {
        assert_eq!(p.calls(), 2);
    }
    assert_eq!(h.backend.uploads(), vec!["t-1", "t-1"]);
    assert_eq!(h.backend.completed(), vec!["t-1"]);
    assert!(h.backend.failed().is_empty());

    // Nothing left tracked anywhere.
    assert_eq!(h.manager.board().stage_of("t-1"), None);
    assert_eq!(h.manager.board().current_task_id(), None);

    let outcomes = h.manager.board().recent_outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].stage, Stage::Completed);
}

#[tokio::test]
async fn test_task_admitted_exactly_once_across_polls() {
    // Keep the observation slow enough that the task is still in flight
    // while the backend re-lists it.
    let h = harness_with(
        MockHardware::new().with_observation_delay(Duration::from_millis(200)),
        TasksConfig::default(),
        Vec::new(),
    );
    h.backend.set_tasks(vec![due_task("t-1")]);

    // The same task keeps appearing in every poll while it is in flight.
    for _ in 0..5 {
        h.manager.poll_once().await;
        h.manager.tick_once().await;
    }

    wait_for_terminal(&h, "t-1").await;

    // The backend feed is eventually consistent and may keep listing the
    // task after completion; further polls must not re-admit it.
    h.manager.poll_once().await;
    h.manager.tick_once().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.hardware.observed_tasks(), vec!["t-1"]);
    assert_eq!(h.backend.completed(), vec!["t-1"]);
    assert_eq!(h.manager.board().stage_of("t-1"), None);
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_with_backoff_then_succeeds() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.backend.fail_next_uploads(2);

    let started = tokio::time::Instant::now();
    h.manager.poll_once().await;
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    // First retry after 30s, second after a further 60s.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(90), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(95), "elapsed {:?}", elapsed);

    assert_eq!(h.backend.completed(), vec!["t-1"]);
    assert!(h.backend.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_exhausted_fails_task() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.backend.fail_next_uploads(100);

    h.manager.poll_once().await;
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    assert!(h.backend.completed().is_empty());
    let failed = h.backend.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "t-1");

    let outcomes = h.manager.board().recent_outcomes();
    assert_eq!(outcomes[0].stage, Stage::Failed);
}

#[tokio::test]
async fn test_imaging_failure_is_terminal_without_retry() {
    let h = harness_with(
        MockHardware::new().with_observation_error("camera fault"),
        TasksConfig::default(),
        Vec::new(),
    );
    h.backend.set_tasks(vec![due_task("t-1")]);

    h.manager.poll_once().await;
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    // One observation attempt only: hardware faults are not retried.
    assert_eq!(h.hardware.observed_tasks(), vec!["t-1"]);
    let failed = h.backend.failed();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].1.contains("camera fault"));
    assert!(h.backend.uploads().is_empty());
}

#[tokio::test]
async fn test_processing_failure_is_terminal() {
    let backend = Arc::new(MockBackend::new());
    let hardware = Arc::new(MockHardware::new());
    let chain = ProcessorChain::new(vec![Arc::new(
        scopehub_core::testing::FailingProcessor::new("broken"),
    )]);
    let autofocus = Arc::new(AutofocusManager::new(
        Arc::new(FocusState::new(None)),
        hardware.clone(),
        Arc::new(NullJournal),
        AutofocusConfig::default(),
    ));
    let manager = Arc::new(TaskManager::new(
        TasksConfig::default(),
        backend.clone(),
        hardware.clone(),
        chain,
        autofocus,
    ));
    let h = Harness {
        manager,
        backend,
        hardware,
    };

    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    // The frame was captured but its artifacts never reached the backend.
    assert_eq!(h.hardware.observed_tasks(), vec!["t-1"]);
    assert!(h.backend.uploads().is_empty());
    assert_eq!(h.backend.failed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_autofocus_defers_while_imaging_busy() {
    let h = harness_with(
        MockHardware::new().with_observation_delay(Duration::from_secs(20)),
        TasksConfig::default(),
        Vec::new(),
    );
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;
    h.manager.tick_once().await;

    // Let imaging start, then request autofocus mid-observation.
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.manager.request_autofocus().unwrap();

    h.manager.tick_once().await;
    // Imaging is still busy, so the request stays pending and the
    // focuser has not been touched.
    assert_eq!(
        h.manager.autofocus().state().phase(),
        AutofocusPhase::Requested
    );
    assert_eq!(h.hardware.autofocus_calls(), 0);

    wait_for_terminal(&h, "t-1").await;

    // With imaging drained the next tick runs the focuser.
    h.manager.tick_once().await;
    assert_eq!(h.hardware.autofocus_calls(), 1);
    assert_eq!(h.manager.autofocus().state().phase(), AutofocusPhase::Idle);
}

#[tokio::test]
async fn test_admission_blocked_while_autofocus_requested() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;

    h.manager.request_autofocus().unwrap();

    // A tick with a pending request runs autofocus instead of admitting.
    h.manager.tick_once().await;
    assert_eq!(h.hardware.autofocus_calls(), 1);
    assert_eq!(h.manager.board().stage_of("t-1"), Some(Stage::Pending));

    // Once idle again, the task goes through.
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;
    assert_eq!(h.backend.completed(), vec!["t-1"]);
}

#[tokio::test]
async fn test_pause_blocks_admission_until_resume() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;

    h.manager.pause();
    for _ in 0..3 {
        h.manager.tick_once().await;
    }
    assert_eq!(h.manager.board().stage_of("t-1"), Some(Stage::Pending));
    assert!(h.hardware.observed_tasks().is_empty());

    h.manager.resume();
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;
    assert_eq!(h.backend.completed(), vec!["t-1"]);
}

#[tokio::test]
async fn test_expired_task_reported_and_never_observed() {
    let h = harness();
    let mut expired = due_task("t-old");
    expired.start_at = Utc::now() - ChronoDuration::hours(2);
    expired.stop_at = Some(Utc::now() + ChronoDuration::milliseconds(10));
    h.backend.set_tasks(vec![expired]);
    h.manager.poll_once().await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    h.manager.tick_once().await;

    assert!(h.hardware.observed_tasks().is_empty());
    let failed = h.backend.failed();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].1.contains("window expired"));
}

#[tokio::test]
async fn test_remove_task_purges_pending_work() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;

    assert!(h.manager.remove_task("t-1"));
    h.manager.tick_once().await;

    assert!(h.hardware.observed_tasks().is_empty());
    assert_eq!(h.manager.board().stage_of("t-1"), None);
}

#[tokio::test]
async fn test_poll_failure_keeps_local_state() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    h.manager.poll_once().await;

    h.backend.fail_next_fetches(1);
    h.manager.poll_once().await;

    // A failed poll must not drop the pending task.
    assert_eq!(h.manager.board().stage_of("t-1"), Some(Stage::Pending));
}

#[tokio::test]
async fn test_every_poll_heartbeats_backend() {
    let h = harness();

    h.manager.poll_once().await;
    h.manager.poll_once().await;
    assert_eq!(h.backend.online_reports(), 2);

    // The heartbeat goes out even when the task fetch fails.
    h.backend.fail_next_fetches(1);
    h.manager.poll_once().await;
    assert_eq!(h.backend.online_reports(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_upload_retry_resumes_after_partial_upload() {
    let h = harness();
    h.backend.set_tasks(vec![due_task("t-1")]);
    // First frame goes through, the second upload call fails once.
    h.backend.fail_upload_call(2);

    h.manager.poll_once().await;
    h.manager.tick_once().await;
    wait_for_terminal(&h, "t-1").await;

    assert_eq!(h.backend.completed(), vec!["t-1"]);

    // The retry picked up after the frame already transmitted, so each
    // of the two frames was uploaded exactly once.
    let files = h.backend.uploaded_files();
    assert_eq!(files.len(), 2);
    assert_ne!(files[0], files[1]);
}

#[tokio::test(start_paused = true)]
async fn test_status_published_only_on_change() {
    let h = harness();
    let hub = Arc::new(StatusHub::new(h.manager.clone()));
    let (shutdown_tx, _) = broadcast::channel(1);
    hub.spawn_publisher(Duration::from_secs(1), shutdown_tx.subscribe());

    let mut rx = hub.subscribe();
    rx.borrow_and_update();

    // Idle pipeline: the publisher samples but broadcasts nothing.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!rx.has_changed().unwrap());

    // A state change shows up on the next sample.
    h.manager.pause();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().admission_paused);

    drop(shutdown_tx);
}
