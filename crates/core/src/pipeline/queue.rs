use super::{RetryPolicy, StageWorker, WorkItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
#[error("work queue closed")]
pub struct QueueClosed;

struct QueueEntry<I> {
    item: I,
    /// Retries already performed for this item.
    retries: u32,
}

/// A single-consumer stage queue.
///
/// One spawned loop drains the queue and runs the worker sequentially.
/// The in-flight count covers every submitted item until its terminal
/// outcome, including the backoff wait between retries, so `is_idle()`
/// going true means no item can still reappear.
pub struct WorkQueue<W: StageWorker> {
    tx: mpsc::UnboundedSender<QueueEntry<W::Item>>,
    shutdown_tx: watch::Sender<bool>,
    inflight: Arc<AtomicUsize>,
    name: &'static str,
}

impl<W: StageWorker> Clone for WorkQueue<W> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            inflight: self.inflight.clone(),
            name: self.name,
        }
    }
}

impl<W: StageWorker> WorkQueue<W> {
    /// Spawns the consumer loop. The loop ends when every queue handle
    /// (and every pending retry) has been dropped.
    pub fn spawn(name: &'static str, worker: W, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inflight = Arc::new(AtomicUsize::new(0));

        let queue = Self {
            tx: tx.clone(),
            shutdown_tx,
            inflight: inflight.clone(),
            name,
        };

        let handle = tokio::spawn(run_loop(
            name,
            worker,
            policy,
            rx,
            tx.downgrade(),
            shutdown_rx,
            inflight,
        ));
        (queue, handle)
    }

    /// Submits an item. The in-flight count is raised before the send so
    /// `is_idle()` can never observe a gap.
    pub fn submit(&self, item: W::Item) -> Result<(), QueueClosed> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let entry = QueueEntry { item, retries: 0 };
        if self.tx.send(entry).is_err() {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// True when no submitted item is pending, executing or waiting out a
    /// retry backoff.
    pub fn is_idle(&self) -> bool {
        self.inflight.load(Ordering::SeqCst) == 0
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Asks the consumer loop to stop. An item already executing runs to
    /// completion; queued items and pending retries are abandoned. Await
    /// the spawn handle to observe the stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_loop<W: StageWorker>(
    name: &'static str,
    worker: W,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<QueueEntry<W::Item>>,
    tx: mpsc::WeakUnboundedSender<QueueEntry<W::Item>>,
    mut shutdown_rx: watch::Receiver<bool>,
    inflight: Arc<AtomicUsize>,
) {
    info!(queue = name, "Work queue started");

    loop {
        // Shutdown is only polled between items, so an execute() that has
        // started always runs to completion.
        let entry = tokio::select! {
            _ = shutdown_rx.changed() => {
                info!(queue = name, "Work queue shutting down");
                break;
            }
            entry = rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };
        let task_id = entry.item.task_id().to_string();

        let started = std::time::Instant::now();
        let result = worker.execute(&entry.item).await;
        let elapsed = started.elapsed().as_secs_f64();
        let result_label = if result.is_ok() { "success" } else { "failed" };
        crate::metrics::STAGE_DURATION
            .with_label_values(&[name, result_label])
            .observe(elapsed);

        match result {
            Ok(output) => {
                worker.on_success(entry.item, output).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) if e.is_retryable() && policy.allows_retry(entry.retries) => {
                let retries = entry.retries + 1;
                let delay = policy.delay_for(retries);
                crate::metrics::RETRY_ATTEMPTS.with_label_values(&[name]).inc();
                warn!(
                    queue = name,
                    task_id = %task_id,
                    retry = retries,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Stage failed, scheduling retry"
                );
                // Item stays in-flight through the backoff; resubmission
                // bypasses submit() so the count is not raised twice. The
                // sender is weak, so a pending retry does not keep a
                // shut-down queue alive.
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(QueueEntry {
                            item: entry.item,
                            retries,
                        });
                    }
                });
            }
            Err(e) => {
                error!(
                    queue = name,
                    task_id = %task_id,
                    retries = entry.retries,
                    error = %e,
                    "Stage failed permanently"
                );
                worker.on_terminal_failure(entry.item, e).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    info!(queue = name, "Work queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::pipeline::{StageError, StageWorker};
    use crate::task::Stage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    struct TestItem {
        id: String,
    }

    impl WorkItem for TestItem {
        fn task_id(&self) -> &str {
            &self.id
        }
    }

    /// Fails the first `fail_times` executions with a network error, then
    /// succeeds. Records outcomes.
    struct FlakyWorker {
        fail_times: u32,
        attempts: AtomicU32,
        successes: Arc<Mutex<Vec<String>>>,
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl FlakyWorker {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                attempts: AtomicU32::new(0),
                successes: Arc::new(Mutex::new(Vec::new())),
                failures: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl StageWorker for FlakyWorker {
        type Item = TestItem;
        type Output = ();

        fn stage(&self) -> Stage {
            Stage::Uploading
        }

        async fn execute(&self, _item: &TestItem) -> Result<(), StageError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                Err(StageError::Network(BackendError::Request(
                    "connection refused".to_string(),
                )))
            } else {
                Ok(())
            }
        }

        async fn on_success(&self, item: TestItem, _output: ()) {
            self.successes.lock().unwrap().push(item.id);
        }

        async fn on_terminal_failure(&self, item: TestItem, _error: StageError) {
            self.failures.lock().unwrap().push(item.id);
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_task_retries: max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_success_drains_queue() {
        let worker = FlakyWorker::new(0);
        let successes = worker.successes.clone();
        let (queue, _handle) = WorkQueue::spawn("test", worker, RetryPolicy::none());

        queue.submit(TestItem { id: "a".to_string() }).unwrap();
        queue.submit(TestItem { id: "b".to_string() }).unwrap();

        while !queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*successes.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed() {
        let worker = FlakyWorker::new(2);
        let successes = worker.successes.clone();
        let failures = worker.failures.clone();
        let (queue, _handle) = WorkQueue::spawn("test", worker, fast_policy(3));

        queue.submit(TestItem { id: "a".to_string() }).unwrap();

        while !queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*successes.lock().unwrap(), vec!["a"]);
        assert!(failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal() {
        let worker = FlakyWorker::new(10);
        let failures = worker.failures.clone();
        let (queue, _handle) = WorkQueue::spawn("test", worker, fast_policy(3));

        queue.submit(TestItem { id: "a".to_string() }).unwrap();

        while !queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Initial attempt plus three retries, then give up.
        assert_eq!(*failures.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_retry() {
        struct HardFailWorker {
            failures: Arc<Mutex<Vec<String>>>,
            attempts: AtomicU32,
        }

        #[async_trait]
        impl StageWorker for HardFailWorker {
            type Item = TestItem;
            type Output = ();

            fn stage(&self) -> Stage {
                Stage::Imaging
            }

            async fn execute(&self, _item: &TestItem) -> Result<(), StageError> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(StageError::Hardware(
                    crate::hardware::HardwareError::NotConnected,
                ))
            }

            async fn on_success(&self, _item: TestItem, _output: ()) {}

            async fn on_terminal_failure(&self, item: TestItem, _error: StageError) {
                self.failures.lock().unwrap().push(item.id);
            }
        }

        let failures = Arc::new(Mutex::new(Vec::new()));
        let worker = HardFailWorker {
            failures: failures.clone(),
            attempts: AtomicU32::new(0),
        };
        let (queue, _handle) = WorkQueue::spawn("test", worker, fast_policy(3));

        queue.submit(TestItem { id: "a".to_string() }).unwrap();

        while !queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*failures.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_not_idle_during_backoff() {
        let worker = FlakyWorker::new(1);
        let (queue, _handle) = WorkQueue::spawn(
            "test",
            worker,
            RetryPolicy {
                max_task_retries: 3,
                initial_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(600),
                backoff_factor: 2.0,
            },
        );

        queue.submit(TestItem { id: "a".to_string() }).unwrap();

        // Let the first attempt fail and the retry get scheduled.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!queue.is_idle());

        // Past the 30s backoff the retry runs and succeeds.
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_current_item_then_stops() {
        struct SlowWorker {
            successes: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl StageWorker for SlowWorker {
            type Item = TestItem;
            type Output = ();

            fn stage(&self) -> Stage {
                Stage::Processing
            }

            async fn execute(&self, _item: &TestItem) -> Result<(), StageError> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }

            async fn on_success(&self, item: TestItem, _output: ()) {
                self.successes.lock().unwrap().push(item.id);
            }

            async fn on_terminal_failure(&self, _item: TestItem, _error: StageError) {}
        }

        let successes = Arc::new(Mutex::new(Vec::new()));
        let worker = SlowWorker {
            successes: successes.clone(),
        };
        let (queue, handle) = WorkQueue::spawn("test", worker, RetryPolicy::none());

        queue.submit(TestItem { id: "a".to_string() }).unwrap();

        // Signal shutdown while the item is mid-execute; the loop must
        // still deliver its outcome before stopping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*successes.lock().unwrap(), vec!["a"]);
        assert!(queue.is_idle());
    }
}
