//! Task worker loop
//!
//! A single scheduling loop polls the queue once per tick. In-flight work is
//! bounded by the [`WorkerGate`]; each claimed task runs in its own spawned
//! handler holding a gate permit. Handler errors are captured into the task
//! row and never crash the loop.

use std::sync::Arc;
use std::time::Duration;

use common::BoxError;
use metadata_db::tasks::{Task, TaskKind};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    gate::WorkerGate,
    input::{ExpireSnapshotsInput, OptimizeInput, RemoveOrphanFilesInput},
    MaintenanceExecutor, SnapshotRefresher, TaskClaimer,
};

pub struct TaskWorker {
    queue: Arc<dyn TaskClaimer>,
    executor: Arc<dyn MaintenanceExecutor>,
    refresher: Arc<dyn SnapshotRefresher>,
    gate: WorkerGate,
    poll_interval: Duration,
}

impl TaskWorker {
    pub fn new(
        queue: Arc<dyn TaskClaimer>,
        executor: Arc<dyn MaintenanceExecutor>,
        refresher: Arc<dyn SnapshotRefresher>,
        gate: WorkerGate,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            refresher,
            gate,
            poll_interval,
        }
    }

    /// Shared handle to the concurrency gate, for the settings endpoint.
    pub fn gate(&self) -> WorkerGate {
        self.gate.clone()
    }

    /// Adjust the worker cap; values below 1 clamp to 1. Takes effect on
    /// subsequent claims, in-flight tasks are not interrupted.
    pub fn set_worker_count(&self, count: i64) {
        self.gate.set_capacity(count.max(1) as usize);
    }

    pub fn worker_count(&self) -> usize {
        self.gate.capacity()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "starting task worker pool with {} workers",
            self.gate.capacity()
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("task worker stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            self.try_process_task(&shutdown).await;
        }
    }

    async fn try_process_task(self: &Arc<Self>, shutdown: &broadcast::Receiver<()>) {
        let Some(permit) = self.gate.try_acquire() else {
            return;
        };

        let task = match self.queue.claim().await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!("failed to claim task: {e}");
                return;
            }
        };

        info!(
            "picked up task {} ({} for {})",
            task.id, task.kind, task.table
        );

        let worker = Arc::clone(self);
        let mut handler_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let _permit = permit;
            worker.process_task(task, &mut handler_shutdown).await;
        });
    }

    /// Run one task to its terminal state. The final `complete` runs
    /// unconditionally; its failures are logged, not retried.
    pub async fn process_task(&self, task: Task, shutdown: &mut broadcast::Receiver<()>) {
        let outcome = tokio::select! {
            outcome = self.dispatch(&task) => outcome,
            _ = shutdown.recv() => Err(BoxError::from("task cancelled by shutdown")),
        };

        let (result, error_message) = match outcome {
            Ok(result) => (Some(result), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let status = if error_message.is_none() {
            "success"
        } else {
            "error"
        };
        if let Err(e) = self.queue.complete(task.id, result, error_message).await {
            error!("failed to complete task {}: {e}", task.id);
        } else {
            info!("task {} finished with status: {status}", task.id);
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<JsonValue, BoxError> {
        let Some(kind) = TaskKind::from_str(&task.kind) else {
            return Err(format!("unknown task kind: {}", task.kind).into());
        };

        match kind {
            TaskKind::ExpireSnapshots => {
                let input: ExpireSnapshotsInput = serde_json::from_value(task.input.clone())?;
                let outcome = self
                    .executor
                    .expire_snapshots(&task.table, input.retention_days, input.retain_last)
                    .await?;

                // Follow-up: the snapshot history changed, refresh it in a new
                // transaction. The task result stands even if this fails.
                if let Err(e) = self.refresher.refresh_snapshots(&task.table).await {
                    warn!(
                        "failed to refresh snapshots after expiring for table {}: {e}",
                        task.table
                    );
                }

                Ok(serde_json::to_value(outcome)?)
            }
            TaskKind::RemoveOrphanFiles => {
                let input: RemoveOrphanFilesInput = serde_json::from_value(task.input.clone())?;
                let outcome = self
                    .executor
                    .remove_orphan_files(&task.table, input.retention_days)
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }
            TaskKind::Optimize => {
                let input: OptimizeInput = serde_json::from_value(task.input.clone())?;
                let (Some(from), Some(to)) = (input.from.date_naive(), input.to.date_naive())
                else {
                    return Err("optimize task input is missing from/to dates".into());
                };
                let outcome = self
                    .executor
                    .optimize(&task.table, input.file_size_threshold_mb, from, to)
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use metadata_db::tasks::{TaskId, TaskStatus};
    use serde_json::json;

    use crate::executor::{ExpireSnapshotsOutcome, OptimizeOutcome, RemoveOrphanFilesOutcome};

    use super::*;

    fn task(id: i64, table: &str, kind: &str, input: JsonValue) -> Task {
        Task {
            id: TaskId::from(id),
            table: table.to_string(),
            kind: kind.to_string(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            picked_up_at: Some(Utc::now()),
            finished_at: None,
            error_message: None,
            input,
            result: json!({}),
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        queued: Mutex<VecDeque<Task>>,
        completed: Mutex<Vec<(TaskId, Option<JsonValue>, Option<String>)>>,
    }

    impl FakeQueue {
        fn completions(&self) -> Vec<(TaskId, Option<JsonValue>, Option<String>)> {
            self.completed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskClaimer for FakeQueue {
        async fn claim(&self) -> Result<Option<Task>, BoxError> {
            Ok(self.queued.lock().unwrap().pop_front())
        }

        async fn complete(
            &self,
            id: TaskId,
            result: Option<JsonValue>,
            error_message: Option<String>,
        ) -> Result<(), BoxError> {
            self.completed
                .lock()
                .unwrap()
                .push((id, result, error_message));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        optimize_calls: Mutex<Vec<(String, i64, NaiveDate, NaiveDate)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl MaintenanceExecutor for FakeExecutor {
        async fn expire_snapshots(
            &self,
            table: &str,
            retention_days: i64,
            retain_last: i64,
        ) -> Result<ExpireSnapshotsOutcome, BoxError> {
            if let Some(message) = &self.fail_with {
                return Err(message.clone().into());
            }
            Ok(ExpireSnapshotsOutcome {
                table: table.to_string(),
                retention_days,
                retain_last,
                clean_expired_metadata: true,
                status: "ok".to_string(),
            })
        }

        async fn remove_orphan_files(
            &self,
            table: &str,
            retention_days: i64,
        ) -> Result<RemoveOrphanFilesOutcome, BoxError> {
            if let Some(message) = &self.fail_with {
                return Err(message.clone().into());
            }
            Ok(RemoveOrphanFilesOutcome {
                table: table.to_string(),
                retention_days,
                metrics: [("files_removed".to_string(), json!(42))].into(),
                status: "ok".to_string(),
            })
        }

        async fn optimize(
            &self,
            table: &str,
            file_size_threshold_mb: i64,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<OptimizeOutcome, BoxError> {
            self.optimize_calls.lock().unwrap().push((
                table.to_string(),
                file_size_threshold_mb,
                from,
                to,
            ));
            if let Some(message) = &self.fail_with {
                return Err(message.clone().into());
            }
            Ok(OptimizeOutcome {
                table: table.to_string(),
                file_size_threshold_mb,
                where_clause: format!("date(\"event_time\") >= date '{from}' AND date(\"event_time\") <= date '{to}'"),
                status: "ok".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeRefresher {
        refreshed: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SnapshotRefresher for FakeRefresher {
        async fn refresh_snapshots(&self, table: &str) -> Result<(), BoxError> {
            self.refreshed.lock().unwrap().push(table.to_string());
            if self.fail {
                return Err("refresh blew up".into());
            }
            Ok(())
        }
    }

    struct Harness {
        queue: Arc<FakeQueue>,
        executor: Arc<FakeExecutor>,
        refresher: Arc<FakeRefresher>,
        worker: Arc<TaskWorker>,
    }

    fn harness_with(executor: FakeExecutor, refresher: FakeRefresher) -> Harness {
        let queue = Arc::new(FakeQueue::default());
        let executor = Arc::new(executor);
        let refresher = Arc::new(refresher);
        let worker = Arc::new(TaskWorker::new(
            queue.clone(),
            executor.clone(),
            refresher.clone(),
            WorkerGate::new(2),
            Duration::from_millis(1),
        ));
        Harness {
            queue,
            executor,
            refresher,
            worker,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeExecutor::default(), FakeRefresher::default())
    }

    fn shutdown_pair() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        broadcast::channel(1)
    }

    #[tokio::test]
    async fn expire_snapshots_task_completes_and_refreshes() {
        let h = harness();
        let (_tx, mut rx) = shutdown_pair();

        let task = task(
            1,
            "events",
            "expire_snapshots",
            json!({"retention_days": 7, "retain_last": 10}),
        );
        h.worker.process_task(task, &mut rx).await;

        let completions = h.queue.completions();
        assert_eq!(completions.len(), 1);
        let (id, result, error) = &completions[0];
        assert_eq!(*id, TaskId::from(1));
        assert!(error.is_none());
        let result = result.as_ref().expect("result should be set");
        assert_eq!(result["table"], "events");
        assert_eq!(result["retention_days"], 7);
        assert_eq!(result["retain_last"], 10);
        assert_eq!(result["clean_expired_metadata"], true);
        assert_eq!(result["status"], "ok");

        assert_eq!(*h.refresher.refreshed.lock().unwrap(), ["events"]);
    }

    #[tokio::test]
    async fn refresh_failure_does_not_fail_the_task() {
        let h = harness_with(
            FakeExecutor::default(),
            FakeRefresher {
                fail: true,
                ..Default::default()
            },
        );
        let (_tx, mut rx) = shutdown_pair();

        let task = task(
            2,
            "events",
            "expire_snapshots",
            json!({"retention_days": 7, "retain_last": 10}),
        );
        h.worker.process_task(task, &mut rx).await;

        let completions = h.queue.completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].2.is_none());
        assert_eq!(h.refresher.refreshed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn optimize_task_parses_input_dates() {
        let h = harness();
        let (_tx, mut rx) = shutdown_pair();

        let task = task(
            3,
            "events",
            "optimize",
            json!({
                "file_size_threshold_mb": 100,
                "from": "2026-01-02",
                "to": "2026-01-02",
            }),
        );
        h.worker.process_task(task, &mut rx).await;

        let calls = h.executor.optimize_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let (table, threshold, from, to) = &calls[0];
        assert_eq!(table, "events");
        assert_eq!(*threshold, 100);
        assert_eq!(*from, NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        assert_eq!(to, from);

        let completions = h.queue.completions();
        assert!(completions[0].2.is_none());
    }

    #[tokio::test]
    async fn unknown_kind_fails_with_no_result() {
        let h = harness();
        let (_tx, mut rx) = shutdown_pair();

        h.worker
            .process_task(task(4, "events", "defragment", json!({})), &mut rx)
            .await;

        let completions = h.queue.completions();
        assert_eq!(completions.len(), 1);
        let (_, result, error) = &completions[0];
        assert!(result.is_none());
        assert!(error
            .as_ref()
            .expect("error should be set")
            .contains("unknown task kind: defragment"));
    }

    #[tokio::test]
    async fn executor_error_is_captured_into_completion() {
        let h = harness_with(
            FakeExecutor {
                fail_with: Some("engine connection failed".to_string()),
                ..Default::default()
            },
            FakeRefresher::default(),
        );
        let (_tx, mut rx) = shutdown_pair();

        h.worker
            .process_task(
                task(
                    5,
                    "events",
                    "optimize",
                    json!({
                        "file_size_threshold_mb": 100,
                        "from": "2026-01-02",
                        "to": "2026-01-02",
                    }),
                ),
                &mut rx,
            )
            .await;

        let completions = h.queue.completions();
        let (_, result, error) = &completions[0];
        assert!(result.is_none());
        assert_eq!(error.as_deref(), Some("engine connection failed"));
    }

    #[tokio::test]
    async fn run_loop_processes_queued_tasks_until_shutdown() {
        let h = harness();
        let (tx, rx) = shutdown_pair();

        h.queue.queued.lock().unwrap().push_back(task(
            6,
            "events",
            "remove_orphan_files",
            json!({"retention_days": 14}),
        ));

        let run = tokio::spawn(Arc::clone(&h.worker).run(rx));

        // Wait for the loop to pick up and complete the task.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.queue.completions().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "task never completed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tx.send(()).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run did not stop on shutdown")
            .expect("run task panicked");

        let completions = h.queue.completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].2.is_none());
        let result = completions[0].1.as_ref().expect("result should be set");
        assert_eq!(result["metrics"]["files_removed"], 42);
    }

    #[tokio::test]
    async fn set_worker_count_clamps_to_one() {
        let h = harness();

        assert_eq!(h.worker.worker_count(), 2);

        h.worker.set_worker_count(5);
        assert_eq!(h.worker.worker_count(), 5);

        h.worker.set_worker_count(0);
        assert_eq!(h.worker.worker_count(), 1);

        h.worker.set_worker_count(-5);
        assert_eq!(h.worker.worker_count(), 1);
    }
}
