//! The polling engine: fetch due tasks, execute callbacks, reschedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::watch;
use tracing::{error, info, warn};

use aster_store::types::{ScheduleType, ScheduledTask};
use aster_store::Store;

use crate::error::Result;
use crate::schedule::compute_next_run;

/// Poll period. A tick never blocks on task execution.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Invoked for each due task. Implementations re-enter the conversation
/// loop as if `created_by` had sent `payload`.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn on_task_execute(
        &self,
        task_id: i64,
        payload: &str,
        created_by: i64,
    ) -> std::result::Result<(), String>;
}

/// Create a task, computing its initial `next_run`. Enabled tasks always
/// carry one — an unschedulable value is rejected here.
pub async fn create_task(
    store: &Store,
    name: &str,
    schedule_type: ScheduleType,
    schedule_value: &str,
    payload: &str,
    created_by: i64,
) -> Result<ScheduledTask> {
    let next = compute_next_run(schedule_type, schedule_value, Utc::now())?;
    let task = store
        .create_task(
            name,
            schedule_type,
            schedule_value,
            payload,
            &next.to_rfc3339(),
            created_by,
        )
        .await?;
    info!(task_id = task.id, name, schedule = %schedule_type, "task created");
    Ok(task)
}

pub struct Scheduler {
    store: Store,
    callback: Arc<dyn TaskCallback>,
    period: Duration,
    /// Task ids currently executing — prevents a slow callback from being
    /// picked up again by the next tick.
    in_flight: Arc<DashSet<i64>>,
}

impl Scheduler {
    pub fn new(store: Store, callback: Arc<dyn TaskCallback>) -> Self {
        Self {
            store,
            callback,
            period: CHECK_INTERVAL,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Override the poll period (tests).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Main loop. Polls until `shutdown` flips to true. Executions are
    /// spawned as independent tasks so long callbacks never delay a tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = self.period.as_secs(), "scheduler started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let due = self.store.due_tasks(&now).await?;

        for task in due {
            if !self.in_flight.insert(task.id) {
                continue;
            }
            let store = self.store.clone();
            let callback = Arc::clone(&self.callback);
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                execute_one(store, callback, task.clone()).await;
                in_flight.remove(&task.id);
            });
        }
        Ok(())
    }
}

/// Run one due task: callback first, then the row update. A failed callback
/// leaves the row untouched so the next tick retries it; the task is never
/// disabled because of a callback error.
async fn execute_one(store: Store, callback: Arc<dyn TaskCallback>, task: ScheduledTask) {
    info!(task_id = task.id, name = %task.name, "executing scheduled task");

    if let Err(e) = callback
        .on_task_execute(task.id, &task.payload, task.created_by)
        .await
    {
        error!(task_id = task.id, error = %e, "task callback failed; will retry next tick");
        return;
    }

    let now = Utc::now();
    let now_str = now.to_rfc3339();

    match task.schedule_type {
        ScheduleType::Once => {
            // One-shot tasks are deleted after execution.
            if let Err(e) = store.delete_task(task.id).await {
                warn!(task_id = task.id, error = %e, "failed to delete one-shot task");
            }
        }
        ScheduleType::Interval | ScheduleType::Cron => {
            match compute_next_run(task.schedule_type, &task.schedule_value, now) {
                Ok(next) => {
                    if let Err(e) = store
                        .reschedule_task(task.id, &now_str, &next.to_rfc3339())
                        .await
                    {
                        warn!(task_id = task.id, error = %e, "failed to reschedule task");
                    }
                }
                Err(e) => {
                    // Can't produce a future instant — disable instead of
                    // leaving an enabled row without next_run.
                    error!(task_id = task.id, error = %e, "next run uncomputable, disabling task");
                    let _ = store.disable_task_after_run(task.id, &now_str).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingCallback {
        invocations: AtomicUsize,
        payloads: Mutex<Vec<(i64, String, i64)>>,
    }

    impl RecordingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskCallback for RecordingCallback {
        async fn on_task_execute(
            &self,
            task_id: i64,
            payload: &str,
            created_by: i64,
        ) -> std::result::Result<(), String> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .lock()
                .unwrap()
                .push((task_id, payload.to_string(), created_by));
            Ok(())
        }
    }

    struct FailingCallback;

    #[async_trait]
    impl TaskCallback for FailingCallback {
        async fn on_task_execute(&self, _: i64, _: &str, _: i64) -> std::result::Result<(), String> {
            Err("boom".to_string())
        }
    }

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.db");
        let store = Store::open(path.to_str().unwrap(), 1, 4).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn one_shot_task_fires_once_and_is_deleted() {
        let (_dir, store) = test_store().await;
        let past = (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339();
        let task = create_task(
            &store,
            "remind",
            ScheduleType::Once,
            &past,
            "remind me to drink water",
            7,
        )
        .await
        .unwrap();

        let callback = RecordingCallback::new();
        let scheduler = Scheduler::new(store.clone(), callback.clone())
            .with_period(Duration::from_millis(20));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        assert_eq!(callback.invocations.load(Ordering::SeqCst), 1);
        let recorded = callback.payloads.lock().unwrap();
        assert_eq!(
            recorded[0],
            (task.id, "remind me to drink water".to_string(), 7)
        );
        assert!(store.get_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interval_task_reschedules_forward() {
        let (_dir, store) = test_store().await;
        // Backdate next_run so the first tick fires immediately; the 1-hour
        // interval then pushes next_run well past the test window.
        let task = store
            .create_task(
                "hourly",
                ScheduleType::Interval,
                "3600",
                "tick",
                &(Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
                1,
            )
            .await
            .unwrap();

        let callback = RecordingCallback::new();
        let scheduler = Scheduler::new(store.clone(), callback.clone())
            .with_period(Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        assert_eq!(callback.invocations.load(Ordering::SeqCst), 1);
        let reread = store.get_task(task.id).await.unwrap().unwrap();
        assert!(reread.enabled);
        assert_eq!(reread.run_count, 1);
        assert!(reread.last_run.is_some());
        assert!(reread.next_run.unwrap() > Utc::now().to_rfc3339());
    }

    #[tokio::test]
    async fn failed_callback_leaves_task_due_for_retry() {
        let (_dir, store) = test_store().await;
        let task = store
            .create_task(
                "flaky",
                ScheduleType::Once,
                "now",
                "payload",
                &(Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
                1,
            )
            .await
            .unwrap();

        let scheduler = Scheduler::new(store.clone(), Arc::new(FailingCallback))
            .with_period(Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        // Not deleted, not disabled — still due on the next tick.
        let reread = store.get_task(task.id).await.unwrap().unwrap();
        assert!(reread.enabled);
        assert_eq!(reread.run_count, 0);
    }
}
