//! Alert Scheduler (C6, spec.md §4.6): a minute-keyed queue of deferred actions. A single worker
//! ticks once per wall-clock minute, atomically drains the bucket for the current JST minute,
//! and runs each contained task in registration order.

use crate::clock::SharedClock;
use crate::error::{OpError, OpResult};
use crate::time::minute_key;
use chrono::{DateTime, Utc};
use serenity::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// A deferred action (spec.md §3.1). `SendMessage` posts a plain message; `AutoClose` re-enters
/// the orchestrator to run the close-event flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SendMessage { channel_id: u64, text: String },
    AutoClose { event_name: String, message: String },
}

/// Executes a [`Task`]. Implemented by the orchestrator (C7); kept as a trait so the scheduler
/// itself stays free of any dependency on the event/registration stores, mirroring the
/// `ScheduledActionHandler` seam the reference architecture's own alert module (`event/alert.rs`)
/// uses to keep its scheduler testable without a real Discord client.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct SchedulerState {
    tasks: HashMap<String, Vec<Task>>,
}

#[derive(Debug)]
pub struct AlertScheduler {
    state: Mutex<SchedulerState>,
    clock: SharedClock,
}

impl AlertScheduler {
    pub fn new(clock: SharedClock) -> Self {
        AlertScheduler {
            state: Mutex::new(SchedulerState::default()),
            clock,
        }
    }

    /// Registers `task` to fire at `time` (spec.md §4.6). Rejects with [`OpError::TimeInPast`]
    /// if `time` is at or before the current JST instant; `label` is only used in that error's
    /// message. Granularity is a full minute: a task fires on any tick whose floor-to-minute JST
    /// equals `time`'s.
    pub async fn register(&self, time: DateTime<Utc>, task: Task, label: &str) -> OpResult<()> {
        let now = self.clock.now();
        if time <= now {
            return Err(OpError::TimeInPast(label.to_owned()));
        }

        let key = minute_key(time);
        let mut state = self.state.lock().await;
        state.tasks.entry(key).or_default().push(task);
        Ok(())
    }

    /// Drops every scheduled task.
    pub async fn clear(&self) {
        self.state.lock().await.tasks.clear();
    }

    /// Atomically removes the bucket for the current minute (if any) and runs its tasks
    /// sequentially in registration order. A task whose action fails is logged and the next
    /// task still runs; failed tasks are not re-enqueued (spec.md §4.6, §5).
    pub async fn tick<H: TaskRunner>(&self, handler: &H) {
        let now = self.clock.now();
        let key = minute_key(now);

        let due = {
            let mut state = self.state.lock().await;
            state.tasks.remove(&key)
        };

        let Some(due) = due else { return };
        debug!(minute = %key, count = due.len(), "running due alert tasks");
        for task in due {
            if let Err(err) = handler.run(&task).await {
                error!(?task, error = ?err, "scheduled task failed");
            }
        }
    }

    /// Starts the once-a-minute worker loop. The loop never exits on a task error (spec.md §5
    /// "Cancellation/timeouts: None internally... must never exit because of a task-level
    /// error"); it only exits if the handler is dropped.
    pub fn start<H>(self: Arc<Self>, handler: Arc<H>)
    where
        H: TaskRunner + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(60));
            loop {
                interval.tick().await;
                self.tick(handler.as_ref()).await;
            }
        });
        info!("alert scheduler started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::TestClock;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex as SyncMutex;

    struct RecordingRunner {
        ran: SyncMutex<Vec<Task>>,
    }

    impl RecordingRunner {
        fn new() -> Arc<Self> {
            Arc::new(RecordingRunner {
                ran: SyncMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Task> {
            std::mem::take(&mut self.ran.lock())
        }
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run(&self, task: &Task) -> anyhow::Result<()> {
            self.ran.lock().push(task.clone());
            Ok(())
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_past_time() {
        let clock = TestClock::new(utc(2024, 8, 15, 3, 25, 0));
        let scheduler = AlertScheduler::new(clock.clone());
        let task = Task::SendMessage {
            channel_id: 1,
            text: "hi".into(),
        };
        assert_matches!(
            scheduler
                .register(utc(2024, 8, 15, 3, 24, 0), task, "reminder")
                .await,
            Err(OpError::TimeInPast(_))
        );
    }

    #[tokio::test]
    async fn test_tick_fires_exactly_on_minute_granularity() {
        // Register for 2024-08-15 12:25:00 JST == 03:25:00 UTC.
        let clock = TestClock::new(utc(2024, 8, 15, 3, 0, 0));
        let scheduler = AlertScheduler::new(clock.clone());
        let runner = RecordingRunner::new();

        scheduler
            .register(
                utc(2024, 8, 15, 3, 25, 0),
                Task::SendMessage {
                    channel_id: 42,
                    text: "reminder".into(),
                },
                "reminder",
            )
            .await
            .unwrap();

        // A tick before the minute does nothing.
        scheduler.tick(runner.as_ref()).await;
        assert!(runner.take().is_empty());

        // Tick at 38 seconds into the target minute still fires it (seconds ignored).
        clock.set(utc(2024, 8, 15, 3, 25, 38));
        scheduler.tick(runner.as_ref()).await;
        let ran = runner.take();
        assert_eq!(ran.len(), 1);

        // It doesn't fire again on a later tick in the same minute (bucket was removed).
        scheduler.tick(runner.as_ref()).await;
        assert!(runner.take().is_empty());
    }

    #[tokio::test]
    async fn test_tasks_in_one_minute_run_in_registration_order() {
        let clock = TestClock::new(utc(2024, 1, 1, 0, 0, 0));
        let scheduler = AlertScheduler::new(clock.clone());
        let runner = RecordingRunner::new();

        let fire_at = utc(2024, 1, 1, 0, 5, 0);
        scheduler
            .register(
                fire_at,
                Task::AutoClose {
                    event_name: "A".into(),
                    message: "m".into(),
                },
                "A",
            )
            .await
            .unwrap();
        scheduler
            .register(
                fire_at,
                Task::SendMessage {
                    channel_id: 1,
                    text: "B".into(),
                },
                "B",
            )
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        scheduler.tick(runner.as_ref()).await;
        let ran = runner.take();
        assert_eq!(
            ran,
            vec![
                Task::AutoClose {
                    event_name: "A".into(),
                    message: "m".into()
                },
                Task::SendMessage {
                    channel_id: 1,
                    text: "B".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_drops_all_tasks() {
        let clock = TestClock::new(utc(2024, 1, 1, 0, 0, 0));
        let scheduler = AlertScheduler::new(clock.clone());
        scheduler
            .register(
                utc(2024, 1, 1, 0, 5, 0),
                Task::SendMessage {
                    channel_id: 1,
                    text: "hi".into(),
                },
                "x",
            )
            .await
            .unwrap();
        scheduler.clear().await;

        clock.advance(Duration::minutes(5));
        let runner = RecordingRunner::new();
        scheduler.tick(runner.as_ref()).await;
        assert!(runner.take().is_empty());
    }
}
