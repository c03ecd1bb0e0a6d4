//! Deferred state changes: "apply this once, after this delay".
//!
//! Request handlers push fully specified tasks through an unbounded channel;
//! a single worker owns a min-heap keyed by deadline and applies each task
//! when it falls due. Tasks never read request-side context at fire time:
//! everything needed to apply them is captured when they are scheduled.
//!
//! There is no retry and no persistence. A task whose store write fails is
//! logged and dropped, and pending tasks are lost if the process exits.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use traffic_common::{
    EventKind, JunctionId, NewRoadEvent, RoadChange, RoadId, RoadStatus, Signal, SignalChange,
};
use traffic_store::{JunctionStore, RoadStore};

// Roughly thirty years; stands in for delays too large for `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// The state change a task applies when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredAction {
    /// Put each junction back to the signal captured when it was preempted.
    SignalRevert { restores: Vec<(JunctionId, Signal)> },
    /// Return a closed road to OPEN.
    RoadReopen { road_id: RoadId },
}

impl DeferredAction {
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredAction::SignalRevert { .. } => "signal_revert",
            DeferredAction::RoadReopen { .. } => "road_reopen",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: u64,
    pub action: DeferredAction,
    /// Wall-clock time the task is due, for reporting.
    pub fire_at: DateTime<Utc>,
    deadline: Instant,
}

/// What a caller gets back from [`SchedulerHandle::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReceipt {
    pub id: u64,
    pub fire_at: DateTime<Utc>,
}

// Heap order: earliest deadline first, registration order on ties.
struct Queued(ScheduledTask);

impl Queued {
    fn key(&self) -> (Instant, u64) {
        (self.0.deadline, self.0.id)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

// ---------------------------------------------------------------------------
// Executor seam
// ---------------------------------------------------------------------------

/// Applies a fired task.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task: &ScheduledTask) -> Result<()>;
}

/// Applies tasks through the junction and road stores, one transaction each.
pub struct StoreExecutor {
    junctions: Arc<dyn JunctionStore>,
    roads: Arc<dyn RoadStore>,
}

impl StoreExecutor {
    pub fn new(junctions: Arc<dyn JunctionStore>, roads: Arc<dyn RoadStore>) -> Self {
        Self { junctions, roads }
    }
}

#[async_trait]
impl TaskExecutor for StoreExecutor {
    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        let now = Utc::now();
        match &task.action {
            DeferredAction::SignalRevert { restores } => {
                let changes: Vec<SignalChange> = restores
                    .iter()
                    .map(|&(id, signal)| SignalChange::restore(id, signal, now))
                    .collect();
                let applied = self.junctions.apply_signal_changes(&changes).await?;
                info!(task_id = task.id, junctions = ?applied, "Preemption reverted");
            }
            DeferredAction::RoadReopen { road_id } => {
                let change = RoadChange {
                    road_id: *road_id,
                    status: RoadStatus::Open,
                    event: NewRoadEvent {
                        kind: EventKind::Clear,
                        description: "automatic reopen".to_string(),
                        start_time: now,
                        end_time: Some(now),
                    },
                    spill: None,
                };
                if self.roads.apply_road_change(&change).await? {
                    info!(task_id = task.id, road_id, "Road reopened");
                } else {
                    debug!(task_id = task.id, road_id, "Reopen target missing, skipped");
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Cheap, cloneable producer side of the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<ScheduledTask>,
    next_id: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl SchedulerHandle {
    /// Register `action` to fire once, `delay` from now. Never blocks.
    /// A zero delay still goes through the queue.
    pub fn schedule(&self, action: DeferredAction, delay: Duration) -> Result<TaskReceipt> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
        let task = ScheduledTask {
            id,
            action,
            fire_at,
            deadline,
        };

        debug!(
            task_id = id,
            kind = task.action.kind(),
            delay_ms = delay.as_millis() as u64,
            "Task scheduled"
        );

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("scheduler worker has stopped"));
        }

        Ok(TaskReceipt { id, fire_at })
    }

    /// Tasks registered but not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Start the worker on the current tokio runtime.
    ///
    /// The worker runs until every handle is dropped and the queue is empty:
    /// tasks already registered still fire at their deadlines.
    pub fn spawn<E: TaskExecutor>(executor: E) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = SchedulerHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            pending: pending.clone(),
        };
        let worker = tokio::spawn(run(rx, executor, pending));
        (handle, worker)
    }
}

async fn run<E: TaskExecutor>(
    mut rx: mpsc::UnboundedReceiver<ScheduledTask>,
    executor: E,
    pending: Arc<AtomicUsize>,
) {
    let mut heap: BinaryHeap<Reverse<Queued>> = BinaryHeap::new();
    let mut accepting = true;

    loop {
        let next_deadline = heap.peek().map(|Reverse(q)| q.0.deadline);

        if !accepting && next_deadline.is_none() {
            break;
        }

        let wake = async {
            match next_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            received = rx.recv(), if accepting => match received {
                Some(task) => heap.push(Reverse(Queued(task))),
                None => accepting = false,
            },
            _ = wake => {
                let now = Instant::now();
                while heap.peek().is_some_and(|Reverse(q)| q.0.deadline <= now) {
                    let Some(Reverse(Queued(task))) = heap.pop() else {
                        break;
                    };
                    fire(&executor, &task).await;
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    debug!("Scheduler worker stopped");
}

async fn fire<E: TaskExecutor>(executor: &E, task: &ScheduledTask) {
    if let Err(e) = executor.execute(task).await {
        warn!(
            task_id = task.id,
            kind = task.action.kind(),
            error = %e,
            "Deferred task failed, dropping"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the order tasks fire in; fails the ids listed in `fail`.
    #[derive(Clone, Default)]
    struct Recorder {
        fired: Arc<Mutex<Vec<u64>>>,
        fail: Vec<u64>,
    }

    #[async_trait]
    impl TaskExecutor for Recorder {
        async fn execute(&self, task: &ScheduledTask) -> Result<()> {
            self.fired.lock().unwrap().push(task.id);
            if self.fail.contains(&task.id) {
                return Err(anyhow!("store unreachable"));
            }
            Ok(())
        }
    }

    fn reopen(road_id: RoadId) -> DeferredAction {
        DeferredAction::RoadReopen { road_id }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let recorder = Recorder::default();
        let (handle, _worker) = Scheduler::spawn(recorder.clone());

        let late = handle.schedule(reopen(1), Duration::from_secs(30)).unwrap();
        let early = handle.schedule(reopen(2), Duration::from_secs(10)).unwrap();
        let middle = handle.schedule(reopen(3), Duration::from_secs(20)).unwrap();
        assert_eq!(handle.pending(), 3);

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(*recorder.fired.lock().unwrap(), vec![early.id, middle.id, late.id]);
        assert_eq!(handle.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_before_deadline() {
        let recorder = Recorder::default();
        let (handle, _worker) = Scheduler::spawn(recorder.clone());

        handle.schedule(reopen(1), Duration::from_secs(20)).unwrap();
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(recorder.fired.lock().unwrap().is_empty());
        assert_eq!(handle.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_still_goes_through_the_queue() {
        let recorder = Recorder::default();
        let (handle, _worker) = Scheduler::spawn(recorder.clone());

        let first = handle.schedule(reopen(1), Duration::ZERO).unwrap();
        let second = handle.schedule(reopen(2), Duration::ZERO).unwrap();
        // Not applied inline by schedule().
        assert!(recorder.fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*recorder.fired.lock().unwrap(), vec![first.id, second.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_dropped_without_retry() {
        let recorder = Recorder {
            fail: vec![1],
            ..Recorder::default()
        };
        let (handle, _worker) = Scheduler::spawn(recorder.clone());

        handle.schedule(reopen(1), Duration::from_secs(1)).unwrap();
        handle.schedule(reopen(2), Duration::from_secs(2)).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*recorder.fired.lock().unwrap(), vec![1, 2]);
        assert_eq!(handle.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_tasks_fire_after_handles_drop() {
        let recorder = Recorder::default();
        let (handle, worker) = Scheduler::spawn(recorder.clone());

        handle.schedule(reopen(1), Duration::from_secs(5)).unwrap();
        drop(handle);

        worker.await.unwrap();
        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
    }
}
