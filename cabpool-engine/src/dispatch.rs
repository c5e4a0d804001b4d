use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use cabpool_core::{MatchError, MatchOutcome, RideIntent, StoreError};

use crate::context::WorkerContext;
use crate::{cleanup, matcher};

/// How long each worker gets to build its clients and signal readiness.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

const WORKER_QUEUE_DEPTH: usize = 64;

/// Work the surrounding system can hand to the pool.
#[derive(Debug)]
pub enum Task {
    MatchRide { user_id: String, intent: RideIntent },
    RemoveUser { user_id: String },
    RemoveUserFromTrip { user_id: String },
}

#[derive(Debug)]
pub enum TaskOutput {
    Match(MatchOutcome),
    Removed,
    /// The trip the rider was spliced out of, when one listed them.
    RemovedFromTrip(Option<String>),
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("worker {0} failed to initialize: {1}")]
    Worker(usize, String),
    #[error("worker pool initialization timed out")]
    Timeout,
}

struct WorkItem {
    task_id: Uuid,
    task: Task,
    reply: oneshot::Sender<(Uuid, Result<TaskOutput, MatchError>)>,
}

/// A fixed-size set of cooperative workers, each owning its private store
/// clients. Tasks are handed out round-robin and answered through a
/// per-task reply channel correlated by task id.
pub struct Dispatcher {
    lanes: Vec<mpsc::Sender<WorkItem>>,
    next: AtomicUsize,
    closed: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `size` workers, building each one's context through
    /// `context_factory`. Completes only once every worker has signalled
    /// readiness; a slow or failing worker fails the whole pool.
    pub async fn init<F, Fut>(
        size: usize,
        ready_timeout: Duration,
        context_factory: F,
    ) -> Result<Self, InitError>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<WorkerContext, StoreError>> + Send + 'static,
    {
        let size = size.max(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<Result<usize, (usize, String)>>(size);
        let mut lanes = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let (tx, rx) = mpsc::channel::<WorkItem>(WORKER_QUEUE_DEPTH);
            let build = context_factory(worker_id);
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                build,
                rx,
                ready_tx.clone(),
            )));
            lanes.push(tx);
        }
        drop(ready_tx);

        let dispatcher = Self {
            lanes,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            workers: Mutex::new(workers),
        };

        for _ in 0..size {
            match timeout(ready_timeout, ready_rx.recv()).await {
                Ok(Some(Ok(worker_id))) => debug!(worker_id, "worker ready"),
                Ok(Some(Err((worker_id, message)))) => {
                    dispatcher.shutdown().await;
                    return Err(InitError::Worker(worker_id, message));
                }
                Ok(None) | Err(_) => {
                    dispatcher.shutdown().await;
                    return Err(InitError::Timeout);
                }
            }
        }

        info!(workers = size, "worker pool ready");
        Ok(dispatcher)
    }

    /// Run one task on the next worker in rotation and wait for its answer.
    pub async fn submit(&self, task: Task) -> Result<TaskOutput, MatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MatchError::WorkerPoolTerminated);
        }
        let task_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let lane = self.next.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        self.lanes[lane]
            .send(WorkItem {
                task_id,
                task,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MatchError::WorkerPoolTerminated)?;

        let (echoed, result) = reply_rx
            .await
            .map_err(|_| MatchError::WorkerPoolTerminated)?;
        debug_assert_eq!(echoed, task_id);
        result
    }

    /// Stop the pool. Outstanding and later submissions fail with
    /// `WorkerPoolTerminated`.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => return,
        };
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("worker pool terminated");
    }
}

async fn worker_loop<Fut>(
    worker_id: usize,
    build: Fut,
    mut rx: mpsc::Receiver<WorkItem>,
    ready: mpsc::Sender<Result<usize, (usize, String)>>,
) where
    Fut: Future<Output = Result<WorkerContext, StoreError>> + Send,
{
    let ctx = match build.await {
        Ok(ctx) => {
            let _ = ready.send(Ok(worker_id)).await;
            ctx
        }
        Err(e) => {
            let _ = ready.send(Err((worker_id, e.to_string()))).await;
            return;
        }
    };

    while let Some(item) = rx.recv().await {
        debug!(worker_id, task_id = %item.task_id, "task picked up");
        let result = run_task(&ctx, item.task).await;
        let _ = item.reply.send((item.task_id, result));
    }
}

async fn run_task(ctx: &WorkerContext, task: Task) -> Result<TaskOutput, MatchError> {
    match task {
        Task::MatchRide { user_id, intent } => matcher::match_ride(ctx, &user_id, &intent)
            .await
            .map(TaskOutput::Match),
        Task::RemoveUser { user_id } => cleanup::remove_user(ctx, &user_id)
            .await
            .map(|_| TaskOutput::Removed),
        Task::RemoveUserFromTrip { user_id } => cleanup::remove_user_from_trip(ctx, &user_id)
            .await
            .map(TaskOutput::RemovedFromTrip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cabpool_core::{GeoPoint, MatchResult};

    fn dest() -> GeoPoint {
        GeoPoint { lat: 1.0, lng: 1.0 }
    }

    #[tokio::test]
    async fn tasks_round_trip_through_the_pool() {
        let h = harness(ScriptedRoutes::default().with_route(dest(), computed("abc", 12.0)));
        let ctx = h.ctx.clone();

        let dispatcher = Dispatcher::init(2, Duration::from_secs(1), move |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await
        .unwrap();

        let output = dispatcher
            .submit(Task::MatchRide {
                user_id: "u1".into(),
                intent: cabpool_core::RideIntent {
                    destination: dest(),
                    passengers: 1,
                    luggage: 1,
                },
            })
            .await
            .unwrap();
        match output {
            TaskOutput::Match(outcome) => assert_eq!(outcome.result, MatchResult::None),
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(h.pool.member_count(), 1);

        let output = dispatcher
            .submit(Task::RemoveUser {
                user_id: "u1".into(),
            })
            .await
            .unwrap();
        assert!(matches!(output, TaskOutput::Removed));
        assert_eq!(h.pool.member_count(), 0);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_later_submissions() {
        let h = harness(ScriptedRoutes::default());
        let ctx = h.ctx.clone();

        let dispatcher = Dispatcher::init(2, Duration::from_secs(1), move |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await
        .unwrap();
        dispatcher.shutdown().await;

        let err = dispatcher
            .submit(Task::RemoveUser {
                user_id: "u1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::WorkerPoolTerminated));
    }

    #[tokio::test]
    async fn failing_worker_fails_initialization() {
        let result = Dispatcher::init(2, Duration::from_secs(1), |_| async {
            Err::<WorkerContext, StoreError>("redis refused the connection".into())
        })
        .await;

        assert!(matches!(result, Err(InitError::Worker(_, _))));
    }

    #[tokio::test]
    async fn unready_worker_times_out_initialization() {
        let result = Dispatcher::init(1, Duration::from_millis(50), |_| {
            std::future::pending::<Result<WorkerContext, StoreError>>()
        })
        .await;

        assert!(matches!(result, Err(InitError::Timeout)));
    }
}
