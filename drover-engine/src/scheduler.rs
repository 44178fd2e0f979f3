//! Job scheduler
//!
//! Single-flight FIFO queue over the worker: at most one job runs at a
//! time, queued entries wait in submission order, and an entry may name
//! a prerequisite job that must succeed before it starts. The scheduler
//! loop owns the queue; callers hold a cheap cloneable handle that
//! submits and cancels over channels.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use drover_core::domain::job::JobStatus;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::sink::OutputSink;
use crate::store::JobStore;
use crate::vault::CredentialVault;
use crate::worker::Worker;

/// One queued execution. Holding the context keeps the job workspace
/// alive; dropping the entry removes it.
struct QueueEntry {
    context: ExecutionContext,
    /// Job that must reach `Success` before this entry starts.
    depends_on: Option<Uuid>,
}

/// Handle to the scheduler loop.
///
/// Submitting after the loop stopped returns an error instead of
/// silently dropping the job.
#[derive(Clone)]
pub struct Scheduler {
    register_tx: mpsc::UnboundedSender<QueueEntry>,
    cancel_tx: mpsc::UnboundedSender<Uuid>,
}

impl Scheduler {
    /// Spawns the scheduler loop and returns its handle. The loop runs
    /// until every handle is dropped and the queue has drained.
    pub fn start(
        store: Arc<dyn JobStore>,
        sink: Arc<OutputSink>,
        vault: Arc<CredentialVault>,
        config: Arc<Config>,
    ) -> Self {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();

        let worker = Arc::new(Worker::new(store.clone(), sink, vault, config.clone()));
        let scheduler_loop = SchedulerLoop {
            store,
            worker,
            config,
            register_rx,
            cancel_rx,
            queue: VecDeque::new(),
            canceled: HashSet::new(),
            active: None,
        };
        tokio::spawn(scheduler_loop.run());

        Self {
            register_tx,
            cancel_tx,
        }
    }

    /// Queues a job for execution, optionally gated on a prerequisite.
    pub fn submit(&self, context: ExecutionContext, depends_on: Option<Uuid>) -> Result<()> {
        debug!(job_id = %context.job.id, ?depends_on, "job submitted to scheduler");
        self.register_tx
            .send(QueueEntry {
                context,
                depends_on,
            })
            .map_err(|_| EngineError::Internal("scheduler is not running".to_string()))
    }

    /// Cancels a job, whether it is running or still queued. Unknown
    /// ids are ignored by the loop.
    pub fn cancel(&self, job_id: Uuid) -> Result<()> {
        self.cancel_tx
            .send(job_id)
            .map_err(|_| EngineError::Internal("scheduler is not running".to_string()))
    }
}

/// Running job entry: its id and the wire to kill it.
struct ActiveJob {
    job_id: Uuid,
    cancel: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<()>,
}

struct SchedulerLoop {
    store: Arc<dyn JobStore>,
    worker: Arc<Worker>,
    config: Arc<Config>,
    register_rx: mpsc::UnboundedReceiver<QueueEntry>,
    cancel_rx: mpsc::UnboundedReceiver<Uuid>,
    queue: VecDeque<QueueEntry>,
    /// Queued jobs canceled before they started.
    canceled: HashSet<Uuid>,
    active: Option<ActiveJob>,
}

impl SchedulerLoop {
    async fn run(mut self) {
        info!(tick = ?self.config.tick_interval, "scheduler loop started");
        let mut tick = tokio::time::interval(self.config.tick_interval);
        let mut closed = false;

        loop {
            tokio::select! {
                entry = self.register_rx.recv(), if !closed => {
                    match entry {
                        Some(entry) => self.queue.push_back(entry),
                        None => closed = true,
                    }
                }
                Some(job_id) = self.cancel_rx.recv() => {
                    self.handle_cancel(job_id);
                }
                _ = active_done(&mut self.active) => {
                    self.active = None;
                }
                _ = tick.tick() => {}
            }

            self.drain().await;

            if closed && self.active.is_none() && self.queue.is_empty() {
                break;
            }
        }
        info!("scheduler loop stopped");
    }

    fn handle_cancel(&mut self, job_id: Uuid) {
        if let Some(active) = self.active.as_mut() {
            if active.job_id == job_id {
                if let Some(cancel) = active.cancel.take() {
                    info!(%job_id, "canceling running job");
                    let _ = cancel.send(());
                }
                return;
            }
        }
        // The cancel can outrun the registration message, since the two
        // travel on separate channels. Remember the id either way; the
        // drain discards the matching entry whenever it shows up.
        info!(%job_id, "canceling queued job");
        self.canceled.insert(job_id);
    }

    /// Starts queued entries until one runs or the head must wait.
    async fn drain(&mut self) {
        while self.active.is_none() {
            let Some(entry) = self.queue.pop_front() else {
                return;
            };

            if self.canceled.remove(&entry.context.job.id) {
                self.worker.cancel_without_running(entry.context).await;
                continue;
            }

            match self.gate(&entry).await {
                Gate::Start => self.start(entry),
                Gate::Wait => {
                    self.queue.push_front(entry);
                    return;
                }
                Gate::Fail => {
                    self.worker
                        .fail_without_running(entry.context, "previous task failed")
                        .await;
                }
            }
        }
    }

    /// Decides whether the entry's prerequisite allows it to start.
    async fn gate(&self, entry: &QueueEntry) -> Gate {
        let Some(dep_id) = entry.depends_on else {
            return Gate::Start;
        };

        match self.store.job(dep_id).await {
            Ok(Some(dep)) => {
                if dep.status == JobStatus::Success {
                    Gate::Start
                } else if dep.status.is_terminal() {
                    Gate::Fail
                } else {
                    Gate::Wait
                }
            }
            Ok(None) => {
                error!(job_id = %entry.context.job.id, %dep_id, "prerequisite job missing");
                Gate::Fail
            }
            Err(e) => {
                // Transient store trouble: leave the entry queued.
                warn!(%dep_id, error = %e, "prerequisite lookup failed");
                Gate::Wait
            }
        }
    }

    fn start(&mut self, entry: QueueEntry) {
        let job_id = entry.context.job.id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let worker = self.worker.clone();
        let supervisor_worker = self.worker.clone();
        let handle = tokio::spawn(async move {
            worker.run(entry.context, cancel_rx).await;
        });

        // The supervisor is the panic boundary: a crashed worker task
        // still produces a terminal record and frees the runner slot.
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(%job_id, error = %e, "worker task failed");
                supervisor_worker.mark_panicked(job_id).await;
            }
            let _ = done_tx.send(());
        });

        self.active = Some(ActiveJob {
            job_id,
            cancel: Some(cancel_tx),
            done: done_rx,
        });
    }
}

enum Gate {
    Start,
    Wait,
    Fail,
}

async fn active_done(active: &mut Option<ActiveJob>) {
    match active.as_mut() {
        Some(active) => {
            // A dropped sender still means the run is over.
            let _ = (&mut active.done).await;
        }
        None => std::future::pending().await,
    }
}
