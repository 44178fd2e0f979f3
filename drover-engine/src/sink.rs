//! Output sink
//!
//! Consumes subprocess output line by line, stamps each line, persists
//! it, and fans it out to live subscribers. Persistence and fan-out run
//! on a separate writer task fed through an unbounded channel, so a
//! slow store can never stall the child process on a full pipe buffer.

use std::sync::Arc;

use drover_core::domain::job::{Job, JobStatus};
use drover_core::domain::output::{OutputRecord, OutputStream};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::store::JobStore;

/// One message on the live-output channel.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A captured output line.
    Output(OutputRecord),
    /// A job status change.
    Status {
        job_id: Uuid,
        status: JobStatus,
        failed: bool,
        time: chrono::DateTime<chrono::Utc>,
    },
}

/// Persists and streams captured output.
pub struct OutputSink {
    records: mpsc::UnboundedSender<OutputRecord>,
    events: broadcast::Sender<JobEvent>,
}

impl OutputSink {
    /// Creates the sink and spawns its writer task.
    pub fn new(store: Arc<dyn JobStore>) -> Arc<Self> {
        let (records, mut rx) = mpsc::unbounded_channel::<OutputRecord>();
        let (events, _) = broadcast::channel(1024);

        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                // Live delivery first, persistence second; neither may
                // abort the job.
                let _ = writer_events.send(JobEvent::Output(record.clone()));
                if let Err(e) = store.append_output(&record).await {
                    warn!(job_id = %record.job_id, "failed to persist output line: {}", e);
                }
            }
        });

        Arc::new(Self { records, events })
    }

    /// Subscribes to live job events. Receivers see every job; filter
    /// on `job_id` for a single one.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Publishes a status change on the live channel.
    pub fn publish_status(&self, job: &Job) {
        let _ = self.events.send(JobEvent::Status {
            job_id: job.id,
            status: job.status,
            failed: job.failed,
            time: chrono::Utc::now(),
        });
    }

    /// Spawns a reader draining one stream of a child process.
    ///
    /// Each line is stamped on arrival and submitted fire-and-forget to
    /// the writer task. The handle resolves to the collected lines once
    /// the stream closes, preserving per-stream order.
    pub fn capture<R>(
        self: &Arc<Self>,
        job_id: Uuid,
        stream: OutputStream,
        reader: R,
    ) -> JoinHandle<Vec<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let records = self.records.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = records.send(OutputRecord::now(job_id, stream, line.clone()));
                collected.push(line);
            }
            collected
        })
    }
}
