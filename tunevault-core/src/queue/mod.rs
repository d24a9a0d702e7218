use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::encode::{AudioEncoder, BitratePolicy, EncodeError, EncodeSink, EncodeSpec, TrackTags};
use crate::fetch::{FetchAdapter, FetchError, QualityTier};
use crate::progress::{ProgressMeter, ProgressSample};
use crate::track::{sanitize_component, split_artist_title, TrackRecord, TransferStats};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Options for the acquisition worker pool.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub parallelism: usize,
    pub quality: QualityTier,
    pub sample_interval: Duration,
    pub bitrate_policy: BitratePolicy,
    pub fallback_bitrate_kbps: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            quality: QualityTier::Highest,
            sample_interval: Duration::from_millis(1000),
            bitrate_policy: BitratePolicy::FirstFormat,
            fallback_bitrate_kbps: 128,
        }
    }
}

/// Where a task delivers its encoded output.
pub enum TaskDestination {
    /// Encode into staging and promote into the durable artifact store.
    CacheFile,
    /// Write incrementally to a caller-supplied sink; nothing durable.
    Stream(Box<dyn AsyncWrite + Send + Unpin>),
}

impl fmt::Debug for TaskDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskDestination::CacheFile => f.write_str("CacheFile"),
            TaskDestination::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A unit of acquisition work, consumed exactly once by a worker.
#[derive(Debug)]
pub struct Task {
    pub id: String,
    pub destination: TaskDestination,
}

impl Task {
    pub fn cache(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            destination: TaskDestination::CacheFile,
        }
    }

    pub fn stream(id: impl Into<String>, sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            id: id.into(),
            destination: TaskDestination::Stream(sink),
        }
    }
}

/// Terminal failure of a task. Cloneable so one outcome can be fanned out
/// to every caller waiting on the same id.
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    #[error("resource {id} unavailable: {reason}")]
    Unavailable { id: String, reason: String },
    #[error("transport failure for {id}: {reason}")]
    Transport { id: String, reason: String },
    #[error("encode failed for {id}: {reason}")]
    Encode { id: String, reason: String },
    #[error("storage failure for {id}: {reason}")]
    Storage { id: String, reason: String },
    #[error("task for {id} aborted before completion")]
    Aborted { id: String },
}

impl TaskFailure {
    pub fn id(&self) -> &str {
        match self {
            TaskFailure::Unavailable { id, .. }
            | TaskFailure::Transport { id, .. }
            | TaskFailure::Encode { id, .. }
            | TaskFailure::Storage { id, .. }
            | TaskFailure::Aborted { id } => id,
        }
    }

    fn from_fetch(id: &str, error: FetchError) -> Self {
        match error {
            FetchError::Unavailable { id, reason } => TaskFailure::Unavailable { id, reason },
            other => TaskFailure::Transport {
                id: id.to_string(),
                reason: other.to_string(),
            },
        }
    }

    fn from_encode(id: &str, error: EncodeError) -> Self {
        match error {
            EncodeError::Source(err) => TaskFailure::Transport {
                id: id.to_string(),
                reason: err.to_string(),
            },
            other => TaskFailure::Encode {
                id: id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Successful task result: the metadata record derived during acquisition.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub id: String,
    pub record: TrackRecord,
}

/// Per-task completion future, resolved exactly once.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    done: oneshot::Receiver<Result<TaskOutcome, TaskFailure>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn outcome(self) -> Result<TaskOutcome, TaskFailure> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(TaskFailure::Aborted { id: self.id }),
        }
    }
}

/// Lifecycle events observable by any number of subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum QueueEvent {
    QueueSize { depth: usize },
    Progress { id: String, sample: ProgressSample },
    Finished { id: String, record: TrackRecord },
    Error { id: String, message: String },
}

struct QueuedTask {
    task: Task,
    done: oneshot::Sender<Result<TaskOutcome, TaskFailure>>,
}

/// Bounded-concurrency FIFO runner for acquisition tasks.
///
/// Pending tasks feed `parallelism` execution slots; a task occupies its
/// slot for the full fetch+encode duration. The queue is id-agnostic;
/// same-id exclusion belongs to the coordinator above it.
#[derive(Debug, Clone)]
pub struct AcquisitionQueue {
    submit_tx: mpsc::UnboundedSender<QueuedTask>,
    events: broadcast::Sender<QueueEvent>,
    depth: Arc<AtomicUsize>,
}

impl AcquisitionQueue {
    pub fn new(
        adapter: Arc<dyn FetchAdapter>,
        encoder: Arc<dyn AudioEncoder>,
        artifacts: ArtifactStore,
        options: QueueOptions,
    ) -> Self {
        let (submit_tx, mut submit_rx) = mpsc::unbounded_channel::<QueuedTask>();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let depth = Arc::new(AtomicUsize::new(0));
        let slots = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let runner = Arc::new(TaskRunner {
            adapter,
            encoder,
            artifacts,
            options,
            events: events.clone(),
            depth: depth.clone(),
        });

        tokio::spawn(async move {
            while let Some(queued) = submit_rx.recv().await {
                let permit = match slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let runner = runner.clone();
                tokio::spawn(async move {
                    runner.run(queued).await;
                    drop(permit);
                });
            }
        });

        Self {
            submit_tx,
            events,
            depth,
        }
    }

    /// Pending plus running task count.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn submit(&self, task: Task) -> TaskHandle {
        let id = task.id.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(QueueEvent::QueueSize { depth });
        debug!(id = %id, depth, "task queued");

        if let Err(rejected) = self.submit_tx.send(QueuedTask {
            task,
            done: done_tx,
        }) {
            let depth = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;
            let _ = self.events.send(QueueEvent::QueueSize { depth });
            let QueuedTask { task, done } = rejected.0;
            let _ = done.send(Err(TaskFailure::Aborted { id: task.id }));
        }

        TaskHandle { id, done: done_rx }
    }
}

struct TaskRunner {
    adapter: Arc<dyn FetchAdapter>,
    encoder: Arc<dyn AudioEncoder>,
    artifacts: ArtifactStore,
    options: QueueOptions,
    events: broadcast::Sender<QueueEvent>,
    depth: Arc<AtomicUsize>,
}

impl TaskRunner {
    async fn run(&self, queued: QueuedTask) {
        let QueuedTask { task, done } = queued;
        let id = task.id.clone();
        let result = self.execute(task).await;

        let depth = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;
        let _ = self.events.send(QueueEvent::QueueSize { depth });

        match &result {
            Ok(outcome) => {
                info!(id = %id, title = %outcome.record.title, "acquisition finished");
                let _ = self.events.send(QueueEvent::Finished {
                    id: id.clone(),
                    record: outcome.record.clone(),
                });
            }
            Err(failure) => {
                warn!(id = %id, error = %failure, "acquisition failed");
                let _ = self.events.send(QueueEvent::Error {
                    id: id.clone(),
                    message: failure.to_string(),
                });
            }
        }

        let _ = done.send(result);
    }

    async fn execute(&self, task: Task) -> Result<TaskOutcome, TaskFailure> {
        let Task { id, destination } = task;

        let info = self
            .adapter
            .metadata(&id)
            .await
            .map_err(|err| TaskFailure::from_fetch(&id, err))?;
        let cleaned = sanitize_component(&info.title);
        let (artist, title) = split_artist_title(&cleaned);

        let media = self
            .adapter
            .open_stream(&id, self.options.quality)
            .await
            .map_err(|err| TaskFailure::from_fetch(&id, err))?;
        let bitrate = match self.options.bitrate_policy {
            BitratePolicy::FirstFormat => info.available_bitrates.first().copied(),
            BitratePolicy::SelectedFormat => media.bitrate_kbps,
        }
        .unwrap_or(self.options.fallback_bitrate_kbps);

        let (meter, mut samples) = ProgressMeter::wrap(
            media.stream,
            media.content_length,
            self.options.sample_interval,
        );
        let events = self.events.clone();
        let sample_id = id.clone();
        let sampler = tokio::spawn(async move {
            let mut last = None;
            while let Some(sample) = samples.recv().await {
                let _ = events.send(QueueEvent::Progress {
                    id: sample_id.clone(),
                    sample: sample.clone(),
                });
                last = Some(sample);
            }
            last
        });

        let spec = EncodeSpec {
            bitrate_kbps: bitrate,
            tags: TrackTags {
                title: title.clone(),
                artist: artist.clone(),
            },
        };

        let checksum = match destination {
            TaskDestination::CacheFile => {
                let staged =
                    self.artifacts
                        .stage_path()
                        .await
                        .map_err(|err| TaskFailure::Storage {
                            id: id.clone(),
                            reason: err.to_string(),
                        })?;
                if let Err(err) = self
                    .encoder
                    .encode(Box::pin(meter), spec, EncodeSink::File(staged.clone()))
                    .await
                {
                    self.artifacts.discard(&staged).await;
                    return Err(TaskFailure::from_encode(&id, err));
                }
                let checksum = self.artifacts.promote(&staged, &id).await.map_err(|err| {
                    TaskFailure::Storage {
                        id: id.clone(),
                        reason: err.to_string(),
                    }
                })?;
                Some(checksum)
            }
            TaskDestination::Stream(sink) => {
                self.encoder
                    .encode(Box::pin(meter), spec, EncodeSink::Writer(sink))
                    .await
                    .map_err(|err| TaskFailure::from_encode(&id, err))?;
                None
            }
        };

        let transfer = sampler.await.ok().flatten().map(|s| TransferStats {
            transferred_bytes: s.transferred_bytes,
            elapsed_ms: s.elapsed_ms,
            bytes_per_second: s.bytes_per_second,
        });

        let mut record = TrackRecord::new(&id, title, artist);
        record.duration_seconds = info.duration_seconds;
        record.view_count = info.view_count;
        record.thumbnail_url = info.thumbnail_url;
        record.checksum_sha256 = checksum;
        record.transfer = transfer;
        record.updated_at = Some(Utc::now());

        Ok(TaskOutcome { id, record })
    }
}
