use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::artifact::ArtifactStore;
use crate::artwork::ArtworkResolver;
use crate::queue::{AcquisitionQueue, Task, TaskFailure};
use crate::track::{SqliteTrackStore, TrackRecord, TrackResult};

/// Umbrella failure returned to coordinator callers.
#[derive(Debug, Clone, Error)]
#[error("acquisition failed for {id}: {cause}")]
pub struct AcquisitionFailed {
    pub id: String,
    pub cause: TaskFailure,
}

type AcquireOutcome = Result<TrackRecord, AcquisitionFailed>;

/// Result of an eviction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictOutcome {
    Removed,
    NotCached,
    InFlight,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub cached_tracks: i64,
    pub artifact_files: u64,
    pub artifact_bytes: u64,
    pub in_flight: usize,
    pub queue_depth: usize,
}

/// Single-flight cache coordinator.
///
/// Every request for an id either hits the two-part cache, joins the task
/// already in flight for that id, or starts the one task allowed for it.
/// The registry mutex is the sole serialization point: the cache check and
/// the in-flight registration happen under it, with no await held.
#[derive(Clone)]
pub struct Coordinator {
    store: SqliteTrackStore,
    artifacts: ArtifactStore,
    queue: AcquisitionQueue,
    artwork: Option<Arc<dyn ArtworkResolver>>,
    in_flight: Arc<Mutex<HashMap<String, tokio::sync::broadcast::Sender<AcquireOutcome>>>>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("store", &self.store)
            .field("artifacts", &self.artifacts)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        store: SqliteTrackStore,
        artifacts: ArtifactStore,
        queue: AcquisitionQueue,
        artwork: Option<Arc<dyn ArtworkResolver>>,
    ) -> Self {
        Self {
            store,
            artifacts,
            queue,
            artwork,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn queue(&self) -> &AcquisitionQueue {
        &self.queue
    }

    /// Returns the cached record for `id`, acquiring it first if needed.
    ///
    /// Concurrent calls for the same id share one task and observe the same
    /// terminal outcome. The caller disconnecting does not abort the
    /// acquisition; other waiters may still need the result.
    pub async fn ensure_cached(&self, id: &str) -> AcquireOutcome {
        let mut rx = {
            let mut registry = self.in_flight.lock().unwrap();
            if let Some(active) = registry.get(id) {
                debug!(id, "joining in-flight acquisition");
                active.subscribe()
            } else {
                match self.cached_record(id) {
                    Ok(Some(record)) => {
                        debug!(id, "cache hit");
                        return Ok(record);
                    }
                    Ok(None) => {
                        let (tx, rx) = tokio::sync::broadcast::channel(1);
                        registry.insert(id.to_string(), tx.clone());
                        self.spawn_owner(id.to_string(), tx);
                        rx
                    }
                    Err(err) => {
                        return Err(AcquisitionFailed {
                            id: id.to_string(),
                            cause: TaskFailure::Storage {
                                id: id.to_string(),
                                reason: err.to_string(),
                            },
                        });
                    }
                }
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(AcquisitionFailed {
                id: id.to_string(),
                cause: TaskFailure::Aborted { id: id.to_string() },
            }),
        }
    }

    /// Streams the encoded artifact for `id` into `sink`, populating the
    /// durable cache first when needed.
    ///
    /// Deterministic stream-mode policy: the cache fill is the single task
    /// per id and the response sink is served from the promoted artifact, so
    /// a stream request can never race a save request for the same id.
    pub async fn stream_to<W>(&self, id: &str, sink: &mut W) -> AcquireOutcome
    where
        W: AsyncWrite + Unpin + Send,
    {
        let record = self.ensure_cached(id).await?;
        let mut stream = self
            .artifacts
            .open(id)
            .await
            .map_err(|err| self.storage_failure(id, err.to_string()))?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| self.storage_failure(id, err.to_string()))?;
            sink.write_all(&chunk)
                .await
                .map_err(|err| self.storage_failure(id, err.to_string()))?;
        }
        sink.flush()
            .await
            .map_err(|err| self.storage_failure(id, err.to_string()))?;
        Ok(record)
    }

    /// Read-through accessor; never starts work.
    pub fn record(&self, id: &str) -> TrackResult<Option<TrackRecord>> {
        self.store.get(id)
    }

    pub fn list(&self, limit: Option<usize>) -> TrackResult<Vec<TrackRecord>> {
        self.store.list(limit)
    }

    /// Drops both cache halves for `id`. Refuses while an acquisition for
    /// the id is running.
    pub async fn evict(&self, id: &str) -> TrackResult<EvictOutcome> {
        if self.is_in_flight(id) {
            return Ok(EvictOutcome::InFlight);
        }
        // Record first: a crash after this leaves artifact-without-record,
        // which the validity check already treats as a miss.
        let had_record = match self.store.delete(id) {
            Ok(()) => true,
            Err(crate::track::TrackError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };
        let had_artifact = self.artifacts.remove(id).await.map_err(|err| {
            crate::track::TrackError::Io(std::io::Error::other(err.to_string()))
        })?;
        if had_record || had_artifact {
            info!(id = %id, "evicted cached track");
            Ok(EvictOutcome::Removed)
        } else {
            Ok(EvictOutcome::NotCached)
        }
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(id)
    }

    pub fn status(&self) -> TrackResult<VaultStatus> {
        let stats = self.artifacts.stats();
        Ok(VaultStatus {
            cached_tracks: self.store.count()?,
            artifact_files: stats.files,
            artifact_bytes: stats.total_bytes,
            in_flight: self.in_flight.lock().unwrap().len(),
            queue_depth: self.queue.depth(),
        })
    }

    /// Cache validity: the artifact must exist on disk and the record must
    /// exist in the store. One-sided states are misses, never errors; a
    /// crash between artifact promote and record write heals on reacquire.
    fn cached_record(&self, id: &str) -> TrackResult<Option<TrackRecord>> {
        if !self.artifacts.exists(id) {
            return Ok(None);
        }
        self.store.get(id)
    }

    fn spawn_owner(&self, id: String, tx: tokio::sync::broadcast::Sender<AcquireOutcome>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let outcome = coordinator.acquire(&id).await;
            // Remove before broadcasting: a request landing in the gap
            // re-checks the cache instead of joining a terminated channel.
            coordinator.in_flight.lock().unwrap().remove(&id);
            if tx.send(outcome).is_err() {
                debug!(id = %id, "acquisition finished with no remaining waiters");
            }
        });
    }

    async fn acquire(&self, id: &str) -> AcquireOutcome {
        let handle = self.queue.submit(Task::cache(id));
        let outcome = handle
            .outcome()
            .await
            .map_err(|cause| AcquisitionFailed {
                id: id.to_string(),
                cause,
            })?;

        let mut record = outcome.record;
        if let Some(resolver) = &self.artwork {
            if let Some(url) = record.thumbnail_url.clone() {
                record.accent_color = resolver.accent_color(&url).await;
            }
        }

        // The artifact is already promoted; only now may the record appear.
        self.store
            .put(&record)
            .map_err(|err| self.storage_failure(id, err.to_string()))?;
        info!(id, title = %record.title, artist = %record.artist, "track cached");
        Ok(record)
    }

    fn storage_failure(&self, id: &str, reason: String) -> AcquisitionFailed {
        AcquisitionFailed {
            id: id.to_string(),
            cause: TaskFailure::Storage {
                id: id.to_string(),
                reason,
            },
        }
    }
}
