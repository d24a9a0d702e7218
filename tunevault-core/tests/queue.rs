use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tunevault_core::encode::EncodeResult;
use tunevault_core::fetch::FetchResult;
use tunevault_core::{
    AcquisitionQueue, ArtifactStore, AudioEncoder, EncodeError, EncodeSink, EncodeSpec,
    FetchAdapter, FetchError, MediaStream, QualityTier, QueueEvent, QueueOptions, Task,
    TaskFailure, TrackInfo,
};

#[derive(Default)]
struct MockAdapter {
    started: Arc<Mutex<Vec<String>>>,
    unavailable: bool,
}

impl MockAdapter {
    fn payload() -> Vec<u8> {
        b"raw media payload bytes".to_vec()
    }
}

#[async_trait]
impl FetchAdapter for MockAdapter {
    async fn metadata(&self, id: &str) -> FetchResult<TrackInfo> {
        if self.unavailable {
            return Err(FetchError::Unavailable {
                id: id.to_string(),
                reason: "removed by uploader".to_string(),
            });
        }
        Ok(TrackInfo {
            title: format!("Mock Artist - Track {id}"),
            duration_seconds: Some(120),
            view_count: Some(42),
            thumbnail_url: None,
            available_bitrates: vec![192, 128],
        })
    }

    async fn open_stream(&self, id: &str, _tier: QualityTier) -> FetchResult<MediaStream> {
        self.started.lock().unwrap().push(id.to_string());
        let payload = Self::payload();
        let content_length = payload.len() as u64;
        let chunks: Vec<std::io::Result<Bytes>> = payload
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(MediaStream {
            content_length: Some(content_length),
            bitrate_kbps: Some(128),
            stream: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

/// Encoder that tags the payload instead of transcoding it, slow enough to
/// make slot occupancy observable.
struct MockEncoder {
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    fail: bool,
}

impl MockEncoder {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }
}

#[async_trait]
impl AudioEncoder for MockEncoder {
    async fn encode(
        &self,
        mut input: tunevault_core::ByteStream,
        spec: EncodeSpec,
        dest: EncodeSink,
    ) -> EncodeResult<()> {
        use futures::StreamExt;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let mut output = format!(
            "MP3|{}|{}|{}k|",
            spec.tags.artist, spec.tags.title, spec.bitrate_kbps
        )
        .into_bytes();
        while let Some(chunk) = input.next().await {
            let chunk = chunk.map_err(EncodeError::Source)?;
            output.extend_from_slice(&chunk);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(EncodeError::Encoder {
                status: Some(1),
                stderr: "invalid data found when processing input".to_string(),
            });
        }
        match dest {
            EncodeSink::File(path) => tokio::fs::write(path, &output)
                .await
                .map_err(EncodeError::Sink),
            EncodeSink::Writer(mut writer) => {
                writer.write_all(&output).await.map_err(EncodeError::Sink)?;
                writer.flush().await.map_err(EncodeError::Sink)
            }
        }
    }
}

fn build_queue(
    adapter: MockAdapter,
    encoder: MockEncoder,
    artifacts: ArtifactStore,
    parallelism: usize,
) -> AcquisitionQueue {
    AcquisitionQueue::new(
        Arc::new(adapter),
        Arc::new(encoder),
        artifacts,
        QueueOptions {
            parallelism,
            sample_interval: Duration::ZERO,
            ..QueueOptions::default()
        },
    )
}

#[tokio::test]
async fn task_produces_tagged_artifact_and_record() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let queue = build_queue(
        MockAdapter::default(),
        MockEncoder::new(Duration::ZERO),
        artifacts.clone(),
        1,
    );

    let outcome = queue.submit(Task::cache("abc123")).outcome().await.unwrap();
    assert_eq!(outcome.record.artist, "Mock Artist");
    assert_eq!(outcome.record.title, "Track abc123");
    assert_eq!(outcome.record.duration_seconds, Some(120));
    assert!(outcome.record.checksum_sha256.is_some());

    let transfer = outcome.record.transfer.expect("transfer stats");
    assert_eq!(
        transfer.transferred_bytes,
        MockAdapter::payload().len() as u64
    );

    assert!(artifacts.exists("abc123"));
    let stored = std::fs::read(artifacts.path_for("abc123")).unwrap();
    // First reported bitrate drives the encode, not the opened stream's.
    assert!(stored.starts_with(b"MP3|Mock Artist|Track abc123|192k|"));
}

#[tokio::test]
async fn bounded_concurrency_admits_fifo() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let adapter = MockAdapter::default();
    let started = adapter.started.clone();
    let encoder = MockEncoder::new(Duration::from_millis(20));
    let max_active = encoder.max_active.clone();
    let queue = build_queue(adapter, encoder, artifacts, 2);

    let ids = ["t1", "t2", "t3", "t4", "t5"];
    let handles: Vec<_> = ids.iter().map(|id| queue.submit(Task::cache(*id))).collect();
    assert_eq!(queue.depth(), 5);

    for handle in handles {
        handle.outcome().await.unwrap();
    }

    assert_eq!(max_active.load(Ordering::SeqCst), 2);
    assert_eq!(*started.lock().unwrap(), ids.map(String::from).to_vec());
    assert_eq!(queue.depth(), 0);
}

#[tokio::test]
async fn queue_size_events_follow_every_mutation() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let queue = build_queue(
        MockAdapter::default(),
        MockEncoder::new(Duration::ZERO),
        artifacts,
        1,
    );
    let mut events = queue.subscribe();

    let first = queue.submit(Task::cache("one"));
    let second = queue.submit(Task::cache("two"));
    first.outcome().await.unwrap();
    second.outcome().await.unwrap();

    let mut depths = Vec::new();
    let mut finished = 0;
    while finished < 2 {
        match events.recv().await.unwrap() {
            QueueEvent::QueueSize { depth } => depths.push(depth),
            QueueEvent::Finished { .. } => finished += 1,
            _ => {}
        }
    }
    assert_eq!(depths, vec![1, 2, 1, 0]);
}

#[tokio::test]
async fn progress_events_reach_subscribers() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let queue = build_queue(
        MockAdapter::default(),
        MockEncoder::new(Duration::ZERO),
        artifacts,
        1,
    );
    let mut events = queue.subscribe();

    queue.submit(Task::cache("abc")).outcome().await.unwrap();

    let mut final_percentage = None;
    loop {
        match events.recv().await.unwrap() {
            QueueEvent::Progress { id, sample } => {
                assert_eq!(id, "abc");
                final_percentage = sample.percentage;
            }
            QueueEvent::Finished { .. } => break,
            _ => {}
        }
    }
    assert_eq!(final_percentage, Some(100.0));
}

#[tokio::test]
async fn stream_destination_writes_to_sink_without_artifact() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let queue = build_queue(
        MockAdapter::default(),
        MockEncoder::new(Duration::ZERO),
        artifacts.clone(),
        1,
    );

    let (tx, mut rx) = tokio::io::duplex(64 * 1024);
    let reader = tokio::spawn(async move {
        let mut buffer = Vec::new();
        rx.read_to_end(&mut buffer).await.unwrap();
        buffer
    });

    let outcome = queue
        .submit(Task::stream("abc", Box::new(tx)))
        .outcome()
        .await
        .unwrap();
    let streamed = reader.await.unwrap();

    assert!(streamed.starts_with(b"MP3|Mock Artist|Track abc|192k|"));
    assert!(outcome.record.checksum_sha256.is_none());
    assert!(!artifacts.exists("abc"));
}

#[tokio::test]
async fn unavailable_resource_fails_the_task() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let adapter = MockAdapter {
        unavailable: true,
        ..MockAdapter::default()
    };
    let queue = build_queue(
        adapter,
        MockEncoder::new(Duration::ZERO),
        artifacts.clone(),
        1,
    );
    let mut events = queue.subscribe();

    let failure = queue
        .submit(Task::cache("gone"))
        .outcome()
        .await
        .unwrap_err();
    assert!(matches!(failure, TaskFailure::Unavailable { .. }));
    assert!(!artifacts.exists("gone"));

    loop {
        if let QueueEvent::Error { id, message } = events.recv().await.unwrap() {
            assert_eq!(id, "gone");
            assert!(message.contains("unavailable"));
            break;
        }
    }
}

#[tokio::test]
async fn encode_failure_discards_staging() {
    let dir = TempDir::new().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let mut encoder = MockEncoder::new(Duration::ZERO);
    encoder.fail = true;
    let queue = build_queue(MockAdapter::default(), encoder, artifacts.clone(), 1);

    let failure = queue
        .submit(Task::cache("bad"))
        .outcome()
        .await
        .unwrap_err();
    assert!(matches!(failure, TaskFailure::Encode { .. }));
    assert!(!artifacts.exists("bad"));

    let staging: Vec<_> = std::fs::read_dir(dir.path().join(".staging"))
        .unwrap()
        .collect();
    assert!(staging.is_empty());
}
