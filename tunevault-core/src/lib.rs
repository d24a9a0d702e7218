pub mod artifact;
pub mod artwork;
pub mod config;
pub mod coordinator;
pub mod encode;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod queue;
pub mod sqlite;
pub mod track;

pub use artifact::{ArtifactError, ArtifactStats, ArtifactStore};
pub use artwork::{ArtworkResolver, HttpArtworkResolver};
pub use config::{
    load_acquisition_config, load_tunevault_config, AcquisitionConfig, ConfigBundle,
    TunevaultConfig,
};
pub use coordinator::{AcquisitionFailed, Coordinator, EvictOutcome, VaultStatus};
pub use encode::{
    AudioEncoder, BitratePolicy, EncodeError, EncodeSink, EncodeSpec, FfmpegEncoder, TrackTags,
};
pub use error::{ConfigError, Result};
pub use fetch::{
    ByteStream, FetchAdapter, FetchError, HttpFetchAdapter, MediaStream, QualityTier, TrackInfo,
};
pub use progress::{ProgressMeter, ProgressSample};
pub use queue::{
    AcquisitionQueue, QueueEvent, QueueOptions, Task, TaskDestination, TaskFailure, TaskHandle,
    TaskOutcome,
};
pub use track::{
    sanitize_component, split_artist_title, SqliteTrackStore, SqliteTrackStoreBuilder, TrackError,
    TrackRecord, TransferStats,
};
