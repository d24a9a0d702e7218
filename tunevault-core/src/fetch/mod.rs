mod error;
mod http;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;

pub use error::{FetchError, FetchResult};
pub use http::HttpFetchAdapter;

/// Chunked byte stream flowing between fetch, progress and encode stages.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Selection policy among the formats a remote resource offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Highest,
    Lowest,
    HighestAudio,
    LowestAudio,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Highest => "highest",
            QualityTier::Lowest => "lowest",
            QualityTier::HighestAudio => "highestaudio",
            QualityTier::LowestAudio => "lowestaudio",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "highest" => Ok(Self::Highest),
            "lowest" => Ok(Self::Lowest),
            "highestaudio" => Ok(Self::HighestAudio),
            "lowestaudio" => Ok(Self::LowestAudio),
            other => Err(FetchError::InvalidPayload(format!(
                "unknown quality tier: {other}"
            ))),
        }
    }
}

/// One downloadable rendition of a remote resource.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFormat {
    pub url: String,
    pub bitrate_kbps: u32,
    #[serde(default)]
    pub audio_only: bool,
}

/// Metadata for a remote resource, as reported by the source.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub title: String,
    pub duration_seconds: Option<i64>,
    pub view_count: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub available_bitrates: Vec<u32>,
}

/// An open media stream plus what the transport declared about it.
pub struct MediaStream {
    pub content_length: Option<u64>,
    pub bitrate_kbps: Option<u32>,
    pub stream: ByteStream,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("content_length", &self.content_length)
            .field("bitrate_kbps", &self.bitrate_kbps)
            .finish()
    }
}

/// Resolves resource ids to metadata and media streams.
///
/// Retry and backoff for transient transport failures belong to the adapter;
/// callers treat any error from this boundary as terminal for the task.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn metadata(&self, id: &str) -> FetchResult<TrackInfo>;

    async fn open_stream(&self, id: &str, tier: QualityTier) -> FetchResult<MediaStream>;
}

/// Picks a format for the requested tier. Audio tiers prefer audio-only
/// renditions and fall back to the full list when none exist.
pub(crate) fn select_format(formats: &[RemoteFormat], tier: QualityTier) -> Option<&RemoteFormat> {
    let audio: Vec<&RemoteFormat> = formats.iter().filter(|f| f.audio_only).collect();
    let pool: Vec<&RemoteFormat> = match tier {
        QualityTier::HighestAudio | QualityTier::LowestAudio if !audio.is_empty() => audio,
        _ => formats.iter().collect(),
    };
    match tier {
        QualityTier::Highest | QualityTier::HighestAudio => {
            pool.into_iter().max_by_key(|f| f.bitrate_kbps)
        }
        QualityTier::Lowest | QualityTier::LowestAudio => {
            pool.into_iter().min_by_key(|f| f.bitrate_kbps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(url: &str, bitrate_kbps: u32, audio_only: bool) -> RemoteFormat {
        RemoteFormat {
            url: url.to_string(),
            bitrate_kbps,
            audio_only,
        }
    }

    #[test]
    fn audio_tier_prefers_audio_only_formats() {
        let formats = vec![
            format("a", 320, false),
            format("b", 128, true),
            format("c", 96, true),
        ];
        let chosen = select_format(&formats, QualityTier::HighestAudio).unwrap();
        assert_eq!(chosen.url, "b");
        let chosen = select_format(&formats, QualityTier::LowestAudio).unwrap();
        assert_eq!(chosen.url, "c");
    }

    #[test]
    fn highest_tier_spans_all_formats() {
        let formats = vec![format("a", 320, false), format("b", 128, true)];
        let chosen = select_format(&formats, QualityTier::Highest).unwrap();
        assert_eq!(chosen.url, "a");
    }

    #[test]
    fn tier_parses_config_strings() {
        assert_eq!(
            "highestaudio".parse::<QualityTier>().unwrap(),
            QualityTier::HighestAudio
        );
        assert!("ultra".parse::<QualityTier>().is_err());
    }
}
