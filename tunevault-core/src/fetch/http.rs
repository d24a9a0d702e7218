use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::config::FetchSection;

use super::error::{FetchError, FetchResult};
use super::{select_format, FetchAdapter, MediaStream, QualityTier, RemoteFormat, TrackInfo};

#[derive(Debug, Clone, Deserialize)]
struct RemoteTrackPayload {
    title: String,
    #[serde(default)]
    duration_seconds: Option<i64>,
    #[serde(default)]
    view_count: Option<i64>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    formats: Vec<RemoteFormat>,
}

/// Reference adapter resolving `<base_url>/<id>.json` descriptors.
///
/// Supports `file://` descriptor and stream URLs alongside http(s), so the
/// whole pipeline can run against local fixtures.
#[derive(Debug, Clone)]
pub struct HttpFetchAdapter {
    client: Client,
    base_url: String,
}

impl HttpFetchAdapter {
    pub fn new(section: &FetchSection) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent("Tunevault-Fetch/1.0")
            .timeout(Duration::from_secs(section.timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(
                section.max_redirects as usize,
            ))
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn descriptor_url(&self, id: &str) -> String {
        format!("{}/{}.json", self.base_url, id)
    }

    async fn payload(&self, id: &str) -> FetchResult<RemoteTrackPayload> {
        let url = self.descriptor_url(id);
        debug!(id, url = %url, "resolving track descriptor");
        if let Some(path) = file_url_path(&url) {
            let contents = match fs::read(&path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(FetchError::Unavailable {
                        id: id.to_string(),
                        reason: "descriptor not found".to_string(),
                    });
                }
                Err(source) => return Err(FetchError::Io { source, path }),
            };
            return serde_json::from_slice(&contents)
                .map_err(|err| FetchError::InvalidPayload(err.to_string()));
        }

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE => {
                return Err(FetchError::Unavailable {
                    id: id.to_string(),
                    reason: format!("descriptor returned {}", response.status()),
                });
            }
            status if !status.is_success() => {
                return Err(FetchError::Transport(format!(
                    "descriptor returned {status}"
                )));
            }
            _ => {}
        }
        response
            .json::<RemoteTrackPayload>()
            .await
            .map_err(|err| FetchError::InvalidPayload(err.to_string()))
    }

    async fn open_format(&self, id: &str, format: &RemoteFormat) -> FetchResult<MediaStream> {
        if let Some(path) = file_url_path(&format.url) {
            let metadata = fs::metadata(&path)
                .await
                .map_err(|_| FetchError::Unavailable {
                    id: id.to_string(),
                    reason: "media file missing".to_string(),
                })?;
            let file = fs::File::open(&path)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: path.clone(),
                })?;
            return Ok(MediaStream {
                content_length: Some(metadata.len()),
                bitrate_kbps: Some(format.bitrate_kbps),
                stream: Box::pin(ReaderStream::new(file)),
            });
        }

        let response = self.client.get(&format.url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "media endpoint returned {}",
                response.status()
            )));
        }
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(MediaStream {
            content_length,
            bitrate_kbps: Some(format.bitrate_kbps),
            stream: Box::pin(stream),
        })
    }
}

#[async_trait]
impl FetchAdapter for HttpFetchAdapter {
    async fn metadata(&self, id: &str) -> FetchResult<TrackInfo> {
        let payload = self.payload(id).await?;
        Ok(TrackInfo {
            title: payload.title,
            duration_seconds: payload.duration_seconds,
            view_count: payload.view_count,
            thumbnail_url: payload.thumbnail_url,
            available_bitrates: payload.formats.iter().map(|f| f.bitrate_kbps).collect(),
        })
    }

    async fn open_stream(&self, id: &str, tier: QualityTier) -> FetchResult<MediaStream> {
        let payload = self.payload(id).await?;
        let format =
            select_format(&payload.formats, tier).ok_or_else(|| FetchError::Unavailable {
                id: id.to_string(),
                reason: "no playable format reported".to_string(),
            })?;
        debug!(id, bitrate = format.bitrate_kbps, tier = %tier, "opening media stream");
        self.open_format(id, format).await
    }
}

fn file_url_path(raw: &str) -> Option<PathBuf> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme() == "file" {
        parsed.to_file_path().ok()
    } else {
        None
    }
}
