use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use tokio::fs;
use tracing::warn;
use url::Url;

/// Resolves a thumbnail into a single accent color.
///
/// Best-effort by contract: a failed fetch or decode yields `None` and must
/// never fail the surrounding acquisition.
#[async_trait]
pub trait ArtworkResolver: Send + Sync {
    async fn accent_color(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HttpArtworkResolver {
    client: Client,
}

impl HttpArtworkResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_defaults() -> Result<Self, String> {
        Client::builder()
            .user_agent("Tunevault-Artwork/1.0")
            .build()
            .map(Self::new)
            .map_err(|err| err.to_string())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, String> {
        if let Some(path) = file_url_path(url) {
            return fs::read(&path)
                .await
                .map_err(|err| format!("{}: {err}", path.display()));
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("thumbnail endpoint returned {}", response.status()));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| err.to_string())
    }
}

#[async_trait]
impl ArtworkResolver for HttpArtworkResolver {
    async fn accent_color(&self, url: &str) -> Option<String> {
        let bytes = match self.fetch_bytes(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url, error = %err, "failed to fetch thumbnail");
                return None;
            }
        };
        let image = match image::load_from_memory(&bytes) {
            Ok(image) => image,
            Err(err) => {
                warn!(url, error = %err, "failed to decode thumbnail");
                return None;
            }
        };
        dominant_color(&image).map(rgb_to_hex)
    }
}

/// Most frequent color after 5-bit quantization of a downscaled copy.
fn dominant_color(image: &DynamicImage) -> Option<(u8, u8, u8)> {
    use image::GenericImageView;

    let mut counts: HashMap<(u8, u8, u8), u32> = HashMap::new();
    let resized = image.resize(96, 96, image::imageops::FilterType::Triangle);
    for pixel in resized.pixels() {
        let rgb = pixel.2 .0;
        let key = (
            rgb[0] & 0b11111000,
            rgb[1] & 0b11111000,
            rgb[2] & 0b11111000,
        );
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(rgb, _)| rgb)
}

fn rgb_to_hex((r, g, b): (u8, u8, u8)) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn file_url_path(raw: &str) -> Option<PathBuf> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme() == "file" {
        parsed.to_file_path().ok()
    } else {
        None
    }
}
