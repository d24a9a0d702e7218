use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TunevaultConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub limits: LimitsSection,
}

impl TunevaultConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub library_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub max_concurrent_jobs: u32,
    pub queue_warning_depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    pub fetch: FetchSection,
    pub progress: ProgressSection,
    pub encode: EncodeSection,
    pub artwork: ArtworkSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    pub base_url: String,
    pub quality: String,
    pub timeout_seconds: u64,
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSection {
    pub sample_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncodeSection {
    pub ffmpeg_path: String,
    pub audio_codec: String,
    pub container: String,
    pub id3_version: u8,
    pub bitrate_source: String,
    pub fallback_bitrate_kbps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtworkSection {
    pub accent_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub vault: TunevaultConfig,
    pub acquisition: AcquisitionConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let vault = load_tunevault_config(dir.join("tunevault.toml"))?;
        let acquisition = load_acquisition_config(dir.join("acquisition.toml"))?;
        Ok(Self { vault, acquisition })
    }
}

pub fn load_tunevault_config<P: AsRef<Path>>(path: P) -> Result<TunevaultConfig> {
    load_toml(path)
}

pub fn load_acquisition_config<P: AsRef<Path>>(path: P) -> Result<AcquisitionConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
