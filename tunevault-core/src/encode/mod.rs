use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::config::EncodeSection;
use crate::fetch::ByteStream;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to spawn encoder {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("encoder exited with status {status:?}: {stderr}")]
    Encoder {
        status: Option<i32>,
        stderr: String,
    },
    #[error("source stream failed during encode: {0}")]
    Source(io::Error),
    #[error("sink write failed during encode: {0}")]
    Sink(io::Error),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Tags embedded into the encoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSpec {
    pub bitrate_kbps: u32,
    pub tags: TrackTags,
}

/// Where the encoded audio goes: a file path, or an incremental writer.
pub enum EncodeSink {
    File(PathBuf),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl fmt::Debug for EncodeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeSink::File(path) => f.debug_tuple("File").field(path).finish(),
            EncodeSink::Writer(_) => f.debug_tuple("Writer").finish(),
        }
    }
}

/// Which reported bitrate drives the encode.
///
/// `FirstFormat` keeps the source behavior of taking the first entry the
/// remote reports, even when it disagrees with the stream actually opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitratePolicy {
    FirstFormat,
    SelectedFormat,
}

impl FromStr for BitratePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_format" => Ok(Self::FirstFormat),
            "selected_format" => Ok(Self::SelectedFormat),
            other => Err(format!("unknown bitrate source: {other}")),
        }
    }
}

#[async_trait]
pub trait AudioEncoder: Send + Sync {
    async fn encode(
        &self,
        input: ByteStream,
        spec: EncodeSpec,
        dest: EncodeSink,
    ) -> EncodeResult<()>;
}

enum OutputTarget {
    Path(PathBuf),
    Stdout,
}

/// MP3 encoder driving an external ffmpeg process.
///
/// Input is piped to stdin; output goes to a file or to stdout copied into
/// the caller's writer. A non-zero exit is fatal and never retried.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    audio_codec: String,
    container: String,
    id3_version: u8,
}

impl FfmpegEncoder {
    pub fn new(section: &EncodeSection) -> Self {
        Self {
            ffmpeg_path: PathBuf::from(&section.ffmpeg_path),
            audio_codec: section.audio_codec.clone(),
            container: section.container.clone(),
            id3_version: section.id3_version,
        }
    }

    fn build_args(&self, spec: &EncodeSpec, target: &OutputTarget) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            format!("{}k", spec.bitrate_kbps),
            "-id3v2_version".to_string(),
            self.id3_version.to_string(),
            "-metadata".to_string(),
            format!("title={}", spec.tags.title),
            "-metadata".to_string(),
            format!("artist={}", spec.tags.artist),
            "-f".to_string(),
            self.container.clone(),
        ];
        match target {
            OutputTarget::Path(path) => {
                args.push("-y".to_string());
                args.push(path.to_string_lossy().to_string());
            }
            OutputTarget::Stdout => args.push("pipe:1".to_string()),
        }
        args
    }
}

#[async_trait]
impl AudioEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        mut input: ByteStream,
        spec: EncodeSpec,
        dest: EncodeSink,
    ) -> EncodeResult<()> {
        let (target, writer) = match dest {
            EncodeSink::File(path) => (OutputTarget::Path(path), None),
            EncodeSink::Writer(writer) => (OutputTarget::Stdout, Some(writer)),
        };
        let args = self.build_args(&spec, &target);
        debug!(program = %self.ffmpeg_path.display(), "spawning encoder");

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .stdout(match target {
                OutputTarget::Path(_) => Stdio::null(),
                OutputTarget::Stdout => Stdio::piped(),
            });
        let mut child = command.spawn().map_err(|source| EncodeError::Spawn {
            program: self.ffmpeg_path.to_string_lossy().to_string(),
            source,
        })?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(EncodeError::Encoder {
                status: None,
                stderr: "encoder stdin unavailable".to_string(),
            });
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Writing into a dead encoder surfaces through the exit status, so
        // broken-pipe failures on stdin only stop the feed.
        let feed = async {
            let mut source_error = None;
            while let Some(chunk) = input.next().await {
                match chunk {
                    Ok(data) => {
                        if stdin.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        source_error = Some(err);
                        break;
                    }
                }
            }
            let _ = stdin.shutdown().await;
            drop(stdin);
            source_error
        };

        let pump = async {
            match (stdout, writer) {
                (Some(mut out), Some(mut sink)) => {
                    tokio::io::copy(&mut out, &mut sink)
                        .await
                        .map_err(EncodeError::Sink)?;
                    sink.flush().await.map_err(EncodeError::Sink)?;
                    Ok(())
                }
                _ => Ok(()),
            }
        };

        let drain = async {
            let mut buffer = String::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_string(&mut buffer).await;
            }
            buffer
        };

        let (source_error, pump_result, stderr_output) = tokio::join!(feed, pump, drain);
        let status = child.wait().await.map_err(|err| EncodeError::Encoder {
            status: None,
            stderr: err.to_string(),
        })?;

        if let Some(err) = source_error {
            return Err(EncodeError::Source(err));
        }
        pump_result?;
        if !status.success() {
            return Err(EncodeError::Encoder {
                status: status.code(),
                stderr: stderr_output.trim().to_string(),
            });
        }
        Ok(())
    }
}
