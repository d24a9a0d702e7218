use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use tunevault_core::{
    AcquisitionFailed, AcquisitionQueue, ArtifactStore, ArtworkResolver, BitratePolicy,
    ConfigBundle, Coordinator, EvictOutcome, FetchError, FfmpegEncoder, HttpArtworkResolver,
    HttpFetchAdapter, QualityTier, QueueEvent, QueueOptions, SqliteTrackStore, TrackError,
    TrackRecord, VaultStatus,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tunevault_core::ConfigError),
    #[error("track store error: {0}")]
    Track(#[from] TrackError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionFailed),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tunevault command-line control interface", long_about = None)]
pub struct Cli {
    /// Directory holding tunevault.toml and acquisition.toml
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,
    /// Alternative path for the track database
    #[arg(long)]
    pub tracks_db: Option<PathBuf>,
    /// Alternative path for the artifact library
    #[arg(long)]
    pub library_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a summary of the cache and library
    Status,
    /// Operations on cached tracks
    #[command(subcommand)]
    Track(TrackCommands),
    /// Acquire a track into the cache, reporting progress
    Fetch(FetchArgs),
    /// Run integrity checks against the configuration
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
    /// Emit shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum TrackCommands {
    /// List cached tracks
    List(TrackListArgs),
    /// Show a single cached track
    Show(TrackShowArgs),
    /// Drop a track from the cache
    Remove(TrackShowArgs),
}

#[derive(Args, Debug)]
pub struct TrackListArgs {
    /// Maximum number of records returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct TrackShowArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub id: String,
    /// Suppress progress lines
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Run basic checks
    Check,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing();
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(
            args.shell,
            &mut command,
            "tunevaultctl",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Track(TrackCommands::List(args)) => {
            let records = context.track_list(args)?;
            render(&records, cli.format)?;
        }
        Commands::Track(TrackCommands::Show(args)) => {
            let record = context.track_show(args)?;
            render(&record, cli.format)?;
        }
        Commands::Track(TrackCommands::Remove(args)) => {
            let outcome = context.track_remove(args)?;
            render(&outcome, cli.format)?;
        }
        Commands::Fetch(args) => {
            let record = context.fetch(args)?;
            render(&record, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Completions(_) => unreachable!("handled above"),
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    tracks_db: PathBuf,
    library_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let bundle = ConfigBundle::from_directory(&cli.config_dir)?;
        let library_dir = cli
            .library_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.vault.paths.library_dir));
        let tracks_db = cli
            .tracks_db
            .clone()
            .unwrap_or_else(|| Path::new(&bundle.vault.paths.data_dir).join("tracks.sqlite"));
        Ok(Self {
            bundle,
            tracks_db,
            library_dir,
        })
    }

    fn open_store(&self) -> Result<SqliteTrackStore> {
        if let Some(parent) = self.tracks_db.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = SqliteTrackStore::new(&self.tracks_db)?;
        store.initialize()?;
        Ok(store)
    }

    fn gather_status(&self) -> Result<VaultStatus> {
        let store = self.open_store()?;
        let stats = ArtifactStore::new(&self.library_dir).stats();
        Ok(VaultStatus {
            cached_tracks: store.count()?,
            artifact_files: stats.files,
            artifact_bytes: stats.total_bytes,
            in_flight: 0,
            queue_depth: 0,
        })
    }

    fn track_list(&self, args: &TrackListArgs) -> Result<Vec<TrackRecord>> {
        let store = self.open_store()?;
        Ok(store.list(Some(args.limit))?)
    }

    fn track_show(&self, args: &TrackShowArgs) -> Result<TrackRecord> {
        let store = self.open_store()?;
        store
            .get(&args.id)?
            .ok_or_else(|| AppError::MissingResource(format!("track {}", args.id)))
    }

    fn track_remove(&self, args: &TrackShowArgs) -> Result<EvictOutcome> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let coordinator = self.build_coordinator()?;
            Ok(coordinator.evict(&args.id).await?)
        })
    }

    fn fetch(&self, args: &FetchArgs) -> Result<TrackRecord> {
        let runtime = tokio::runtime::Runtime::new()?;
        let quiet = args.quiet;
        let id = args.id.clone();
        runtime.block_on(async move {
            let coordinator = self.build_coordinator()?;
            let mut events = coordinator.queue().subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    let event = match events.recv().await {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    };
                    if quiet {
                        continue;
                    }
                    match event {
                        QueueEvent::Progress { id, sample } => {
                            if let Some(percentage) = sample.percentage {
                                println!(
                                    "downloading and converting {id} {:.1}%",
                                    (percentage * 10.0).round() / 10.0
                                );
                            } else {
                                println!(
                                    "downloading and converting {id} {} bytes",
                                    sample.transferred_bytes
                                );
                            }
                        }
                        QueueEvent::Finished { id, .. } => println!("finished {id}"),
                        QueueEvent::Error { id, message } => println!("failed {id}: {message}"),
                        QueueEvent::QueueSize { .. } => {}
                    }
                }
            });
            let record = coordinator.ensure_cached(&id).await;
            printer.abort();
            Ok(record?)
        })
    }

    fn build_coordinator(&self) -> Result<Coordinator> {
        let acquisition = &self.bundle.acquisition;
        let adapter = HttpFetchAdapter::new(&acquisition.fetch)?;
        let encoder = FfmpegEncoder::new(&acquisition.encode);
        let artifacts = ArtifactStore::new(&self.library_dir);
        let store = self.open_store()?;

        let quality: QualityTier = acquisition.fetch.quality.parse()?;
        let bitrate_policy: BitratePolicy = acquisition
            .encode
            .bitrate_source
            .parse()
            .map_err(AppError::InvalidOption)?;
        let options = QueueOptions {
            parallelism: self.bundle.vault.limits.max_concurrent_jobs.max(1) as usize,
            quality,
            sample_interval: std::time::Duration::from_millis(
                acquisition.progress.sample_interval_ms,
            ),
            bitrate_policy,
            fallback_bitrate_kbps: acquisition.encode.fallback_bitrate_kbps,
        };
        let queue = AcquisitionQueue::new(Arc::new(adapter), Arc::new(encoder), artifacts.clone(), options);

        let artwork: Option<Arc<dyn ArtworkResolver>> = if acquisition.artwork.accent_enabled {
            match HttpArtworkResolver::from_defaults() {
                Ok(resolver) => Some(Arc::new(resolver)),
                Err(reason) => return Err(AppError::InvalidOption(reason)),
            }
        } else {
            None
        };

        Ok(Coordinator::new(store, artifacts, queue, artwork))
    }

    fn health_check(&self) -> Vec<CheckEntry> {
        let mut report = Vec::new();

        report.push(check_path(
            "library directory",
            Path::new(&self.library_dir),
        ));
        report.push(check_path(
            "data directory",
            Path::new(&self.bundle.vault.paths.data_dir),
        ));

        let ffmpeg = Path::new(&self.bundle.acquisition.encode.ffmpeg_path);
        report.push(if ffmpeg.is_file() {
            CheckEntry::ok("ffmpeg binary", ffmpeg.display().to_string())
        } else {
            CheckEntry::error("ffmpeg binary", format!("{} not found", ffmpeg.display()))
        });

        let db_check = self
            .open_store()
            .and_then(|store| store.count().map_err(AppError::from));
        report.push(match db_check {
            Ok(count) => CheckEntry::ok("track database", format!("{count} records")),
            Err(err) => CheckEntry::error("track database", err.to_string()),
        });

        match self.bundle.acquisition.fetch.quality.parse::<QualityTier>() {
            Ok(tier) => report.push(CheckEntry::ok("quality tier", tier.to_string())),
            Err(err) => report.push(CheckEntry::error("quality tier", err.to_string())),
        }

        report
    }
}

fn check_path(name: &'static str, path: &Path) -> CheckEntry {
    if path.is_dir() {
        CheckEntry::ok(name, path.display().to_string())
    } else {
        CheckEntry::warn(name, format!("{} missing", path.display()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckEntry {
    fn ok(name: &'static str, detail: String) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            detail,
        }
    }

    fn warn(name: &'static str, detail: String) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            detail,
        }
    }

    fn error(name: &'static str, detail: String) -> Self {
        Self {
            name,
            status: CheckStatus::Error,
            detail,
        }
    }
}

impl DisplayFallback for VaultStatus {
    fn display(&self) -> String {
        format!(
            "tracks: {}\nartifacts: {} files, {} bytes\nin flight: {}\nqueue depth: {}",
            self.cached_tracks,
            self.artifact_files,
            self.artifact_bytes,
            self.in_flight,
            self.queue_depth
        )
    }
}

impl DisplayFallback for TrackRecord {
    fn display(&self) -> String {
        let duration = self
            .duration_seconds
            .map(|s| format!("{}:{:02}", s / 60, s % 60))
            .unwrap_or_else(|| "?".to_string());
        format!(
            "{} — {} [{}] ({})",
            self.artist,
            self.title,
            duration,
            self.accent_color.as_deref().unwrap_or("no accent")
        )
    }
}

impl DisplayFallback for Vec<TrackRecord> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no cached tracks".to_string();
        }
        self.iter()
            .map(|record| format!("{}  {}", record.id, record.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for EvictOutcome {
    fn display(&self) -> String {
        match self {
            EvictOutcome::Removed => "removed".to_string(),
            EvictOutcome::NotCached => "not cached".to_string(),
            EvictOutcome::InFlight => "acquisition in flight, not removed".to_string(),
        }
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                let status = match entry.status {
                    CheckStatus::Ok => "ok",
                    CheckStatus::Warn => "warn",
                    CheckStatus::Error => "error",
                };
                format!("[{status}] {}: {}", entry.name, entry.detail)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn status_on_an_empty_vault() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        let cli = Cli::parse_from([
            "tunevaultctl",
            "--config-dir",
            manifest.join("../configs").to_str().unwrap(),
            "--tracks-db",
            dir.path().join("tracks.sqlite").to_str().unwrap(),
            "--library-dir",
            dir.path().join("library").to_str().unwrap(),
            "status",
        ]);
        let context = AppContext::new(&cli).unwrap();
        let status = context.gather_status().unwrap();
        assert_eq!(status.cached_tracks, 0);
        assert_eq!(status.artifact_files, 0);
    }

    #[test]
    fn context_resolves_overrides() {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        let cli = Cli::parse_from([
            "tunevaultctl",
            "--config-dir",
            manifest.join("../configs").to_str().unwrap(),
            "--tracks-db",
            "/tmp/custom/tracks.sqlite",
            "--library-dir",
            "/tmp/custom/library",
            "status",
        ]);
        let context = AppContext::new(&cli).unwrap();
        assert_eq!(context.tracks_db, PathBuf::from("/tmp/custom/tracks.sqlite"));
        assert_eq!(context.library_dir, PathBuf::from("/tmp/custom/library"));
        assert_eq!(context.bundle.vault.system.node_name, "tunevault-primary");
    }
}
