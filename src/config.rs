use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::downloader::{RequestedFormat, RequestedQuality};
use crate::errors::{AppError, Result};

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const MAX_CONCURRENCY: usize = 10;
const ENV_PREFIX: &str = "MEDIA_DL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    pub last_format: RequestedFormat,
    pub last_quality: RequestedQuality,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
    pub metadata_timeout_secs: u64,
    pub chunk_size: usize,
    pub catalog_cache_ttl_secs: u64,
    pub proxy: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir()
                .map(|d| d.join("Media Downloads"))
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            temp_dir: std::env::temp_dir(),
            max_concurrent_downloads: DEFAULT_CONCURRENCY,
            last_format: RequestedFormat::VideoMp4,
            last_quality: RequestedQuality::BestAvailable,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ytdlp_path: PathBuf::from("yt-dlp"),
            metadata_timeout_secs: 30,
            chunk_size: 64 * 1024,
            catalog_cache_ttl_secs: 600,
            proxy: None,
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON settings file if present, then `MEDIA_DL_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(layered.try_deserialize()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("media-downloader").join("config.json"))
    }

    /// Concurrency limit clamped to `1..=MAX_CONCURRENCY`.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_downloads.clamp(1, MAX_CONCURRENCY)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs.max(1))
    }

    pub fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_secs)
    }
}
