pub mod http_pool;
pub mod manager;
pub mod pipeline;
pub mod preview;
pub mod selector;
pub mod throughput;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::{MediaInfo, StreamKind};
use crate::errors::{AppError, Result};
use crate::utils::truncate_display;

pub use preview::MediaPreview;
pub use throughput::{Eta, ThroughputEstimator, TransferStats};

pub type ItemId = String;

const DISPLAY_TITLE_LEN: usize = 35;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestedFormat {
    #[default]
    VideoMp4,
    AudioMp3,
    AudioWav,
    AudioAac,
    AudioFlac,
}

impl RequestedFormat {
    pub fn is_video(&self) -> bool {
        matches!(self, RequestedFormat::VideoMp4)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RequestedFormat::VideoMp4 => "mp4",
            RequestedFormat::AudioMp3 => "mp3",
            RequestedFormat::AudioWav => "wav",
            RequestedFormat::AudioAac => "aac",
            RequestedFormat::AudioFlac => "flac",
        }
    }
}

impl FromStr for RequestedFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mp4" | "video" => Ok(RequestedFormat::VideoMp4),
            "mp3" => Ok(RequestedFormat::AudioMp3),
            "wav" => Ok(RequestedFormat::AudioWav),
            "aac" => Ok(RequestedFormat::AudioAac),
            "flac" => Ok(RequestedFormat::AudioFlac),
            other => Err(AppError::Validation(format!(
                "Unknown format '{}': expected one of mp4, mp3, wav, aac, flac",
                other
            ))),
        }
    }
}

/// Persisted in its textual form ("best", "720p", "192kbps").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum RequestedQuality {
    #[default]
    BestAvailable,
    SpecificLabel(String),
    /// Approximate audio bitrate in kbps.
    SpecificBitrate(u32),
}

impl fmt::Display for RequestedQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedQuality::BestAvailable => write!(f, "best"),
            RequestedQuality::SpecificLabel(label) => write!(f, "{}", label),
            RequestedQuality::SpecificBitrate(kbps) => write!(f, "{}kbps", kbps),
        }
    }
}

impl From<RequestedQuality> for String {
    fn from(quality: RequestedQuality) -> Self {
        quality.to_string()
    }
}

impl TryFrom<String> for RequestedQuality {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl FromStr for RequestedQuality {
    type Err = AppError;

    /// Accepts "best", a bitrate such as "192kbps" / "192 kbps", or a quality label ("1080p").
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("Quality cannot be empty".to_string()));
        }
        let lower = trimmed.to_lowercase();
        if lower == "best" || lower == "best available" {
            return Ok(RequestedQuality::BestAvailable);
        }
        if let Some(number) = lower.strip_suffix("kbps") {
            return number
                .trim()
                .parse::<u32>()
                .map(RequestedQuality::SpecificBitrate)
                .map_err(|e| AppError::Validation(format!("Invalid bitrate '{}': {}", trimmed, e)));
        }
        Ok(RequestedQuality::SpecificLabel(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DownloadState {
    Queued,
    FetchingMetadata,
    Ready,
    Downloading,
    Muxing,
    Completed,
    Failed(String),
    Canceled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed(_) | DownloadState::Canceled
        )
    }

    /// States counted against the concurrency limit.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, DownloadState::Downloading | DownloadState::Muxing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DownloadState::Queued => "Queued",
            DownloadState::FetchingMetadata => "Fetching metadata",
            DownloadState::Ready => "Ready",
            DownloadState::Downloading => "Downloading",
            DownloadState::Muxing => "Muxing",
            DownloadState::Completed => "Completed",
            DownloadState::Failed(_) => "Failed",
            DownloadState::Canceled => "Canceled",
        }
    }
}

/// What a caller submits to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub source_ref: String,
    pub format: RequestedFormat,
    pub quality: RequestedQuality,
}

impl DownloadRequest {
    pub fn new(source_ref: impl Into<String>, format: RequestedFormat, quality: RequestedQuality) -> Self {
        Self {
            source_ref: source_ref.into(),
            format,
            quality,
        }
    }
}

/// One unit of work, owned by the scheduler task.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub id: ItemId,
    pub source_ref: String,
    pub requested_format: RequestedFormat,
    pub requested_quality: RequestedQuality,
    pub state: DownloadState,
    pub progress_percent: f64,
    pub catalog: Option<MediaInfo>,
    pub transfer: Option<TransferStats>,
    pub output_path: Option<PathBuf>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadItem {
    pub fn new(id: ItemId, request: DownloadRequest) -> Self {
        Self {
            id,
            source_ref: request.source_ref,
            requested_format: request.format,
            requested_quality: request.quality,
            state: DownloadState::Queued,
            progress_percent: 0.0,
            catalog: None,
            transfer: None,
            output_path: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.catalog.as_ref().map(|c| c.title.as_str())
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        let title = self.title().map(str::to_string);
        let display_title = match &title {
            Some(t) => truncate_display(t, DISPLAY_TITLE_LEN),
            None => self.source_ref.clone(),
        };
        ItemSnapshot {
            id: self.id.clone(),
            source_ref: self.source_ref.clone(),
            title,
            display_title,
            requested_format: self.requested_format,
            requested_quality: self.requested_quality.clone(),
            state: self.state.clone(),
            progress_percent: self.progress_percent,
            transfer: self.transfer.clone(),
            output_path: self.output_path.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Immutable view of an item, emitted on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub source_ref: String,
    pub title: Option<String>,
    pub display_title: String,
    pub requested_format: RequestedFormat,
    pub requested_quality: RequestedQuality,
    pub state: DownloadState,
    pub progress_percent: f64,
    pub transfer: Option<TransferStats>,
    pub output_path: Option<PathBuf>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Set when the item is admitted to a slot.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Source of raw stream bytes (an HTTP GET in production).
#[async_trait::async_trait]
pub trait ByteSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>>;
}

#[async_trait::async_trait]
pub trait ByteStream: Send {
    fn total_length(&self) -> Option<u64>;

    /// Next chunk, or `None` at end of stream.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Temp file path for one stream of one item: `{temp_dir}/{item_id}_{kind}.{container}`.
pub fn temp_file_path(temp_dir: &std::path::Path, item_id: &str, kind: StreamKind, container: &str) -> PathBuf {
    temp_dir.join(format!("{}_{}.{}", item_id, kind.as_str(), container))
}
