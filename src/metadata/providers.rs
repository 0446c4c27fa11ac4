use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::api::{MediaInfo, StreamDescriptor, StreamKind};
use crate::errors::{AppError, Result};
use crate::metadata::CatalogProvider;

/// Catalog provider backed by `yt-dlp --dump-json`.
pub struct YtDlpProvider {
    ytdlp_path: PathBuf,
}

impl YtDlpProvider {
    pub fn new(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: String,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    ext: String,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
    vbr: Option<f64>,
    tbr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    url: Option<String>,
    format_note: Option<String>,
    height: Option<u32>,
}

fn has_codec(codec: &Option<String>) -> bool {
    matches!(codec.as_deref(), Some(c) if c != "none")
}

fn kbps_to_bps(kbps: Option<f64>) -> u64 {
    kbps.map(|k| (k * 1000.0).round() as u64).unwrap_or(0)
}

impl FormatInfo {
    fn into_descriptor(self) -> Option<StreamDescriptor> {
        let video = has_codec(&self.vcodec);
        let audio = has_codec(&self.acodec);
        let url = self.url?;
        let size_bytes = self.filesize.or(self.filesize_approx).map(|s| s as u64);

        let (kind, quality_label, bitrate_bps) = match (video, audio) {
            (true, false) => {
                let label = self
                    .format_note
                    .filter(|n| !n.is_empty())
                    .or_else(|| self.height.map(|h| format!("{}p", h)))
                    .unwrap_or_default();
                (StreamKind::Video, label, kbps_to_bps(self.vbr.or(self.tbr)))
            }
            (false, true) => {
                let bps = kbps_to_bps(self.abr.or(self.tbr));
                (StreamKind::Audio, format!("{}kbps", bps / 1000), bps)
            }
            // Muxed or storyboard formats are never selected.
            _ => return None,
        };

        Some(StreamDescriptor {
            kind,
            quality_label,
            bitrate_bps,
            container: self.ext,
            size_bytes,
            fetch_url: url,
        })
    }
}

/// Parses one `--dump-json` document into the catalog model.
pub fn parse_catalog(json: &str) -> Result<MediaInfo> {
    let info: VideoInfo = serde_json::from_str(json)?;
    let streams = info
        .formats
        .into_iter()
        .filter_map(FormatInfo::into_descriptor)
        .collect();

    Ok(MediaInfo {
        title: info.title,
        duration_seconds: info.duration.map(|d| d.round() as u64),
        view_count: info.view_count.unwrap_or(0),
        thumbnail_url: info.thumbnail,
        streams,
    })
}

/// Maps yt-dlp's stderr to the provider error kinds.
pub fn classify_failure(stderr: &str) -> AppError {
    let lower = stderr.to_lowercase();
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();

    let unavailable = [
        "video unavailable",
        "private video",
        "not available in your country",
        "blocked it in your country",
        "members-only",
        "has been removed",
    ];
    let not_found = ["incomplete youtube id", "http error 404", "does not exist", "unsupported url"];

    if unavailable.iter().any(|p| lower.contains(p)) {
        AppError::Unavailable(message)
    } else if not_found.iter().any(|p| lower.contains(p)) {
        AppError::NotFound(message)
    } else {
        AppError::Metadata(message)
    }
}

#[async_trait]
impl CatalogProvider for YtDlpProvider {
    async fn fetch(&self, source_ref: &str, timeout: Duration) -> Result<MediaInfo> {
        log::info!("🔍 [CATALOG] Extracting stream catalog for: {}", source_ref);

        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args(["--dump-json", "--no-warnings", "--no-playlist", source_ref])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Metadata(format!("Catalog fetch timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| AppError::Metadata(format!("Failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("❌ [CATALOG] yt-dlp failed for {}: {}", source_ref, stderr);
            return Err(classify_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let document = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| AppError::Metadata("yt-dlp returned no data".to_string()))?;
        let info = parse_catalog(document)?;
        log::info!(
            "✅ [CATALOG] '{}': {} streams ({} video, {} audio)",
            info.title,
            info.streams.len(),
            info.video_streams().count(),
            info.audio_streams().count()
        );
        Ok(info)
    }
}
