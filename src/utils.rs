use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use log::{info, warn};
use regex::Regex;

use crate::downloader::Eta;
use crate::errors::{AppError, Result};

const MAX_FILENAME_CHARS: usize = 100;

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

/// Sanitizes a media title into a file stem: strips characters invalid on common
/// filesystems, collapses whitespace runs, trims and truncates to 100 characters.
pub fn sanitize_filename(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();

    let collapsed = whitespace_run().replace_all(&stripped, " ");
    collapsed.trim().chars().take(MAX_FILENAME_CHARS).collect()
}

/// Truncates to `max_chars` characters, appending "..." when anything was cut.
pub fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// Generates a unique ID for downloads
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Renders a byte count in the largest unit that keeps the value below 1024, one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const SUFFIXES: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while (value / 1024.0).round() >= 1.0 && unit < SUFFIXES.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SUFFIXES[unit])
}

pub fn format_speed(bytes_per_sec: Option<f64>) -> String {
    match bytes_per_sec {
        Some(speed) if speed.is_finite() && speed >= 0.0 => {
            format!("{}/s", format_bytes(speed.round() as u64))
        }
        _ => "Calculating...".to_string(),
    }
}

/// `Hh Mm` from one hour, `Mm Ss` from one minute, `Ss` below.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours >= 1 {
        format!("{}h {}m", hours, minutes)
    } else if total >= 60 {
        format!("{}m {}s", total / 60, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_eta(eta: &Eta) -> String {
    match eta {
        Eta::Remaining(d) => format_duration(*d),
        Eta::AlmostDone => "Almost done".to_string(),
        Eta::Unknown => "Calculating...".to_string(),
    }
}

/// Clip length as shown in a preview: `H:MM:SS`, `M:SS`, or `--:--` when unknown.
pub fn format_clip_duration(seconds: Option<u64>) -> String {
    match seconds {
        None => "--:--".to_string(),
        Some(total) => {
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let secs = total % 60;
            if hours >= 1 {
                format!("{}:{:02}:{:02}", hours, minutes, secs)
            } else {
                format!("{}:{:02}", minutes, secs)
            }
        }
    }
}

pub fn format_views(views: u64) -> String {
    match views {
        v if v >= 1_000_000_000 => format!("{:.1}B", v as f64 / 1_000_000_000.0),
        v if v >= 1_000_000 => format!("{:.1}M", v as f64 / 1_000_000.0),
        v if v >= 1_000 => format!("{:.1}K", v as f64 / 1_000.0),
        v => v.to_string(),
    }
}

/// Makes sure the output folder exists and accepts new files.
pub async fn ensure_output_folder(path: &Path) -> Result<()> {
    let folder_error = |reason: String| AppError::Folder {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| folder_error(format!("cannot create: {}", e)))?;
        info!("📁 [FOLDER] Created output directory: {:?}", path);
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| folder_error(format!("cannot stat: {}", e)))?;
    if !metadata.is_dir() {
        return Err(folder_error("not a directory".to_string()));
    }

    let probe = path.join(format!(".write-probe-{}", generate_download_id()));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| folder_error(format!("not writable: {}", e)))?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!("⚠️ [FOLDER] Could not remove write probe {:?}: {}", probe, e);
    }
    Ok(())
}
