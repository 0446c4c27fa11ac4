use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::{AppError, Result};
use crate::processing::{MuxRequest, Muxer};

/// Runs the `ffmpeg` binary to merge/transcode downloaded streams.
pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn build_args(request: &MuxRequest) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];
        for input in &request.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }
        if let Some(codec) = &request.video_codec {
            args.push("-c:v".to_string());
            args.push(codec.clone());
        }
        if let Some(codec) = &request.audio_codec {
            args.push("-c:a".to_string());
            args.push(codec.clone());
        }
        if let Some(quality) = request.vbr_quality {
            args.push("-q:a".to_string());
            args.push(quality.to_string());
        }
        if request.fast_start {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(request.output_path.to_string_lossy().to_string());
        args
    }

    /// Returns true when `ffmpeg -version` runs successfully.
    pub async fn check_available(&self) -> bool {
        match Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                log::warn!("⚠️ [MUX] FFmpeg not usable at {:?}: {}", self.ffmpeg_path, e);
                false
            }
        }
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn run(&self, request: &MuxRequest) -> Result<()> {
        let args = Self::build_args(request);
        log::debug!("🎬 [MUX] Running {:?} {}", self.ffmpeg_path, args.join(" "));

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Mux {
                code: None,
                message: format!("Failed to start ffmpeg: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("ffmpeg exited without output")
                .trim()
                .to_string();
            log::error!("❌ [MUX] ffmpeg failed ({}): {}", output.status, stderr);
            return Err(AppError::Mux {
                code: output.status.code(),
                message,
            });
        }

        log::info!("✅ [MUX] Wrote {:?}", request.output_path);
        Ok(())
    }
}
