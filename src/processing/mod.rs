// Muxing/transcoding of downloaded streams into the final file.

pub mod ffmpeg;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::downloader::RequestedFormat;
use crate::errors::Result;

pub use ffmpeg::FfmpegMuxer;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MuxRequest {
    pub inputs: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Encoder VBR quality (`-q:a`), lower is better.
    pub vbr_quality: Option<u8>,
    pub fast_start: bool,
}

/// Codec settings for each target format.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxProfile {
    pub extension: &'static str,
    pub video_codec: Option<&'static str>,
    pub audio_codec: &'static str,
    pub vbr_quality: u8,
    pub fast_start: bool,
}

impl MuxProfile {
    pub fn for_format(format: RequestedFormat) -> Self {
        let audio_only = |extension, audio_codec| MuxProfile {
            extension,
            video_codec: None,
            audio_codec,
            vbr_quality: 4,
            fast_start: false,
        };
        match format {
            RequestedFormat::VideoMp4 => MuxProfile {
                extension: "mp4",
                video_codec: Some("libx264"),
                audio_codec: "aac",
                vbr_quality: 4,
                fast_start: true,
            },
            RequestedFormat::AudioMp3 => audio_only("mp3", "libmp3lame"),
            RequestedFormat::AudioWav => audio_only("wav", "pcm_s16le"),
            RequestedFormat::AudioAac => audio_only("aac", "aac"),
            RequestedFormat::AudioFlac => audio_only("flac", "flac"),
        }
    }

    pub fn request(&self, inputs: Vec<PathBuf>, output_path: PathBuf) -> MuxRequest {
        MuxRequest {
            inputs,
            output_path,
            video_codec: self.video_codec.map(str::to_string),
            audio_codec: Some(self.audio_codec.to_string()),
            vbr_quality: Some(self.vbr_quality),
            fast_start: self.fast_start,
        }
    }
}

#[async_trait::async_trait]
pub trait Muxer: Send + Sync {
    async fn run(&self, request: &MuxRequest) -> Result<()>;
}
