use serde::{Deserialize, Serialize};

use crate::api::{quality_value, MediaInfo};
use crate::utils::{format_clip_duration, format_views};

const PREVIEW_AUDIO_OPTIONS: usize = 3;

/// What a caller shows before committing to a download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPreview {
    pub title: String,
    pub duration: String,
    pub views: String,
    pub thumbnail_url: Option<String>,
    /// Distinct video quality labels, best first.
    pub video_qualities: Vec<String>,
    /// Highest audio bitrates in kbps, best first.
    pub audio_bitrates_kbps: Vec<u32>,
}

impl MediaPreview {
    pub fn from_info(info: &MediaInfo) -> Self {
        let mut video_qualities: Vec<String> = Vec::new();
        for stream in info.video_streams() {
            if !stream.quality_label.is_empty() && !video_qualities.contains(&stream.quality_label) {
                video_qualities.push(stream.quality_label.clone());
            }
        }
        // Stable sort keeps catalog order among labels of equal rank.
        video_qualities.sort_by_key(|label| std::cmp::Reverse(quality_value(label)));

        let mut audio_bitrates_kbps: Vec<u32> = info
            .audio_streams()
            .map(|s| s.bitrate_kbps().round() as u32)
            .collect();
        audio_bitrates_kbps.sort_unstable_by(|a, b| b.cmp(a));
        audio_bitrates_kbps.dedup();
        audio_bitrates_kbps.truncate(PREVIEW_AUDIO_OPTIONS);

        Self {
            title: info.title.clone(),
            duration: format_clip_duration(info.duration_seconds),
            views: format_views(info.view_count),
            thumbnail_url: info.thumbnail_url.clone(),
            video_qualities,
            audio_bitrates_kbps,
        }
    }
}
