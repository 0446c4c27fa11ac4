// Catalog data model shared by the provider, the selector and the pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// One fetchable track of an item. Immutable once obtained from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub quality_label: String,
    pub bitrate_bps: u64,
    pub container: String,
    pub size_bytes: Option<u64>,
    pub fetch_url: String,
}

impl StreamDescriptor {
    pub fn bitrate_kbps(&self) -> f64 {
        self.bitrate_bps as f64 / 1000.0
    }

    /// Ordinal value of the quality label (e.g. "1080p60" -> 1080), 0 when unrecognised.
    pub fn quality_value(&self) -> u32 {
        quality_value(&self.quality_label)
    }
}

const KNOWN_QUALITIES: [u32; 9] = [4320, 2160, 1440, 1080, 720, 480, 360, 240, 144];

pub fn quality_value(label: &str) -> u32 {
    KNOWN_QUALITIES
        .iter()
        .copied()
        .find(|q| label.contains(&q.to_string()))
        .unwrap_or(0)
}

/// Everything the catalog provider knows about one media item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: Option<u64>,
    pub view_count: u64,
    pub thumbnail_url: Option<String>,
    pub streams: Vec<StreamDescriptor>,
}

impl MediaInfo {
    pub fn video_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }
}
