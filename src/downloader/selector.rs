//! Stream selection: picks the video/audio variants to fetch for a request.
//!
//! Unmatched preferences degrade to the best-available choice; selection only
//! comes back empty when the catalog lacks a stream kind the format needs.

use crate::api::{StreamDescriptor, StreamKind};
use crate::downloader::{RequestedFormat, RequestedQuality};

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    pub video: Option<StreamDescriptor>,
    pub audio: StreamDescriptor,
}

impl StreamSelection {
    /// Streams in download order: video first when present, then audio.
    pub fn in_download_order(&self) -> Vec<&StreamDescriptor> {
        self.video.iter().chain(std::iter::once(&self.audio)).collect()
    }
}

/// First element with the greatest key; later equal keys never displace it.
fn first_max_by_key<'a, K, F>(
    streams: impl Iterator<Item = &'a StreamDescriptor>,
    key: F,
) -> Option<&'a StreamDescriptor>
where
    K: PartialOrd,
    F: Fn(&StreamDescriptor) -> K,
{
    streams.fold(None, |best, candidate| match best {
        Some(current) if key(candidate) <= key(current) => Some(current),
        _ => Some(candidate),
    })
}

fn of_kind(catalog: &[StreamDescriptor], kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
    catalog.iter().filter(move |s| s.kind == kind)
}

fn best_audio(catalog: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    first_max_by_key(of_kind(catalog, StreamKind::Audio), |s| s.bitrate_bps)
}

fn best_video(catalog: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    first_max_by_key(of_kind(catalog, StreamKind::Video), |s| {
        (s.quality_value(), s.bitrate_bps)
    })
}

fn video_with_label<'a>(catalog: &'a [StreamDescriptor], label: &str) -> Option<&'a StreamDescriptor> {
    first_max_by_key(
        of_kind(catalog, StreamKind::Video).filter(|s| s.quality_label == label),
        |s| s.bitrate_bps,
    )
}

fn audio_closest_to(catalog: &[StreamDescriptor], target_kbps: u32) -> Option<&StreamDescriptor> {
    let target = f64::from(target_kbps);
    of_kind(catalog, StreamKind::Audio).fold(None, |best: Option<&StreamDescriptor>, candidate| {
        let distance = (candidate.bitrate_kbps() - target).abs();
        match best {
            Some(current) if (current.bitrate_kbps() - target).abs() <= distance => Some(current),
            _ => Some(candidate),
        }
    })
}

pub fn select_streams(
    catalog: &[StreamDescriptor],
    format: RequestedFormat,
    quality: &RequestedQuality,
) -> Option<StreamSelection> {
    if format.is_video() {
        let video = match quality {
            RequestedQuality::SpecificLabel(label) => {
                video_with_label(catalog, label).or_else(|| best_video(catalog))
            }
            RequestedQuality::BestAvailable | RequestedQuality::SpecificBitrate(_) => best_video(catalog),
        }?;
        let audio = best_audio(catalog)?;
        return Some(StreamSelection {
            video: Some(video.clone()),
            audio: audio.clone(),
        });
    }

    let audio = match quality {
        RequestedQuality::SpecificBitrate(kbps) => audio_closest_to(catalog, *kbps),
        RequestedQuality::BestAvailable | RequestedQuality::SpecificLabel(_) => best_audio(catalog),
    }?;
    Some(StreamSelection {
        video: None,
        audio: audio.clone(),
    })
}
