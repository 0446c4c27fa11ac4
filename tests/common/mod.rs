#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use media_downloader::api::{MediaInfo, StreamDescriptor, StreamKind};
use media_downloader::downloader::{ByteSource, ByteStream};
use media_downloader::metadata::CatalogProvider;
use media_downloader::processing::{MuxRequest, Muxer};
use media_downloader::{AppError, Pipeline, PipelineSettings, Result};

pub fn descriptor(kind: StreamKind, label: &str, kbps: u64, url: &str) -> StreamDescriptor {
    StreamDescriptor {
        kind,
        quality_label: label.to_string(),
        bitrate_bps: kbps * 1000,
        container: if kind == StreamKind::Video { "mp4" } else { "m4a" }.to_string(),
        size_bytes: None,
        fetch_url: url.to_string(),
    }
}

pub fn catalog(title: &str) -> MediaInfo {
    MediaInfo {
        title: title.to_string(),
        duration_seconds: Some(95),
        view_count: 42,
        thumbnail_url: None,
        streams: vec![
            descriptor(StreamKind::Video, "480p", 800, "mem://v480"),
            descriptor(StreamKind::Video, "1080p", 4_000, "mem://v1080"),
            descriptor(StreamKind::Audio, "128kbps", 128, "mem://a128"),
            descriptor(StreamKind::Audio, "192kbps", 192, "mem://a192"),
            descriptor(StreamKind::Audio, "256kbps", 256, "mem://a256"),
        ],
    }
}

pub struct Catalogs(pub HashMap<String, MediaInfo>);

#[async_trait]
impl CatalogProvider for Catalogs {
    async fn fetch(&self, source_ref: &str, _timeout: Duration) -> Result<MediaInfo> {
        self.0
            .get(source_ref)
            .cloned()
            .ok_or_else(|| AppError::Unavailable(format!("{} was removed", source_ref)))
    }
}

/// Every URL yields `chunks` chunks of `chunk_size` bytes, `delay` apart.
pub struct Bytes {
    pub chunks: usize,
    pub chunk_size: usize,
    pub delay: Duration,
}

struct BytesStream {
    left: usize,
    chunk_size: usize,
    total: u64,
    delay: Duration,
}

#[async_trait]
impl ByteSource for Bytes {
    async fn open(&self, _url: &str) -> Result<Box<dyn ByteStream>> {
        Ok(Box::new(BytesStream {
            left: self.chunks,
            chunk_size: self.chunk_size,
            total: (self.chunks * self.chunk_size) as u64,
            delay: self.delay,
        }))
    }
}

#[async_trait]
impl ByteStream for BytesStream {
    fn total_length(&self) -> Option<u64> {
        Some(self.total)
    }

    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.left == 0 {
            return Ok(None);
        }
        tokio::time::sleep(self.delay).await;
        self.left -= 1;
        Ok(Some(vec![7u8; self.chunk_size]))
    }
}

/// Copies the inputs into the output file.
pub struct CopyMuxer;

#[async_trait]
impl Muxer for CopyMuxer {
    async fn run(&self, request: &MuxRequest) -> Result<()> {
        let mut data = Vec::new();
        for input in &request.inputs {
            data.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(&request.output_path, data).await?;
        Ok(())
    }
}

pub fn pipeline(refs: &[(&str, &str)], bytes: Bytes, temp: &Path, out: &Path) -> Pipeline {
    let catalogs = refs
        .iter()
        .map(|(source_ref, title)| (source_ref.to_string(), catalog(title)))
        .collect();
    Pipeline::new(
        Arc::new(Catalogs(catalogs)),
        Arc::new(bytes),
        Arc::new(CopyMuxer),
        PipelineSettings {
            temp_dir: temp.to_path_buf(),
            output_dir: out.to_path_buf(),
            metadata_timeout: Duration::from_secs(30),
        },
    )
}

pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
