//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{MediaInfo, StreamDescriptor, StreamKind};
use crate::downloader::{ByteSource, ByteStream};
use crate::errors::{AppError, Result};
use crate::metadata::CatalogProvider;
use crate::processing::{MuxRequest, Muxer};

pub const VIDEO_URL: &str = "mem://video-1080";
pub const AUDIO_URL: &str = "mem://audio-160";

fn stream(kind: StreamKind, label: &str, kbps: u64, container: &str, url: &str) -> StreamDescriptor {
    StreamDescriptor {
        kind,
        quality_label: label.to_string(),
        bitrate_bps: kbps * 1000,
        container: container.to_string(),
        size_bytes: None,
        fetch_url: url.to_string(),
    }
}

/// Catalog with 1080p/720p video and 128/160 kbps audio.
pub fn sample_catalog(title: &str) -> MediaInfo {
    MediaInfo {
        title: title.to_string(),
        duration_seconds: Some(185),
        view_count: 1_300,
        thumbnail_url: Some("https://img.example/thumb.jpg".to_string()),
        streams: vec![
            stream(StreamKind::Video, "720p", 1_200, "mp4", "mem://video-720"),
            stream(StreamKind::Video, "1080p", 4_400, "mp4", VIDEO_URL),
            stream(StreamKind::Audio, "128kbps", 128, "m4a", "mem://audio-128"),
            stream(StreamKind::Audio, "160kbps", 160, "webm", AUDIO_URL),
        ],
    }
}

pub struct FakeCatalog {
    entries: HashMap<String, MediaInfo>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, source_ref: &str, info: MediaInfo) -> Self {
        self.entries.insert(source_ref.to_string(), info);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl CatalogProvider for FakeCatalog {
    async fn fetch(&self, source_ref: &str, _timeout: Duration) -> Result<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.entries
            .get(source_ref)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no such item: {}", source_ref)))
    }
}

/// How one fake stream behaves when opened.
#[derive(Debug, Clone)]
pub struct StreamScript {
    pub chunks: usize,
    pub chunk_size: usize,
    pub report_length: bool,
    pub delay_per_chunk: Duration,
    /// Fail with a fetch error after this many chunks were delivered.
    pub fail_after: Option<usize>,
}

impl StreamScript {
    pub fn new(chunks: usize, chunk_size: usize) -> Self {
        Self {
            chunks,
            chunk_size,
            report_length: true,
            delay_per_chunk: Duration::ZERO,
            fail_after: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay_per_chunk = delay;
        self
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    pub fn total(&self) -> u64 {
        (self.chunks * self.chunk_size) as u64
    }
}

pub struct FakeByteSource {
    scripts: HashMap<String, StreamScript>,
    fallback: Option<StreamScript>,
    opens: Arc<AtomicUsize>,
}

impl FakeByteSource {
    /// Serves `script` for every URL.
    pub fn uniform(script: StreamScript) -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: Some(script),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_stream(mut self, url: &str, script: StreamScript) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

struct FakeByteStream {
    script: StreamScript,
    delivered: usize,
}

#[async_trait]
impl ByteSource for FakeByteSource {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| AppError::StreamFetch(format!("HTTP error: 404 for {}", url)))?;
        Ok(Box::new(FakeByteStream { script, delivered: 0 }))
    }
}

#[async_trait]
impl ByteStream for FakeByteStream {
    fn total_length(&self) -> Option<u64> {
        self.script.report_length.then(|| self.script.total())
    }

    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.script.fail_after == Some(self.delivered) {
            return Err(AppError::StreamFetch("Transfer interrupted: connection reset".to_string()));
        }
        if self.delivered >= self.script.chunks {
            return Ok(None);
        }
        if !self.script.delay_per_chunk.is_zero() {
            tokio::time::sleep(self.script.delay_per_chunk).await;
        }
        self.delivered += 1;
        Ok(Some(vec![0u8; self.script.chunk_size]))
    }
}

/// Writes the concatenated inputs to the output path, or fails with a scripted exit code
/// after leaving a partial file there.
pub struct FakeMuxer {
    failure: Option<(i32, String)>,
    delay: Duration,
    requests: Arc<Mutex<Vec<MuxRequest>>>,
}

impl FakeMuxer {
    pub fn new() -> Self {
        Self {
            failure: None,
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(code: i32, message: &str) -> Self {
        Self {
            failure: Some((code, message.to_string())),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<MuxRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Muxer for FakeMuxer {
    async fn run(&self, request: &MuxRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        // Like ffmpeg, the output exists before the mux is done.
        tokio::fs::write(&request.output_path, b"partial").await?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((code, message)) = &self.failure {
            return Err(AppError::Mux {
                code: Some(*code),
                message: message.clone(),
            });
        }
        let mut output = Vec::new();
        for input in &request.inputs {
            output.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(&request.output_path, output).await?;
        Ok(())
    }
}

/// Files directly inside `dir`.
pub fn files_in(dir: &std::path::Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
