//! Per-item pipeline: catalog fetch, stream selection, chunked downloads, mux and cleanup.
//!
//! A pipeline never touches the item itself. It reports every change as a
//! [`PipelineEvent`] and the scheduler task applies it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{MediaInfo, StreamDescriptor, StreamKind};
use crate::downloader::selector::{select_streams, StreamSelection};
use crate::downloader::{
    temp_file_path, ByteSource, DownloadRequest, DownloadState, ItemId, ThroughputEstimator, TransferStats,
};
use crate::errors::{AppError, Result};
use crate::metadata::CatalogProvider;
use crate::processing::{MuxProfile, Muxer};
use crate::utils::{sanitize_filename, truncate_display};

pub const FAILURE_REASON_LEN: usize = 80;
pub const MUXED_PERCENT: f64 = 95.0;

#[derive(Debug, Clone)]
pub enum PipelineEventKind {
    State(DownloadState),
    Catalog(MediaInfo),
    Progress {
        percent: f64,
        transfer: Option<TransferStats>,
    },
    Output(PathBuf),
    /// Terminal state, sent once temp files are gone.
    Finished(DownloadState),
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub item_id: ItemId,
    pub kind: PipelineEventKind,
}

/// Share of the overall percent given to one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub fn at(&self, bytes_so_far: u64, total: Option<u64>) -> f64 {
        match total {
            Some(total) if total > 0 => {
                let fraction = (bytes_so_far as f64 / total as f64).min(1.0);
                self.start + (self.end - self.start) * fraction
            }
            _ => self.start,
        }
    }
}

/// Video 0-60 then audio 60-90 for a two-stream item, 0-70 for audio only.
pub fn progress_ranges(selection: &StreamSelection) -> Vec<ProgressRange> {
    if selection.video.is_some() {
        vec![
            ProgressRange { start: 0.0, end: 60.0 },
            ProgressRange { start: 60.0, end: 90.0 },
        ]
    } else {
        vec![ProgressRange { start: 0.0, end: 70.0 }]
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_timeout: Duration,
}

/// `{output_dir}/{sanitized title}.{ext}`; the item id stands in for a title that sanitizes to nothing.
pub fn output_path_for(output_dir: &Path, title: &str, item_id: &str, extension: &str) -> PathBuf {
    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = item_id.to_string();
    }
    output_dir.join(format!("{}.{}", stem, extension))
}

struct Reporter<'a> {
    item_id: &'a str,
    tx: &'a mpsc::UnboundedSender<PipelineEvent>,
}

impl Reporter<'_> {
    fn send(&self, kind: PipelineEventKind) {
        // The scheduler may already be gone during shutdown.
        let _ = self.tx.send(PipelineEvent {
            item_id: self.item_id.to_string(),
            kind,
        });
    }

    fn state(&self, state: DownloadState) {
        info!("🔄 [PIPELINE] {} -> {}", self.item_id, state.label());
        self.send(PipelineEventKind::State(state));
    }

    fn progress(&self, percent: f64, transfer: Option<TransferStats>) {
        self.send(PipelineEventKind::Progress { percent, transfer });
    }
}

/// Files a run may leave behind.
#[derive(Default)]
struct Scratch {
    temp_files: Vec<PathBuf>,
    /// Final output path once muxing has started.
    muxing_into: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Pipeline {
    catalog: Arc<dyn CatalogProvider>,
    source: Arc<dyn ByteSource>,
    muxer: Arc<dyn Muxer>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        source: Arc<dyn ByteSource>,
        muxer: Arc<dyn Muxer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            source,
            muxer,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Catalog lookup bounded by the metadata timeout, whatever the provider does with it.
    pub async fn fetch_catalog(&self, source_ref: &str) -> Result<MediaInfo> {
        let limit = self.settings.metadata_timeout;
        match tokio::time::timeout(limit, self.catalog.fetch(source_ref, limit)).await {
            Ok(fetched) => fetched,
            Err(_) => {
                warn!("⏱️ [PIPELINE] Metadata lookup for {} exceeded {:?}", source_ref, limit);
                Err(AppError::Metadata(format!(
                    "Metadata lookup timed out after {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    /// Runs one item to a terminal state, emits `Finished`, and returns that state.
    pub async fn run(
        &self,
        item_id: &str,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> DownloadState {
        let reporter = Reporter { item_id, tx: events };
        let mut scratch = Scratch::default();

        let outcome = self.execute(item_id, request, cancel, &reporter, &mut scratch).await;
        if outcome.is_err() {
            // A muxer stopped midway leaves a truncated file behind.
            scratch.temp_files.extend(scratch.muxing_into.take());
        }
        self.cleanup(item_id, &scratch.temp_files).await;

        let state = match outcome {
            Ok(output) => {
                info!("✅ [PIPELINE] {} completed: {:?}", item_id, output);
                DownloadState::Completed
            }
            Err(e) if e.is_cancelled() => {
                info!("⏹️ [PIPELINE] {} canceled", item_id);
                DownloadState::Canceled
            }
            Err(e) => {
                error!("❌ [PIPELINE] {} failed ({:?}): {}", item_id, e.kind(), e);
                DownloadState::Failed(truncate_display(&e.to_string(), FAILURE_REASON_LEN))
            }
        };
        reporter.send(PipelineEventKind::Finished(state.clone()));
        state
    }

    async fn execute(
        &self,
        item_id: &str,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        reporter: &Reporter<'_>,
        scratch: &mut Scratch,
    ) -> Result<PathBuf> {
        check_cancelled(cancel)?;
        reporter.state(DownloadState::FetchingMetadata);
        let catalog = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            fetched = self.fetch_catalog(&request.source_ref) => fetched?,
        };
        let title = catalog.title.clone();
        let selection = select_streams(&catalog.streams, request.format, &request.quality);
        reporter.send(PipelineEventKind::Catalog(catalog));
        reporter.state(DownloadState::Ready);

        check_cancelled(cancel)?;
        let selection = selection.ok_or_else(|| {
            let needed = if request.format.is_video() { "video and audio" } else { "audio" };
            AppError::Metadata(format!("No {} stream available for '{}'", needed, title))
        })?;
        info!(
            "🎯 [PIPELINE] {} selected video={:?} audio={}",
            item_id,
            selection.video.as_ref().map(|v| v.quality_label.as_str()),
            selection.audio.quality_label
        );

        reporter.state(DownloadState::Downloading);
        let mut estimator = ThroughputEstimator::default();
        let ranges = progress_ranges(&selection);
        let mut inputs = Vec::new();
        for (stream, range) in selection.in_download_order().into_iter().zip(ranges.iter()) {
            check_cancelled(cancel)?;
            let path = temp_file_path(&self.settings.temp_dir, item_id, stream.kind, &stream.container);
            scratch.temp_files.push(path.clone());
            self.download_stream(item_id, stream, &path, *range, &mut estimator, cancel, reporter)
                .await?;
            inputs.push(path);
        }

        check_cancelled(cancel)?;
        let download_end = ranges.last().map_or(0.0, |r| r.end);
        reporter.state(DownloadState::Muxing);
        reporter.progress(download_end, None);

        let profile = MuxProfile::for_format(request.format);
        let output = output_path_for(&self.settings.output_dir, &title, item_id, profile.extension);
        let mux_request = profile.request(inputs, output.clone());
        info!("🎬 [PIPELINE] {} muxing into {:?}", item_id, output);
        scratch.muxing_into = Some(output.clone());
        tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            muxed = self.muxer.run(&mux_request) => muxed?,
        }

        reporter.progress(MUXED_PERCENT, None);
        reporter.send(PipelineEventKind::Output(output.clone()));
        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    async fn download_stream(
        &self,
        item_id: &str,
        stream: &StreamDescriptor,
        path: &Path,
        range: ProgressRange,
        estimator: &mut ThroughputEstimator,
        cancel: &CancellationToken,
        reporter: &Reporter<'_>,
    ) -> Result<()> {
        let mut reader = self.source.open(&stream.fetch_url).await?;
        let total = reader.total_length().or(stream.size_bytes);
        let stream_id = stream_key(item_id, stream.kind);

        let mut file = tokio::fs::File::create(path).await?;
        debug!("📄 [PIPELINE] Created temp file {:?} (total {:?} bytes)", path, total);

        let mut bytes_so_far = 0u64;
        estimator.record(&stream_id, 0, now());
        reporter.progress(range.start, Some(transfer_stats(estimator, &stream_id, stream.kind, 0, total)));

        loop {
            check_cancelled(cancel)?;
            let Some(chunk) = reader.read_chunk().await? else {
                break;
            };
            file.write_all(&chunk).await?;
            bytes_so_far += chunk.len() as u64;

            estimator.record(&stream_id, bytes_so_far, now());
            let stats = transfer_stats(estimator, &stream_id, stream.kind, bytes_so_far, total);
            reporter.progress(range.at(bytes_so_far, total), Some(stats));
        }
        file.flush().await?;

        estimator.forget(&stream_id);
        reporter.progress(range.end, None);
        debug!(
            "📥 [PIPELINE] {} {} stream done: {} bytes",
            item_id,
            stream.kind.as_str(),
            bytes_so_far
        );
        Ok(())
    }

    async fn cleanup(&self, item_id: &str, paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("🗑️ [PIPELINE] Removed temp file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("⚠️ [PIPELINE] {} could not remove {:?}: {}", item_id, path, e),
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

fn stream_key(item_id: &str, kind: StreamKind) -> String {
    format!("{}_{}", item_id, kind.as_str())
}

// Tokio's clock, so paused-time tests see deterministic speeds.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn transfer_stats(
    estimator: &ThroughputEstimator,
    stream_id: &str,
    kind: StreamKind,
    bytes_so_far: u64,
    total: Option<u64>,
) -> TransferStats {
    TransferStats {
        stream_kind: kind,
        bytes_so_far,
        total_bytes: total,
        speed_bps: estimator.speed_bytes_per_sec(stream_id),
        eta: estimator.eta(stream_id, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::test_support::*;
    use crate::downloader::{RequestedFormat, RequestedQuality};

    struct Harness {
        pipeline: Pipeline,
        temp: tempfile::TempDir,
        out: tempfile::TempDir,
    }

    fn harness(source: FakeByteSource, muxer: FakeMuxer) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new()
            .with("clip", sample_catalog("My:Video?"))
            .with("song", sample_catalog("Song  Title"));
        let pipeline = Pipeline::new(
            Arc::new(catalog),
            Arc::new(source),
            Arc::new(muxer),
            PipelineSettings {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                metadata_timeout: Duration::from_secs(30),
            },
        );
        Harness { pipeline, temp, out }
    }

    async fn run(h: &Harness, source_ref: &str, format: RequestedFormat) -> (DownloadState, Vec<PipelineEventKind>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new(source_ref, format, RequestedQuality::BestAvailable);
        let state = h.pipeline.run("item-1", &request, &CancellationToken::new(), &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.kind);
        }
        (state, events)
    }

    fn states(events: &[PipelineEventKind]) -> Vec<DownloadState> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEventKind::State(s) | PipelineEventKind::Finished(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn percents(events: &[PipelineEventKind]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEventKind::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn video_item_walks_every_stage_and_cleans_up() {
        let muxer = FakeMuxer::new();
        let requests = muxer.requests();
        let h = harness(FakeByteSource::uniform(StreamScript::new(4, 1024)), muxer);

        let (state, events) = run(&h, "clip", RequestedFormat::VideoMp4).await;
        assert_eq!(state, DownloadState::Completed);
        assert_eq!(
            states(&events),
            vec![
                DownloadState::FetchingMetadata,
                DownloadState::Ready,
                DownloadState::Downloading,
                DownloadState::Muxing,
                DownloadState::Completed,
            ]
        );

        let output = h.out.path().join("MyVideo.mp4");
        assert!(output.exists());
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 8 * 1024);
        assert!(files_in(h.temp.path()).is_empty());

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].inputs.len(), 2);
        assert!(requests[0].inputs[0].ends_with("item-1_video.mp4"));
        assert!(requests[0].inputs[1].ends_with("item-1_audio.webm"));
    }

    #[tokio::test]
    async fn progress_never_goes_backwards_across_streams() {
        let h = harness(FakeByteSource::uniform(StreamScript::new(5, 100)), FakeMuxer::new());
        let (_, events) = run(&h, "clip", RequestedFormat::VideoMp4).await;

        let percents = percents(&events);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert!(percents.contains(&60.0));
        assert_eq!(percents.last(), Some(&MUXED_PERCENT));
    }

    #[tokio::test]
    async fn audio_only_item_uses_single_range() {
        let muxer = FakeMuxer::new();
        let requests = muxer.requests();
        let h = harness(FakeByteSource::uniform(StreamScript::new(2, 10)), muxer);
        let (state, events) = run(&h, "song", RequestedFormat::AudioMp3).await;

        assert_eq!(state, DownloadState::Completed);
        let percents = percents(&events);
        assert!(percents.iter().all(|p| *p <= 70.0 || *p == MUXED_PERCENT));
        assert!(h.out.path().join("Song Title.mp3").exists());
        assert_eq!(requests.lock().unwrap()[0].inputs.len(), 1);
    }

    #[tokio::test]
    async fn missing_length_falls_back_to_descriptor_size() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut info = sample_catalog("Sized");
        for s in &mut info.streams {
            s.size_bytes = Some(400);
        }
        let pipeline = Pipeline::new(
            Arc::new(FakeCatalog::new().with("sized", info)),
            Arc::new(FakeByteSource::uniform(StreamScript::new(4, 100).without_length())),
            Arc::new(FakeMuxer::new()),
            PipelineSettings {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                metadata_timeout: Duration::from_secs(30),
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new("sized", RequestedFormat::AudioFlac, RequestedQuality::BestAvailable);
        pipeline.run("item-s", &request, &CancellationToken::new(), &tx).await;
        drop(tx);

        let mut saw_half = false;
        while let Some(event) = rx.recv().await {
            if let PipelineEventKind::Progress { percent, transfer: Some(t) } = event.kind {
                assert_eq!(t.total_bytes, Some(400));
                saw_half |= (percent - 35.0).abs() < 1e-9;
            }
        }
        assert!(saw_half);
    }

    #[tokio::test]
    async fn catalog_failure_is_a_truncated_metadata_failure() {
        let h = harness(FakeByteSource::uniform(StreamScript::new(1, 1)), FakeMuxer::new());
        let (state, events) = run(&h, "unknown-ref", RequestedFormat::VideoMp4).await;

        match state {
            DownloadState::Failed(reason) => assert!(reason.starts_with("Not found")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!states(&events).contains(&DownloadState::Downloading));
    }

    #[tokio::test]
    async fn stream_failure_removes_partial_files() {
        let source = FakeByteSource::uniform(StreamScript::new(4, 64))
            .with_stream(AUDIO_URL, StreamScript::new(4, 64).failing_after(2));
        let h = harness(source, FakeMuxer::new());
        let (state, _) = run(&h, "clip", RequestedFormat::VideoMp4).await;

        assert!(matches!(state, DownloadState::Failed(ref r) if r.contains("connection reset")));
        assert!(files_in(h.temp.path()).is_empty());
        assert!(files_in(h.out.path()).is_empty());
    }

    #[tokio::test]
    async fn mux_failure_fails_item_and_cleans_up() {
        let long = "x".repeat(200);
        let h = harness(FakeByteSource::uniform(StreamScript::new(2, 8)), FakeMuxer::failing(1, &long));
        let (state, _) = run(&h, "clip", RequestedFormat::VideoMp4).await;

        match state {
            DownloadState::Failed(reason) => {
                assert_eq!(reason.chars().count(), FAILURE_REASON_LEN + 3);
                assert!(reason.ends_with("..."));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(files_in(h.temp.path()).is_empty());
        assert!(files_in(h.out.path()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_catalog_fails_after_the_metadata_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new()
            .with("slow", sample_catalog("Slow"))
            .with_delay(Duration::from_secs(3600));
        let pipeline = Pipeline::new(
            Arc::new(catalog),
            Arc::new(FakeByteSource::uniform(StreamScript::new(1, 1))),
            Arc::new(FakeMuxer::new()),
            PipelineSettings {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                metadata_timeout: Duration::from_secs(1),
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new("slow", RequestedFormat::AudioMp3, RequestedQuality::BestAvailable);

        let started = tokio::time::Instant::now();
        let state = pipeline.run("item-t", &request, &CancellationToken::new(), &tx).await;
        let waited = started.elapsed();

        assert!(matches!(state, DownloadState::Failed(ref r) if r.contains("timed out")), "{:?}", state);
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2), "{:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_muxing_removes_the_partial_output() {
        let h = harness(
            FakeByteSource::uniform(StreamScript::new(2, 16)),
            FakeMuxer::new().with_delay(Duration::from_secs(10)),
        );
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
        let request = DownloadRequest::new("clip", RequestedFormat::VideoMp4, RequestedQuality::BestAvailable);

        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let PipelineEventKind::State(DownloadState::Muxing) = event.kind {
                    // Give the muxer time to start writing.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    trigger.cancel();
                }
            }
        });

        let state = h.pipeline.run("item-m", &request, &cancel, &tx).await;
        drop(tx);
        watcher.await.unwrap();

        assert_eq!(state, DownloadState::Canceled);
        assert!(files_in(h.temp.path()).is_empty());
        assert!(files_in(h.out.path()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_download_removes_temp_files() {
        let source = FakeByteSource::uniform(StreamScript::new(100, 32).delayed(Duration::from_millis(100)));
        let h = harness(source, FakeMuxer::new());
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
        let request = DownloadRequest::new("clip", RequestedFormat::VideoMp4, RequestedQuality::BestAvailable);

        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let PipelineEventKind::Progress { percent, .. } = event.kind {
                    if percent > 10.0 {
                        trigger.cancel();
                    }
                }
            }
        });

        let state = h.pipeline.run("item-c", &request, &cancel, &tx).await;
        drop(tx);
        watcher.await.unwrap();

        assert_eq!(state, DownloadState::Canceled);
        assert!(files_in(h.temp.path()).is_empty());
        assert!(files_in(h.out.path()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_stats_report_speed_once_samples_span_time() {
        let source = FakeByteSource::uniform(StreamScript::new(3, 1000).delayed(Duration::from_secs(1)));
        let h = harness(source, FakeMuxer::new());
        let (_, events) = run(&h, "song", RequestedFormat::AudioWav).await;

        let speeds: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEventKind::Progress { transfer: Some(t), .. } => Some(t.speed_bps),
                _ => None,
            })
            .collect();
        assert_eq!(speeds[0], None);
        let last = speeds.last().copied().flatten().unwrap();
        assert!((last - 1000.0).abs() < 1.0);
    }

    #[test]
    fn empty_titles_fall_back_to_item_id() {
        let dir = Path::new("/out");
        assert_eq!(output_path_for(dir, "???", "id-7", "mp3"), PathBuf::from("/out/id-7.mp3"));
        assert_eq!(output_path_for(dir, "My:Video?", "id-7", "mp4"), PathBuf::from("/out/MyVideo.mp4"));
    }
}
