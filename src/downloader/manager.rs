//! Download scheduler.
//!
//! One task owns every [`DownloadItem`] and the pending queue. Callers talk to
//! it through [`DownloadManager`] commands, pipelines report through an mpsc
//! channel, and every change is republished as a [`DownloadEvent`]. State
//! changes go out at once; byte progress is coalesced and flushed on a tick.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, MAX_CONCURRENCY};
use crate::downloader::http_pool::{HttpByteSource, HttpPool};
use crate::downloader::pipeline::{Pipeline, PipelineEvent, PipelineEventKind, PipelineSettings, FAILURE_REASON_LEN};
use crate::downloader::{DownloadItem, DownloadRequest, DownloadState, ItemId, ItemSnapshot, MediaPreview};
use crate::errors::{AppError, Result};
use crate::metadata::{CachedProvider, YtDlpProvider};
use crate::processing::FfmpegMuxer;
use crate::utils::{ensure_output_folder, generate_download_id, truncate_display};

const EVENT_CAPACITY: usize = 1024;
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallProgress {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Mean of every item's percent, items not started counting as 0.
    pub percent: f64,
}

impl OverallProgress {
    pub fn from_items<'a>(items: impl Iterator<Item = &'a DownloadItem>) -> Self {
        let mut overall = OverallProgress::default();
        let mut percent_sum = 0.0;
        for item in items {
            overall.total += 1;
            percent_sum += item.progress_percent;
            match item.state {
                DownloadState::Completed => overall.completed += 1,
                DownloadState::Failed(_) => overall.failed += 1,
                DownloadState::Canceled => overall.canceled += 1,
                DownloadState::Queued => {}
                _ => overall.in_progress += 1,
            }
        }
        if overall.total > 0 {
            overall.percent = percent_sum / overall.total as f64;
        }
        overall
    }

    pub fn status_text(&self) -> String {
        let mut text = format!("Overall Progress: {}/{} completed", self.completed, self.total);
        if self.in_progress > 0 {
            text.push_str(&format!(", {} downloading", self.in_progress));
        }
        if self.failed > 0 {
            text.push_str(&format!(", {} failed", self.failed));
        }
        text
    }
}

/// Tally reported once every item of a run is terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Item(ItemSnapshot),
    Overall(OverallProgress),
    RunFinished(RunSummary),
}

enum Command {
    Submit {
        requests: Vec<DownloadRequest>,
        reply: oneshot::Sender<Vec<ItemId>>,
    },
    SetConcurrency(usize),
    Cancel {
        item_id: ItemId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll,
    Items(oneshot::Sender<Vec<ItemSnapshot>>),
    WaitForIdle(oneshot::Sender<RunSummary>),
}

/// Handle to the scheduler task. Cheap to clone; the task stops once every handle is dropped.
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<DownloadEvent>,
    overall: watch::Receiver<OverallProgress>,
    pipeline: Pipeline,
}

impl DownloadManager {
    pub fn new(pipeline: Pipeline, concurrency: usize) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (overall_tx, overall) = watch::channel(OverallProgress::default());
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler {
            items: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            dirty: HashSet::new(),
            capacity: clamp_concurrency(concurrency),
            root: CancellationToken::new(),
            pipeline: pipeline.clone(),
            pipeline_tx,
            events: events.clone(),
            overall: overall_tx,
            run_items: Vec::new(),
            last_summary: RunSummary::default(),
            idle_waiters: Vec::new(),
        };
        tokio::spawn(scheduler.run(command_rx, pipeline_rx));

        Self {
            commands,
            events,
            overall,
            pipeline,
        }
    }

    /// Production wiring: yt-dlp catalog (cached), HTTP byte source and ffmpeg.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = HttpPool::new(
            config.concurrency() * 2,
            HTTP_CONNECT_TIMEOUT,
            config.proxy.as_deref(),
        )?;
        let catalog = CachedProvider::new(YtDlpProvider::new(&config.ytdlp_path), config.catalog_cache_ttl());
        let pipeline = Pipeline::new(
            Arc::new(catalog),
            Arc::new(HttpByteSource::new(Arc::new(pool), config.chunk_size)),
            Arc::new(FfmpegMuxer::new(&config.ffmpeg_path)),
            PipelineSettings {
                temp_dir: config.temp_dir.clone(),
                output_dir: config.output_dir.clone(),
                metadata_timeout: config.metadata_timeout(),
            },
        );
        Ok(Self::new(pipeline, config.concurrency()))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| AppError::SchedulerStopped)
    }

    /// Queues requests in order and returns their ids.
    pub async fn submit(&self, requests: Vec<DownloadRequest>) -> Result<Vec<ItemId>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { requests, reply })?;
        rx.await.map_err(|_| AppError::SchedulerStopped)
    }

    /// Applies to items admitted from now on; running items are left alone.
    pub fn set_concurrency(&self, n: usize) -> Result<()> {
        self.send(Command::SetConcurrency(n))
    }

    pub fn cancel_all(&self) -> Result<()> {
        self.send(Command::CancelAll)
    }

    /// Returns false when the item is unknown or already terminal.
    pub async fn cancel(&self, item_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel {
            item_id: item_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| AppError::SchedulerStopped)
    }

    pub fn observe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    pub fn overall(&self) -> OverallProgress {
        self.overall.borrow().clone()
    }

    /// Snapshots of every item in submission order.
    pub async fn items(&self) -> Result<Vec<ItemSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Items(reply))?;
        rx.await.map_err(|_| AppError::SchedulerStopped)
    }

    pub async fn item(&self, item_id: &str) -> Result<Option<ItemSnapshot>> {
        Ok(self.items().await?.into_iter().find(|s| s.id == item_id))
    }

    /// Resolves once every submitted item is terminal.
    pub async fn wait_for_idle(&self) -> Result<RunSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::WaitForIdle(reply))?;
        rx.await.map_err(|_| AppError::SchedulerStopped)
    }

    pub async fn preview(&self, source_ref: &str) -> Result<MediaPreview> {
        let info = self.pipeline.fetch_catalog(source_ref).await?;
        Ok(MediaPreview::from_info(&info))
    }

    /// One item through a dedicated scheduler with a single slot.
    pub async fn download_single(pipeline: Pipeline, request: DownloadRequest) -> Result<ItemSnapshot> {
        let manager = DownloadManager::new(pipeline, 1);
        let item_id = manager
            .submit(vec![request])
            .await?
            .pop()
            .ok_or(AppError::SchedulerStopped)?;
        manager.wait_for_idle().await?;
        manager
            .item(&item_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("Unknown item {}", item_id)))
    }
}

fn clamp_concurrency(n: usize) -> usize {
    n.clamp(1, MAX_CONCURRENCY)
}

struct Scheduler {
    items: HashMap<ItemId, DownloadItem>,
    order: Vec<ItemId>,
    pending: VecDeque<ItemId>,
    /// Items holding a slot, with their cancellation tokens.
    active: HashMap<ItemId, CancellationToken>,
    /// Items with progress not yet republished.
    dirty: HashSet<ItemId>,
    capacity: usize,
    root: CancellationToken,
    pipeline: Pipeline,
    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
    events: broadcast::Sender<DownloadEvent>,
    overall: watch::Sender<OverallProgress>,
    run_items: Vec<ItemId>,
    last_summary: RunSummary,
    idle_waiters: Vec<oneshot::Sender<RunSummary>>,
}

impl Scheduler {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut pipeline_events: mpsc::UnboundedReceiver<PipelineEvent>,
    ) {
        info!("🚀 [SCHEDULER] Started with {} slot(s)", self.capacity);
        let mut flush = tokio::time::interval(PROGRESS_FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = pipeline_events.recv() => self.apply(event),
                _ = flush.tick(), if !self.dirty.is_empty() => self.flush_progress(),
            }
        }
        self.root.cancel();
        info!("🛑 [SCHEDULER] Stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { requests, reply } => {
                let ids = self.submit(requests).await;
                let _ = reply.send(ids);
            }
            Command::SetConcurrency(n) => {
                self.capacity = clamp_concurrency(n);
                info!("⚙️ [SCHEDULER] Concurrency set to {}", self.capacity);
                self.admit();
            }
            Command::Cancel { item_id, reply } => {
                let _ = reply.send(self.cancel(&item_id));
            }
            Command::CancelAll => self.cancel_all(),
            Command::Items(reply) => {
                let snapshots = self
                    .order
                    .iter()
                    .filter_map(|id| self.items.get(id))
                    .map(DownloadItem::snapshot)
                    .collect();
                let _ = reply.send(snapshots);
            }
            Command::WaitForIdle(reply) => {
                if self.run_items.is_empty() {
                    let _ = reply.send(self.last_summary.clone());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
        }
    }

    async fn submit(&mut self, requests: Vec<DownloadRequest>) -> Vec<ItemId> {
        if requests.is_empty() {
            return Vec::new();
        }
        // The folder is checked once, before the first item of a run is admitted.
        let folder_error = if self.run_items.is_empty() {
            ensure_output_folder(&self.pipeline.settings().output_dir).await.err()
        } else {
            None
        };

        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            let id = generate_download_id();
            let mut item = DownloadItem::new(id.clone(), request);
            if let Some(e) = &folder_error {
                item.state = DownloadState::Failed(truncate_display(&e.to_string(), FAILURE_REASON_LEN));
                item.completed_at = Some(chrono::Utc::now());
            } else {
                self.pending.push_back(id.clone());
            }
            self.items.insert(id.clone(), item);
            self.order.push(id.clone());
            self.run_items.push(id.clone());
            self.publish_item(&id);
            ids.push(id);
        }

        match &folder_error {
            Some(e) => warn!("📁 [SCHEDULER] Refusing {} item(s): {}", ids.len(), e),
            None => info!("📥 [SCHEDULER] Queued {} item(s), {} pending", ids.len(), self.pending.len()),
        }
        self.publish_overall();
        self.admit();
        self.finish_run_if_idle();
        ids
    }

    fn admit(&mut self) {
        while self.active.len() < self.capacity {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            let Some(item) = self.items.get_mut(&id) else {
                continue;
            };
            if item.state.is_terminal() {
                continue;
            }

            let token = self.root.child_token();
            self.active.insert(id.clone(), token.clone());
            item.started_at = Some(chrono::Utc::now());
            let request = DownloadRequest::new(
                item.source_ref.clone(),
                item.requested_format,
                item.requested_quality.clone(),
            );
            info!(
                "🎫 [SCHEDULER] Admitted {} ({} of {} slots busy)",
                id,
                self.active.len(),
                self.capacity
            );

            let pipeline = self.pipeline.clone();
            let tx = self.pipeline_tx.clone();
            tokio::spawn(async move {
                pipeline.run(&id, &request, &token, &tx).await;
            });
        }
    }

    fn apply(&mut self, event: PipelineEvent) {
        let id = event.item_id;
        let Some(item) = self.items.get_mut(&id) else {
            return;
        };
        if item.state.is_terminal() && !matches!(event.kind, PipelineEventKind::Finished(_)) {
            return;
        }

        match event.kind {
            PipelineEventKind::State(state) => item.state = state,
            PipelineEventKind::Catalog(catalog) => item.catalog = Some(catalog),
            PipelineEventKind::Progress { percent, transfer } => {
                item.progress_percent = item.progress_percent.max(percent.clamp(0.0, 100.0));
                item.transfer = transfer;
                self.dirty.insert(id);
                return;
            }
            PipelineEventKind::Output(path) => item.output_path = Some(path),
            PipelineEventKind::Finished(state) => {
                self.active.remove(&id);
                self.dirty.remove(&id);
                item.progress_percent = if state == DownloadState::Completed { 100.0 } else { 0.0 };
                item.state = state;
                item.transfer = None;
                item.completed_at = Some(chrono::Utc::now());
                debug!("🔓 [SCHEDULER] Released slot of {}", id);

                self.publish_item(&id);
                self.publish_overall();
                self.admit();
                self.finish_run_if_idle();
                return;
            }
        }
        self.dirty.remove(&id);
        self.publish_item(&id);
        self.publish_overall();
    }

    fn flush_progress(&mut self) {
        let dirty: Vec<ItemId> = self.dirty.drain().collect();
        for id in &dirty {
            self.publish_item(id);
        }
        self.publish_overall();
    }

    fn cancel(&mut self, item_id: &str) -> bool {
        if let Some(token) = self.active.get(item_id) {
            info!("⏹️ [SCHEDULER] Cancelling running item {}", item_id);
            token.cancel();
            return true;
        }
        let Some(position) = self.pending.iter().position(|id| id == item_id) else {
            return false;
        };
        self.pending.remove(position);
        self.mark_canceled(item_id);
        self.publish_overall();
        self.finish_run_if_idle();
        true
    }

    fn cancel_all(&mut self) {
        info!(
            "⏹️ [SCHEDULER] Cancelling everything: {} running, {} pending",
            self.active.len(),
            self.pending.len()
        );
        self.root.cancel();
        self.root = CancellationToken::new();
        let pending: Vec<ItemId> = self.pending.drain(..).collect();
        for id in &pending {
            self.mark_canceled(id);
        }
        self.publish_overall();
        self.finish_run_if_idle();
    }

    fn mark_canceled(&mut self, item_id: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.state = DownloadState::Canceled;
            item.progress_percent = 0.0;
            item.completed_at = Some(chrono::Utc::now());
        }
        self.publish_item(item_id);
    }

    fn finish_run_if_idle(&mut self) {
        if self.run_items.is_empty() {
            return;
        }
        let mut summary = RunSummary::default();
        for id in &self.run_items {
            match self.items.get(id).map(|item| &item.state) {
                Some(DownloadState::Completed) => summary.completed += 1,
                Some(DownloadState::Failed(_)) => summary.failed += 1,
                Some(DownloadState::Canceled) => summary.canceled += 1,
                Some(_) => return,
                None => {}
            }
            summary.total += 1;
        }

        info!(
            "🏁 [SCHEDULER] Run finished: {} completed, {} failed, {} canceled of {}",
            summary.completed, summary.failed, summary.canceled, summary.total
        );
        self.run_items.clear();
        self.last_summary = summary.clone();
        let _ = self.events.send(DownloadEvent::RunFinished(summary.clone()));
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(summary.clone());
        }
    }

    fn publish_item(&self, item_id: &str) {
        if let Some(item) = self.items.get(item_id) {
            // No subscribers is fine.
            let _ = self.events.send(DownloadEvent::Item(item.snapshot()));
        }
    }

    fn publish_overall(&self) {
        let overall = OverallProgress::from_items(self.order.iter().filter_map(|id| self.items.get(id)));
        self.overall.send_replace(overall.clone());
        let _ = self.events.send(DownloadEvent::Overall(overall));
    }
}
