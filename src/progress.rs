//! Terminal rendering of scheduler events.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use media_downloader::downloader::TransferStats;
use media_downloader::utils::{format_bytes, format_eta, format_speed};
use media_downloader::{DownloadState, ItemSnapshot, OverallProgress};

pub struct ProgressRenderer {
    mp: MultiProgress,
    overall: ProgressBar,
    items: HashMap<String, ProgressBar>,
    item_style: ProgressStyle,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let overall_style = ProgressStyle::with_template("{wide_msg}\n[{elapsed_precise}] {wide_bar} {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        let item_style = ProgressStyle::with_template("{prefix:<38} {bar:30} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let overall = mp.add(ProgressBar::new(100));
        overall.set_style(overall_style);

        Self {
            mp,
            overall,
            items: HashMap::new(),
            item_style,
        }
    }

    pub fn update_overall(&self, progress: &OverallProgress) {
        self.overall.set_position(progress.percent.round() as u64);
        self.overall.set_message(progress.status_text());
    }

    pub fn update_item(&mut self, snapshot: &ItemSnapshot) {
        let bar = self.items.entry(snapshot.id.clone()).or_insert_with(|| {
            let bar = self.mp.add(ProgressBar::new(100));
            bar.set_style(self.item_style.clone());
            bar
        });
        bar.set_prefix(snapshot.display_title.clone());
        bar.set_position(snapshot.progress_percent.round() as u64);
        bar.set_message(status_line(snapshot));
        if snapshot.state.is_terminal() {
            bar.abandon();
        }
    }

    pub fn finish(&self) {
        self.overall.finish();
    }

    pub fn println(&self, line: &str) {
        let _ = self.mp.println(line);
    }
}

fn transfer_line(stats: &TransferStats) -> String {
    let size = match stats.total_bytes {
        Some(total) => format!("{} / {}", format_bytes(stats.bytes_so_far), format_bytes(total)),
        None => format_bytes(stats.bytes_so_far),
    };
    format!(
        "{} {} | {} | ETA {}",
        stats.stream_kind.as_str(),
        size,
        format_speed(stats.speed_bps),
        format_eta(&stats.eta)
    )
}

fn status_line(snapshot: &ItemSnapshot) -> String {
    match (&snapshot.state, &snapshot.transfer) {
        (DownloadState::Downloading, Some(stats)) => transfer_line(stats),
        (DownloadState::Failed(reason), _) => format!("Failed: {}", reason),
        (state, _) => state.label().to_string(),
    }
}
