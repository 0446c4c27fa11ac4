mod progress;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use media_downloader::processing::FfmpegMuxer;
use media_downloader::{
    AppConfig, DownloadEvent, DownloadManager, DownloadRequest, DownloadState, RequestedFormat, RequestedQuality,
    RunSummary,
};

use crate::progress::ProgressRenderer;

#[derive(Parser)]
#[command(name = "media-downloader", version, about = "Download media as video or audio files")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more items
    Download {
        #[arg(required = true)]
        sources: Vec<String>,

        /// mp4, mp3, wav, aac or flac (defaults to the last used format)
        #[arg(short, long)]
        format: Option<String>,

        /// "best", a label such as "720p", or a bitrate such as "192kbps"
        #[arg(short, long)]
        quality: Option<String>,

        /// Items downloaded at the same time
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show title, duration and the available qualities of an item
    Preview { source: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    if let Err(e) = run(cli.command).await {
        error!("❌ {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => {
            info!("✅ Configuration loaded");
            config
        }
        Err(e) => {
            warn!("⚠️ Failed to load configuration, using defaults: {}", e);
            AppConfig::default()
        }
    };

    match command {
        Commands::Download {
            sources,
            format,
            quality,
            concurrency,
            output,
        } => download(config, sources, format, quality, concurrency, output).await,
        Commands::Preview { source } => preview(config, &source).await,
    }
}

async fn preview(config: AppConfig, source: &str) -> anyhow::Result<()> {
    let manager = DownloadManager::from_config(&config)?;
    let preview = manager
        .preview(source)
        .await
        .with_context(|| format!("Could not load {}", source))?;

    println!("{}", preview.title);
    println!("  Duration: {}", preview.duration);
    println!("  Views:    {}", preview.views);
    if let Some(thumbnail) = &preview.thumbnail_url {
        println!("  Thumbnail: {}", thumbnail);
    }
    println!("  Video:    {}", preview.video_qualities.join(", "));
    let audio: Vec<String> = preview
        .audio_bitrates_kbps
        .iter()
        .map(|kbps| format!("{} kbps", kbps))
        .collect();
    println!("  Audio:    {}", audio.join(", "));
    Ok(())
}

async fn download(
    mut config: AppConfig,
    sources: Vec<String>,
    format: Option<String>,
    quality: Option<String>,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let format: RequestedFormat = match format {
        Some(f) => f.parse()?,
        None => config.last_format,
    };
    let quality: RequestedQuality = match quality {
        Some(q) => q.parse()?,
        None => config.last_quality.clone(),
    };
    if let Some(dir) = output {
        config.output_dir = dir;
    }
    if let Some(n) = concurrency {
        config.max_concurrent_downloads = n;
    }

    if !FfmpegMuxer::new(&config.ffmpeg_path).check_available().await {
        warn!("⚠️ FFmpeg was not found at {:?}; muxing will fail", config.ffmpeg_path);
    }

    let manager = DownloadManager::from_config(&config)?;
    let mut events = manager.observe();
    let requests = sources
        .iter()
        .map(|s| DownloadRequest::new(s.as_str(), format, quality.clone()))
        .collect();
    let ids = manager.submit(requests).await?;
    info!("📥 Queued {} item(s) into {:?}", ids.len(), config.output_dir);

    let interrupt = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ Interrupted, cancelling downloads");
            let _ = interrupt.cancel_all();
        }
    });

    let mut renderer = ProgressRenderer::new();
    let summary = loop {
        match events.recv().await {
            Ok(DownloadEvent::Item(snapshot)) => renderer.update_item(&snapshot),
            Ok(DownloadEvent::Overall(overall)) => renderer.update_overall(&overall),
            Ok(DownloadEvent::RunFinished(summary)) => break summary,
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
            Err(RecvError::Closed) => bail!("Download scheduler stopped unexpectedly"),
        }
    };
    renderer.update_overall(&manager.overall());
    renderer.finish();

    for snapshot in manager.items().await? {
        match &snapshot.state {
            DownloadState::Completed => {
                if let Some(path) = &snapshot.output_path {
                    renderer.println(&format!("✅ {} -> {}", snapshot.display_title, path.display()));
                }
            }
            DownloadState::Failed(reason) => {
                renderer.println(&format!("❌ {}: {}", snapshot.display_title, reason));
            }
            _ => {}
        }
    }
    print_summary(&summary);

    config.last_format = format;
    config.last_quality = quality;
    if let Err(e) = config.save() {
        warn!("⚠️ Could not save preferences: {}", e);
    }

    if summary.failed > 0 {
        bail!("{} of {} download(s) failed", summary.failed, summary.total);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Finished: {} completed, {} failed, {} canceled ({} total)",
        summary.completed, summary.failed, summary.canceled, summary.total
    );
}
