pub mod api;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod metadata;
pub mod processing;
pub mod utils;

pub use config::AppConfig;
pub use downloader::manager::{DownloadEvent, DownloadManager, OverallProgress, RunSummary};
pub use downloader::pipeline::{Pipeline, PipelineSettings};
pub use downloader::{
    DownloadRequest, DownloadState, ItemSnapshot, MediaPreview, RequestedFormat, RequestedQuality,
};
pub use errors::{AppError, Result};
