pub mod cache;
pub mod providers;

use std::time::Duration;

use crate::api::MediaInfo;
use crate::errors::Result;

pub use cache::{CachedProvider, MetadataCache};
pub use providers::YtDlpProvider;

/// Resolves a normalized media identifier into its title and stream catalog.
///
/// Implementations fail with `AppError::NotFound` / `AppError::Unavailable` for
/// removed or blocked content and must give up once `timeout` has elapsed.
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch(&self, source_ref: &str, timeout: Duration) -> Result<MediaInfo>;
}
