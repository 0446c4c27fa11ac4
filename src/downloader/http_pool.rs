use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, ClientBuilder, Proxy};

use crate::downloader::{ByteSource, ByteStream};
use crate::errors::{AppError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP connection pool shared by all stream downloads
pub struct HttpPool {
    client: Client,
}

impl HttpPool {
    pub fn new(max_connections: usize, connect_timeout: Duration, proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = proxy_url {
            log::info!("🌐 [HTTP] Using proxy: {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// [`ByteSource`] over plain HTTP GET requests.
pub struct HttpByteSource {
    pool: Arc<HttpPool>,
    chunk_size: usize,
}

impl HttpByteSource {
    pub fn new(pool: Arc<HttpPool>, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct HttpByteStream {
    body: BodyStream,
    total_length: Option<u64>,
    chunk_size: usize,
    pending: Vec<u8>,
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::StreamFetch(format!("Invalid stream URL: {}", e)))?;

        let response = self
            .pool
            .get_client()
            .get(parsed)
            .send()
            .await
            .map_err(|e| AppError::StreamFetch(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::StreamFetch(format!("HTTP error: {}", response.status())));
        }

        let total_length = response.content_length();
        log::debug!("🌐 [HTTP] Opened stream, content length: {:?}", total_length);

        let body = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(Box::new(HttpByteStream {
            body: Box::pin(body),
            total_length,
            chunk_size: self.chunk_size,
            pending: Vec::new(),
        }))
    }
}

impl HttpByteStream {
    fn take_pending(&mut self) -> Vec<u8> {
        if self.pending.len() <= self.chunk_size {
            return std::mem::take(&mut self.pending);
        }
        let rest = self.pending.split_off(self.chunk_size);
        std::mem::replace(&mut self.pending, rest)
    }
}

#[async_trait]
impl ByteStream for HttpByteStream {
    fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pending.is_empty() {
            match self.body.next().await {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => {
                    return Err(AppError::StreamFetch(format!("Transfer interrupted: {}", e)));
                }
                None => return Ok(None),
            }
        }
        Ok(Some(self.take_pending()))
    }
}
