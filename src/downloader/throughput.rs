//! Sliding-window speed and ETA estimation.
//!
//! Each active stream keeps the `(time, cumulative bytes)` samples of the last
//! window (10 s by default). Speed is derived from the oldest and newest
//! retained samples only, so a slow start stops influencing the figure once it
//! falls out of the window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::api::StreamKind;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub timestamp: Instant,
    pub cumulative_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Eta {
    Remaining(Duration),
    AlmostDone,
    Unknown,
}

/// Transfer figures attached to an item snapshot while a stream is downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    pub stream_kind: StreamKind,
    pub bytes_so_far: u64,
    pub total_bytes: Option<u64>,
    pub speed_bps: Option<f64>,
    pub eta: Eta,
}

#[derive(Debug)]
pub struct ThroughputEstimator {
    window: Duration,
    samples: HashMap<String, VecDeque<ThroughputSample>>,
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ThroughputEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: HashMap::new(),
        }
    }

    pub fn record(&mut self, stream_id: &str, bytes_so_far: u64, now: Instant) {
        let history = self.samples.entry(stream_id.to_string()).or_default();
        history.push_back(ThroughputSample {
            timestamp: now,
            cumulative_bytes: bytes_so_far,
        });

        while let Some(front) = history.front() {
            if now.saturating_duration_since(front.timestamp) > self.window {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second over the retained window; `None` until two samples span a non-zero time.
    pub fn speed_bytes_per_sec(&self, stream_id: &str) -> Option<f64> {
        let history = self.samples.get(stream_id)?;
        if history.len() < 2 {
            return None;
        }
        let oldest = history.front()?;
        let newest = history.back()?;
        let span = newest.timestamp.saturating_duration_since(oldest.timestamp);
        if span.is_zero() {
            return None;
        }
        let bytes = newest.cumulative_bytes.saturating_sub(oldest.cumulative_bytes);
        Some(bytes as f64 / span.as_secs_f64())
    }

    pub fn bytes_so_far(&self, stream_id: &str) -> Option<u64> {
        self.samples
            .get(stream_id)
            .and_then(|h| h.back())
            .map(|s| s.cumulative_bytes)
    }

    pub fn eta(&self, stream_id: &str, total_bytes: Option<u64>) -> Eta {
        let Some(total) = total_bytes else {
            return Eta::Unknown;
        };
        let done = self.bytes_so_far(stream_id).unwrap_or(0);
        if total <= done {
            return Eta::AlmostDone;
        }
        match self.speed_bytes_per_sec(stream_id) {
            Some(speed) if speed > 0.0 => {
                Eta::Remaining(Duration::from_secs_f64((total - done) as f64 / speed))
            }
            _ => Eta::Unknown,
        }
    }

    /// Drops the history of a finished stream.
    pub fn forget(&mut self, stream_id: &str) {
        self.samples.remove(stream_id);
    }

    pub fn sample_count(&self, stream_id: &str) -> usize {
        self.samples.get(stream_id).map_or(0, VecDeque::len)
    }
}
