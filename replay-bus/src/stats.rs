use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::session::SessionState;

/// Counters shared between the producer side and the worker of a session.
/// Only `dropped` and `discarded` are touched by producers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frame_number: AtomicU64,
    pub dropped: AtomicU64,
    pub discarded: AtomicU64,
    pub codec_errors: AtomicU64,
    pub records_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub last_latency_us: AtomicU64,
    pub last_frame_time_us: AtomicU64,
}

impl Counters {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(counter: &AtomicU64, v: u64) {
        counter.store(v, Ordering::Relaxed);
    }
}

/// Point-in-time view of a session for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub name: String,
    pub state: SessionState,
    pub frame_number: u64,
    pub dropped_frames: u64,
    /// frames accepted while degraded and thrown away unrecorded
    pub discarded_frames: u64,
    pub codec_errors: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub queue_occupancy: usize,
    pub queue_capacity: usize,
    pub queue_ratio: f64,
    pub last_latency_ms: f64,
    pub last_frame_time_ms: f64,
    pub start_timecode: Option<String>,
}
