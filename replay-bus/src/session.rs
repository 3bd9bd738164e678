//! Recording session: a lossy, bounded producer/worker pipeline.
//!
//! ```text
//! producer ──accept()──► [admission] ──► sync_channel ──► worker thread
//!                            │                               │
//!                        drop + count                 split_frame
//!                                                            │
//!                                                     FrameCodec::encode
//!                                                            │
//!                                                   ContainerWriter::append
//! ```
//!
//! `accept` never blocks. A slot is reserved on the occupancy counter before
//! the frame is queued and released by the worker once the frame has been
//! written, so queued plus in-flight frames never exceed the capacity no
//! matter how many threads call `accept`.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, AtomicUsize, Ordering},
        mpsc::{Receiver, SyncSender, TrySendError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    codec::{FrameCodec, JpegCodec},
    config::RecorderConfig,
    container::{ContainerHeader, ContainerPaths, ContainerWriter},
    error::Result,
    field::split_frame,
    format::{ChromaSubsampling, VideoFormat},
    frame::{EncodedRecord, ReplayFrame},
    stats::{Counters, SessionStats},
};

/// Log "queue full" at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, `initialize` not called yet
    Idle,
    Recording,
    /// Files could not be opened or a write failed: frames are accepted and
    /// thrown away
    Degraded,
    Stopped,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Recording => 1,
            SessionState::Degraded => 2,
            SessionState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Recording,
            2 => SessionState::Degraded,
            _ => SessionState::Stopped,
        }
    }
}

enum RecordCmd {
    Data(ReplayFrame),
    Eof,
}

struct Shared {
    name: String,
    capacity: usize,
    state: AtomicU8,
    occupancy: AtomicUsize,
    start: OnceLock<DateTime<Utc>>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Moves to `to` only if the session is currently in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn print(&self) -> String {
        format!(
            "replay_consumer[{}.mav|{}]",
            self.name,
            Counters::get(&self.counters.frame_number)
        )
    }
}

/// Read-only view of a session, cheap to clone and safe to hand to other
/// threads (monitoring endpoints, diagnostics).
#[derive(Clone)]
pub struct SessionMonitor {
    shared: Arc<Shared>,
}

impl SessionMonitor {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Source frames processed by the worker.
    pub fn frame_number(&self) -> u64 {
        Counters::get(&self.shared.counters.frame_number)
    }

    /// Frames lost because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        Counters::get(&self.shared.counters.dropped)
    }

    /// Frames thrown away because the session was degraded.
    pub fn discarded_frames(&self) -> u64 {
        Counters::get(&self.shared.counters.discarded)
    }

    pub fn queue_occupancy(&self) -> usize {
        self.shared.occupancy.load(Ordering::Acquire)
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Age of the most recently written frame when its last record hit the
    /// container. Zero unless the session is recording.
    pub fn last_latency(&self) -> Duration {
        if self.state() != SessionState::Recording {
            return Duration::ZERO;
        }
        Duration::from_micros(Counters::get(&self.shared.counters.last_latency_us))
    }

    pub fn start_timecode(&self) -> Option<DateTime<Utc>> {
        self.shared.start.get().copied()
    }

    pub fn print(&self) -> String {
        self.shared.print()
    }

    pub fn info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("type".to_string(), "replay-consumer".to_string());
        info.insert("filename".to_string(), format!("{}.mav", self.shared.name));
        if let Some(start) = self.start_timecode() {
            info.insert(
                "start-timecode".to_string(),
                start.format("%Y%m%dT%H%M%S%.6f").to_string(),
            );
        }
        info.insert("recording-head".to_string(), self.frame_number().to_string());
        info
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        let occupancy = self.queue_occupancy();
        SessionStats {
            name: self.shared.name.clone(),
            state: self.state(),
            frame_number: Counters::get(&c.frame_number),
            dropped_frames: Counters::get(&c.dropped),
            discarded_frames: Counters::get(&c.discarded),
            codec_errors: Counters::get(&c.codec_errors),
            records_written: Counters::get(&c.records_written),
            bytes_written: Counters::get(&c.bytes_written),
            queue_occupancy: occupancy,
            queue_capacity: self.shared.capacity,
            queue_ratio: occupancy as f64 / self.shared.capacity as f64,
            last_latency_ms: self.last_latency().as_secs_f64() * 1000.0,
            last_frame_time_ms: Counters::get(&c.last_frame_time_us) as f64 / 1000.0,
            start_timecode: self.start_timecode().map(|t| t.to_rfc3339()),
        }
    }
}

/// Records the frames of one channel into one `<name>.MAV` / `<name>.IDX`
/// pair.
pub struct RecordingSession {
    config: RecorderConfig,
    codec: Arc<dyn FrameCodec>,
    monitor: SessionMonitor,
    tx: Option<SyncSender<RecordCmd>>,
    worker: Option<JoinHandle<()>>,
}

impl RecordingSession {
    /// Creates a session that compresses with [`JpegCodec`].
    pub fn new(config: RecorderConfig) -> Result<Self> {
        Self::with_codec(config, Arc::new(JpegCodec::new()))
    }

    pub fn with_codec(config: RecorderConfig, codec: Arc<dyn FrameCodec>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            capacity: config.queue_capacity,
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            occupancy: AtomicUsize::new(0),
            start: OnceLock::new(),
            counters: Counters::default(),
        });
        Ok(Self {
            config,
            codec,
            monitor: SessionMonitor { shared },
            tx: None,
            worker: None,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    /// Opens the container and starts the worker.
    ///
    /// Never fails: if the files can't be created the session goes
    /// [`SessionState::Degraded`] and keeps accepting frames without
    /// recording them.
    pub fn initialize(&mut self, format: &VideoFormat, audio_channels: u16) {
        let shared = &self.monitor.shared;
        if shared.state() != SessionState::Idle {
            log::warn!("{} already initialized", shared.print());
            return;
        }
        self.config.audio_channels = audio_channels;

        let start = Utc::now();
        let _ = shared.start.set(start);
        let paths = ContainerPaths::new(&self.config.media_folder, &self.config.name);
        let header = ContainerHeader::new(format, start, audio_channels);

        let mut writer = ContainerWriter::new(self.config.sync_writes);
        if let Err(e) = writer.open(&paths, &header) {
            log::error!("{} {}", shared.print(), e);
            shared.set_state(SessionState::Degraded);
            return;
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(self.config.queue_capacity);
        let worker = Worker {
            shared: shared.clone(),
            codec: self.codec.clone(),
            format: format.clone(),
            quality: self.config.quality,
            subsampling: self.config.subsampling,
            writer,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("replay-{}", self.config.name))
            .spawn(move || worker.run(rx));

        match spawned {
            Ok(handle) => {
                self.tx = Some(tx);
                self.worker = Some(handle);
                shared.set_state(SessionState::Recording);
                log::info!(
                    "{} recording {} to {} (quality {}, {})",
                    shared.print(),
                    format,
                    paths.data.display(),
                    self.config.quality,
                    self.config.subsampling
                );
            }
            Err(e) => {
                log::error!("{} can't start worker: {}", shared.print(), e);
                shared.set_state(SessionState::Degraded);
            }
        }
    }

    /// Hands a frame to the worker without blocking.
    ///
    /// Returns `true` whenever the session is live, including when the frame
    /// was dropped because the queue is full or discarded because the session
    /// is degraded; those outcomes only show up in the counters. Returns
    /// `false` before `initialize` and after `shutdown`.
    pub fn accept(&self, frame: ReplayFrame) -> bool {
        let shared = &self.monitor.shared;
        match shared.state() {
            SessionState::Idle | SessionState::Stopped => return false,
            SessionState::Degraded => {
                Counters::incr(&shared.counters.discarded);
                return true;
            }
            SessionState::Recording => {}
        }

        let reserved = shared
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < shared.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            self.mark_dropped();
            return true;
        }

        let Some(tx) = &self.tx else {
            shared.occupancy.fetch_sub(1, Ordering::AcqRel);
            return false;
        };
        match tx.try_send(RecordCmd::Data(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                shared.occupancy.fetch_sub(1, Ordering::AcqRel);
                self.mark_dropped();
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.occupancy.fetch_sub(1, Ordering::AcqRel);
                Counters::incr(&shared.counters.discarded);
            }
        }
        true
    }

    fn mark_dropped(&self) {
        let dropped = Counters::incr(&self.monitor.shared.counters.dropped);
        if dropped % DROP_LOG_INTERVAL == 1 {
            log::debug!(
                "{} queue full, dropped {} frames (back-pressure)",
                self.monitor.print(),
                dropped
            );
        }
    }

    /// Stops accepting frames, lets the worker write everything already
    /// queued, then closes the container.
    pub fn shutdown(&mut self) {
        let shared = &self.monitor.shared;
        if shared.state() == SessionState::Stopped {
            return;
        }
        shared.set_state(SessionState::Stopped);

        if let Some(tx) = self.tx.take() {
            // blocks only while the queue is full
            if tx.send(RecordCmd::Eof).is_err() {
                log::debug!("{} worker already gone", shared.print());
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{} worker panicked", shared.print());
            }
        }
        log::info!("{} Successfully Uninitialized.", shared.print());
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn frame_number(&self) -> u64 {
        self.monitor.frame_number()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.monitor.dropped_frames()
    }

    pub fn queue_occupancy(&self) -> usize {
        self.monitor.queue_occupancy()
    }

    pub fn last_latency(&self) -> Duration {
        self.monitor.last_latency()
    }

    pub fn print(&self) -> String {
        self.monitor.print()
    }

    pub fn info(&self) -> BTreeMap<String, String> {
        self.monitor.info()
    }

    pub fn stats(&self) -> SessionStats {
        self.monitor.stats()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the worker thread. Nothing else touches the files.
struct Worker {
    shared: Arc<Shared>,
    codec: Arc<dyn FrameCodec>,
    format: VideoFormat,
    quality: u8,
    subsampling: ChromaSubsampling,
    writer: ContainerWriter,
}

impl Worker {
    fn run(mut self, rx: Receiver<RecordCmd>) {
        log::debug!("{} worker started", self.shared.print());
        while let Ok(cmd) = rx.recv() {
            match cmd {
                RecordCmd::Data(frame) => {
                    self.process(frame);
                    self.shared.occupancy.fetch_sub(1, Ordering::AcqRel);
                }
                RecordCmd::Eof => break,
            }
        }
        if let Err(e) = self.writer.close() {
            log::error!("{} close error: {}", self.shared.print(), e);
        }
        log::debug!("{} worker finished", self.shared.print());
    }

    fn process(&mut self, frame: ReplayFrame) {
        let counters = &self.shared.counters;
        if !self.writer.is_open() {
            Counters::incr(&counters.discarded);
            return;
        }

        let timer = Instant::now();
        match split_frame(&frame, &self.format) {
            Ok(records) => {
                for record in records {
                    let payload = match self.codec.encode(
                        &record.image,
                        record.width,
                        record.height,
                        self.format.pixel_format,
                        self.quality,
                        self.subsampling,
                    ) {
                        Ok(payload) => payload,
                        Err(e) => {
                            Counters::incr(&counters.codec_errors);
                            log::error!(
                                "{} skipping {:?} record: {}",
                                self.shared.print(),
                                record.field,
                                e
                            );
                            continue;
                        }
                    };

                    let encoded = EncodedRecord::from_record(record, payload);
                    match self.writer.append(&encoded) {
                        Ok(entry) => {
                            Counters::incr(&counters.records_written);
                            Counters::add(&counters.bytes_written, entry.length);
                            log::trace!(
                                "{} {:?} record at {} ({} bytes)",
                                self.shared.print(),
                                encoded.field,
                                entry.offset,
                                entry.length
                            );
                        }
                        Err(e) => {
                            log::error!(
                                "{} write failed, recording stopped: {}",
                                self.shared.print(),
                                e
                            );
                            self.shared
                                .transition(SessionState::Recording, SessionState::Degraded);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                Counters::incr(&counters.codec_errors);
                log::error!("{} skipping frame: {}", self.shared.print(), e);
            }
        }

        Counters::incr(&counters.frame_number);
        Counters::set(
            &counters.last_frame_time_us,
            timer.elapsed().as_micros() as u64,
        );
        Counters::set(&counters.last_latency_us, frame.age().as_micros() as u64);
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
