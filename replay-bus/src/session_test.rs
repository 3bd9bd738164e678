use std::sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{RecordingSession, SessionState};
use crate::codec::{FrameCodec, JpegCodec};
use crate::config::RecorderConfig;
use crate::container::{ContainerPaths, parse_record, read_index};
use crate::error::{ReplayError, Result};
use crate::format::{ChromaSubsampling, FieldMode, PixelFormat, VideoFormat};
use crate::frame::{Field, ReplayFrame};

/// Blocks every encode until the gate is opened.
#[derive(Default)]
struct GatedCodec {
    open: Mutex<bool>,
    cond: Condvar,
    calls: AtomicUsize,
}

impl GatedCodec {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl FrameCodec for GatedCodec {
    fn encode(
        &self,
        _image: &[u8],
        _width: u32,
        _height: u32,
        _pixel_format: PixelFormat,
        _quality: u8,
        _subsampling: ChromaSubsampling,
    ) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        Ok(Bytes::from_static(b"jpeg"))
    }
}

/// Fails every second call.
#[derive(Default)]
struct FlakyCodec {
    calls: AtomicUsize,
}

impl FrameCodec for FlakyCodec {
    fn encode(
        &self,
        _image: &[u8],
        _width: u32,
        _height: u32,
        _pixel_format: PixelFormat,
        _quality: u8,
        _subsampling: ChromaSubsampling,
    ) -> Result<Bytes> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(ReplayError::Codec("flaky".to_string()));
        }
        Ok(Bytes::from_static(b"ok"))
    }
}

fn small_format(field_mode: FieldMode) -> VideoFormat {
    VideoFormat {
        width: 16,
        height: 8,
        fps_num: 25,
        fps_den: 1,
        field_mode,
        pixel_format: PixelFormat::Bgra,
        audio_sample_rate: 48000,
        audio_channels: 2,
    }
}

fn frame(format: &VideoFormat, audio_len: usize) -> ReplayFrame {
    ReplayFrame::new(vec![0x40u8; format.image_size()], vec![0x02u8; audio_len])
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ------------------------------------------------------------------------
// Lifecycle Tests
// ------------------------------------------------------------------------

#[test]
fn test_accept_before_initialize() -> anyhow::Result<()> {
    let session = RecordingSession::new(RecorderConfig::new("idle"))?;
    let format = small_format(FieldMode::Progressive);

    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.accept(frame(&format, 0)));
    assert_eq!(session.dropped_frames(), 0);
    Ok(())
}

#[test]
fn test_invalid_config_rejected() {
    let config = RecorderConfig::new("bad").with_quality(0);
    assert!(RecordingSession::new(config).is_err());
}

#[test]
fn test_accept_after_shutdown() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(FieldMode::Progressive);
    let config = RecorderConfig::new("stopped").with_media_folder(dir.path());
    let mut session = RecordingSession::with_codec(config, Arc::new(FlakyCodec::default()))?;

    session.initialize(&format, 2);
    assert_eq!(session.state(), SessionState::Recording);
    session.shutdown();
    session.shutdown();

    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.accept(frame(&format, 0)));
    Ok(())
}

#[test]
fn test_print_and_info() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(FieldMode::Progressive);
    let config = RecorderConfig::new("CLIP").with_media_folder(dir.path());
    let mut session = RecordingSession::with_codec(config, Arc::new(FlakyCodec::default()))?;

    assert_eq!(session.print(), "replay_consumer[CLIP.mav|0]");
    assert!(!session.info().contains_key("start-timecode"));

    session.initialize(&format, 2);
    let info = session.info();
    assert_eq!(info["type"], "replay-consumer");
    assert_eq!(info["filename"], "CLIP.mav");
    assert_eq!(info["recording-head"], "0");
    // e.g. 20261015T093000.123456
    assert_eq!(info["start-timecode"].len(), 22);
    assert_eq!(&info["start-timecode"][8..9], "T");
    Ok(())
}

// ------------------------------------------------------------------------
// Back-pressure Tests
// ------------------------------------------------------------------------

#[test]
fn test_stalled_worker_drops_overflow() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(FieldMode::Progressive);
    let codec = Arc::new(GatedCodec::default());
    let config = RecorderConfig::new("stall")
        .with_media_folder(dir.path())
        .with_queue_capacity(32);
    let mut session = RecordingSession::with_codec(config, codec.clone())?;
    session.initialize(&format, 2);

    for _ in 0..40 {
        assert!(session.accept(frame(&format, 4)));
    }
    assert_eq!(session.dropped_frames(), 8);
    assert_eq!(session.queue_occupancy(), 32);
    assert!(session.stats().queue_ratio > 0.99);

    codec.release();
    session.shutdown();

    assert_eq!(session.frame_number(), 32);
    assert_eq!(session.queue_occupancy(), 0);
    assert_eq!(session.frame_number() + session.dropped_frames(), 40);

    let (_, entries) = read_index(ContainerPaths::new(dir.path(), "stall").index)?;
    assert_eq!(entries.len(), 32);
    Ok(())
}

#[test]
fn test_concurrent_producers_never_exceed_capacity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(FieldMode::Progressive);
    let codec = Arc::new(GatedCodec::default());
    let config = RecorderConfig::new("multi")
        .with_media_folder(dir.path())
        .with_queue_capacity(8);
    let mut session = RecordingSession::with_codec(config, codec.clone())?;
    session.initialize(&format, 2);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    session.accept(frame(&format, 0));
                }
            });
        }
    });
    assert_eq!(session.queue_occupancy(), 8);
    assert_eq!(session.dropped_frames(), 92);

    codec.release();
    session.shutdown();
    assert_eq!(session.frame_number(), 8);
    Ok(())
}

// ------------------------------------------------------------------------
// Failure Tests
// ------------------------------------------------------------------------

#[test]
fn test_codec_errors_skip_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(FieldMode::Progressive);
    let config = RecorderConfig::new("flaky").with_media_folder(dir.path());
    let mut session = RecordingSession::with_codec(config, Arc::new(FlakyCodec::default()))?;
    session.initialize(&format, 2);

    for _ in 0..6 {
        assert!(session.accept(frame(&format, 0)));
        // one at a time so the queue never overflows
        assert!(wait_until(Duration::from_secs(5), || session.queue_occupancy() == 0));
    }
    session.shutdown();

    let stats = session.stats();
    assert_eq!(stats.frame_number, 6);
    assert_eq!(stats.codec_errors, 3);
    assert_eq!(stats.records_written, 3);

    let (_, entries) = read_index(ContainerPaths::new(dir.path(), "flaky").index)?;
    assert_eq!(entries.len(), 3);
    Ok(())
}

#[test]
fn test_open_failure_degrades() -> anyhow::Result<()> {
    let format = small_format(FieldMode::Progressive);
    let config = RecorderConfig::new("lost").with_media_folder("/nonexistent/replay/folder");
    let mut session = RecordingSession::new(config)?;
    session.initialize(&format, 2);

    assert_eq!(session.state(), SessionState::Degraded);
    for _ in 0..5 {
        assert!(session.accept(frame(&format, 0)));
    }
    let stats = session.stats();
    assert_eq!(stats.dropped_frames, 0);
    assert_eq!(stats.discarded_frames, 5);
    assert_eq!(stats.frame_number, 0);
    assert_eq!(session.last_latency(), Duration::ZERO);

    session.shutdown();
    assert!(!std::path::Path::new("/nonexistent/replay/folder/lost.IDX").exists());
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_write_failure_degrades() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = ContainerPaths::new(dir.path(), "full");
    std::os::unix::fs::symlink("/dev/full", &paths.data)?;

    let format = small_format(FieldMode::Progressive);
    let config = RecorderConfig::new("full").with_media_folder(dir.path());
    let mut session = RecordingSession::with_codec(config, Arc::new(FlakyCodec::default()))?;
    session.initialize(&format, 2);
    assert_eq!(session.state(), SessionState::Recording);

    assert!(session.accept(frame(&format, 0)));
    assert!(wait_until(Duration::from_secs(5), || {
        session.state() == SessionState::Degraded
    }));
    assert!(session.accept(frame(&format, 0)));
    assert_eq!(session.stats().discarded_frames, 1);

    session.shutdown();
    let (_, entries) = read_index(&paths.index)?;
    assert!(entries.is_empty());
    Ok(())
}

// ------------------------------------------------------------------------
// Recording Tests
// ------------------------------------------------------------------------

fn record_frames(field_mode: FieldMode, frames: usize, audio_len: usize) -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let format = small_format(field_mode);
    let config = RecorderConfig::new("rec")
        .with_media_folder(dir.path())
        .with_subsampling(ChromaSubsampling::Y420)
        .with_sync_writes(true);
    let mut session = RecordingSession::with_codec(config, Arc::new(JpegCodec::new()))?;
    session.initialize(&format, 2);

    for _ in 0..frames {
        assert!(session.accept(frame(&format, audio_len)));
        assert!(wait_until(Duration::from_secs(5), || session.queue_occupancy() == 0));
    }
    assert!(session.last_latency() > Duration::ZERO);
    session.shutdown();
    assert_eq!(session.frame_number(), frames as u64);

    let paths = ContainerPaths::new(dir.path(), "rec");
    let (header, entries) = read_index(&paths.index)?;
    assert_eq!(header.format, format);
    assert_eq!(header.audio_channels, 2);

    let per_frame = if field_mode.is_interlaced() { 2 } else { 1 };
    assert_eq!(entries.len(), frames * per_frame);

    let data = std::fs::read(&paths.data)?;
    let mut offset = 0;
    for chunk in entries.chunks(per_frame) {
        let mut height = 0;
        let mut audio = 0;
        let mut fields = Vec::new();
        for entry in chunk {
            assert_eq!(entry.offset, offset);
            offset = entry.end();

            let raw = &data[entry.offset as usize..entry.end() as usize];
            let (record, image, pcm) = parse_record(raw)?;
            assert_eq!(&image[..2], &[0xFF, 0xD8]);
            height += record.height;
            audio += pcm.len();
            fields.push(record.field);
        }
        assert_eq!(height, format.height);
        assert_eq!(audio, audio_len);

        let expected = match field_mode {
            FieldMode::Progressive => vec![Field::Progressive],
            FieldMode::Upper => vec![Field::Upper, Field::Lower],
            FieldMode::Lower => vec![Field::Lower, Field::Upper],
        };
        assert_eq!(fields, expected);
    }
    assert_eq!(data.len() as u64, offset);
    Ok(())
}

#[test]
fn test_record_progressive() -> anyhow::Result<()> {
    record_frames(FieldMode::Progressive, 3, 64)
}

#[test]
fn test_record_upper_field_first() -> anyhow::Result<()> {
    record_frames(FieldMode::Upper, 3, 62)
}

#[test]
fn test_record_lower_field_first() -> anyhow::Result<()> {
    record_frames(FieldMode::Lower, 2, 31)
}
