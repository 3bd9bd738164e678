use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

use bytes::Bytes;
use replay_bus::{PixelFormat, RecordingSession, ReplayFrame, VideoFormat, ops};
use tokio_util::sync::CancellationToken;

/// 75% color bars, left to right.
const BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
    [0, 0, 0],
];

/// Synthetic channel output: color bars fading in and out of black, with
/// silent 32-bit audio.
pub(crate) struct BarsSource {
    format: VideoFormat,
    bars: Vec<u8>,
    black: Vec<u8>,
    previous: Vec<u8>,
    audio: Bytes,
    tick: u64,
}

impl BarsSource {
    pub fn new(format: &VideoFormat) -> anyhow::Result<Self> {
        let (width, height, stride) = (
            format.width as usize,
            format.height as usize,
            format.stride(),
        );
        let mut black = vec![0u8; format.image_size()];
        ops::black_frame(&mut black, width, height, stride)?;

        let mut bars = black.clone();
        let bar_width = (width / BARS.len()).max(1);
        for row in bars.chunks_exact_mut(width * stride) {
            for (x, px) in row.chunks_exact_mut(stride).enumerate() {
                let [r, g, b] = BARS[(x / bar_width).min(BARS.len() - 1)];
                match format.pixel_format {
                    PixelFormat::Rgb | PixelFormat::Rgba => px[..3].copy_from_slice(&[r, g, b]),
                    PixelFormat::Bgr | PixelFormat::Bgra => px[..3].copy_from_slice(&[b, g, r]),
                }
            }
        }

        let samples = if format.fps_num == 0 {
            0
        } else {
            format.audio_sample_rate as u64 * format.fps_den as u64 / format.fps_num as u64
        };
        let audio = Bytes::from(vec![
            0u8;
            samples as usize * format.audio_channels as usize * 4
        ]);

        Ok(Self {
            format: format.clone(),
            previous: black.clone(),
            bars,
            black,
            audio,
            tick: 0,
        })
    }

    pub fn frame_duration(&self) -> Duration {
        let fps = self.format.fps();
        if fps <= 0.0 {
            return Duration::from_millis(40);
        }
        Duration::from_secs_f64(1.0 / fps)
    }

    pub fn next_frame(&mut self) -> anyhow::Result<ReplayFrame> {
        let (width, height, stride) = (
            self.format.width as usize,
            self.format.height as usize,
            self.format.stride(),
        );
        // triangle wave over 0..=63
        let phase = (self.tick % 126) as u8;
        let level = if phase > ops::BLEND_LEVEL_MAX {
            126 - phase
        } else {
            phase
        };
        self.tick += 1;

        let mut current = vec![0u8; self.format.image_size()];
        ops::blend_images(
            &self.bars,
            &self.black,
            &mut current,
            width,
            height,
            stride,
            level,
        )?;

        let image = if self.format.field_mode.is_interlaced() {
            // the second field of each frame lags one frame behind
            let mut woven = vec![0u8; self.format.image_size()];
            ops::interlace_frames(&current, &self.previous, &mut woven, width, height, stride)?;
            woven
        } else {
            current.clone()
        };
        self.previous = current;

        Ok(ReplayFrame::new(image, self.audio.clone()))
    }
}

/// Feeds `session` at the format frame rate until `cancel` fires, then shuts
/// the session down so everything queued reaches the disk.
pub(crate) fn start_source(
    mut session: RecordingSession,
    mut source: BarsSource,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("replay-source".to_string())
        .spawn(move || {
            let interval = source.frame_duration();
            let mut deadline = Instant::now();
            while !cancel.is_cancelled() {
                match source.next_frame() {
                    Ok(frame) => {
                        if !session.accept(frame) {
                            log::warn!("{} is not accepting frames", session.print());
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("source error: {}", e);
                        break;
                    }
                }

                deadline += interval;
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                } else {
                    // fell behind, don't try to catch up
                    deadline = now;
                }
            }
            session.shutdown();
        })
}

#[cfg(test)]
mod tests {
    use replay_bus::FieldMode;

    use super::*;

    fn tiny(field_mode: FieldMode) -> VideoFormat {
        VideoFormat {
            width: 16,
            height: 4,
            fps_num: 25,
            fps_den: 1,
            field_mode,
            pixel_format: PixelFormat::Bgra,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }

    #[test]
    fn test_frame_sizes() -> anyhow::Result<()> {
        let format = tiny(FieldMode::Progressive);
        let mut source = BarsSource::new(&format)?;
        let frame = source.next_frame()?;

        assert_eq!(frame.image().len(), format.image_size());
        // 1920 samples, 2 channels, 4 bytes
        assert_eq!(frame.audio().len(), 1920 * 2 * 4);
        assert_eq!(source.frame_duration(), Duration::from_millis(40));
        Ok(())
    }

    #[test]
    fn test_first_frame_is_black() -> anyhow::Result<()> {
        let format = tiny(FieldMode::Progressive);
        let mut source = BarsSource::new(&format)?;
        let frame = source.next_frame()?;

        for px in frame.image().chunks_exact(4) {
            assert_eq!(px, &[0, 0, 0, 255]);
        }
        Ok(())
    }

    #[test]
    fn test_full_level_shows_bars() -> anyhow::Result<()> {
        let format = tiny(FieldMode::Progressive);
        let mut source = BarsSource::new(&format)?;
        for _ in 0..63 {
            source.next_frame()?;
        }
        let frame = source.next_frame()?;

        // first bar is gray, stored as BGRA
        assert_eq!(&frame.image()[..4], &[191, 191, 191, 255]);
        // second bar is yellow
        assert_eq!(&frame.image()[8..12], &[0, 191, 191, 255]);
        Ok(())
    }

    #[test]
    fn test_interlaced_fields_differ() -> anyhow::Result<()> {
        let format = tiny(FieldMode::Upper);
        let mut source = BarsSource::new(&format)?;
        for _ in 0..10 {
            source.next_frame()?;
        }
        let frame = source.next_frame()?;
        let row = 16 * 4;
        assert_ne!(&frame.image()[..row], &frame.image()[row..row * 2]);
        Ok(())
    }
}
