use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

use crate::{
    error::{ReplayError, Result},
    format::{ChromaSubsampling, PixelFormat},
};

/// Still-image compressor used for every stored record.
///
/// Implementations must be deterministic for identical input and must report
/// malformed input as an error rather than returning an empty payload.
pub trait FrameCodec: Send + Sync {
    fn encode(
        &self,
        image: &[u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        quality: u8,
        subsampling: ChromaSubsampling,
    ) -> Result<Bytes>;
}

/// MJPEG codec backed by `jpeg-encoder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl JpegCodec {
    pub fn new() -> Self {
        Self
    }
}

fn sampling_factor(subsampling: ChromaSubsampling) -> SamplingFactor {
    match subsampling {
        ChromaSubsampling::Y444 => SamplingFactor::R_4_4_4,
        ChromaSubsampling::Y422 => SamplingFactor::R_4_2_2,
        ChromaSubsampling::Y420 => SamplingFactor::R_4_2_0,
        ChromaSubsampling::Y411 => SamplingFactor::R_4_1_1,
    }
}

fn color_type(pixel_format: PixelFormat) -> ColorType {
    match pixel_format {
        PixelFormat::Rgb => ColorType::Rgb,
        PixelFormat::Bgr => ColorType::Bgr,
        PixelFormat::Rgba => ColorType::Rgba,
        PixelFormat::Bgra => ColorType::Bgra,
    }
}

impl FrameCodec for JpegCodec {
    fn encode(
        &self,
        image: &[u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        quality: u8,
        subsampling: ChromaSubsampling,
    ) -> Result<Bytes> {
        if width == 0 || height == 0 {
            return Err(ReplayError::Codec(format!(
                "invalid image size {}x{}",
                width, height
            )));
        }
        let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(ReplayError::Codec(format!(
                    "image size {}x{} exceeds the JPEG limit",
                    width, height
                )));
            }
        };
        let need = width as usize * height as usize * pixel_format.stride();
        if image.len() < need {
            return Err(ReplayError::Codec(format!(
                "image buffer is {} bytes, expected {}",
                image.len(),
                need
            )));
        }
        if !(1..=100).contains(&quality) {
            return Err(ReplayError::Codec(format!("invalid quality {}", quality)));
        }

        let mut out = Vec::with_capacity(need / 8);
        let mut encoder = Encoder::new(&mut out, quality);
        encoder.set_sampling_factor(sampling_factor(subsampling));
        encoder
            .encode(&image[..need], w, h, color_type(pixel_format))
            .map_err(|e| ReplayError::Codec(e.to_string()))?;

        if out.is_empty() {
            return Err(ReplayError::Codec("encoder produced no data".to_string()));
        }
        Ok(Bytes::from(out))
    }
}
