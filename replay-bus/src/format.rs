use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

use crate::error::ReplayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMode {
    Progressive,
    /// Interlaced, upper (even-row) field first
    Upper,
    /// Interlaced, lower (odd-row) field first
    Lower,
}

impl FieldMode {
    pub fn is_interlaced(&self) -> bool {
        !matches!(self, FieldMode::Progressive)
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            FieldMode::Progressive => 0,
            FieldMode::Upper => 1,
            FieldMode::Lower => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FieldMode::Progressive),
            1 => Some(FieldMode::Upper),
            2 => Some(FieldMode::Lower),
            _ => None,
        }
    }
}

/// Byte order of a packed pixel. The channel mixer hands out BGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn stride(&self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            PixelFormat::Rgb => 0,
            PixelFormat::Bgr => 1,
            PixelFormat::Rgba => 2,
            PixelFormat::Bgra => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PixelFormat::Rgb),
            1 => Some(PixelFormat::Bgr),
            2 => Some(PixelFormat::Rgba),
            3 => Some(PixelFormat::Bgra),
            _ => None,
        }
    }
}

/// Video/audio format of the channel feeding a session. Fixed for the
/// lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub field_mode: FieldMode,
    pub pixel_format: PixelFormat,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl VideoFormat {
    pub fn pal() -> Self {
        Self {
            width: 720,
            height: 576,
            fps_num: 25,
            fps_den: 1,
            field_mode: FieldMode::Upper,
            pixel_format: PixelFormat::Bgra,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }

    pub fn ntsc() -> Self {
        Self {
            width: 720,
            height: 486,
            fps_num: 30000,
            fps_den: 1001,
            field_mode: FieldMode::Lower,
            pixel_format: PixelFormat::Bgra,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }

    pub fn hd720p50() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps_num: 50,
            fps_den: 1,
            field_mode: FieldMode::Progressive,
            pixel_format: PixelFormat::Bgra,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }

    pub fn fps(&self) -> f64 {
        if self.fps_den == 0 {
            return 0.0;
        }
        self.fps_num as f64 / self.fps_den as f64
    }

    pub fn stride(&self) -> usize {
        self.pixel_format.stride()
    }

    /// Size in bytes of one full packed image.
    pub fn image_size(&self) -> usize {
        self.width as usize * self.height as usize * self.stride()
    }
}

impl Display for VideoFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{}x{}@{:.2} {:?} {:?}",
            self.width,
            self.height,
            self.fps(),
            self.field_mode,
            self.pixel_format
        )
    }
}

/// Chroma subsampling applied by the JPEG codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ChromaSubsampling {
    Y444,
    #[default]
    Y422,
    Y420,
    Y411,
}

impl FromStr for ChromaSubsampling {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "444" => Ok(ChromaSubsampling::Y444),
            "422" => Ok(ChromaSubsampling::Y422),
            "420" => Ok(ChromaSubsampling::Y420),
            "411" => Ok(ChromaSubsampling::Y411),
            other => Err(ReplayError::InvalidParameter(format!(
                "unknown subsampling: {}",
                other
            ))),
        }
    }
}

impl Display for ChromaSubsampling {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        let s = match self {
            ChromaSubsampling::Y444 => "4:4:4",
            ChromaSubsampling::Y422 => "4:2:2",
            ChromaSubsampling::Y420 => "4:2:0",
            ChromaSubsampling::Y411 => "4:1:1",
        };
        f.write_str(s)
    }
}
