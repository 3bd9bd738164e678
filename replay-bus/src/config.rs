use std::path::PathBuf;

use crate::{
    error::{ReplayError, Result},
    format::ChromaSubsampling,
};

pub const DEFAULT_NAME: &str = "REPLAY";
pub const DEFAULT_QUALITY: u8 = 90;
pub const DEFAULT_AUDIO_CHANNELS: u16 = 2;
/// Frames that may be queued or in flight before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Settings of one recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// File stem of `<name>.MAV` / `<name>.IDX`
    pub name: String,
    pub media_folder: PathBuf,
    // JPEG quality, 1..=100
    pub quality: u8,
    pub subsampling: ChromaSubsampling,
    pub audio_channels: u16,
    pub queue_capacity: usize,
    /// fsync the data file before each index entry is written
    pub sync_writes: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            media_folder: PathBuf::from("."),
            quality: DEFAULT_QUALITY,
            subsampling: ChromaSubsampling::default(),
            audio_channels: DEFAULT_AUDIO_CHANNELS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sync_writes: false,
        }
    }
}

impl RecorderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_media_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.media_folder = folder.into();
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_subsampling(mut self, subsampling: ChromaSubsampling) -> Self {
        self.subsampling = subsampling;
        self
    }

    pub fn with_audio_channels(mut self, channels: u16) -> Self {
        self.audio_channels = channels;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Parses channel command parameters:
    /// `REPLAY [name] [SUBSAMPLING 444|422|420|411] [QUALITY 1-100]`.
    ///
    /// Returns `Ok(None)` when the parameters don't address a replay
    /// recorder. Unknown subsampling values keep the default.
    pub fn from_params<S: AsRef<str>>(params: &[S]) -> Result<Option<Self>> {
        let mut params = params.iter().map(|p| p.as_ref());
        match params.next() {
            Some(first) if first.eq_ignore_ascii_case("REPLAY") => {}
            _ => return Ok(None),
        }

        let mut config = Self::default();
        if let Some(name) = params.next() {
            config.name = name.to_string();
        }

        while let Some(key) = params.next() {
            if key.eq_ignore_ascii_case("SUBSAMPLING") {
                match params.next().map(str::parse::<ChromaSubsampling>) {
                    Some(Ok(subsampling)) => config.subsampling = subsampling,
                    Some(Err(e)) => log::warn!("{}, keeping {}", e, config.subsampling),
                    None => log::warn!("SUBSAMPLING without a value"),
                }
            } else if key.eq_ignore_ascii_case("QUALITY") {
                let value = params.next().ok_or_else(|| {
                    ReplayError::InvalidParameter("QUALITY without a value".to_string())
                })?;
                config.quality = value.parse::<u8>().map_err(|_| {
                    ReplayError::InvalidParameter(format!("invalid quality: {}", value))
                })?;
            } else {
                log::debug!("ignoring replay parameter {}", key);
            }
        }

        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ReplayError::InvalidParameter(
                "file name is empty".to_string(),
            ));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ReplayError::InvalidParameter(format!(
                "quality {} out of range 1-100",
                self.quality
            )));
        }
        if self.audio_channels == 0 {
            return Err(ReplayError::InvalidParameter(
                "audio channel count is zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ReplayError::InvalidParameter(
                "queue capacity is zero".to_string(),
            ));
        }
        Ok(())
    }
}
