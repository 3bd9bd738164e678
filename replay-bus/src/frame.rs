use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Which part of a source frame a stored record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Progressive,
    Upper,
    Lower,
}

impl Field {
    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Field::Progressive => 0,
            Field::Upper => 1,
            Field::Lower => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Field::Progressive),
            1 => Some(Field::Upper),
            2 => Some(Field::Lower),
            _ => None,
        }
    }
}

/// A frame handed over by the channel: packed image plus interleaved PCM.
///
/// Both buffers are reference counted, so queueing a frame never copies
/// pixel data and the caller's buffers are never written to.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    image: Bytes,
    audio: Bytes,
    created: Instant,
}

impl ReplayFrame {
    pub fn new(image: impl Into<Bytes>, audio: impl Into<Bytes>) -> Self {
        Self {
            image: image.into(),
            audio: audio.into(),
            created: Instant::now(),
        }
    }

    pub fn image(&self) -> &Bytes {
        &self.image
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    /// Time since the frame was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

impl Display for ReplayFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "ReplayFrame {{ image: {}, audio: {} }}",
            self.image.len(),
            self.audio.len()
        )
    }
}

/// One record to be stored: a full frame or a single field with its share
/// of the audio.
#[derive(Debug, Clone)]
pub struct FieldRecord {
    pub field: Field,
    pub width: u32,
    pub height: u32,
    pub image: Bytes,
    pub audio: Bytes,
}

/// A [`FieldRecord`] after compression, ready for the container.
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub field: Field,
    pub width: u32,
    pub height: u32,
    pub payload: Bytes,
    pub audio: Bytes,
}

impl EncodedRecord {
    pub fn from_record(record: FieldRecord, payload: Bytes) -> Self {
        Self {
            field: record.field,
            width: record.width,
            height: record.height,
            payload,
            audio: record.audio,
        }
    }
}
