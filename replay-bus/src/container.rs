//! Two-file replay container.
//!
//! ```text
//! <name>.IDX  ┌──────────────────────┐
//!             │ header (48 bytes)    │
//!             ├──────────────────────┤
//!             │ offset u64 | len u64 │ ─┐
//!             │ offset u64 | len u64 │ ─┼─┐
//!             │ ...                  │  │ │
//!             └──────────────────────┘  │ │
//! <name>.MAV  ┌──────────────────────┐  │ │
//!             │ record header | jpeg │◄─┘ │
//!             │ | audio              │    │
//!             │ record header | jpeg │◄───┘
//!             │ | audio              │
//!             │ ...                  │
//!             └──────────────────────┘
//! ```
//!
//! All integers are little-endian. The data file has no separators, record
//! boundaries live only in the index. An index entry is written only after
//! its record has been fully handed to the OS, so every entry points at
//! complete data even if the process dies mid-record.

use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::{
    error::{ReplayError, Result},
    format::{FieldMode, PixelFormat, VideoFormat},
    frame::{EncodedRecord, Field},
};

pub const INDEX_MAGIC: &[u8; 4] = b"RIDX";
pub const CONTAINER_VERSION: u16 = 1;

/// Paths of the data and index files of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    pub data: PathBuf,
    pub index: PathBuf,
}

impl ContainerPaths {
    pub fn new(folder: impl AsRef<Path>, name: &str) -> Self {
        let folder = folder.as_ref();
        Self {
            data: folder.join(format!("{}.MAV", name)),
            index: folder.join(format!("{}.IDX", name)),
        }
    }
}

/// First record of the index file, written once per recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub format: VideoFormat,
    pub start: DateTime<Utc>,
    pub audio_channels: u16,
}

impl ContainerHeader {
    pub const SIZE: usize = 48;

    pub fn new(format: &VideoFormat, start: DateTime<Utc>, audio_channels: u16) -> Self {
        Self {
            version: CONTAINER_VERSION,
            format: format.clone(),
            start,
            audio_channels,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(INDEX_MAGIC);
        buf.put_u16_le(self.version);
        buf.put_u8(self.format.field_mode.as_u8());
        buf.put_u8(self.format.pixel_format.as_u8());
        buf.put_u32_le(self.format.width);
        buf.put_u32_le(self.format.height);
        buf.put_u32_le(self.format.fps_num);
        buf.put_u32_le(self.format.fps_den);
        buf.put_u32_le(self.format.audio_sample_rate);
        buf.put_u16_le(self.audio_channels);
        buf.put_u16_le(self.format.audio_channels);
        buf.put_i64_le(self.start.timestamp_micros());
        buf.put_u64_le(0);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ReplayError::Malformed(format!(
                "index header is {} bytes, expected {}",
                buf.len(),
                Self::SIZE
            )));
        }
        if &buf[..4] != INDEX_MAGIC {
            return Err(ReplayError::Malformed("bad index magic".to_string()));
        }
        buf.advance(4);
        let version = buf.get_u16_le();
        if version != CONTAINER_VERSION {
            return Err(ReplayError::Malformed(format!(
                "unsupported version {}",
                version
            )));
        }
        let field_mode = FieldMode::from_u8(buf.get_u8())
            .ok_or_else(|| ReplayError::Malformed("bad field mode".to_string()))?;
        let pixel_format = PixelFormat::from_u8(buf.get_u8())
            .ok_or_else(|| ReplayError::Malformed("bad pixel format".to_string()))?;
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let fps_num = buf.get_u32_le();
        let fps_den = buf.get_u32_le();
        let audio_sample_rate = buf.get_u32_le();
        let audio_channels = buf.get_u16_le();
        let format_audio_channels = buf.get_u16_le();
        let start = DateTime::<Utc>::from_timestamp_micros(buf.get_i64_le())
            .ok_or_else(|| ReplayError::Malformed("bad start timestamp".to_string()))?;

        Ok(Self {
            version,
            format: VideoFormat {
                width,
                height,
                fps_num,
                fps_den,
                field_mode,
                pixel_format,
                audio_sample_rate,
                audio_channels: format_audio_channels,
            },
            start,
            audio_channels,
        })
    }
}

/// Location of one record in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u64,
}

impl IndexEntry {
    pub const SIZE: usize = 16;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.length);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ReplayError::Malformed("truncated index entry".to_string()));
        }
        Ok(Self {
            offset: buf.get_u64_le(),
            length: buf.get_u64_le(),
        })
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Prefix of every record in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub field: Field,
    pub width: u32,
    pub height: u32,
    pub image_len: u32,
    pub audio_len: u32,
}

impl RecordHeader {
    pub const SIZE: usize = 20;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.field.as_u8());
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.image_len);
        buf.put_u32_le(self.audio_len);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ReplayError::Malformed("truncated record header".to_string()));
        }
        let field = Field::from_u8(buf.get_u8())
            .ok_or_else(|| ReplayError::Malformed("bad record field".to_string()))?;
        buf.advance(3);
        Ok(Self {
            field,
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
            image_len: buf.get_u32_le(),
            audio_len: buf.get_u32_le(),
        })
    }

    pub fn record_len(&self) -> u64 {
        Self::SIZE as u64 + self.image_len as u64 + self.audio_len as u64
    }
}

/// Splits one record (as addressed by an index entry) into header, image
/// payload and audio.
pub fn parse_record(record: &[u8]) -> Result<(RecordHeader, &[u8], &[u8])> {
    let header = RecordHeader::decode(record)?;
    if record.len() as u64 != header.record_len() {
        return Err(ReplayError::Malformed(format!(
            "record is {} bytes, header says {}",
            record.len(),
            header.record_len()
        )));
    }
    let body = &record[RecordHeader::SIZE..];
    let (image, audio) = body.split_at(header.image_len as usize);
    Ok((header, image, audio))
}

/// Reads the header and all entries of an index file.
pub fn read_index(path: impl AsRef<Path>) -> Result<(ContainerHeader, Vec<IndexEntry>)> {
    let mut raw = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut raw)?;
    let header = ContainerHeader::decode(&raw)?;
    let entries = raw[ContainerHeader::SIZE..]
        .chunks_exact(IndexEntry::SIZE)
        .map(IndexEntry::decode)
        .collect::<Result<Vec<_>>>()?;
    Ok((header, entries))
}

enum WriterState {
    Closed,
    Open { data: File, index: File },
}

/// Owns the data and index files of one recording. Closed → Open → Closed.
pub struct ContainerWriter {
    state: WriterState,
    offset: u64,
    sync_writes: bool,
    scratch: BytesMut,
}

impl ContainerWriter {
    pub fn new(sync_writes: bool) -> Self {
        Self {
            state: WriterState::Closed,
            offset: 0,
            sync_writes,
            scratch: BytesMut::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, WriterState::Open { .. })
    }

    /// Bytes committed to the data file so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Creates both files and writes the index header. If either file can't
    /// be created the writer stays closed and nothing is left open.
    pub fn open(&mut self, paths: &ContainerPaths, header: &ContainerHeader) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }

        let data = File::create(&paths.data).map_err(|source| ReplayError::Open {
            path: paths.data.clone(),
            source,
        })?;
        // `data` is dropped (closed) if the index can't be created
        let mut index = File::create(&paths.index).map_err(|source| ReplayError::Open {
            path: paths.index.clone(),
            source,
        })?;

        let mut buf = BytesMut::with_capacity(ContainerHeader::SIZE);
        header.encode(&mut buf);
        index.write_all(&buf)?;
        index.flush()?;

        log::debug!(
            "container opened: {} / {}",
            paths.data.display(),
            paths.index.display()
        );
        self.offset = 0;
        self.state = WriterState::Open { data, index };
        Ok(())
    }

    /// Writes one record to the data file, then its entry to the index.
    ///
    /// On any I/O error the writer closes itself: a record whose bytes may be
    /// incomplete never gets an index entry and no later record is written.
    pub fn append(&mut self, record: &EncodedRecord) -> Result<IndexEntry> {
        let (data, index) = match &mut self.state {
            WriterState::Open { data, index } => (data, index),
            WriterState::Closed => return Err(ReplayError::NotOpen),
        };

        let image_len = u32::try_from(record.payload.len())
            .map_err(|_| ReplayError::InvalidFrame("payload exceeds 4 GiB".to_string()))?;
        let audio_len = u32::try_from(record.audio.len())
            .map_err(|_| ReplayError::InvalidFrame("audio exceeds 4 GiB".to_string()))?;
        let header = RecordHeader {
            field: record.field,
            width: record.width,
            height: record.height,
            image_len,
            audio_len,
        };

        self.scratch.clear();
        self.scratch.reserve(header.record_len() as usize);
        header.encode(&mut self.scratch);
        self.scratch.put_slice(&record.payload);
        self.scratch.put_slice(&record.audio);

        let entry = IndexEntry {
            offset: self.offset,
            length: self.scratch.len() as u64,
        };
        let mut raw_entry = [0u8; IndexEntry::SIZE];
        entry.encode(&mut &mut raw_entry[..]);

        let sync_writes = self.sync_writes;
        let written = data
            .write_all(&self.scratch)
            .and_then(|_| if sync_writes { data.sync_data() } else { Ok(()) })
            .and_then(|_| index.write_all(&raw_entry));

        if let Err(e) = written {
            log::error!("container write failed at offset {}: {}", self.offset, e);
            self.state = WriterState::Closed;
            return Err(e.into());
        }

        self.offset = entry.end();
        Ok(entry)
    }

    /// Flushes and closes both files. Safe to call at any time, repeatedly.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Open {
                mut data,
                mut index,
            } => {
                data.flush()?;
                index.flush()?;
                data.sync_all()?;
                index.sync_all()?;
                log::debug!("container closed at offset {}", self.offset);
                Ok(())
            }
            WriterState::Closed => Ok(()),
        }
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("container close error: {:#?}", e);
        }
    }
}

#[cfg(test)]
#[path = "container_test.rs"]
mod container_test;
