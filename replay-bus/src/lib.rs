//! Replay recording: frames in, JPEG fields plus audio out to a `.MAV` data
//! file and its `.IDX` index.

pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod field;
pub mod format;
pub mod frame;
pub mod ops;
pub mod session;
mod stats;

pub use codec::{FrameCodec, JpegCodec};
pub use config::RecorderConfig;
pub use error::{ReplayError, Result};
pub use format::{ChromaSubsampling, FieldMode, PixelFormat, VideoFormat};
pub use frame::{Field, ReplayFrame};
pub use session::{RecordingSession, SessionMonitor, SessionState};
pub use stats::SessionStats;
