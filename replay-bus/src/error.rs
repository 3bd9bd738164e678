use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't open {} for writing: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("container is not open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, ReplayError>;
