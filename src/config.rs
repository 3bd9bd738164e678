use std::{path::PathBuf, sync::LazyLock};

use replay_bus::VideoFormat;

pub struct AppConfig {
    media_folder: PathBuf,
    api_addr: String,
    video_format: String,
}

impl AppConfig {
    fn from_env() -> Self {
        Self {
            media_folder: std::env::var("REPLAY_MEDIA_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            api_addr: std::env::var("REPLAY_API_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            video_format: std::env::var("REPLAY_VIDEO_FORMAT")
                .unwrap_or_else(|_| "pal".to_string()),
        }
    }

    pub fn media_folder(&self) -> &PathBuf {
        &self.media_folder
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    /// Channel format the demo source produces.
    pub fn video_format(&self) -> anyhow::Result<VideoFormat> {
        match self.video_format.to_ascii_lowercase().as_str() {
            "pal" => Ok(VideoFormat::pal()),
            "ntsc" => Ok(VideoFormat::ntsc()),
            "720p50" => Ok(VideoFormat::hd720p50()),
            other => anyhow::bail!("unknown video format: {}", other),
        }
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::from_env);
    &CONFIG
}
