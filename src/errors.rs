use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::io;

#[derive(Debug, thiserror::Error)]
pub enum DownloaderError {
    #[error("Could not load config")]
    LoadConfig(#[source] anyhow::Error),

    #[error("Could not read the interactive input")]
    Prompt(#[source] io::Error),
    #[error("No M3U8 URL was provided")]
    MissingUrl,

    #[error("Invalid URL: {0:?}")]
    InvalidUrl(String, #[source] url::ParseError),
    #[error("Could not fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server answered {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Could not parse the playlist")]
    PlaylistParse(#[source] anyhow::Error),
    #[error("Playlist was empty/did not contain any segments")]
    PlaylistEmpty,
    #[error("Playlist is encrypted with method {0:?}, which is not supported")]
    EncryptedPlaylist(String),
    #[error("Playlist needs the #EXT-X-MAP init segment {0:?}, which is not supported")]
    InitSegmentPlaylist(String),

    #[error("Invalid time {0:?}, expected HH:MM:SS")]
    InvalidTime(String),
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("File or Folder not found or invalid: {0:?}")]
    NotFound(PathBuf),
    #[error("Output file already exists: {0:?}")]
    OutputExists(PathBuf),

    #[error("Could not create folder: {0:?}")]
    CreateFolder(PathBuf, #[source] io::Error),
    #[error("Could not write to filesystem: {0:?}")]
    Write(PathBuf, #[source] io::Error),

    #[error("Path could not be canonicalized: {0:?}")]
    Canonicalize(PathBuf, #[source] io::Error),
    #[error("Could not convert path to string: {0:?}")]
    PathToString(PathBuf),

    #[error("{0:?} not found. Make sure ffmpeg is installed and added to your PATH")]
    ToolNotFound(String),
    #[error("Something went wrong during the ffmpeg command")]
    FfmpegCommand(#[source] io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    FfmpegFailed { status: ExitStatus, stderr: String },
}

impl DownloaderError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloaderError::Fetch { source, .. } => !source.is_builder(),
            DownloaderError::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
