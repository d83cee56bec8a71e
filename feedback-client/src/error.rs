use feedback_core::{ChunkError, FrameEncodeError, SessionError};
use thiserror::Error;

use crate::download::DownloadError;
use crate::settings::SettingsError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("connect cancelled by disconnect")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("server rejected registration: {0}")]
    Rejected(String),

    #[error("failed to send message: {0}")]
    Send(std::io::Error),

    #[error(transparent)]
    Encode(#[from] FrameEncodeError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("a reconnect is already in progress")]
    ReconnectInProgress,

    #[error("gave up reconnecting after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },
}
