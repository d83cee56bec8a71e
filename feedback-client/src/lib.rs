//! Feedback channel client: TCP transport, registration, heartbeat, pending queue and inline
//! file transfers on top of `feedback-core`.

pub mod client;
pub mod config;
mod connection;
pub mod download;
pub mod error;
pub mod events;
pub mod settings;
pub mod transport;

pub use client::{Client, ClientOptions};
pub use connection::Timing;
pub use download::{DownloadDir, FileSink};
pub use error::ClientError;
pub use events::{ClientEvent, EventReceiver};
pub use settings::{FileSettings, MemorySettings, Settings, SettingsStore};
