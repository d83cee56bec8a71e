//! Client facade: the single entry point applications hold.
//!
//! `Client` is cheap to clone; all clones drive the same connection. Everything the client
//! observes is delivered on the `EventReceiver` returned from [`Client::new`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::Engine;
use feedback_core::{ConnectionState, FileMessage, Message, ReconnectPolicy, Session};
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{lock, Inner, Timing};
use crate::download::{self, FileSink};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventReceiver};
use crate::settings::{default_username, Settings, SettingsStore};

/// Construction options. Usually built from [`Config`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timing: Timing,
    pub reconnect: ReconnectPolicy,
}

impl ClientOptions {
    pub fn from_config(c: &Config) -> Self {
        Self {
            timing: Timing {
                heartbeat_interval: c.heartbeat_interval(),
                register_timeout: c.register_timeout(),
                connect_timeout: c.connect_timeout(),
            },
            reconnect: ReconnectPolicy::new(
                std::time::Duration::from_millis(c.reconnect_base_ms),
                std::time::Duration::from_millis(c.reconnect_max_ms),
                c.max_reconnect_attempts,
            ),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Clears the in-flight flag when `reconnect` is dropped mid-attempt.
struct ReconnectGuard<'a>(&'a Mutex<ReconnectPolicy>);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        let mut policy = lock(self.0);
        if policy.in_flight() {
            policy.failed();
        }
    }
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Load persisted settings and build a disconnected client. A settings load failure is
    /// reported as an `Error` event and defaults are used; an unset username is generated
    /// and saved.
    pub fn new(
        options: ClientOptions,
        settings: Arc<dyn SettingsStore>,
        sink: Arc<dyn FileSink>,
    ) -> (Self, EventReceiver) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut loaded = match settings.load() {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                crate::events::emit_event(
                    &tx,
                    ClientEvent::Error(format!("failed to load settings: {e}")),
                );
                Settings::default()
            }
        };
        if loaded.username.trim().is_empty() {
            loaded.username = default_username();
            if let Err(e) = settings.save(&loaded) {
                warn!(error = %e, "Failed to save generated username");
                crate::events::emit_event(
                    &tx,
                    ClientEvent::Error(format!("failed to save settings: {e}")),
                );
            }
        }
        let session = Session::new(loaded.username.trim(), loaded.server_host, loaded.server_port);
        let inner = Inner::new(session, options.timing, options.reconnect, tx, settings, sink);
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Connect and register. Returns once the server acknowledged, or with the failure.
    /// Calling it while already connected is a no-op.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect().await
    }

    /// Close the connection. Idempotent; `Disconnected` is emitted only if it was connected.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Queue `text` and flush the queue if connected. Returns how many messages are still
    /// waiting afterwards. Blank text is ignored.
    pub async fn send_message(&self, text: &str) -> Result<usize, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.pending_len());
        }
        lock(&self.inner.pending).enqueue(text);
        if self.is_connected() {
            self.inner.drain_pending().await?;
        }
        Ok(self.pending_len())
    }

    /// Send a file inline (base64). Not queued: fails when disconnected.
    pub async fn send_file(&self, name: &str, bytes: &[u8]) -> Result<(), ClientError> {
        if name.trim().is_empty() {
            return Err(ClientError::InvalidArgument("file name must not be empty"));
        }
        if bytes.is_empty() {
            return Err(ClientError::InvalidArgument("file content must not be empty"));
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let msg = Message::File(FileMessage {
            name: name.to_owned(),
            size: bytes.len() as u64,
            content: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            ..FileMessage::default()
        });
        self.inner.send(self.inner.epoch(), &msg).await?;
        info!(name, size = bytes.len(), "File sent");
        Ok(())
    }

    /// Tell the server `message_id` was read. An empty id is ignored.
    pub async fn mark_message_read(&self, message_id: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if message_id.is_empty() {
            return Ok(());
        }
        let msg = Message::MarkRead {
            message_id: message_id.to_owned(),
        };
        self.inner.send(self.inner.epoch(), &msg).await
    }

    /// Ask the server for a shared file. The reply is either a chunked transfer, saved under
    /// `name` unless the server names it, or a `file_download_url` message.
    pub async fn request_file(&self, file_id: &str, name: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if file_id.is_empty() {
            return Err(ClientError::InvalidArgument("file id must not be empty"));
        }
        let name = Some(name.trim()).filter(|n| !n.is_empty()).map(str::to_owned);
        lock(&self.inner.reassembler).on_start(file_id, name, None)?;
        let msg = Message::DownloadFile {
            file_id: file_id.to_owned(),
        };
        self.inner.send(self.inner.epoch(), &msg).await
    }

    /// Fetch a file announced by `file_download_url` over HTTP and save it.
    pub async fn download_file(
        &self,
        file_id: &str,
        url: &str,
        name: &str,
    ) -> Result<PathBuf, ClientError> {
        if file_id.is_empty() {
            return Err(ClientError::InvalidArgument("file id must not be empty"));
        }
        if url.is_empty() {
            return Err(ClientError::InvalidArgument("download url must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(ClientError::InvalidArgument("file name must not be empty"));
        }
        let path =
            download::fetch_to_sink(&self.inner.http, url, name, self.inner.sink.clone()).await?;
        self.inner.emit(ClientEvent::FileDownloadCompleted {
            file_id: file_id.to_owned(),
            file_name: name.to_owned(),
            path: path.clone(),
        });
        Ok(path)
    }

    /// Reconnect with backoff until it works or the attempt budget runs out. Only one
    /// reconnect runs at a time; a second caller gets `ReconnectInProgress`.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let mut delay = {
            let mut policy = lock(&self.inner.reconnect);
            if policy.in_flight() {
                return Err(ClientError::ReconnectInProgress);
            }
            match policy.begin() {
                Some(d) => d,
                None => {
                    return Err(ClientError::ReconnectExhausted {
                        attempts: policy.attempts(),
                        last: "no attempts left".into(),
                    })
                }
            }
        };
        let _in_flight = ReconnectGuard(&self.inner.reconnect);
        loop {
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;
            match self.inner.connect().await {
                Ok(()) => {
                    lock(&self.inner.reconnect).succeeded();
                    return Ok(());
                }
                Err(e) => {
                    let mut policy = lock(&self.inner.reconnect);
                    policy.failed();
                    warn!(attempt = policy.attempts(), error = %e, "Reconnect attempt failed");
                    match policy.begin() {
                        Some(d) => delay = d,
                        None => {
                            return Err(ClientError::ReconnectExhausted {
                                attempts: policy.attempts(),
                                last: e.to_string(),
                            })
                        }
                    }
                }
            }
        }
    }

    /// Change the username used on the next connect, and persist it.
    pub fn set_username(&self, username: &str) -> Result<(), ClientError> {
        lock(&self.inner.session).set_username(username)?;
        self.persist()
    }

    /// Change the server used on the next connect, and persist it.
    pub fn set_server(&self, host: &str, port: u16) -> Result<(), ClientError> {
        lock(&self.inner.session).set_server(host, port)?;
        self.persist()
    }

    fn persist(&self) -> Result<(), ClientError> {
        let settings = {
            let s = lock(&self.inner.session);
            Settings {
                username: s.username().to_owned(),
                server_host: s.server_host().to_owned(),
                server_port: s.server_port(),
            }
        };
        self.inner.settings.save(&settings)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.session).is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn username(&self) -> String {
        lock(&self.inner.session).username().to_owned()
    }

    pub fn server_host(&self) -> String {
        lock(&self.inner.session).server_host().to_owned()
    }

    pub fn server_port(&self) -> u16 {
        lock(&self.inner.session).server_port()
    }

    /// Messages queued but not yet written.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}
