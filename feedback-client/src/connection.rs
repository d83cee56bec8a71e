//! Connection driver: owns the socket halves and runs the receive loop and heartbeat for one
//! connection epoch at a time. State transitions themselves live in `feedback_core::Session`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use feedback_core::{
    ConnectionState, Message, PendingQueue, Reassembler, ReconnectPolicy, Session, Teardown,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::download::{self, FileSink};
use crate::error::ClientError;
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::settings::SettingsStore;
use crate::transport::{self, WriteError};

/// Timeouts and intervals for one client.
#[derive(Debug, Clone)]
pub struct Timing {
    pub heartbeat_interval: Duration,
    pub register_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Registration reply handed from the receive loop to `connect`. The receive loop waits
/// until `resume` is dropped so the reply is announced before any later frame.
struct RegisterAck {
    message: Message,
    resume: oneshot::Sender<()>,
}

/// Tears the handshake of `epoch` down when `connect` is dropped before it finishes.
struct HandshakeGuard<'a> {
    inner: &'a Inner,
    epoch: u64,
    armed: bool,
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || self.inner.release(self.epoch) == Teardown::Stale {
            return;
        }
        // A writer still locked by an aborting send is replaced on the next connect.
        if let Ok(mut slot) = self.inner.writer.try_lock() {
            if matches!(slot.as_ref(), Some((e, _)) if *e == self.epoch) {
                slot.take();
            }
        }
        debug!(epoch = self.epoch, "Connect abandoned");
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct Inner {
    pub(crate) session: Mutex<Session>,
    writer: tokio::sync::Mutex<Option<(u64, OwnedWriteHalf)>>,
    shutdown: Mutex<Option<(u64, watch::Sender<bool>)>>,
    register_waiter: Mutex<Option<(u64, oneshot::Sender<RegisterAck>)>>,
    pub(crate) pending: Mutex<PendingQueue>,
    drain_lock: tokio::sync::Mutex<()>,
    pub(crate) reassembler: Mutex<Reassembler>,
    connect_lock: tokio::sync::Mutex<()>,
    pub(crate) reconnect: Mutex<ReconnectPolicy>,
    pub(crate) events: EventSender,
    pub(crate) sink: Arc<dyn FileSink>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) http: reqwest::Client,
    timing: Timing,
}

impl Inner {
    pub(crate) fn new(
        session: Session,
        timing: Timing,
        reconnect: ReconnectPolicy,
        events: EventSender,
        settings: Arc<dyn SettingsStore>,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            writer: tokio::sync::Mutex::new(None),
            shutdown: Mutex::new(None),
            register_waiter: Mutex::new(None),
            pending: Mutex::new(PendingQueue::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            reassembler: Mutex::new(Reassembler::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            reconnect: Mutex::new(reconnect),
            events,
            sink,
            settings,
            http: reqwest::Client::new(),
            timing,
        }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        emit_event(&self.events, event);
    }

    pub(crate) fn epoch(&self) -> u64 {
        lock(&self.session).epoch()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        lock(&self.session).state()
    }

    /// Open the socket, register, and start the background tasks. No-op when already connected.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        let (epoch, host, port, register) = {
            let mut s = lock(&self.session);
            if s.is_connected() {
                return Ok(());
            }
            let epoch = s.begin_connect()?;
            (
                epoch,
                s.server_host().to_owned(),
                s.server_port(),
                s.register_message(),
            )
        };
        let mut handshake = HandshakeGuard {
            inner: self,
            epoch,
            armed: true,
        };
        info!(%host, port, epoch, "Connecting to feedback server");

        let connecting = TcpStream::connect((host.as_str(), port));
        let stream = match tokio::time::timeout(self.timing.connect_timeout, connecting).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(self
                    .fail_connect(epoch, ClientError::Connect(e.to_string()))
                    .await)
            }
            Err(_) => {
                return Err(self
                    .fail_connect(epoch, ClientError::Connect("connect timed out".into()))
                    .await)
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.writer.lock().await = Some((epoch, writer));
        *lock(&self.shutdown) = Some((epoch, shutdown_tx));
        *lock(&self.register_waiter) = Some((epoch, ack_tx));

        if !lock(&self.session).awaiting_ack(epoch) {
            self.teardown(epoch).await;
            return Err(ClientError::Cancelled);
        }

        // Reader first, so the reply to `register` is observed.
        tokio::spawn(self.clone().receive_loop(reader, epoch, shutdown_rx.clone()));

        if let Err(e) = self.send(epoch, &register).await {
            return Err(self
                .fail_connect(epoch, ClientError::Registration(e.to_string()))
                .await);
        }

        let ack = match tokio::time::timeout(self.timing.register_timeout, ack_rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => {
                return Err(self
                    .fail_connect(
                        epoch,
                        ClientError::Registration(
                            "server closed the connection without a valid response".into(),
                        ),
                    )
                    .await)
            }
            Err(_) => {
                return Err(self
                    .fail_connect(
                        epoch,
                        ClientError::Registration("timed out waiting for server response".into()),
                    )
                    .await)
            }
        };
        let RegisterAck { message, resume } = ack;
        if !matches!(message, Message::RegisterSuccess { .. }) {
            let reason = message
                .error_text()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("unexpected response type: {}", message.kind()));
            return Err(self.fail_connect(epoch, ClientError::Rejected(reason)).await);
        }
        if !lock(&self.session).registered(epoch) {
            return Err(ClientError::Cancelled);
        }
        handshake.armed = false;

        tokio::spawn(self.clone().heartbeat_loop(epoch, shutdown_rx));
        lock(&self.reconnect).reset();
        info!(%host, port, epoch, "Registered with feedback server");
        self.emit(ClientEvent::Connected(format!("connected to {host}:{port}")));
        self.emit(ClientEvent::MessageReceived(message));
        drop(resume);
        drop(_guard);

        match self.drain_pending().await {
            Ok(0) => {}
            Ok(n) => debug!(sent = n, "Flushed pending messages"),
            Err(e) => warn!(error = %e, "Pending queue drain stopped"),
        }
        Ok(())
    }

    async fn fail_connect(&self, epoch: u64, err: ClientError) -> ClientError {
        warn!(epoch, error = %err, "Connect failed");
        self.teardown(epoch).await;
        self.emit(ClientEvent::Error(err.to_string()));
        err
    }

    /// Tear down the current connection, announcing it if it was registered.
    pub(crate) async fn disconnect(&self) {
        let epoch = self.epoch();
        if self.teardown(epoch).await == Teardown::WasConnected {
            info!(epoch, "Disconnected");
            self.emit(ClientEvent::Disconnected("disconnected".into()));
        }
    }

    /// Move `epoch` to Disconnected, stop its tasks and drop its transfers. Stale epochs are
    /// left alone. The socket itself is closed by `teardown`.
    fn release(&self, epoch: u64) -> Teardown {
        let outcome = lock(&self.session).teardown(epoch);
        if outcome == Teardown::Stale {
            return outcome;
        }
        {
            let mut shutdown = lock(&self.shutdown);
            if matches!(shutdown.as_ref(), Some((e, _)) if *e == epoch) {
                if let Some((_, tx)) = shutdown.take() {
                    let _ = tx.send(true);
                }
            }
        }
        {
            let mut waiter = lock(&self.register_waiter);
            if matches!(waiter.as_ref(), Some((e, _)) if *e == epoch) {
                waiter.take();
            }
        }
        lock(&self.reassembler).clear();
        outcome
    }

    async fn teardown(&self, epoch: u64) -> Teardown {
        let outcome = self.release(epoch);
        if outcome == Teardown::Stale {
            return outcome;
        }
        let writer = {
            let mut slot = self.writer.lock().await;
            if matches!(slot.as_ref(), Some((e, _)) if *e == epoch) {
                slot.take()
            } else {
                None
            }
        };
        if let Some((_, mut w)) = writer {
            let _ = w.shutdown().await;
        }
        outcome
    }

    /// Write one message on the connection of `epoch`. An I/O failure tears the connection down.
    pub(crate) async fn send(&self, epoch: u64, msg: &Message) -> Result<(), ClientError> {
        if !lock(&self.session).can_send(epoch, msg) {
            return Err(ClientError::NotConnected);
        }
        let mut stop = match lock(&self.shutdown).as_ref() {
            Some((e, tx)) if *e == epoch => tx.subscribe(),
            _ => return Err(ClientError::NotConnected),
        };
        // The write gives way to teardown so a peer that stops reading cannot hold the writer.
        let result = {
            let mut slot = self.writer.lock().await;
            match slot.as_mut() {
                Some((e, w)) if *e == epoch => tokio::select! {
                    r = transport::write_frame(w, msg) => r,
                    _ = stop.changed() => return Err(ClientError::NotConnected),
                },
                _ => return Err(ClientError::NotConnected),
            }
        };
        match result {
            Ok(()) => {
                debug!(kind = msg.kind(), "Sent frame");
                Ok(())
            }
            Err(WriteError::Encode(e)) => Err(e.into()),
            Err(WriteError::Io(e)) => {
                warn!(kind = msg.kind(), error = %e, "Send failed");
                if self.teardown(epoch).await == Teardown::WasConnected {
                    self.emit(ClientEvent::Error(format!("failed to send message: {e}")));
                    self.emit(ClientEvent::Disconnected("connection lost".into()));
                }
                Err(ClientError::Send(e))
            }
        }
    }

    /// Send queued text from the head while connected. Stops at the first failure, leaving
    /// that entry at the head. Concurrent drains are serialized.
    pub(crate) async fn drain_pending(&self) -> Result<usize, ClientError> {
        let _guard = self.drain_lock.lock().await;
        let mut sent = 0;
        loop {
            let epoch = {
                let s = lock(&self.session);
                if !s.is_connected() {
                    break;
                }
                s.epoch()
            };
            let Some(head) = lock(&self.pending).front().map(str::to_owned) else {
                break;
            };
            self.send(epoch, &Message::Message { content: head }).await?;
            lock(&self.pending).pop_front();
            sent += 1;
        }
        Ok(sent)
    }

    async fn heartbeat_loop(self: Arc<Self>, epoch: u64, mut shutdown: watch::Receiver<bool>) {
        let interval = self.timing.heartbeat_interval;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if !lock(&self.session).can_send(epoch, &Message::Ping) {
                break;
            }
            if let Err(e) = self.send(epoch, &Message::Ping).await {
                debug!(epoch, error = %e, "Heartbeat stopped");
                break;
            }
        }
        debug!(epoch, "Heartbeat exited");
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        epoch: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let reason = loop {
            let result = tokio::select! {
                _ = shutdown.changed() => break None,
                r = transport::read_frame(&mut reader) => r,
            };
            match result {
                Ok(Message::Pong) => {}
                Ok(msg) => {
                    debug!(kind = msg.kind(), "Received frame");
                    self.dispatch(epoch, msg).await;
                }
                Err(e) if !e.is_fatal() => warn!(error = %e, "Skipping unusable frame"),
                Err(e) if e.is_closed() => break Some((false, "connection closed by server".to_owned())),
                Err(e) => {
                    error!(epoch, error = %e, "Protocol error, dropping connection");
                    break Some((true, format!("protocol error: {e}")));
                }
            }
        };
        if let Some((corrupt, reason)) = reason {
            if self.teardown(epoch).await == Teardown::WasConnected {
                info!(epoch, %reason, "Connection lost");
                if corrupt {
                    self.emit(ClientEvent::Error(reason.clone()));
                }
                self.emit(ClientEvent::Disconnected(reason));
            }
        }
        debug!(epoch, "Receive loop exited");
    }

    /// Close the write side under the client, so the next write fails.
    #[cfg(test)]
    pub(crate) async fn shut_write_half(&self) {
        if let Some((_, w)) = self.writer.lock().await.as_mut() {
            let _ = w.shutdown().await;
        }
    }

    fn take_register_waiter(&self, epoch: u64) -> Option<oneshot::Sender<RegisterAck>> {
        let mut waiter = lock(&self.register_waiter);
        match waiter.take() {
            Some((e, tx)) if e == epoch => Some(tx),
            other => {
                *waiter = other;
                None
            }
        }
    }

    async fn dispatch(&self, epoch: u64, msg: Message) {
        // The first reply while registering answers the handshake, whatever its kind.
        if let Some(tx) = self.take_register_waiter(epoch) {
            let (resume, resumed) = oneshot::channel();
            if tx.send(RegisterAck { message: msg, resume }).is_ok() {
                let _ = resumed.await;
            }
            return;
        }

        match &msg {
            Message::FileDownloadStart {
                file_id,
                name,
                total_chunks,
                ..
            } => {
                let result = lock(&self.reassembler).on_start(file_id, name.clone(), *total_chunks);
                if let Err(e) = result {
                    warn!(error = %e, "Refusing file transfer");
                    self.emit(ClientEvent::Error(e.to_string()));
                }
            }
            Message::FileChunk {
                file_id,
                chunk_index,
                total_chunks,
                content,
            } => {
                let result = lock(&self.reassembler).on_chunk_base64(
                    file_id,
                    *chunk_index,
                    *total_chunks,
                    content,
                );
                match result {
                    Ok(percent) => self.emit(ClientEvent::FileProgress {
                        file_id: file_id.clone(),
                        percent,
                    }),
                    Err(e) => {
                        warn!(error = %e, "Dropping file chunk");
                        self.emit(ClientEvent::Error(e.to_string()));
                    }
                }
            }
            Message::FileDownloadComplete { file_id } => {
                let result = lock(&self.reassembler).on_complete(file_id);
                match result {
                    Ok(done) => {
                        let saved =
                            download::save_blocking(self.sink.clone(), done.name.clone(), done.bytes)
                                .await;
                        match saved {
                            Ok(path) => self.emit(ClientEvent::FileDownloadCompleted {
                                file_id: done.file_id,
                                file_name: done.name,
                                path,
                            }),
                            Err(e) => {
                                warn!(file_id = %done.file_id, error = %e, "Failed to save file");
                                self.emit(ClientEvent::Error(format!("failed to save file: {e}")));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "File transfer failed");
                        self.emit(ClientEvent::Error(e.to_string()));
                    }
                }
            }
            _ => {}
        }
        self.emit(ClientEvent::MessageReceived(msg));
    }
}
