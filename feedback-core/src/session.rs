//! Host-driven connection state: the host reports transitions, the session answers what to emit.
//!
//! Every connect attempt gets a new epoch. Background tasks carry the epoch they were started
//! with, so a stale receive loop finishing late cannot tear down a newer connection.

use crate::protocol::Message;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingRegisterAck,
    Connected,
}

/// Outcome of a teardown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Was registered; the host emits exactly one `Disconnected` event.
    WasConnected,
    /// Torn down during connect or already down; nothing to announce.
    Silent,
    /// Epoch belongs to an older connection; nothing was changed.
    Stale,
}

/// Session: identity, target server and connection state.
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    server_host: String,
    server_port: u16,
    state: ConnectionState,
    epoch: u64,
}

impl Session {
    pub fn new(username: impl Into<String>, server_host: impl Into<String>, server_port: u16) -> Self {
        Self {
            username: username.into(),
            server_host: server_host.into(),
            server_port,
            state: ConnectionState::Disconnected,
            epoch: 0,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Validate and set the username (trimmed, non-empty).
    pub fn set_username(&mut self, username: &str) -> Result<(), SessionError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        self.username = username.to_owned();
        Ok(())
    }

    /// Validate and set the server address. Port 0 is rejected.
    pub fn set_server(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(SessionError::EmptyHost);
        }
        if port == 0 {
            return Err(SessionError::InvalidPort);
        }
        self.server_host = host.to_owned();
        self.server_port = port;
        Ok(())
    }

    /// Disconnected -> Connecting. Returns the epoch of the new attempt.
    pub fn begin_connect(&mut self) -> Result<u64, SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::Busy(self.state));
        }
        if self.username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ConnectionState::Connecting;
        Ok(self.epoch)
    }

    /// Connecting -> AwaitingRegisterAck (socket open, `register` about to be written).
    pub fn awaiting_ack(&mut self, epoch: u64) -> bool {
        self.advance(epoch, ConnectionState::Connecting, ConnectionState::AwaitingRegisterAck)
    }

    /// AwaitingRegisterAck -> Connected.
    pub fn registered(&mut self, epoch: u64) -> bool {
        self.advance(epoch, ConnectionState::AwaitingRegisterAck, ConnectionState::Connected)
    }

    fn advance(&mut self, epoch: u64, from: ConnectionState, to: ConnectionState) -> bool {
        if epoch != self.epoch || self.state != from {
            return false;
        }
        self.state = to;
        true
    }

    /// Any state -> Disconnected for the given epoch.
    pub fn teardown(&mut self, epoch: u64) -> Teardown {
        if epoch != self.epoch {
            return Teardown::Stale;
        }
        let was = self.state;
        self.state = ConnectionState::Disconnected;
        if was == ConnectionState::Connected {
            Teardown::WasConnected
        } else {
            Teardown::Silent
        }
    }

    /// Whether `msg` may be written in the current state for `epoch`.
    pub fn can_send(&self, epoch: u64, msg: &Message) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match self.state {
            ConnectionState::Connected => true,
            ConnectionState::AwaitingRegisterAck => matches!(msg, Message::Register { .. }),
            ConnectionState::Connecting | ConnectionState::Disconnected => false,
        }
    }

    /// The `register` frame for this session.
    pub fn register_message(&self) -> Message {
        Message::Register {
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("server host must not be empty")]
    EmptyHost,
    #[error("port must be in 1-65535")]
    InvalidPort,
    #[error("connection is busy ({0:?})")]
    Busy(ConnectionState),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("alice", "127.0.0.1", DEFAULT_PORT)
    }

    #[test]
    fn full_lifecycle() {
        let mut s = session();
        let e = s.begin_connect().unwrap();
        assert_eq!(s.state(), ConnectionState::Connecting);
        assert!(s.awaiting_ack(e));
        assert!(s.can_send(e, &s.register_message()));
        assert!(!s.can_send(e, &Message::Ping));
        assert!(s.registered(e));
        assert!(s.is_connected());
        assert!(s.can_send(e, &Message::Ping));
        assert_eq!(s.teardown(e), Teardown::WasConnected);
        assert_eq!(s.teardown(e), Teardown::Silent);
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_handshake_is_silent() {
        let mut s = session();
        let e = s.begin_connect().unwrap();
        s.awaiting_ack(e);
        assert_eq!(s.teardown(e), Teardown::Silent);
    }

    #[test]
    fn stale_epoch_cannot_touch_new_connection() {
        let mut s = session();
        let old = s.begin_connect().unwrap();
        s.teardown(old);
        let new = s.begin_connect().unwrap();
        s.awaiting_ack(new);
        s.registered(new);
        assert_eq!(s.teardown(old), Teardown::Stale);
        assert!(s.is_connected());
        assert!(!s.can_send(old, &Message::Ping));
        assert!(!s.registered(old));
    }

    #[test]
    fn begin_connect_rejects_when_busy() {
        let mut s = session();
        s.begin_connect().unwrap();
        assert_eq!(
            s.begin_connect(),
            Err(SessionError::Busy(ConnectionState::Connecting))
        );
    }

    #[test]
    fn ping_never_allowed_before_connected() {
        let mut s = session();
        assert!(!s.can_send(s.epoch(), &Message::Ping));
        let e = s.begin_connect().unwrap();
        assert!(!s.can_send(e, &Message::Ping));
        s.awaiting_ack(e);
        assert!(!s.can_send(e, &Message::Ping));
    }

    #[test]
    fn settings_validation() {
        let mut s = session();
        assert_eq!(s.set_username("   "), Err(SessionError::EmptyUsername));
        s.set_username("  bob ").unwrap();
        assert_eq!(s.username(), "bob");
        assert_eq!(s.set_server(" ", 1), Err(SessionError::EmptyHost));
        assert_eq!(s.set_server("h", 0), Err(SessionError::InvalidPort));
        s.set_server(" example.org ", 9000).unwrap();
        assert_eq!(s.server_host(), "example.org");
        assert_eq!(s.server_port(), 9000);
    }

    #[test]
    fn empty_username_cannot_connect() {
        let mut s = Session::new("", "h", 1);
        assert_eq!(s.begin_connect(), Err(SessionError::EmptyUsername));
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }
}
