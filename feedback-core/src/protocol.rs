//! Feedback channel wire protocol: message types exchanged with the server.

use serde::{Deserialize, Serialize};

/// Every `type` discriminator the client understands, in and out.
pub const KNOWN_TYPES: &[&str] = &[
    "register",
    "register_success",
    "message",
    "new_message",
    "file",
    "file_download_url",
    "file_download_start",
    "file_chunk",
    "file_download_complete",
    "download_file",
    "mark_read",
    "read_status_update",
    "ping",
    "pong",
    "user_online",
    "user_offline",
    "system_message",
    "refresh_trigger",
    "error",
];

/// All wire message types. Encoding is JSON tagged by `type`; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Handshake: first frame on every connection.
    Register { username: String },
    /// Handshake accepted. Carries the stored profile and recent history.
    RegisterSuccess {
        user: UserInfo,
        #[serde(default)]
        recent_messages: Vec<HistoryEntry>,
    },
    /// Outbound chat text.
    Message { content: String },
    /// Chat text broadcast by the server.
    NewMessage(ChatMessage),
    /// Outbound upload (base64 content) or inbound upload notice.
    File(FileMessage),
    /// Out-of-band download location for a stored file.
    FileDownloadUrl {
        file_id: String,
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    /// Announces an inline chunked transfer.
    FileDownloadStart {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_chunks: Option<u32>,
    },
    /// One base64 slice of an inline transfer.
    FileChunk {
        file_id: String,
        chunk_index: u32,
        total_chunks: u32,
        content: String,
    },
    FileDownloadComplete { file_id: String },
    /// Ask the server for a stored file.
    DownloadFile { file_id: String },
    MarkRead { message_id: String },
    ReadStatusUpdate {
        message_id: String,
        read_by_count: u32,
        total_users: u32,
    },
    Ping,
    Pong,
    UserOnline {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<UserInfo>,
    },
    UserOffline { username: String },
    SystemMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    RefreshTrigger,
    /// Server-side failure. Older servers put the text in `message`, newer in `content`.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Message {
    /// Wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::RegisterSuccess { .. } => "register_success",
            Message::Message { .. } => "message",
            Message::NewMessage(_) => "new_message",
            Message::File(_) => "file",
            Message::FileDownloadUrl { .. } => "file_download_url",
            Message::FileDownloadStart { .. } => "file_download_start",
            Message::FileChunk { .. } => "file_chunk",
            Message::FileDownloadComplete { .. } => "file_download_complete",
            Message::DownloadFile { .. } => "download_file",
            Message::MarkRead { .. } => "mark_read",
            Message::ReadStatusUpdate { .. } => "read_status_update",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::UserOnline { .. } => "user_online",
            Message::UserOffline { .. } => "user_offline",
            Message::SystemMessage { .. } => "system_message",
            Message::RefreshTrigger => "refresh_trigger",
            Message::Error { .. } => "error",
        }
    }

    /// Human-readable text of an `error` message, if any.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Message::Error { content, message } => content.as_deref().or(message.as_deref()),
            _ => None,
        }
    }
}

/// Profile the server keeps per username.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Body shared by `new_message`, inbound `file` notices and history entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub read_by_count: u32,
    #[serde(default)]
    pub total_users: u32,
}

/// `file` payload. Outbound it carries `content`; inbound notices carry `id`/`username` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMessage {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Kind of a replayed history entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    #[default]
    Message,
    File,
    FileDownloadUrl,
    #[serde(other)]
    Other,
}

/// One element of `register_success.recent_messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type", default)]
    pub kind: HistoryKind,
    #[serde(flatten)]
    pub message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_variants_carry_only_type() {
        let v = serde_json::to_value(Message::Ping).unwrap();
        assert_eq!(v, json!({"type": "ping"}));
        let m: Message = serde_json::from_value(json!({"type": "refresh_trigger"})).unwrap();
        assert_eq!(m, Message::RefreshTrigger);
    }

    #[test]
    fn new_message_flattens_body() {
        let raw = json!({
            "type": "new_message",
            "id": "alice_1a2b3c4d",
            "content": "hello",
            "username": "alice",
            "user_info": {"username": "alice", "avatar": "A"},
            "timestamp": "2024-05-01T10:00:00",
            "read_by_count": 1,
            "total_users": 3
        });
        let m: Message = serde_json::from_value(raw).unwrap();
        match m {
            Message::NewMessage(chat) => {
                assert_eq!(chat.id, "alice_1a2b3c4d");
                assert_eq!(chat.content.as_deref(), Some("hello"));
                assert_eq!(chat.total_users, 3);
                assert_eq!(chat.user_info.unwrap().avatar.as_deref(), Some("A"));
            }
            other => panic!("expected NewMessage, got {:?}", other),
        }
    }

    #[test]
    fn register_success_with_mixed_history() {
        let raw = json!({
            "type": "register_success",
            "user": {"username": "bob", "avatar": "B"},
            "recent_messages": [
                {"type": "message", "id": "1", "username": "a", "content": "hi", "read_by_count": 2, "total_users": 2},
                {"type": "file_download_url", "id": "2", "file_id": "2", "name": "log.txt", "url": "http://h/x", "username": "a"},
                {"type": "poll", "id": "3", "username": "a"}
            ]
        });
        let m: Message = serde_json::from_value(raw).unwrap();
        let Message::RegisterSuccess { user, recent_messages } = m else {
            panic!("expected RegisterSuccess");
        };
        assert_eq!(user.username, "bob");
        assert_eq!(recent_messages.len(), 3);
        assert_eq!(recent_messages[0].kind, HistoryKind::Message);
        assert_eq!(recent_messages[1].kind, HistoryKind::FileDownloadUrl);
        assert_eq!(recent_messages[1].message.url.as_deref(), Some("http://h/x"));
        assert_eq!(recent_messages[2].kind, HistoryKind::Other);
    }

    #[test]
    fn register_success_without_history() {
        let m: Message =
            serde_json::from_value(json!({"type": "register_success", "user": {"username": "c"}}))
                .unwrap();
        assert!(matches!(m, Message::RegisterSuccess { recent_messages, .. } if recent_messages.is_empty()));
    }

    #[test]
    fn outbound_file_omits_absent_fields() {
        let m = Message::File(FileMessage {
            name: "a.bin".into(),
            size: 3,
            content: Some("AQID".into()),
            ..Default::default()
        });
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(
            v,
            json!({"type": "file", "name": "a.bin", "size": 3, "content": "AQID"})
        );
    }

    #[test]
    fn error_text_prefers_content() {
        let m: Message = serde_json::from_value(json!({"type": "error", "message": "dup login"})).unwrap();
        assert_eq!(m.error_text(), Some("dup login"));
        let m = Message::Error {
            content: Some("a".into()),
            message: Some("b".into()),
        };
        assert_eq!(m.error_text(), Some("a"));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let samples = vec![
            Message::Register { username: "u".into() },
            Message::Message { content: "c".into() },
            Message::MarkRead { message_id: "m".into() },
            Message::DownloadFile { file_id: "f".into() },
            Message::Ping,
            Message::FileDownloadComplete { file_id: "f".into() },
        ];
        for m in samples {
            let v = serde_json::to_value(&m).unwrap();
            assert_eq!(v["type"], m.kind());
            assert!(KNOWN_TYPES.contains(&m.kind()));
        }
    }
}
