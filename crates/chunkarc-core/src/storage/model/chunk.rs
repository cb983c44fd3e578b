//! Chunk records and the identity scheme that groups them.
//!
//! A chunk is one self-describing unit of exported data: a page of channel
//! messages, a page of thread replies, the files attached to a message, a
//! channel's metadata, or a workspace-wide user/channel list. Chunks of
//! different kinds share one file format and are told apart by [`ChunkType`].
//!
//! Every chunk derives an identity string (see [`Chunk::id`]). Chunks with
//! the same identity describe the same subject, e.g. consecutive pages of one
//! channel, and are reassembled in append order by the reader.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::is_default;
use super::records::{Channel, FileInfo, Message, User};

/// Identity of the workspace-wide users chunk.
pub const USER_CHUNK_ID: &str = "lusers";
/// Identity of the workspace-wide channels chunk.
pub const CHANNEL_CHUNK_ID: &str = "lchannels";

/// Kind of payload a chunk carries.
///
/// Encoded as an integer. Values this build does not know about decode into
/// `Unknown` instead of failing, so archives from a newer producer stay
/// readable.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(from = "i64", into = "i64")]
pub enum ChunkType {
    #[default]
    Messages,
    ThreadMessages,
    Files,
    Users,
    Channels,
    ChannelInfo,
    /// A value with no named variant. Build it through `From<i64>`; an
    /// `Unknown` holding a mapped value behaves as the mapped variant.
    Unknown(i64),
}

impl ChunkType {
    /// Maps an `Unknown` holding a known wire value to its named variant.
    pub fn normalized(self) -> Self {
        match self {
            ChunkType::Unknown(n) => ChunkType::from(n),
            other => other,
        }
    }
}

impl From<i64> for ChunkType {
    fn from(v: i64) -> Self {
        match v {
            0 => ChunkType::Messages,
            1 => ChunkType::ThreadMessages,
            2 => ChunkType::Files,
            3 => ChunkType::Users,
            4 => ChunkType::Channels,
            5 => ChunkType::ChannelInfo,
            n => ChunkType::Unknown(n),
        }
    }
}

impl From<ChunkType> for i64 {
    fn from(t: ChunkType) -> Self {
        match t {
            ChunkType::Messages => 0,
            ChunkType::ThreadMessages => 1,
            ChunkType::Files => 2,
            ChunkType::Users => 3,
            ChunkType::Channels => 4,
            ChunkType::ChannelInfo => 5,
            ChunkType::Unknown(n) => n,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Messages => write!(f, "Messages"),
            ChunkType::ThreadMessages => write!(f, "ThreadMessages"),
            ChunkType::Files => write!(f, "Files"),
            ChunkType::Users => write!(f, "Users"),
            ChunkType::Channels => write!(f, "Channels"),
            ChunkType::ChannelInfo => write!(f, "ChannelInfo"),
            ChunkType::Unknown(n) => write!(f, "ChunkType({})", n),
        }
    }
}

/// One serializable unit of exported data.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Chunk {
    #[serde(rename = "t")]
    pub chunk_type: ChunkType,

    /// Capture time, unix nanoseconds. Informational only.
    #[serde(rename = "ts", default)]
    pub timestamp: i64,

    /// Payload is scoped to a thread rather than the whole channel.
    #[serde(rename = "r", default, skip_serializing_if = "is_default")]
    pub is_thread: bool,

    /// Number of payload items.
    #[serde(rename = "n", default, skip_serializing_if = "is_default")]
    pub count: usize,

    #[serde(rename = "ci", default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    /// Empty only for workspace-wide chunks (users, channels).
    #[serde(rename = "id", default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,

    /// Thread root for thread chunks, owning message for file chunks.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Message>,

    #[serde(rename = "m", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(rename = "f", default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInfo>,

    #[serde(rename = "u", default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,

    #[serde(rename = "ch", default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
}

impl Chunk {
    fn stamped(chunk_type: ChunkType) -> Self {
        Self {
            chunk_type,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            ..Self::default()
        }
    }

    /// A page of channel messages.
    pub fn messages(channel_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            channel_id: channel_id.into(),
            count: messages.len(),
            messages,
            ..Self::stamped(ChunkType::Messages)
        }
    }

    /// A page of replies in the thread started by `parent`.
    pub fn thread_messages(
        channel_id: impl Into<String>,
        parent: Message,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            is_thread: true,
            count: messages.len(),
            parent: Some(parent),
            messages,
            ..Self::stamped(ChunkType::ThreadMessages)
        }
    }

    /// Files attached to `parent`.
    pub fn files(channel_id: impl Into<String>, parent: Message, files: Vec<FileInfo>) -> Self {
        let is_thread = !parent.thread_ts.is_empty();
        Self {
            channel_id: channel_id.into(),
            is_thread,
            count: files.len(),
            parent: Some(parent),
            files,
            ..Self::stamped(ChunkType::Files)
        }
    }

    /// Channel metadata. `is_thread` marks info captured while exporting a
    /// single thread of the channel.
    pub fn channel_info(channel: Channel, is_thread: bool) -> Self {
        Self {
            channel_id: channel.id.clone(),
            is_thread,
            count: 1,
            channel: Some(channel),
            ..Self::stamped(ChunkType::ChannelInfo)
        }
    }

    /// Workspace user list.
    pub fn users(users: Vec<User>) -> Self {
        Self {
            count: users.len(),
            users,
            ..Self::stamped(ChunkType::Users)
        }
    }

    /// Workspace channel list.
    pub fn channels(channels: Vec<Channel>) -> Self {
        Self {
            count: channels.len(),
            channels,
            ..Self::stamped(ChunkType::Channels)
        }
    }

    /// Returns the identity of this chunk.
    ///
    /// Never fails: a missing parent is treated as an empty anchor and an
    /// unknown type renders as `<unknown:ChunkType(N)>`.
    pub fn id(&self) -> String {
        let (ts, thread_ts) = self
            .parent
            .as_ref()
            .map(|p| (p.ts.as_str(), p.thread_ts.as_str()))
            .unwrap_or_default();
        identity(self.chunk_type, self.is_thread, &self.channel_id, ts, thread_ts)
    }
}

/// Identity of a channel's message chunks.
pub fn messages_id(channel_id: &str) -> String {
    channel_id.to_string()
}

/// Identity of a thread's message chunks.
pub fn thread_id(channel_id: &str, thread_ts: &str) -> String {
    format!("t{}:{}", channel_id, thread_ts)
}

/// Identity of the file chunks attached to the message at `ts`.
pub fn files_id(channel_id: &str, ts: &str) -> String {
    format!("f{}:{}", channel_id, ts)
}

/// Identity of a channel info chunk.
pub fn channel_info_id(channel_id: &str, is_thread: bool) -> String {
    if is_thread {
        format!("tci{}", channel_id)
    } else {
        format!("ci{}", channel_id)
    }
}

fn identity(
    chunk_type: ChunkType,
    is_thread: bool,
    channel_id: &str,
    parent_ts: &str,
    parent_thread_ts: &str,
) -> String {
    // An `Unknown` holding a mapped value is encoded as that value, so it is
    // keyed the way it will be after decoding.
    match chunk_type.normalized() {
        ChunkType::Messages => messages_id(channel_id),
        ChunkType::ThreadMessages => thread_id(channel_id, parent_thread_ts),
        ChunkType::Files => files_id(channel_id, parent_ts),
        ChunkType::ChannelInfo => channel_info_id(channel_id, is_thread),
        ChunkType::Users => USER_CHUNK_ID.to_string(),
        ChunkType::Channels => CHANNEL_CHUNK_ID.to_string(),
        ChunkType::Unknown(_) => format!("<unknown:{}>", chunk_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(ts: &str, thread_ts: &str) -> Option<Message> {
        Some(Message {
            ts: ts.into(),
            thread_ts: thread_ts.into(),
            ..Message::default()
        })
    }

    #[test]
    fn test_chunk_id() {
        let cases: Vec<(&str, Chunk, String)> = vec![
            (
                "messages",
                Chunk {
                    chunk_type: ChunkType::Messages,
                    channel_id: "C123".into(),
                    ..Chunk::default()
                },
                "C123".into(),
            ),
            (
                "threads",
                Chunk {
                    chunk_type: ChunkType::ThreadMessages,
                    channel_id: "C123".into(),
                    parent: parent("", "1234"),
                    ..Chunk::default()
                },
                "tC123:1234".into(),
            ),
            (
                "files",
                Chunk {
                    chunk_type: ChunkType::Files,
                    channel_id: "C123".into(),
                    parent: parent("1234", ""),
                    ..Chunk::default()
                },
                "fC123:1234".into(),
            ),
            (
                "channel info",
                Chunk {
                    chunk_type: ChunkType::ChannelInfo,
                    channel_id: "C123".into(),
                    ..Chunk::default()
                },
                "ciC123".into(),
            ),
            (
                "channel info (thread)",
                Chunk {
                    chunk_type: ChunkType::ChannelInfo,
                    is_thread: true,
                    channel_id: "C123".into(),
                    ..Chunk::default()
                },
                "tciC123".into(),
            ),
            (
                "users",
                Chunk {
                    chunk_type: ChunkType::Users,
                    ..Chunk::default()
                },
                USER_CHUNK_ID.into(),
            ),
            (
                "channels",
                Chunk {
                    chunk_type: ChunkType::Channels,
                    ..Chunk::default()
                },
                CHANNEL_CHUNK_ID.into(),
            ),
            (
                "unknown",
                Chunk {
                    chunk_type: ChunkType::Unknown(999),
                    ..Chunk::default()
                },
                "<unknown:ChunkType(999)>".into(),
            ),
        ];

        for (name, chunk, want) in cases {
            assert_eq!(chunk.id(), want, "case {}", name);
        }
    }

    #[test]
    fn test_missing_parent_yields_empty_anchor() {
        let thread = Chunk {
            chunk_type: ChunkType::ThreadMessages,
            channel_id: "C1".into(),
            ..Chunk::default()
        };
        assert_eq!(thread.id(), "tC1:");

        let files = Chunk {
            chunk_type: ChunkType::Files,
            channel_id: "C1".into(),
            ..Chunk::default()
        };
        assert_eq!(files.id(), "fC1:");
    }

    #[test]
    fn test_chunk_type_wire_values() {
        for (t, n) in [
            (ChunkType::Messages, 0),
            (ChunkType::ThreadMessages, 1),
            (ChunkType::Files, 2),
            (ChunkType::Users, 3),
            (ChunkType::Channels, 4),
            (ChunkType::ChannelInfo, 5),
        ] {
            assert_eq!(i64::from(t), n);
            assert_eq!(ChunkType::from(n), t);
        }
        assert_eq!(ChunkType::from(42), ChunkType::Unknown(42));
        assert_eq!(ChunkType::Unknown(42).to_string(), "ChunkType(42)");
    }

    #[test]
    fn test_unknown_type_decodes() {
        let chunk: Chunk = serde_json::from_str(r#"{"t":77,"ts":5,"id":"C9"}"#).unwrap();
        assert_eq!(chunk.chunk_type, ChunkType::Unknown(77));
        assert_eq!(chunk.id(), "<unknown:ChunkType(77)>");
    }

    #[test]
    fn test_unknown_holding_mapped_value_keys_as_mapped() {
        assert_eq!(ChunkType::Unknown(5).normalized(), ChunkType::ChannelInfo);
        assert_eq!(ChunkType::Unknown(77).normalized(), ChunkType::Unknown(77));

        let chunk = Chunk {
            chunk_type: ChunkType::Unknown(0),
            channel_id: "C1".into(),
            ..Chunk::default()
        };
        assert_eq!(chunk.id(), "C1");

        let encoded = serde_json::to_string(&chunk).unwrap();
        let decoded: Chunk = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.chunk_type, ChunkType::Messages);
        assert_eq!(decoded.id(), chunk.id());
    }

    #[test]
    fn test_constructors_set_count() {
        let chunk = Chunk::messages(
            "C1",
            vec![Message::new("1.0", "a"), Message::new("2.0", "b")],
        );
        assert_eq!(chunk.count, 2);
        assert_eq!(chunk.chunk_type, ChunkType::Messages);
        assert!(chunk.timestamp > 0);

        let info = Chunk::channel_info(Channel::new("C7", "random"), false);
        assert_eq!(info.channel_id, "C7");
        assert_eq!(info.id(), "ciC7");
    }
}
