//! Workspace records carried as chunk payloads.
//!
//! Only the fields the archive engine and its tools look at are typed. Every
//! other JSON field is kept in `extra`, so records produced by a richer API
//! client survive an encode/decode cycle unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::is_default;

/// A single conversation message.
///
/// `ts` identifies the message within its channel, `thread_ts` is the
/// timestamp of the thread root (equal to `ts` on the root itself).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Message {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,

    /// Author user ID.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ts: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thread_ts: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub reply_count: u32,

    /// Files attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInfo>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Creates a message with the given timestamp and text.
    pub fn new(ts: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            msg_type: "message".to_string(),
            ts: ts.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Returns true if the message starts a thread.
    pub fn is_thread_root(&self) -> bool {
        !self.thread_ts.is_empty() && self.thread_ts == self.ts
    }
}

/// Channel metadata (public/private channel, group, IM or MPIM).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Channel {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub is_channel: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_im: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_mpim: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_archived: bool,

    /// Creation time, unix seconds.
    #[serde(default, skip_serializing_if = "is_default")]
    pub created: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creator: String,

    /// The other party of an IM.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub num_members: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_channel: true,
            ..Self::default()
        }
    }
}

/// Workspace member.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct User {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub real_name: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub is_admin: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tz: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Metadata of an uploaded file. File contents are never stored in chunks.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct FileInfo {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mimetype: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filetype: String,

    /// Size in bytes.
    #[serde(default, skip_serializing_if = "is_default")]
    pub size: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_private: String,

    /// Upload time, unix seconds.
    #[serde(default, skip_serializing_if = "is_default")]
    pub timestamp: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
