//! Data models for the archive.
//!
//! - [`chunk`]: the chunk record, its kinds and identity scheme
//! - [`records`]: workspace records carried as chunk payloads
//!
//! # Architecture
//!
//! ```text
//! Chunk file (gzip-compressed JSON stream on disk)
//!   └── Chunk[]                 <- one JSON object per chunk, no outer array
//!         ├── Messages          <- id: "C123"
//!         ├── ThreadMessages    <- id: "tC123:<thread_ts>"
//!         ├── Files             <- id: "fC123:<ts>"
//!         ├── ChannelInfo       <- id: "ciC123" / "tciC123"
//!         ├── Users             <- id: "lusers"
//!         └── Channels          <- id: "lchannels"
//! ```
//!
//! A paginated channel is stored as several chunks sharing one identity;
//! readers concatenate their payloads in file order.

mod chunk;
mod records;

pub use chunk::{
    CHANNEL_CHUNK_ID, Chunk, ChunkType, USER_CHUNK_ID, channel_info_id, files_id, messages_id,
    thread_id,
};
pub use records::{Channel, FileInfo, Message, User};

/// Serde helper: skip fields holding their default value.
pub(crate) fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}
