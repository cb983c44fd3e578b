//! Chunk stream codec.
//!
//! A chunk file is a sequence of JSON objects, one per chunk, each followed
//! by a newline. There is no outer array, so a stream can be appended to and
//! decoded object by object.
//!
//! ```text
//! {"t":5,"ts":1700000000000000000,"n":1,"ci":{"id":"C123",...},"id":"C123"}
//! {"t":0,"ts":1700000000000000001,"n":100,"id":"C123","m":[...]}
//! {"t":0,"ts":1700000000000000002,"n":42,"id":"C123","m":[...]}
//! {"t":1,"ts":1700000000000000003,"r":true,"n":3,"id":"C123","p":{...},"m":[...]}
//! ```
//!
//! [`File`] indexes a decoded stream by chunk identity. Opening a file decodes
//! every chunk in full, so a malformed chunk fails the open; the decoded
//! payloads are dropped and read again on demand by seeking back to the
//! recorded byte offset of each chunk.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use serde::de::DeserializeOwned;
use serde_json::StreamDeserializer;
use serde_json::de::IoRead;

use crate::error::{Error, Result};
use crate::storage::model::{
    Channel, Chunk, ChunkType, FileInfo, Message, USER_CHUNK_ID, User, channel_info_id,
    files_id, messages_id, thread_id,
};

/// Writes chunks to a byte stream.
pub struct Encoder<W: Write> {
    writer: W,
    count: usize,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, count: 0 }
    }

    /// Encodes a single chunk as one JSON object followed by a newline.
    pub fn encode(&mut self, chunk: &Chunk) -> Result<()> {
        serde_json::to_writer(&mut self.writer, chunk).map_err(Error::Encode)?;
        self.writer.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }

    /// Encodes chunks in the given order.
    pub fn encode_all<'a>(&mut self, chunks: impl IntoIterator<Item = &'a Chunk>) -> Result<()> {
        for chunk in chunks {
            self.encode(chunk)?;
        }
        Ok(())
    }

    /// Number of chunks written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A value decoded from a chunk stream with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// Zero-based position of the chunk in the stream.
    pub index: usize,
    /// Byte offset where the chunk starts (may include leading whitespace).
    pub offset: u64,
    pub value: T,
}

/// Sequential chunk decoder.
///
/// Yields chunks one at a time. On the first malformed or truncated chunk it
/// yields a [`Error::Decode`] carrying the chunk index and byte offset, then
/// stops. Chunks yielded before the failure stay valid.
pub struct Decoder<R: Read, T = Chunk> {
    stream: StreamDeserializer<'static, IoRead<R>, T>,
    base: u64,
    index: usize,
    failed: bool,
}

impl<R: Read, T: DeserializeOwned> Decoder<R, T> {
    pub fn new(reader: R) -> Self {
        Self::resume(reader, 0, 0)
    }

    /// Starts decoding at a known position: `base` is the byte offset of the
    /// reader's current position, `index` the index of the next chunk.
    pub(crate) fn resume(reader: R, base: u64, index: usize) -> Self {
        Self {
            stream: serde_json::Deserializer::from_reader(reader).into_iter::<T>(),
            base,
            index,
            failed: false,
        }
    }
}

impl<R: Read, T: DeserializeOwned> Iterator for Decoder<R, T> {
    type Item = Result<Decoded<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let index = self.index;
        let offset = self.base + self.stream.byte_offset() as u64;
        match self.stream.next()? {
            Ok(value) => {
                self.index += 1;
                Some(Ok(Decoded {
                    index,
                    offset,
                    value,
                }))
            }
            Err(source) => {
                self.failed = true;
                Some(Err(Error::Decode {
                    index,
                    offset,
                    source,
                }))
            }
        }
    }
}

/// Location of one chunk inside the stream.
#[derive(Debug, Clone, Copy)]
struct ChunkPointer {
    offset: u64,
    chunk_type: ChunkType,
    /// Position of the chunk's identity in `File::ids`.
    slot: usize,
}

/// Indexed reader over a chunk stream.
///
/// The stream must be seekable: lookups seek to the offsets recorded while
/// indexing and decode only the chunks they need.
pub struct File<R> {
    reader: R,
    pointers: Vec<ChunkPointer>,
    /// Identities in order of first appearance.
    ids: Vec<String>,
    slots: HashMap<String, usize>,
    /// Chunk indexes per identity slot, in file order.
    groups: Vec<Vec<usize>>,
}

impl<R: Read + Seek> File<R> {
    /// Decodes the stream from the reader's current position and builds the
    /// identity index. Fails on the first chunk that does not decode, including
    /// well-formed JSON with mistyped fields.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let base = reader.stream_position()?;
        let mut pointers = Vec::new();
        let mut ids: Vec<String> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();

        let decoder: Decoder<_> = Decoder::resume(BufReader::new(&mut reader), base, 0);
        for item in decoder {
            let Decoded {
                index,
                offset,
                value,
            } = item?;
            let id = value.id();
            let slot = match slots.get(&id) {
                Some(&slot) => slot,
                None => {
                    let slot = ids.len();
                    slots.insert(id.clone(), slot);
                    ids.push(id);
                    groups.push(Vec::new());
                    slot
                }
            };
            groups[slot].push(index);
            pointers.push(ChunkPointer {
                offset,
                chunk_type: value.chunk_type,
                slot,
            });
        }

        Ok(Self {
            reader,
            pointers,
            ids,
            slots,
            groups,
        })
    }

    /// Returns the number of chunks in the stream.
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    /// Returns true if the stream holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    /// Returns chunk identities in order of first appearance.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Returns IDs of channels that have message chunks, in order of first
    /// appearance.
    pub fn channel_ids(&self) -> Vec<String> {
        let mut seen = vec![false; self.ids.len()];
        let mut out = Vec::new();
        for p in &self.pointers {
            if p.chunk_type == ChunkType::Messages && !seen[p.slot] {
                seen[p.slot] = true;
                out.push(self.ids[p.slot].clone());
            }
        }
        out
    }

    /// Counts chunks per type (no payload decoding).
    pub fn count_by_type(&self) -> BTreeMap<ChunkType, usize> {
        let mut counts = BTreeMap::new();
        for p in &self.pointers {
            *counts.entry(p.chunk_type).or_insert(0) += 1;
        }
        counts
    }

    /// Reads the chunk at the given index.
    pub fn read_chunk(&mut self, index: usize) -> Result<Chunk> {
        let Some(pointer) = self.pointers.get(index) else {
            return Err(Error::Io(io::Error::other(format!(
                "chunk index {} out of range (count={})",
                index,
                self.pointers.len()
            ))));
        };
        let offset = pointer.offset;
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut decoder: Decoder<_> =
            Decoder::resume(BufReader::new(&mut self.reader), offset, index);
        match decoder.next() {
            Some(item) => item.map(|decoded| decoded.value),
            None => Err(Error::Decode {
                index,
                offset,
                source: serde_json::Error::io(io::ErrorKind::UnexpectedEof.into()),
            }),
        }
    }

    /// Returns all chunks with the given identity, in file order.
    pub fn chunks(&mut self, id: &str) -> Result<Vec<Chunk>> {
        let Some(&slot) = self.slots.get(id) else {
            return Ok(Vec::new());
        };
        let indexes = self.groups[slot].clone();
        indexes.into_iter().map(|i| self.read_chunk(i)).collect()
    }

    /// Returns all chunks of the given type, in file order.
    pub fn chunks_of(&mut self, chunk_type: ChunkType) -> Result<Vec<Chunk>> {
        let indexes: Vec<usize> = self
            .pointers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.chunk_type == chunk_type)
            .map(|(i, _)| i)
            .collect();
        indexes.into_iter().map(|i| self.read_chunk(i)).collect()
    }

    /// Concatenates the payload of every chunk with the given identity and
    /// type. `None` if the identity does not occur in the file.
    fn gather<T>(
        &mut self,
        id: &str,
        chunk_type: ChunkType,
        mut payload: impl FnMut(Chunk) -> Vec<T>,
    ) -> Result<Option<Vec<T>>> {
        if !self.contains(id) {
            return Ok(None);
        }
        let mut out = Vec::new();
        for chunk in self.chunks(id)? {
            if chunk.chunk_type == chunk_type {
                out.extend(payload(chunk));
            }
        }
        Ok(Some(out))
    }

    /// Returns the channel record of every channel info chunk in file order.
    ///
    /// `None` means the file has no channel info chunks at all, which callers
    /// scanning many files treat as an empty result rather than a failure.
    pub fn all_channel_infos(&mut self) -> Result<Option<Vec<Channel>>> {
        let chunks = self.chunks_of(ChunkType::ChannelInfo)?;
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(chunks.into_iter().filter_map(|c| c.channel).collect()))
    }

    /// Returns the first channel info recorded for the channel. Thread-scoped
    /// info is used when no channel-wide info exists.
    pub fn channel_info(&mut self, channel_id: &str) -> Result<Option<Channel>> {
        for is_thread in [false, true] {
            let id = channel_info_id(channel_id, is_thread);
            for chunk in self.chunks(&id)? {
                if let Some(channel) = chunk.channel {
                    return Ok(Some(channel));
                }
            }
        }
        Ok(None)
    }

    /// Returns the users of every users chunk, concatenated in file order.
    pub fn all_users(&mut self) -> Result<Vec<User>> {
        let users = self
            .gather(USER_CHUNK_ID, ChunkType::Users, |c| c.users)?
            .unwrap_or_default();
        Ok(users)
    }

    /// Returns the channels of every channels chunk, concatenated in file
    /// order. `None` if the file has no channels chunk.
    pub fn all_channels(&mut self) -> Result<Option<Vec<Channel>>> {
        let chunks = self.chunks_of(ChunkType::Channels)?;
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(chunks.into_iter().flat_map(|c| c.channels).collect()))
    }

    /// Returns all messages of the channel, reassembled from its pages.
    pub fn all_messages(&mut self, channel_id: &str) -> Result<Option<Vec<Message>>> {
        self.gather(&messages_id(channel_id), ChunkType::Messages, |c| {
            c.messages
        })
    }

    /// Returns all replies of the thread rooted at `thread_ts`.
    pub fn all_thread_messages(
        &mut self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Option<Vec<Message>>> {
        self.gather(
            &thread_id(channel_id, thread_ts),
            ChunkType::ThreadMessages,
            |c| c.messages,
        )
    }

    /// Returns the files attached to the message at `ts`.
    pub fn all_files(&mut self, channel_id: &str, ts: &str) -> Result<Option<Vec<FileInfo>>> {
        self.gather(&files_id(channel_id, ts), ChunkType::Files, |c| c.files)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::CHANNEL_CHUNK_ID;
    use std::io::Cursor;

    fn msgs(channel: &str, from: usize, n: usize) -> Vec<Message> {
        (from..from + n)
            .map(|i| Message::new(format!("{}.000{}", 1000 + i, i), format!("{channel} #{i}")))
            .collect()
    }

    fn thread_root(ts: &str) -> Message {
        Message {
            thread_ts: ts.into(),
            reply_count: 2,
            ..Message::new(ts, "root")
        }
    }

    fn create_test_chunks() -> Vec<Chunk> {
        vec![
            Chunk::channel_info(Channel::new("C1", "general"), false),
            Chunk::messages("C1", msgs("C1", 0, 3)),
            Chunk::thread_messages("C1", thread_root("1000.0000"), msgs("C1", 10, 2)),
            Chunk::messages("C2", msgs("C2", 0, 1)),
            Chunk::messages("C1", msgs("C1", 3, 2)),
            Chunk::files(
                "C1",
                Message::new("1001.0001", "see attached"),
                vec![FileInfo {
                    id: "F1".into(),
                    name: "report.pdf".into(),
                    size: 1024,
                    ..FileInfo::default()
                }],
            ),
            Chunk::users(vec![User::new("U1", "alice")]),
            Chunk::users(vec![User::new("U2", "bob"), User::new("U3", "carol")]),
        ]
    }

    fn encode(chunks: &[Chunk]) -> Vec<u8> {
        let mut enc = Encoder::new(Vec::new());
        enc.encode_all(chunks).unwrap();
        assert_eq!(enc.count(), chunks.len());
        enc.into_inner()
    }

    #[test]
    fn test_roundtrip_preserves_order_and_fields() {
        let chunks = create_test_chunks();
        let data = encode(&chunks);

        let decoder: Decoder<_> = Decoder::new(&data[..]);
        let decoded: Vec<Chunk> = decoder.map(|d| d.unwrap().value).collect();
        assert_eq!(decoded, chunks);

        let mut file = File::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(file.len(), chunks.len());
        for (i, want) in chunks.iter().enumerate() {
            assert_eq!(&file.read_chunk(i).unwrap(), want, "chunk {} differs", i);
        }
    }

    #[test]
    fn test_one_object_per_line() {
        let data = encode(&create_test_chunks());
        let text = String::from_utf8(data).unwrap();
        assert_eq!(text.lines().count(), 8);
        assert!(!text.starts_with('['));
    }

    #[test]
    fn test_paginated_messages_reassembled_in_order() {
        let mut file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();

        let messages = file.all_messages("C1").unwrap().unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["C1 #0", "C1 #1", "C1 #2", "C1 #3", "C1 #4"]);

        assert_eq!(file.chunks("C1").unwrap().len(), 2);
        assert!(file.all_messages("C404").unwrap().is_none());
    }

    #[test]
    fn test_thread_and_file_lookup() {
        let mut file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();

        let replies = file.all_thread_messages("C1", "1000.0000").unwrap().unwrap();
        assert_eq!(replies.len(), 2);
        assert!(file.all_thread_messages("C1", "9.9").unwrap().is_none());

        let files = file.all_files("C1", "1001.0001").unwrap().unwrap();
        assert_eq!(files[0].name, "report.pdf");
    }

    #[test]
    fn test_users_concatenated() {
        let mut file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();
        let names: Vec<String> = file
            .all_users()
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(!file.contains(CHANNEL_CHUNK_ID));
        assert!(file.all_channels().unwrap().is_none());
    }

    #[test]
    fn test_all_channel_infos() {
        let mut file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();
        let infos = file.all_channel_infos().unwrap().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "general");
        assert_eq!(file.channel_info("C1").unwrap().unwrap().id, "C1");
        assert!(file.channel_info("C2").unwrap().is_none());

        let data = encode(&[Chunk::messages("C9", msgs("C9", 0, 1))]);
        let mut file = File::from_reader(Cursor::new(data)).unwrap();
        assert!(file.all_channel_infos().unwrap().is_none());
    }

    #[test]
    fn test_index_introspection() {
        let file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();
        assert_eq!(
            file.ids(),
            ["ciC1", "C1", "tC1:1000.0000", "C2", "fC1:1001.0001", USER_CHUNK_ID]
        );
        assert_eq!(file.channel_ids(), ["C1", "C2"]);

        let counts = file.count_by_type();
        assert_eq!(counts[&ChunkType::Messages], 3);
        assert_eq!(counts[&ChunkType::Users], 2);
        assert_eq!(counts.get(&ChunkType::Channels), None);
    }

    #[test]
    fn test_unknown_chunk_type_is_indexed() {
        let mut data = encode(&[Chunk::messages("C1", msgs("C1", 0, 1))]);
        data.extend_from_slice(b"{\"t\":999,\"ts\":1,\"id\":\"C1\"}\n");
        data.extend_from_slice(&encode(&[Chunk::messages("C1", msgs("C1", 1, 1))]));

        let mut file = File::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(file.len(), 3);
        assert!(file.contains("<unknown:ChunkType(999)>"));
        assert_eq!(file.all_messages("C1").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_stream_reports_position() {
        let chunks = create_test_chunks();
        let data = encode(&chunks);
        let cut = data.len() - 10;

        let decoder: Decoder<_> = Decoder::new(&data[..cut]);
        let results: Vec<_> = decoder.collect();
        assert_eq!(results.len(), chunks.len());

        let good: Vec<Chunk> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|d| d.value.clone())
            .collect();
        assert_eq!(good, chunks[..chunks.len() - 1]);

        match results.last().unwrap() {
            Err(Error::Decode { index, offset, .. }) => {
                assert_eq!(*index, chunks.len() - 1);
                let last_line_start = data[..data.len() - 1]
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .unwrap() as u64;
                assert_eq!(*offset, last_line_start);
            }
            other => panic!("expected decode error, got {:?}", other.is_ok()),
        }

        assert!(matches!(
            File::from_reader(Cursor::new(data[..cut].to_vec())),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn test_garbage_between_chunks() {
        let mut data = encode(&[Chunk::users(vec![User::new("U1", "alice")])]);
        data.extend_from_slice(b"not json\n");
        let err = File::from_reader(Cursor::new(data)).err().unwrap();
        assert!(matches!(err, Error::Decode { index: 1, .. }));
    }

    #[test]
    fn test_mistyped_payload_fails_open() {
        let mut data = encode(&[Chunk::channel_info(Channel::new("C1", "general"), false)]);
        data.extend_from_slice(b"{\"t\":0,\"id\":\"C1\",\"m\":\"oops\"}\n");
        let err = File::from_reader(Cursor::new(data)).err().unwrap();
        assert!(matches!(err, Error::Decode { index: 1, .. }));
    }

    #[test]
    fn test_offsets_are_seekable() {
        let chunks = create_test_chunks();
        let data = encode(&chunks);
        let decoder: Decoder<_> = Decoder::new(&data[..]);
        for decoded in decoder {
            let decoded = decoded.unwrap();
            let rest = &data[decoded.offset as usize..];
            let mut again: Decoder<_> = Decoder::new(rest);
            assert_eq!(again.next().unwrap().unwrap().value, chunks[decoded.index]);
        }
    }

    #[test]
    fn test_reader_not_at_start() {
        let mut data = b"PREFIX".to_vec();
        data.extend_from_slice(&encode(&create_test_chunks()));
        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(6)).unwrap();

        let mut file = File::from_reader(cursor).unwrap();
        assert_eq!(file.all_messages("C2").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_stream() {
        let file = File::from_reader(Cursor::new(Vec::<u8>::new())).unwrap();
        assert!(file.is_empty());
        assert!(file.ids().is_empty());
    }

    #[test]
    fn test_read_chunk_out_of_range() {
        let mut file = File::from_reader(Cursor::new(encode(&create_test_chunks()))).unwrap();
        assert!(file.read_chunk(8).is_err());
        assert!(file.read_chunk(100).is_err());
    }
}
