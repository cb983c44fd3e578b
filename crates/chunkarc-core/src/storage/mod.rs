pub mod chunk;
pub mod directory;
pub mod model;

pub use chunk::{Decoded, Decoder, Encoder, File};
pub use directory::{ChunkWriter, Directory, DirectoryConfig, EXT};
pub use model::{Channel, Chunk, ChunkType, FileInfo, Message, User};
