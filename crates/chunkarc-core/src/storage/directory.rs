//! Directory of compressed chunk files.
//!
//! Every file created here is gzip-compressed and named `<name>.json.gz`.
//! Functions taking a `name` append the extension; `*_raw` functions take the
//! literal file name, for files the directory did not name itself (e.g.
//! per-channel archives written by an export run).
//!
//! Two files have a fixed meaning:
//! - `users.json.gz`: a chunk stream with the workspace users
//! - `channels.json.gz`: a flat JSON array of channels (not a chunk stream)
//!
//! Nothing is cached between calls: each query opens and streams the files it
//! needs.

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::storage::chunk::File;
use crate::storage::model::{Channel, User};

/// Extension of every chunk file.
pub const EXT: &str = ".json.gz";

const USERS_FILE: &str = "users";
const CHANNELS_FILE: &str = "channels";

/// Configuration for a chunk directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Gzip level for created files (0-9, higher values act as 9). Default: 6.
    pub compression_level: u32,
    /// Whether the channel scan descends into subdirectories. Default: true.
    pub recursive: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            recursive: true,
        }
    }
}

impl DirectoryConfig {
    /// Creates a new DirectoryConfig with custom values.
    pub fn new(compression_level: u32, recursive: bool) -> Self {
        Self {
            compression_level,
            recursive,
        }
    }
}

/// A folder of chunk files.
#[derive(Debug, Clone)]
pub struct Directory {
    dir: PathBuf,
    config: DirectoryConfig,
}

impl Directory {
    /// Opens an existing directory. Fails if the path is missing or is not a
    /// directory.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_dir_with(dir, DirectoryConfig::default())
    }

    pub fn open_dir_with(dir: impl Into<PathBuf>, config: DirectoryConfig) -> Result<Self> {
        let dir = dir.into();
        let meta = fs::metadata(&dir).map_err(|e| Error::fs(&dir, e))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory { path: dir });
        }
        Ok(Self { dir, config })
    }

    /// Creates the directory, including missing parents, and opens it.
    pub fn create_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::create_dir_with(dir, DirectoryConfig::default())
    }

    pub fn create_dir_with(dir: impl Into<PathBuf>, config: DirectoryConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::fs(&dir, e))?;
        Ok(Self { dir, config })
    }

    /// Deletes the directory and everything in it. Succeeds if it is already
    /// gone.
    pub fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::fs(&self.dir, e)),
        }
    }

    /// Returns the directory root.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns the full path of the chunk file with the given name.
    pub fn filename(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, EXT))
    }

    /// Creates the chunk file `name.json.gz` and returns a compressing writer.
    ///
    /// Never overwrites data: fails if the file exists and is not empty, or if
    /// the path is a directory. An existing empty file is reused.
    pub fn create(&self, name: &str) -> Result<ChunkWriter> {
        let path = self.filename(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => return Err(Error::IsADirectory { path }),
            Ok(meta) if meta.len() > 0 => return Err(Error::AlreadyExists { path }),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::fs(&path, e)),
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::fs(&path, e))?;
        debug!(path = %path.display(), "chunk file created");
        Ok(ChunkWriter::new(
            path,
            file,
            Compression::new(self.config.compression_level.min(9)),
        ))
    }

    /// Opens the chunk file `name.json.gz`.
    pub fn open(&self, name: &str) -> Result<File<fs::File>> {
        let file = open_chunks(&self.filename(name))?;
        File::from_reader(file)
    }

    /// Opens a chunk file by its literal path, used as given. Relative paths
    /// resolve against the working directory, not the directory root.
    pub fn open_raw(&self, filename: impl AsRef<Path>) -> Result<File<fs::File>> {
        let file = open_chunks(filename.as_ref())?;
        File::from_reader(file)
    }

    /// Returns the workspace users from `users.json.gz`.
    ///
    /// There is no fallback: a missing users file is an error.
    pub fn users(&self) -> Result<Vec<User>> {
        let mut file = self.open(USERS_FILE)?;
        file.all_users()
    }

    /// Returns all channels known to the directory.
    ///
    /// If `channels.json.gz` exists it is read as a flat channel list and
    /// returned as is. Otherwise every chunk file is scanned and the channel
    /// info chunks are collected, in walk order. Files without channel info
    /// are skipped; any other failure aborts the scan.
    pub fn channels(&self) -> Result<Vec<Channel>> {
        let snapshot = self.filename(CHANNELS_FILE);
        if let Ok(meta) = fs::metadata(&snapshot)
            && !meta.is_dir()
        {
            return load_channels_snapshot(&snapshot);
        }

        let mut channels = Vec::new();
        for path in self.chunk_files()? {
            match load_channel_infos(&path) {
                Ok(Some(found)) => {
                    debug!(path = %path.display(), count = found.len(), "channel info loaded");
                    channels.extend(found);
                }
                Ok(None) => debug!(path = %path.display(), "no channel info"),
                Err(e) => {
                    return Err(Error::Scan {
                        path,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(channels)
    }

    /// Writes the flat channel snapshot `channels.json.gz`.
    pub fn save_channels(&self, channels: &[Channel]) -> Result<()> {
        let mut writer = self.create(CHANNELS_FILE)?;
        serde_json::to_writer(&mut writer, channels).map_err(Error::Encode)?;
        writer.close()
    }

    /// Lists chunk files in the directory, sorted by name within each level.
    /// Subdirectories are included when the config is recursive.
    pub fn chunk_files(&self) -> Result<Vec<PathBuf>> {
        let mut walker = WalkDir::new(&self.dir).sort_by_file_name();
        if !self.config.recursive {
            walker = walker.max_depth(1);
        }
        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_dir() || !has_chunk_ext(entry.path()) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }
}

fn has_chunk_ext(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(EXT))
}

/// Opens a gzip-compressed file and decompresses it into an anonymous
/// temporary file positioned at the start. The temporary file is removed by
/// the OS once closed.
fn open_chunks(path: &Path) -> Result<fs::File> {
    let meta = fs::metadata(path).map_err(|e| Error::fs(path, e))?;
    if meta.is_dir() {
        return Err(Error::IsADirectory {
            path: path.to_path_buf(),
        });
    }
    if meta.len() == 0 {
        return Err(Error::Empty {
            path: path.to_path_buf(),
        });
    }

    let file = fs::File::open(path).map_err(|e| Error::fs(path, e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut tmp = tempfile::tempfile()?;
    {
        let mut out = BufWriter::new(&mut tmp);
        io::copy(&mut decoder, &mut out).map_err(|source| Error::Decompress {
            path: path.to_path_buf(),
            source,
        })?;
        out.flush()?;
    }
    tmp.seek(SeekFrom::Start(0))?;
    Ok(tmp)
}

fn load_channel_infos(path: &Path) -> Result<Option<Vec<Channel>>> {
    let mut file = File::from_reader(open_chunks(path)?)?;
    file.all_channel_infos()
}

fn load_channels_snapshot(path: &Path) -> Result<Vec<Channel>> {
    let file = open_chunks(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Compressing writer for a chunk file.
///
/// [`close`](ChunkWriter::close) finishes the gzip stream first and then
/// syncs the file, so the gzip trailer is on disk before the handle is
/// released. Dropping an unclosed writer does the same but can only log
/// failures.
pub struct ChunkWriter {
    path: PathBuf,
    encoder: Option<GzEncoder<fs::File>>,
}

impl ChunkWriter {
    fn new(path: PathBuf, file: fs::File, level: Compression) -> Self {
        Self {
            path,
            encoder: Some(GzEncoder::new(file, level)),
        }
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finishes compression and closes the file.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut encoder) = self.encoder.take() else {
            return Ok(());
        };
        let finished = encoder.try_finish();
        let synced = encoder.get_ref().sync_all();
        drop(encoder);

        finished.map_err(|e| Error::fs(&self.path, e))?;
        synced.map_err(|e| Error::fs(&self.path, e))?;
        Ok(())
    }

    fn encoder(&mut self) -> io::Result<&mut GzEncoder<fs::File>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("chunk writer is closed"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder()?.flush()
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if self.encoder.is_some()
            && let Err(e) = self.finish()
        {
            warn!(path = %self.path.display(), error = %e, "chunk writer: close on drop failed");
        }
    }
}
