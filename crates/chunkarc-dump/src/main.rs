use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{Level, debug, warn};
use tracing_subscriber::EnvFilter;

use chunkarc_core::entity::{EntityIndex, EntityList};
use chunkarc_core::storage::model::{Channel, ChunkType};
use chunkarc_core::storage::{Directory, EXT, File};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "chunkarc-dump", about = "Inspect chunk archives")]
struct Cli {
    /// Path to a .json.gz chunk file or an archive directory
    path: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Channels to show (ID, ^ID to exclude, @file to read a list)
    #[arg(long = "channel", value_name = "ENTITY")]
    channels: Vec<String>,

    /// Print chunk identities of each file
    #[arg(long)]
    ids: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let path = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    let filter = EntityList::new(&cli.channels).unwrap_or_else(|e| {
        eprintln!("Error reading channel list: {e}");
        std::process::exit(1);
    });

    if path.is_dir() {
        dump_directory(&path, &filter, &cli);
    } else if is_chunk_file(&path) {
        dump_file(&path, &cli);
    } else {
        eprintln!("Unknown file type: {}", path.display());
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("chunkarc_dump={}", level).parse().unwrap())
        .add_directive(format!("chunkarc_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn is_chunk_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.ends_with(EXT))
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.1} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a capture timestamp (unix nanoseconds).
fn fmt_ts(ts_nanos: i64) -> String {
    if ts_nanos == 0 {
        return "-".into();
    }
    DateTime::<Utc>::from_timestamp_nanos(ts_nanos)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn channel_kind(ch: &Channel) -> &'static str {
    if ch.is_im {
        "im"
    } else if ch.is_mpim {
        "mpim"
    } else if ch.is_private || ch.is_group {
        "private"
    } else {
        "public"
    }
}

fn channel_visible(filter: &EntityList, index: &EntityIndex, id: &str) -> bool {
    if index.is_excluded(id) {
        return false;
    }
    !filter.has_includes() || index.is_included(id)
}

// ── JSON output ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FileJson {
    file: String,
    file_size: u64,
    chunk_count: usize,
    by_type: BTreeMap<String, usize>,
    channel_ids: Vec<String>,
    time_range: Option<TimeRangeJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
}

#[derive(Serialize)]
struct TimeRangeJson {
    first: String,
    last: String,
}

#[derive(Serialize)]
struct ChannelJson {
    id: String,
    name: String,
    kind: &'static str,
    archived: bool,
}

#[derive(Serialize)]
struct DirectoryJson {
    path: String,
    total_size: u64,
    users: Option<usize>,
    channels: Vec<ChannelJson>,
    files: Vec<FileJson>,
}

// ── File summary ─────────────────────────────────────────────────────────────

struct FileSummary {
    path: PathBuf,
    file_size: u64,
    chunk_count: usize,
    by_type: BTreeMap<ChunkType, usize>,
    channel_ids: Vec<String>,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
    ids: Vec<String>,
}

impl FileSummary {
    fn to_json(&self, with_ids: bool) -> FileJson {
        FileJson {
            file: self
                .path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into(),
            file_size: self.file_size,
            chunk_count: self.chunk_count,
            by_type: self
                .by_type
                .iter()
                .map(|(t, n)| (t.to_string(), *n))
                .collect(),
            channel_ids: self.channel_ids.clone(),
            time_range: match (self.first_ts, self.last_ts) {
                (Some(f), Some(l)) => Some(TimeRangeJson {
                    first: fmt_ts(f),
                    last: fmt_ts(l),
                }),
                _ => None,
            },
            ids: with_ids.then(|| self.ids.clone()),
        }
    }

    fn print(&self, with_ids: bool, indent: &str) {
        println!(
            "{indent}{}: {} chunks, {}",
            self.path.display(),
            self.chunk_count,
            human_bytes(self.file_size)
        );
        for (t, n) in &self.by_type {
            println!("{indent}  {:<16} {}", t.to_string(), n);
        }
        if !self.channel_ids.is_empty() {
            println!("{indent}  Channels: {}", self.channel_ids.join(", "));
        }
        if let (Some(first), Some(last)) = (self.first_ts, self.last_ts) {
            println!(
                "{indent}  Captured: {} \u{2013} {}",
                fmt_ts(first),
                fmt_ts(last)
            );
        }
        if with_ids {
            for id in &self.ids {
                println!("{indent}    {id}");
            }
        }
    }
}

fn summarize(dir: &Directory, path: &Path) -> chunkarc_core::Result<FileSummary> {
    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut file = dir.open_raw(path)?;
    debug!(path = %path.display(), chunks = file.len(), "file indexed");

    let (first_ts, last_ts) = capture_range(&mut file)?;
    Ok(FileSummary {
        path: path.to_path_buf(),
        file_size,
        chunk_count: file.len(),
        by_type: file.count_by_type(),
        channel_ids: file.channel_ids(),
        first_ts,
        last_ts,
        ids: file.ids().to_vec(),
    })
}

/// Earliest and latest capture timestamps of the chunks that carry one.
fn capture_range(file: &mut File<fs::File>) -> chunkarc_core::Result<(Option<i64>, Option<i64>)> {
    let mut first: Option<i64> = None;
    let mut last: Option<i64> = None;
    for i in 0..file.len() {
        let ts = file.read_chunk(i)?.timestamp;
        if ts == 0 {
            continue;
        }
        first = Some(first.map_or(ts, |t| t.min(ts)));
        last = Some(last.map_or(ts, |t| t.max(ts)));
    }
    Ok((first, last))
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn dump_file(path: &Path, cli: &Cli) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = Directory::open_dir(parent).unwrap_or_else(|e| {
        eprintln!("Error opening {}: {e}", parent.display());
        std::process::exit(1);
    });
    let summary = summarize(&dir, path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", path.display());
        std::process::exit(1);
    });

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary.to_json(cli.ids)).unwrap()
        );
    } else {
        summary.print(cli.ids, "");
    }
}

fn dump_directory(path: &Path, filter: &EntityList, cli: &Cli) {
    let dir = Directory::open_dir(path).unwrap_or_else(|e| {
        eprintln!("Error opening directory {}: {e}", path.display());
        std::process::exit(1);
    });

    let index = filter.index();
    let channels: Vec<Channel> = dir
        .channels()
        .unwrap_or_else(|e| {
            eprintln!("Error reading channels: {e}");
            std::process::exit(1);
        })
        .into_iter()
        .filter(|ch| channel_visible(filter, &index, &ch.id))
        .collect();

    let users = match dir.users() {
        Ok(users) => Some(users.len()),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            warn!(error = %e, "users file unreadable");
            None
        }
    };

    let files = dir.chunk_files().unwrap_or_else(|e| {
        eprintln!("Error listing {}: {e}", path.display());
        std::process::exit(1);
    });
    let mut summaries = Vec::with_capacity(files.len());
    for file in &files {
        match summarize(&dir, file) {
            Ok(s) => summaries.push(s),
            Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable file"),
        }
    }
    summaries.retain(|s| {
        s.channel_ids.is_empty()
            || s
                .channel_ids
                .iter()
                .any(|id| channel_visible(filter, &index, id))
    });
    let total_size: u64 = summaries.iter().map(|s| s.file_size).sum();

    if cli.json {
        let json = DirectoryJson {
            path: path.display().to_string(),
            total_size,
            users,
            channels: channels
                .iter()
                .map(|ch| ChannelJson {
                    id: ch.id.clone(),
                    name: ch.name.clone(),
                    kind: channel_kind(ch),
                    archived: ch.is_archived,
                })
                .collect(),
            files: summaries.iter().map(|s| s.to_json(cli.ids)).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        println!("Archive: {}", path.display());
        println!(
            "  Files:    {} ({})",
            summaries.len(),
            human_bytes(total_size)
        );
        match users {
            Some(n) => println!("  Users:    {n}"),
            None => println!("  Users:    none"),
        }
        println!("  Channels: {}", channels.len());
        for ch in &channels {
            let archived = if ch.is_archived { " (archived)" } else { "" };
            println!(
                "    {:<12} {:<8} {}{}",
                ch.id,
                channel_kind(ch),
                ch.name,
                archived
            );
        }
        println!();
        for s in &summaries {
            s.print(cli.ids, "  ");
        }
    }
}
