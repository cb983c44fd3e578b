//! chunkarc-core — storage engine for chunked workspace archives.
//!
//! Provides:
//! - `storage` — chunk model, JSON stream codec, indexed chunk files and
//!   gzip-compressed chunk directories
//! - `entity` — include/exclude entity lists for selecting channels
//! - `error` — error type shared by the storage layer

pub mod entity;
pub mod error;
pub mod storage;

pub use error::{Error, Result};
