//! Built-in sources and sinks.
//!
//! - [`memory`]: in-memory rows ([`VecRowSource`]).
//! - [`csv`], [`jsonl`], [`parquet`]: streaming typed row sources and per-chunk
//!   encoders, each behind its `io-*` feature.
//! - [`tabular`]: [`TabularFormat`], [`open_row_source`] and the
//!   [`RowPartitionSink`] that writes one file per chunk.
//! - [`object`] and [`range`]: the [`ObjectStore`] transport and the byte-window
//!   download pipeline ([`ByteRangeSource`], [`RangeFileSink`]).
//! - [`compression`]: codecs resolved from extensions or magic bytes.
//!
//! Sinks never leave a partial artifact behind: bytes are staged in a temp file
//! next to the destination and renamed into place ([`write_atomic`]).

pub mod compression;
pub mod memory;
pub mod object;
pub mod range;
pub mod tabular;

#[cfg_attr(docsrs, doc(cfg(feature = "io-jsonl")))]
#[cfg(feature = "io-jsonl")]
pub mod jsonl;

#[cfg_attr(docsrs, doc(cfg(feature = "io-csv")))]
#[cfg(feature = "io-csv")]
pub mod csv;

#[cfg_attr(docsrs, doc(cfg(feature = "io-parquet")))]
#[cfg(feature = "io-parquet")]
pub mod parquet;

pub use compression::{Compression, open_decoded};
pub use memory::VecRowSource;
pub use object::{ErrorKind, FakeObjectStore, LocalObjectStore, ObjectStore, ObjectStoreError};
pub use range::{ByteRangeSource, RangeFileSink};
pub use tabular::{RowPartitionSink, TabularFormat, open_row_source};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::create_dir_all;
use std::io::Write;
use std::path::Path;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Replace `path` with `bytes` in one step.
///
/// The bytes land in a temp file in the destination directory first, so readers
/// see either the old file, no file, or the complete new one. Rewriting the same
/// bytes is a no-op as far as readers can tell.
///
/// # Errors
/// Directory creation, write, or rename failures.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_dir_all(dir).with_context(|| format!("mkdir -p {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write staged bytes for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync staged bytes for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}
