//! Chunked download of one object into one local file.
//!
//! [`ByteRangeSource`] stats the object once and yields fixed-size windows.
//! [`RangeFileSink`] fetches a window and writes it at its offset in a file that
//! was pre-sized to the object's length, so windows can land in any order and a
//! retried window simply overwrites the same bytes.

use crate::chunk::{ByteRange, Chunk, ChunkMeta, ChunkSink, ChunkSource, Job, SourceCursor};
use crate::io::object::ObjectStore;
use crate::io::sha256_hex;
use anyhow::{Context, Result, bail};
use std::fs::{OpenOptions, create_dir_all};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Splits `bucket/key` into `chunk_size`-byte windows.
#[derive(Debug)]
pub struct ByteRangeSource {
    size: u64,
    chunk_size: u64,
    cursor: SourceCursor,
}

impl ByteRangeSource {
    /// # Errors
    /// `chunk_size` is 0 or the object cannot be stat'ed.
    pub fn new(store: &dyn ObjectStore, bucket: &str, key: &str, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        let size = store
            .object_size(bucket, key)
            .with_context(|| format!("stat {bucket}/{key}"))?;
        Ok(Self::with_size(size, chunk_size))
    }

    /// Windows over an object whose size is already known.
    #[must_use]
    pub fn with_size(size: u64, chunk_size: u64) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1),
            cursor: SourceCursor::new(),
        }
    }

    #[must_use]
    pub fn object_size(&self) -> u64 {
        self.size
    }
}

impl ChunkSource for ByteRangeSource {
    type Payload = ByteRange;

    fn next_chunk(&mut self) -> Result<Option<Chunk<ByteRange>>> {
        self.cursor.check_open()?;
        let offset = self.cursor.offset();
        if offset >= self.size {
            return Ok(self.cursor.finish());
        }
        let len = self.chunk_size.min(self.size - offset);
        Ok(Some(self.cursor.emit(ByteRange { offset, len })))
    }

    fn total_units(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Writes downloaded windows of `bucket/key` into `dest`.
pub struct RangeFileSink<S> {
    store: S,
    bucket: String,
    key: String,
    dest: PathBuf,
    size: u64,
}

impl<S: ObjectStore> RangeFileSink<S> {
    /// Stat the object and pre-size `dest` to match. Existing bytes in `dest`
    /// are kept, so a retry run only rewrites the windows it is given.
    ///
    /// # Errors
    /// The object cannot be stat'ed or `dest` cannot be created.
    pub fn new(store: S, bucket: &str, key: &str, dest: impl AsRef<Path>) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let size = store
            .object_size(bucket, key)
            .with_context(|| format!("stat {bucket}/{key}"))?;
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&dest)
            .with_context(|| format!("create {}", dest.display()))?;
        f.set_len(size)
            .with_context(|| format!("size {} to {size} bytes", dest.display()))?;
        debug!(bucket, key, size, dest = %dest.display(), "download target ready");
        Ok(Self {
            store,
            bucket: bucket.to_string(),
            key: key.to_string(),
            dest,
            size,
        })
    }

    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl<S: ObjectStore> ChunkSink<ByteRange> for RangeFileSink<S> {
    fn process(&self, job: &Job<ByteRange>) -> Result<ChunkMeta> {
        let range = job.chunk.payload;
        if range.end() > self.size {
            bail!(
                "window {}..{} is past the end of {} ({} bytes)",
                range.offset,
                range.end(),
                self.dest.display(),
                self.size
            );
        }
        let bytes = self
            .store
            .get_range(&self.bucket, &self.key, range)
            .with_context(|| {
                format!("fetch {}/{} bytes {}..{}", self.bucket, self.key, range.offset, range.end())
            })?;
        if bytes.len() as u64 != range.len {
            bail!("store returned {} bytes for a {}-byte window", bytes.len(), range.len);
        }

        let mut f = OpenOptions::new()
            .write(true)
            .open(&self.dest)
            .with_context(|| format!("open {}", self.dest.display()))?;
        f.seek(SeekFrom::Start(range.offset))
            .with_context(|| format!("seek {} to {}", self.dest.display(), range.offset))?;
        f.write_all(&bytes)
            .with_context(|| format!("write {} at {}", self.dest.display(), range.offset))?;
        f.sync_data()
            .with_context(|| format!("sync {}", self.dest.display()))?;

        Ok(ChunkMeta {
            units: range.len,
            bytes_written: range.len,
            destination: Some(self.dest.clone()),
            checksum: Some(sha256_hex(&bytes)),
        })
    }
}
