//! Byte-range object transport.
//!
//! [`ObjectStore`] is the narrow surface the download pipeline needs: the size
//! of an object and one window of its bytes. [`FakeObjectStore`] keeps objects
//! in memory and can inject transient failures; [`LocalObjectStore`] treats a
//! directory as the root of its buckets.

use crate::chunk::ByteRange;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct ObjectStoreError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Network,
    Timeout,
    Io,
    Other,
}

impl ErrorKind {
    /// Worth another attempt on a later run.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

impl fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for ObjectStoreError {}

impl ObjectStoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn io(context: impl fmt::Display, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Io,
        };
        Self::new(kind, format!("{context}: {err}"))
    }
}

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

pub trait ObjectStore: Send + Sync {
    /// Size of the object in bytes.
    ///
    /// # Errors
    /// The object does not exist or cannot be reached.
    fn object_size(&self, bucket: &str, key: &str) -> ObjectResult<u64>;

    /// Exactly `range.len` bytes starting at `range.offset`.
    ///
    /// # Errors
    /// The object is missing, the window runs past its end, or the read fails.
    fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> ObjectResult<Vec<u8>>;

    /// Store a whole object, replacing any previous one.
    ///
    /// # Errors
    /// The write fails.
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> ObjectResult<()>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn object_size(&self, bucket: &str, key: &str) -> ObjectResult<u64> {
        (**self).object_size(bucket, key)
    }

    fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> ObjectResult<Vec<u8>> {
        (**self).get_range(bucket, key, range)
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> ObjectResult<()> {
        (**self).put_object(bucket, key, data)
    }
}

fn check_window(bucket: &str, key: &str, size: u64, range: ByteRange) -> ObjectResult<()> {
    if range.end() > size {
        return Err(ObjectStoreError::new(
            ErrorKind::InvalidInput,
            format!(
                "range {}..{} runs past the end of {bucket}/{key} ({size} bytes)",
                range.offset,
                range.end()
            ),
        ));
    }
    Ok(())
}

type BucketStorage = Arc<Mutex<HashMap<String, HashMap<String, Vec<u8>>>>>;
type FaultTable = Arc<Mutex<HashMap<(String, String, u64), u32>>>;

/// In-memory store for tests and demos.
#[derive(Clone, Default)]
pub struct FakeObjectStore {
    storage: BucketStorage,
    faults: FaultTable,
    range_reads: Arc<Mutex<Vec<ByteRange>>>,
}

impl FakeObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` reads of the window starting at `offset` fail with a
    /// network error.
    pub fn fail_range(&self, bucket: &str, key: &str, offset: u64, times: u32) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((bucket.to_string(), key.to_string(), offset), times);
    }

    /// Every window requested so far, in call order.
    #[must_use]
    pub fn range_reads(&self) -> Vec<ByteRange> {
        self.range_reads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_fault(&self, bucket: &str, key: &str, offset: u64) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let id = (bucket.to_string(), key.to_string(), offset);
        match faults.get_mut(&id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ObjectStore for FakeObjectStore {
    fn object_size(&self, bucket: &str, key: &str) -> ObjectResult<u64> {
        let storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        storage
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|data| data.len() as u64)
            .ok_or_else(|| ObjectStoreError::new(ErrorKind::NotFound, format!("object {bucket}/{key} not found")))
    }

    fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> ObjectResult<Vec<u8>> {
        self.range_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(range);
        if self.take_fault(bucket, key, range.offset) {
            return Err(ObjectStoreError::new(
                ErrorKind::Network,
                format!("injected failure reading {bucket}/{key} at {}", range.offset),
            ));
        }
        let storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        let data = storage
            .get(bucket)
            .and_then(|b| b.get(key))
            .ok_or_else(|| ObjectStoreError::new(ErrorKind::NotFound, format!("object {bucket}/{key} not found")))?;
        check_window(bucket, key, data.len() as u64, range)?;
        // check_window bounds both ends by data.len(), which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let (start, end) = (range.offset as usize, range.end() as usize);
        Ok(data[start..end].to_vec())
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> ObjectResult<()> {
        self.storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// A directory whose subdirectories are buckets and whose files are objects.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> ObjectResult<PathBuf> {
        let rel = Path::new(bucket).join(key);
        if bucket.is_empty()
            || key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ObjectStoreError::new(
                ErrorKind::InvalidInput,
                format!("object name {bucket}/{key} must be a plain relative path"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalObjectStore {
    fn object_size(&self, bucket: &str, key: &str) -> ObjectResult<u64> {
        let path = self.object_path(bucket, key)?;
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| ObjectStoreError::io(format_args!("stat {}", path.display()), &e))
    }

    fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> ObjectResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        let mut f = File::open(&path)
            .map_err(|e| ObjectStoreError::io(format_args!("open {}", path.display()), &e))?;
        let size = f
            .metadata()
            .map_err(|e| ObjectStoreError::io(format_args!("stat {}", path.display()), &e))?
            .len();
        check_window(bucket, key, size, range)?;
        f.seek(SeekFrom::Start(range.offset))
            .map_err(|e| ObjectStoreError::io(format_args!("seek {}", path.display()), &e))?;
        let mut buf = Vec::new();
        f.take(range.len)
            .read_to_end(&mut buf)
            .map_err(|e| ObjectStoreError::io(format_args!("read {}", path.display()), &e))?;
        if buf.len() as u64 != range.len {
            return Err(ObjectStoreError::new(
                ErrorKind::Io,
                format!("short read of {}: {} of {} bytes", path.display(), buf.len(), range.len),
            ));
        }
        Ok(buf)
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> ObjectResult<()> {
        let path = self.object_path(bucket, key)?;
        crate::io::write_atomic(&path, data)
            .map_err(|e| ObjectStoreError::new(ErrorKind::Io, format!("{e:#}")))
    }
}
