//! Format dispatch for row files, and the one-file-per-chunk sink.
//!
//! The format is resolved once from a path or naming template into the closed
//! [`TabularFormat`] enum; a compression suffix is peeled off first, so
//! `part-{index}.csv.gz` is gzip-compressed CSV.

use crate::chunk::{ChunkMeta, ChunkSink, ChunkSource, Job};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::io::compression::Compression;
use crate::io::{sha256_hex, write_atomic};
use crate::naming::NamingTemplate;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TabularFormat {
    Csv,
    Jsonl,
    Parquet,
}

impl TabularFormat {
    /// Match a bare extension (no dot). Case-insensitive.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "jsonl" | "ndjson" => Some(Self::Jsonl),
            "parquet" | "pq" => Some(Self::Parquet),
            _ => None,
        }
    }

    /// Resolve format and compression from a file name.
    ///
    /// # Errors
    /// Unknown extension, or a compressed Parquet name (Parquet compresses
    /// internally).
    pub fn resolve(path: impl AsRef<Path>) -> Result<(Self, Compression)> {
        let path = path.as_ref();
        let compression = Compression::from_path(path);
        let inner = compression.inner_path(path);
        let ext = inner
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(format) = Self::from_extension(&ext) else {
            bail!(
                "cannot tell the row format of {} (expected .csv, .jsonl or .parquet)",
                path.display()
            );
        };
        if format == Self::Parquet && compression != Compression::None {
            bail!(
                "{} output is not supported for parquet files ({})",
                compression.name(),
                path.display()
            );
        }
        Ok((format, compression))
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
            Self::Parquet => "parquet",
        }
    }

    /// Whether this build carries the format's `io-*` feature.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        match self {
            Self::Csv => cfg!(feature = "io-csv"),
            Self::Jsonl => cfg!(feature = "io-jsonl"),
            Self::Parquet => cfg!(feature = "io-parquet"),
        }
    }
}

/// Open a streaming row source for `path`, picking the reader by extension.
/// CSV files are expected to carry a header row.
///
/// # Errors
/// Unknown or disabled format, or the file cannot be opened.
pub fn open_row_source<T>(
    path: impl AsRef<Path>,
    rows_per_chunk: usize,
) -> Result<Box<dyn ChunkSource<Payload = Vec<T>>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let path = path.as_ref();
    let (format, _) = TabularFormat::resolve(path)?;
    let source: Box<dyn ChunkSource<Payload = Vec<T>>> = match format {
        #[cfg(feature = "io-csv")]
        TabularFormat::Csv => Box::new(crate::io::csv::CsvRowSource::<T>::open(path, true, rows_per_chunk)?),
        #[cfg(feature = "io-jsonl")]
        TabularFormat::Jsonl => Box::new(crate::io::jsonl::JsonlRowSource::<T>::open(path, rows_per_chunk)?),
        #[cfg(feature = "io-parquet")]
        TabularFormat::Parquet => {
            Box::new(crate::io::parquet::ParquetRowSource::<T>::open(path, rows_per_chunk)?)
        }
        #[allow(unreachable_patterns)]
        other => bail!("reading {} needs the io-{} feature", path.display(), other.name()),
    };
    Ok(source)
}

/// Writes each chunk of rows to `output_root/<naming(index)>`.
///
/// The file is staged and renamed into place, so re-running a chunk rewrites
/// identical bytes and a failed chunk leaves nothing behind.
#[derive(Debug, Clone)]
pub struct RowPartitionSink<T> {
    root: PathBuf,
    naming: NamingTemplate,
    format: TabularFormat,
    compression: Compression,
    csv_headers: bool,
    _row: PhantomData<fn(T)>,
}

impl<T> RowPartitionSink<T> {
    /// Resolve the output format from `config.naming`.
    ///
    /// # Errors
    /// [`PipelineError::ConfigInvalid`] when the template's extension is not a
    /// known (and enabled) row format.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let sample = config.naming.render(0);
        let (format, compression) =
            TabularFormat::resolve(&sample).map_err(|e| PipelineError::config(format!("{e:#}")))?;
        if !format.is_enabled() {
            return Err(PipelineError::config(format!(
                "naming {:?} writes {} but the io-{} feature is off",
                config.naming.as_str(),
                format.name(),
                format.name()
            )));
        }
        Ok(Self {
            root: config.output_root.clone(),
            naming: config.naming.clone(),
            format,
            compression,
            csv_headers: true,
            _row: PhantomData,
        })
    }

    /// Emit (or omit) the CSV header row. Ignored for other formats.
    #[must_use]
    pub fn with_csv_headers(mut self, on: bool) -> Self {
        self.csv_headers = on;
        self
    }

    #[must_use]
    pub fn format(&self) -> TabularFormat {
        self.format
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[allow(unused_variables)]
    fn encode(&self, rows: &[T]) -> Result<Vec<u8>>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.format {
            #[cfg(feature = "io-csv")]
            TabularFormat::Csv => crate::io::csv::encode_csv(rows, self.csv_headers),
            #[cfg(feature = "io-jsonl")]
            TabularFormat::Jsonl => crate::io::jsonl::encode_jsonl(rows),
            #[cfg(feature = "io-parquet")]
            TabularFormat::Parquet => crate::io::parquet::encode_parquet(rows),
            #[allow(unreachable_patterns)]
            other => bail!("writing {} needs the io-{} feature", other.name(), other.name()),
        }
    }
}

impl<T> ChunkSink<Vec<T>> for RowPartitionSink<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn destination(&self, index: u64) -> Option<PathBuf> {
        Some(self.naming.path_for(&self.root, index))
    }

    fn process(&self, job: &Job<Vec<T>>) -> Result<ChunkMeta> {
        let index = job.index();
        let dest = job
            .destination
            .clone()
            .unwrap_or_else(|| self.naming.path_for(&self.root, index));

        let raw = self
            .encode(&job.chunk.payload)
            .with_context(|| format!("encode chunk {index} as {}", self.format.name()))?;
        let bytes = self
            .compression
            .compress(&raw)
            .with_context(|| format!("compress chunk {index}"))?;
        write_atomic(&dest, &bytes)?;

        Ok(ChunkMeta {
            units: job.chunk.payload.len() as u64,
            bytes_written: bytes.len() as u64,
            checksum: Some(sha256_hex(&bytes)),
            destination: Some(dest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        label: String,
    }

    fn job(index: u64, rows: Vec<Row>) -> Job<Vec<Row>> {
        Job::new(
            Chunk {
                index,
                offset: 0,
                payload: rows,
            },
            None,
        )
    }

    #[test]
    fn resolves_format_and_compression() -> Result<()> {
        assert_eq!(
            TabularFormat::resolve("out/part-00001.csv.gz")?,
            (TabularFormat::Csv, Compression::Gzip)
        );
        assert_eq!(
            TabularFormat::resolve("x.NDJSON")?,
            (TabularFormat::Jsonl, Compression::None)
        );
        assert!(TabularFormat::resolve("x.parquet.zst").is_err());
        assert!(TabularFormat::resolve("x.txt").is_err());
        Ok(())
    }

    #[test]
    fn sink_rejects_unknown_extension() -> Result<()> {
        let cfg = PipelineConfig::new(10).with_naming("chunk-{index}.bin")?;
        let err = RowPartitionSink::<Row>::new(&cfg).unwrap_err();
        assert!(err.is_config());
        Ok(())
    }

    #[cfg(feature = "io-jsonl")]
    #[test]
    fn writes_index_keyed_files_with_checksums() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = PipelineConfig::new(10)
            .with_output_root(dir.path())
            .with_naming("rows-{index:03}.jsonl")?;
        let sink = RowPartitionSink::<Row>::new(&cfg)?;

        let rows = vec![Row { id: 1, label: "a".into() }];
        let meta = sink.process(&job(4, rows.clone()))?;
        let dest = dir.path().join("rows-004.jsonl");
        assert_eq!(meta.destination.as_deref(), Some(dest.as_path()));
        assert_eq!(meta.units, 1);
        assert_eq!(std::fs::read_to_string(&dest)?, "{\"id\":1,\"label\":\"a\"}\n");

        let again = sink.process(&job(4, rows))?;
        assert_eq!(again.checksum, meta.checksum);
        Ok(())
    }
}
