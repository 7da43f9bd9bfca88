//! Parquet rows in and out, via Arrow and `serde_arrow`.
//!
//! [`ParquetRowSource`] asks the Arrow reader for batches of exactly
//! `rows_per_chunk` rows (the last one may be short) and converts each batch to
//! `Vec<T>`. The row count comes from the file footer, so progress always has a
//! total. [`encode_parquet`] infers the Arrow schema from `T` and writes a
//! single-row-group file into memory.

use crate::chunk::{Chunk, ChunkSource, SourceCursor};
use anyhow::{Context, Result, bail};
use arrow::datatypes::FieldRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::{from_record_batch, to_record_batch};
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Streaming, typed Parquet source.
pub struct ParquetRowSource<T> {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
    total: u64,
    cursor: SourceCursor,
    _row: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ParquetRowSource<T> {
    /// # Errors
    /// The file cannot be opened or is not Parquet, or `rows_per_chunk` is 0.
    pub fn open(path: impl AsRef<Path>, rows_per_chunk: usize) -> Result<Self> {
        if rows_per_chunk == 0 {
            bail!("rows_per_chunk must be at least 1");
        }
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("read parquet footer of {}", path.display()))?;
        let total = u64::try_from(builder.metadata().file_metadata().num_rows())
            .context("negative row count in parquet footer")?;
        let reader = builder
            .with_batch_size(rows_per_chunk)
            .build()
            .context("build ParquetRecordBatchReader")?;
        Ok(Self {
            path,
            reader,
            total,
            cursor: SourceCursor::new(),
            _row: PhantomData,
        })
    }
}

impl<T: DeserializeOwned + Send + 'static> ChunkSource for ParquetRowSource<T> {
    type Payload = Vec<T>;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Vec<T>>>> {
        self.cursor.check_open()?;
        loop {
            let Some(batch) = self
                .reader
                .next()
                .transpose()
                .with_context(|| format!("read batch from {}", self.path.display()))?
            else {
                return Ok(self.cursor.finish());
            };
            if batch.num_rows() == 0 {
                continue;
            }
            let rows: Vec<T> = from_record_batch(&batch).with_context(|| {
                format!(
                    "deserialize rows {}..{} of {}",
                    self.cursor.offset(),
                    self.cursor.offset() + batch.num_rows() as u64,
                    self.path.display()
                )
            })?;
            return Ok(Some(self.cursor.emit(rows)));
        }
    }

    fn total_units(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// Serialize `rows` as a complete Parquet file.
///
/// # Errors
/// Schema inference, conversion, or writer failures.
pub fn encode_parquet<T: Serialize + DeserializeOwned>(rows: &[T]) -> Result<Vec<u8>> {
    let fields: Vec<FieldRef> = Vec::<FieldRef>::from_type::<T>(TracingOptions::default())
        .context("infer Arrow schema from row type")?;
    let batch: RecordBatch = to_record_batch(&fields, &rows).context("convert rows to RecordBatch")?;

    let mut buf = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(&mut buf, batch.schema(), Some(props)).context("create ArrowWriter")?;
    writer.write(&batch).context("write batch to parquet")?;
    writer.close().context("close ArrowWriter")?;
    Ok(buf)
}
