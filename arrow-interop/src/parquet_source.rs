//! Parquet files as engine batch sources.

use anyhow::{Context, Result};
use arrow_array::RecordBatchReader;
use columnar_model::{Batch, BatchSource, EngineError, SchemaRef};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::record_batch_convert::{batch_to_record_batch, record_batch_to_batch};
use crate::schema_utils::{schema_to_arrow, SchemaExt};

/// Streams a Parquet file as batches of at most `batch_size` rows.
pub struct ParquetSource {
    path: PathBuf,
    schema: SchemaRef,
    row_count: usize,
    reader: ParquetRecordBatchReader,
}

impl ParquetSource {
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .context("Failed to create Parquet reader")?;
        let row_count = builder.metadata().file_metadata().num_rows().max(0) as usize;
        let reader = builder
            .with_batch_size(batch_size.max(1))
            .build()
            .context("Failed to build Parquet reader")?;
        let schema = Arc::new(reader.schema().to_logical()?);

        info!("Opened {} ({} rows)", path.display(), row_count);
        Ok(Self {
            path,
            schema,
            row_count,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_next(&mut self) -> Result<Option<Batch>> {
        match self.reader.next() {
            None => Ok(None),
            Some(batch) => {
                let batch = batch.context("Failed to read record batch")?;
                debug!("Read {} rows from {}", batch.num_rows(), self.path.display());
                Ok(Some(record_batch_to_batch(&batch)?))
            }
        }
    }
}

impl BatchSource for ParquetSource {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> columnar_model::Result<Option<Batch>> {
        self.read_next()
            .map_err(|e| EngineError::Source(format!("{:#}", e)))
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(self.row_count)
    }
}

/// Write batches sharing one schema to a Parquet file.
pub fn write_parquet(path: impl AsRef<Path>, schema: &columnar_model::Schema, batches: &[Batch]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, Arc::new(schema_to_arrow(schema)), None)
        .context("Failed to create Parquet writer")?;
    for batch in batches {
        writer.write(&batch_to_record_batch(batch)?)?;
    }
    writer.close().context("Failed to finish Parquet file")?;
    Ok(())
}

/// Read a whole Parquet file into memory.
pub fn read_parquet(path: impl AsRef<Path>, batch_size: usize) -> Result<(SchemaRef, Vec<Batch>)> {
    let mut source = ParquetSource::open(path, batch_size)?;
    let mut batches = Vec::new();
    while let Some(batch) = source.read_next()? {
        batches.push(batch);
    }
    Ok((source.schema(), batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::{Column, LogicalType, ScalarValue};

    #[test]
    fn write_then_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        let batch = Batch::from_columns([
            ("id", Column::int64((0..10).map(Some).collect())),
            ("name", Column::utf8((0..10).map(|i| if i % 3 == 0 { None } else { Some("n") }).collect())),
            ("price", Column::decimal(10, 2, (0..10).map(|i| Some(i * 100 + 5)).collect()).unwrap()),
        ])
        .unwrap();
        write_parquet(&path, batch.schema(), &[batch.clone()]).unwrap();

        let mut source = ParquetSource::open(&path, 4).unwrap();
        assert_eq!(source.estimated_rows(), Some(10));
        assert_eq!(source.schema().fields()[2].data_type, LogicalType::decimal(10, 2).unwrap());
        let mut rows = 0;
        let mut first = None;
        while let Some(b) = source.next_batch().unwrap() {
            assert!(b.num_rows() <= 4);
            rows += b.num_rows();
            first.get_or_insert(b);
        }
        assert_eq!(rows, 10);
        let first = first.unwrap();
        assert_eq!(first.column(1).unwrap().value(0).unwrap(), ScalarValue::Null);
        assert_eq!(first.column(2).unwrap().value(1).unwrap(), ScalarValue::Decimal(105));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ParquetSource::open("/nonexistent/file.parquet", 10).is_err());
    }
}
