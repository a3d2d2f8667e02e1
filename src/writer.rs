use std::collections::BTreeMap;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use crate::storage::{Location, StorageError};
use crate::tables::TableRow;

/// Directory value Hive uses for a null partition column.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Marker written once every file of a table is in place.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

/// What was written for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWrite {
    pub table: &'static str,
    pub rows: usize,
    pub partitions: usize,
    pub files: usize,
}

/// Write `rows` as the table `T::NAME` under `destination`, replacing any
/// previous output.
///
/// Existing objects under the table prefix (including its `_SUCCESS` marker)
/// are deleted first; the marker is written last, so a table that failed
/// half way has no marker.
pub async fn write_table<T: TableRow>(
    destination: &Location,
    rows: &[T],
    rows_per_file: usize,
) -> Result<TableWrite, WriteError> {
    let table = destination.join(T::NAME);
    let removed = table.delete_all().await?;
    if removed > 0 {
        log::debug!("{}: removed {} objects from previous run", table.url(), removed);
    }

    let mut partitions: BTreeMap<Vec<String>, Vec<&T>> = BTreeMap::new();
    for row in rows {
        let segments = T::PARTITION_BY
            .iter()
            .zip(row.partition_values())
            .map(|(column, value)| partition_segment(column, value.as_deref()))
            .collect();
        partitions.entry(segments).or_default().push(row);
    }

    let mut files = 0;
    for (segments, part_rows) in &partitions {
        for (n, chunk) in part_rows.chunks(rows_per_file.max(1)).enumerate() {
            let batch = T::to_batch(chunk)?;
            let data = encode_parquet(&batch)?;
            let mut key = segments.clone();
            key.push(format!("part-{:05}.snappy.parquet", n));
            table.put(&key, data).await?;
            files += 1;
        }
    }

    table.put(&[SUCCESS_MARKER], Vec::new()).await?;

    let written = TableWrite {
        table: T::NAME,
        rows: rows.len(),
        partitions: partitions.len(),
        files,
    };
    log::info!(
        "Wrote {} rows to {} ({} partitions, {} files)",
        written.rows,
        table.url(),
        written.partitions,
        written.files
    );
    Ok(written)
}

/// Serialize a batch as a Snappy-compressed Parquet file.
pub fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>, ParquetError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buf)
}

/// Hive-style `column=value` directory name. Separators inside the value
/// are percent-encoded by the object store path when the key is built.
pub fn partition_segment(column: &str, value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => format!("{}={}", column, v),
        _ => format!("{}={}", column, NULL_PARTITION),
    }
}
