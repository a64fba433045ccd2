//! Parquet tables produced from a health export.

use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ConversionError;
use super::health_xml::{self, RecordRow, RowSink, WorkoutRow, WorkoutStatRow};

pub const RECORDS_TABLE: &str = "records";
pub const WORKOUTS_TABLE: &str = "workouts";
pub const WORKOUT_STATS_TABLE: &str = "workout_stats";

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        true,
    )
}

fn timestamps(values: impl Iterator<Item = Option<i64>>) -> ArrayRef {
    Arc::new(TimestampMicrosecondArray::from(values.collect::<Vec<_>>()).with_timezone("UTC"))
}

fn strings<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn floats(values: impl Iterator<Item = f64>) -> ArrayRef {
    Arc::new(Float64Array::from_iter_values(values))
}

/// A row type with a fixed Arrow layout
pub trait ColumnarRow: Sized {
    const TABLE: &'static str;

    fn schema() -> SchemaRef;

    fn columns(rows: &[Self]) -> Vec<ArrayRef>;
}

impl ColumnarRow for RecordRow {
    const TABLE: &'static str = RECORDS_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("type", DataType::Utf8, false),
            Field::new("sourceVersion", DataType::Utf8, false),
            Field::new("sourceName", DataType::Utf8, false),
            Field::new("device", DataType::Utf8, false),
            timestamp_field("startDate"),
            timestamp_field("endDate"),
            timestamp_field("creationDate"),
            Field::new("unit", DataType::Utf8, false),
            Field::new("value", DataType::Float64, false),
            Field::new("textValue", DataType::Utf8, false),
        ]))
    }

    fn columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            strings(rows.iter().map(|r| r.record_type.as_str())),
            strings(rows.iter().map(|r| r.source_version.as_str())),
            strings(rows.iter().map(|r| r.source_name.as_str())),
            strings(rows.iter().map(|r| r.device.as_str())),
            timestamps(rows.iter().map(|r| r.start_date)),
            timestamps(rows.iter().map(|r| r.end_date)),
            timestamps(rows.iter().map(|r| r.creation_date)),
            strings(rows.iter().map(|r| r.unit.as_str())),
            floats(rows.iter().map(|r| r.value)),
            strings(rows.iter().map(|r| r.text_value.as_str())),
        ]
    }
}

impl ColumnarRow for WorkoutRow {
    const TABLE: &'static str = WORKOUTS_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("type", DataType::Utf8, false),
            Field::new("duration", DataType::Float64, false),
            Field::new("durationUnit", DataType::Utf8, false),
            Field::new("sourceName", DataType::Utf8, false),
            timestamp_field("startDate"),
            timestamp_field("endDate"),
            timestamp_field("creationDate"),
        ]))
    }

    fn columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            strings(rows.iter().map(|r| r.activity_type.as_str())),
            floats(rows.iter().map(|r| r.duration)),
            strings(rows.iter().map(|r| r.duration_unit.as_str())),
            strings(rows.iter().map(|r| r.source_name.as_str())),
            timestamps(rows.iter().map(|r| r.start_date)),
            timestamps(rows.iter().map(|r| r.end_date)),
            timestamps(rows.iter().map(|r| r.creation_date)),
        ]
    }
}

impl ColumnarRow for WorkoutStatRow {
    const TABLE: &'static str = WORKOUT_STATS_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("type", DataType::Utf8, false),
            timestamp_field("startDate"),
            timestamp_field("endDate"),
            Field::new("sum", DataType::Float64, false),
            Field::new("average", DataType::Float64, false),
            Field::new("maximum", DataType::Float64, false),
            Field::new("minimum", DataType::Float64, false),
            Field::new("unit", DataType::Utf8, false),
        ]))
    }

    fn columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            strings(rows.iter().map(|r| r.stat_type.as_str())),
            timestamps(rows.iter().map(|r| r.start_date)),
            timestamps(rows.iter().map(|r| r.end_date)),
            floats(rows.iter().map(|r| r.sum)),
            floats(rows.iter().map(|r| r.average)),
            floats(rows.iter().map(|r| r.maximum)),
            floats(rows.iter().map(|r| r.minimum)),
            strings(rows.iter().map(|r| r.unit.as_str())),
        ]
    }
}

/// A finished table file in the scratch dir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFile {
    pub table: &'static str,
    pub path: PathBuf,
    pub rows: usize,
}

fn writer_properties(batch_rows: usize) -> Result<WriterProperties, ConversionError> {
    let level = ZstdLevel::try_new(1).map_err(|e| ConversionError::Write(e.to_string()))?;
    Ok(WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .set_max_row_group_size(batch_rows)
        .build())
}

/// Buffers rows and flushes them as record batches. The file is only
/// created on the first flush, so a table that never sees a row leaves
/// nothing behind unless it is required.
pub struct TableWriter<R: ColumnarRow> {
    path: PathBuf,
    batch_rows: usize,
    buffer: Vec<R>,
    writer: Option<ArrowWriter<File>>,
    rows: usize,
}

impl<R: ColumnarRow> TableWriter<R> {
    pub fn new(path: PathBuf, batch_rows: usize) -> Self {
        let batch_rows = batch_rows.max(1);
        Self {
            path,
            batch_rows,
            buffer: Vec::with_capacity(batch_rows.min(8192)),
            writer: None,
            rows: 0,
        }
    }

    pub fn push(&mut self, row: R) -> Result<(), ConversionError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_rows {
            self.flush()?;
        }
        Ok(())
    }

    fn open(&mut self) -> Result<&mut ArrowWriter<File>, ConversionError> {
        if self.writer.is_none() {
            let file = File::create(&self.path)?;
            let props = writer_properties(self.batch_rows)?;
            let writer = ArrowWriter::try_new(file, R::schema(), Some(props))
                .map_err(|e| ConversionError::Write(e.to_string()))?;
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| ConversionError::Write(format!("{} writer unavailable", R::TABLE)))
    }

    fn flush(&mut self) -> Result<(), ConversionError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = RecordBatch::try_new(R::schema(), R::columns(&self.buffer))
            .map_err(|e| ConversionError::Write(e.to_string()))?;
        self.open()?
            .write(&batch)
            .map_err(|e| ConversionError::Write(e.to_string()))?;
        self.rows += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    /// Flush and close. Returns `None` for an optional table that stayed empty.
    pub fn finish(mut self, required: bool) -> Result<Option<TableFile>, ConversionError> {
        self.flush()?;
        if self.writer.is_none() && !required {
            return Ok(None);
        }
        self.open()?;
        if let Some(writer) = self.writer.take() {
            writer
                .close()
                .map_err(|e| ConversionError::Write(e.to_string()))?;
        }
        Ok(Some(TableFile {
            table: R::TABLE,
            path: self.path,
            rows: self.rows,
        }))
    }
}

/// The three tables of one export
pub struct ExportWriter {
    records: TableWriter<RecordRow>,
    workouts: TableWriter<WorkoutRow>,
    workout_stats: TableWriter<WorkoutStatRow>,
}

impl ExportWriter {
    pub fn new(out_dir: &Path, batch_rows: usize) -> Self {
        Self {
            records: TableWriter::new(out_dir.join("records.parquet"), batch_rows),
            workouts: TableWriter::new(out_dir.join("workouts.parquet"), batch_rows),
            workout_stats: TableWriter::new(out_dir.join("workout_stats.parquet"), batch_rows),
        }
    }

    /// Records first; the others only when they hold rows
    pub fn finish(self) -> Result<Vec<TableFile>, ConversionError> {
        let mut files = Vec::with_capacity(3);
        files.extend(self.records.finish(true)?);
        files.extend(self.workouts.finish(false)?);
        files.extend(self.workout_stats.finish(false)?);
        Ok(files)
    }
}

impl RowSink for ExportWriter {
    fn record(&mut self, row: RecordRow) -> Result<(), ConversionError> {
        self.records.push(row)
    }

    fn workout(&mut self, row: WorkoutRow) -> Result<(), ConversionError> {
        self.workouts.push(row)
    }

    fn workout_stat(&mut self, row: WorkoutStatRow) -> Result<(), ConversionError> {
        self.workout_stats.push(row)
    }
}

/// Convert a downloaded export into table files under `out_dir`. Blocking.
pub fn convert_export(
    input: &Path,
    out_dir: &Path,
    batch_rows: usize,
) -> Result<Vec<TableFile>, ConversionError> {
    let source = BufReader::new(File::open(input)?);
    let mut writer = ExportWriter::new(out_dir, batch_rows);
    health_xml::parse_export(source, &mut writer)?;
    writer.finish()
}
