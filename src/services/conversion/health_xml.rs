//! Streaming reader for Apple Health `export.xml`.
//!
//! Only three element kinds matter: `<Record>`, `<Workout>` and the
//! `<WorkoutStatistics>` children of a workout. Everything else is skipped
//! without being buffered.

use chrono::DateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::BufRead;

use super::ConversionError;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordRow {
    pub record_type: String,
    pub source_version: String,
    pub source_name: String,
    pub device: String,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub creation_date: Option<i64>,
    pub unit: String,
    pub value: f64,
    pub text_value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutRow {
    pub activity_type: String,
    pub duration: f64,
    pub duration_unit: String,
    pub source_name: String,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub creation_date: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutStatRow {
    pub stat_type: String,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub sum: f64,
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
    pub unit: String,
}

/// Receives rows in document order
pub trait RowSink {
    fn record(&mut self, row: RecordRow) -> Result<(), ConversionError>;
    fn workout(&mut self, row: WorkoutRow) -> Result<(), ConversionError>;
    fn workout_stat(&mut self, row: WorkoutStatRow) -> Result<(), ConversionError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
    pub records: usize,
    pub workouts: usize,
    pub workout_stats: usize,
}

/// `"2024-01-02 03:04:05 +0100"` as microseconds since the epoch (UTC)
pub fn parse_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_str(value, DATE_FORMAT)
        .ok()
        .map(|d| d.timestamp_micros())
}

fn parse_number(value: Option<&String>) -> f64 {
    value.and_then(|v| v.trim().parse::<f64>().ok()).unwrap_or(0.0)
}

type Attributes = HashMap<String, String>;

fn read_attributes(e: &BytesStart<'_>) -> Result<Attributes, ConversionError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ConversionError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|e| ConversionError::Parse(e.to_string()))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn take(attrs: &mut Attributes, name: &str) -> String {
    attrs.remove(name).unwrap_or_default()
}

fn date(attrs: &Attributes, name: &str) -> Option<i64> {
    attrs.get(name).and_then(|v| parse_timestamp(v))
}

fn record_row(mut attrs: Attributes) -> RecordRow {
    let value = parse_number(attrs.get("value"));
    RecordRow {
        start_date: date(&attrs, "startDate"),
        end_date: date(&attrs, "endDate"),
        creation_date: date(&attrs, "creationDate"),
        record_type: take(&mut attrs, "type"),
        source_version: take(&mut attrs, "sourceVersion"),
        source_name: take(&mut attrs, "sourceName"),
        device: take(&mut attrs, "device"),
        unit: take(&mut attrs, "unit"),
        value,
        text_value: take(&mut attrs, "value"),
    }
}

fn workout_row(mut attrs: Attributes) -> WorkoutRow {
    WorkoutRow {
        duration: parse_number(attrs.get("duration")),
        start_date: date(&attrs, "startDate"),
        end_date: date(&attrs, "endDate"),
        creation_date: date(&attrs, "creationDate"),
        activity_type: take(&mut attrs, "workoutActivityType"),
        duration_unit: take(&mut attrs, "durationUnit"),
        source_name: take(&mut attrs, "sourceName"),
    }
}

fn workout_stat_row(mut attrs: Attributes) -> WorkoutStatRow {
    WorkoutStatRow {
        start_date: date(&attrs, "startDate"),
        end_date: date(&attrs, "endDate"),
        sum: parse_number(attrs.get("sum")),
        average: parse_number(attrs.get("average")),
        maximum: parse_number(attrs.get("maximum")),
        minimum: parse_number(attrs.get("minimum")),
        stat_type: take(&mut attrs, "type"),
        unit: take(&mut attrs, "unit"),
    }
}

/// Walk the document once, pushing every relevant element into `sink`.
///
/// Malformed XML fails with `ConversionError::Parse`, as does input that
/// contains no element at all.
pub fn parse_export<R: BufRead, S: RowSink>(
    source: R,
    sink: &mut S,
) -> Result<ParseStats, ConversionError> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stats = ParseStats::default();
    let mut saw_element = false;
    let mut workout_depth: Option<usize> = None;
    let mut depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            ConversionError::Parse(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(e) => {
                saw_element = true;
                depth += 1;
                match e.name().as_ref() {
                    b"Record" => {
                        sink.record(record_row(read_attributes(&e)?))?;
                        stats.records += 1;
                    }
                    b"Workout" => {
                        sink.workout(workout_row(read_attributes(&e)?))?;
                        stats.workouts += 1;
                        workout_depth = Some(depth);
                    }
                    b"WorkoutStatistics" if workout_depth == Some(depth - 1) => {
                        sink.workout_stat(workout_stat_row(read_attributes(&e)?))?;
                        stats.workout_stats += 1;
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                saw_element = true;
                match e.name().as_ref() {
                    b"Record" => {
                        sink.record(record_row(read_attributes(&e)?))?;
                        stats.records += 1;
                    }
                    b"Workout" => {
                        sink.workout(workout_row(read_attributes(&e)?))?;
                        stats.workouts += 1;
                    }
                    b"WorkoutStatistics" if workout_depth == Some(depth) => {
                        sink.workout_stat(workout_stat_row(read_attributes(&e)?))?;
                        stats.workout_stats += 1;
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                if workout_depth == Some(depth) {
                    workout_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof if depth > 0 => {
                return Err(ConversionError::Parse(format!(
                    "unexpected end of document with {} element(s) still open",
                    depth
                )));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_element {
        return Err(ConversionError::Parse(
            "document contains no elements".to_string(),
        ));
    }

    Ok(stats)
}
