//! Object key layout.
//!
//! Inbound uploads live under `{user_id}/raw/{name}`; conversion output lands at
//! `{user_id}/processed/{stem}.parquet`. Both segments only ever contain ASCII
//! alphanumerics, `.`, `-` and `_`.

use chrono::{DateTime, Utc};

use crate::models::FileType;

pub const RAW_SEGMENT: &str = "raw";
pub const PROCESSED_SEGMENT: &str = "processed";
pub const PROCESSED_EXTENSION: &str = "parquet";

/// Characters permitted in a key segment
pub fn is_key_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Strip everything outside the permitted set
pub fn sanitize_segment(value: &str) -> String {
    value.chars().filter(|c| is_key_safe(*c)).collect()
}

/// Derive the raw upload key. Pure given `now`; the instant is only used when
/// the filename is absent or sanitizes to nothing usable.
pub fn raw_key(
    user_id: &str,
    filename: Option<&str>,
    file_type: FileType,
    now: DateTime<Utc>,
) -> String {
    let user = sanitize_segment(user_id);
    let name = filename
        .map(sanitize_segment)
        .filter(|n| !n.chars().all(|c| c == '.'))
        .unwrap_or_else(|| fallback_name(file_type, now));

    format!("{}/{}/{}", user, RAW_SEGMENT, name)
}

fn fallback_name(file_type: FileType, now: DateTime<Utc>) -> String {
    format!(
        "{}.{}",
        now.format("%Y%m%dT%H%M%S%.6fZ"),
        file_type.extension()
    )
}

/// Destination key for a converted object: the `raw` segment becomes
/// `processed` and the extension is swapped. Returns `None` for keys outside
/// the raw layout.
pub fn processed_key(raw: &str) -> Option<String> {
    let (prefix, name) = raw.split_once(&format!("/{}/", RAW_SEGMENT))?;
    if prefix.is_empty() || name.is_empty() || name.ends_with('/') {
        return None;
    }

    let stem = match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => name,
    };

    Some(format!(
        "{}/{}/{}.{}",
        prefix, PROCESSED_SEGMENT, stem, PROCESSED_EXTENSION
    ))
}

/// Sibling key for an auxiliary table next to the main processed artifact,
/// e.g. `1/processed/export.workouts.parquet`.
pub fn table_key(processed: &str, table: &str) -> String {
    let suffix = format!(".{}", PROCESSED_EXTENSION);
    let stem = processed.strip_suffix(&suffix).unwrap_or(processed);
    format!("{}.{}{}", stem, table, suffix)
}

/// Keys arrive form-encoded in bucket notifications ('+' for space, %XX escapes)
pub fn decode_notification_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    percent_encoding::percent_decode_str(&spaced)
        .decode_utf8_lossy()
        .into_owned()
}
