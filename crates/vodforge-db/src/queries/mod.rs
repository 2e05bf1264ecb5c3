//! Database query operations.
//!
//! Each submodule covers one table. Functions take a plain `&Connection` so
//! they compose inside a [`crate::transaction`] unit of work (a rusqlite
//! `Transaction` derefs to `Connection`).

pub mod assets;
pub mod file_removals;
pub mod job_counts;
pub mod jobs;
pub mod renditions;
pub mod storyboards;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ErrorCode, Row};
use vodforge_common::Error;

/// Fixed-width RFC 3339 timestamp, so stored values sort chronologically.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> DateTime<Utc> {
    // Round-trip through the stored precision so returned models equal reloaded ones.
    let now = Utc::now();
    DateTime::parse_from_rfc3339(&timestamp(now))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Decode a text column through `FromStr`.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: ToString,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into()))
}

pub(crate) fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: ToString,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse().map_err(|e: T::Err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
        })
    })
    .transpose()
}

pub(crate) fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_optional_time(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn unsigned(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

/// Whether SQLite reported lock contention rather than a real failure.
pub fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Convert a rusqlite error, mapping lock contention to a retryable conflict.
pub fn db_error(e: rusqlite::Error) -> Error {
    if is_busy(&e) {
        Error::conflict(e.to_string())
    } else {
        Error::database(e.to_string())
    }
}
