//! SQL access for machines, locations, tickets and the identity directory.
//!
//! Row functions take a `&mut SqliteConnection` so they run the same way on a
//! pooled connection and inside a transaction.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use equiptrack_core::store::StoreError;

pub mod directory;
pub mod location;
pub mod machine;
pub mod ticket;

pub use directory::SqlIdentityDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid value for `{column}`: `{value}`")))
}

pub(crate) fn parse_optional_enum<T>(
    column: &str,
    value: Option<String>,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>, RepositoryError> {
    value.map(|value| parse_enum(column, &value, parse)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .map(|date| {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|error| {
                RepositoryError::Decode(format!("invalid date in `{column}`: `{date}` ({error})"))
            })
        })
        .transpose()
}

pub(crate) fn format_optional_date(value: Option<NaiveDate>) -> Option<String> {
    value.map(|date| date.format("%Y-%m-%d").to_string())
}
