use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use thiserror::Error;

use requestflow_core::errors::StoreError;

pub mod attachment;
pub mod request;
pub mod user;

pub use attachment::SqlAttachmentRepository;
pub use request::SqlWorkflowStore;
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
            RepositoryError::Duplicate(message) => Self::Duplicate(message),
        }
    }
}

/// Fixed-width UTC timestamps so lexical order in SQL matches time order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drops precision the column cannot hold, so returned values equal re-reads.
pub(crate) fn storage_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(6)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_column<T>(column: &str, raw: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional<T>(column: &str, raw: Option<String>) -> Result<Option<T>, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| decode_column(column, &value)).transpose()
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
