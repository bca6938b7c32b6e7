//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl MetadataError {
    /// Map a unique-constraint violation to `AlreadyExists`, leaving any
    /// other database error as is.
    ///
    /// PostgreSQL reports SQLSTATE 23505; SQLite reports extended code 2067
    /// (or 1555 for a primary key) with a "UNIQUE constraint failed" message.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && (db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint"))
        {
            return MetadataError::AlreadyExists(what.into());
        }
        MetadataError::Database(err)
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Config(format!("I/O error: {err}"))
    }
}

impl From<tessera_core::Error> for MetadataError {
    fn from(err: tessera_core::Error) -> Self {
        MetadataError::Corrupt(err.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_pass_through() {
        let err = MetadataError::from_insert(sqlx::Error::RowNotFound, "chunk");
        assert!(matches!(err, MetadataError::Database(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_core_errors_are_corrupt_rows() {
        let err: MetadataError = tessera_core::Error::InvalidState("bogus".to_string()).into();
        assert!(err.to_string().contains("bogus"));
    }
}
