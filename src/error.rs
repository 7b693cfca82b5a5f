//! # Error Types
//!
//! Errors surfaced by the permission sync job store. Dedup drops are not
//! errors; everything else maps onto one of the variants below.

use thiserror::Error;

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The referenced row does not exist or is not in the state the operation requires.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller supplied conflicting or malformed options.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage failure, root cause preserved.
    #[error("database error: {0}")]
    Database(#[source] sea_orm::DbErr),
}

impl RepositoryError {
    /// Wraps a SeaORM error; usable directly in `map_err`.
    pub fn database_error(err: sea_orm::DbErr) -> Self {
        Self::Database(err)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the underlying storage error is a uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(err) => is_unique_violation(err),
            _ => false,
        }
    }
}

impl From<sea_orm::DbErr> for RepositoryError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err)
    }
}

/// Detects unique constraint violations across the supported backends.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    match db_error.code() {
        Some(code) => {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        }
        None => false,
    }
}
