use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Outcomes a caller is expected to handle, plus the [`StoreError`] catch-all.
#[derive(Debug, Error)]
pub enum Error {
    /// No visible (existing and unexpired) row matched.
    #[error("no matching record found")]
    NoRecord,
    /// Unknown email or wrong password. The two are deliberately not told apart.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Whether this is an operational fault rather than a business outcome.
    /// Only these are worth logging with detail at the boundary.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("password hashing error: {0}")]
    Hash(#[from] argon2::password_hash::Error),
    #[error("invalid password hashing parameters: {0}")]
    HashParams(#[from] argon2::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("expiry of {0} days is out of range")]
    ExpiryOutOfRange(u32),
}

// Lets `?` lift lower-level failures straight into `Error::Store`.
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.into())
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Self {
        Error::Store(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_operational() {
        assert!(!Error::NoRecord.is_store());
        assert!(!Error::InvalidCredentials.is_store());
        assert!(!Error::DuplicateEmail.is_store());
        assert!(Error::Store(StoreError::Cancelled).is_store());
    }

    #[test]
    fn sqlite_errors_lift_into_store() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Store(StoreError::Sqlite(_))));
    }
}
