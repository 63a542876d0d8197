use thiserror::Error;

/// Errors produced by the database layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The row (message, channel, or cursor) does not exist.
    #[error("Record not found")]
    NotFound,

    /// The message carries a tombstone and can no longer change.
    #[error("Message is deleted")]
    Tombstoned,

    #[error("DB lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("Corrupt column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

impl DbError {
    /// Busy and locked databases clear up on their own. A poisoned lock
    /// stays poisoned, so it is not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use crate::Database;

    #[test]
    fn busy_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(DbError::from(busy).is_transient());
        assert!(!DbError::NotFound.is_transient());
    }

    #[test]
    fn poisoned_lock_is_permanent() {
        let db = Database::open_in_memory().unwrap();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            db.with_conn(|_| -> Result<()> { panic!("boom") })
        }));

        let err = db.with_conn(|_| Ok(())).unwrap_err();
        assert!(matches!(err, DbError::LockPoisoned));
        assert!(!err.is_transient());

        // Still poisoned on the next call
        assert!(matches!(db.with_tx(|_| Ok(())), Err(DbError::LockPoisoned)));
    }
}
