//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data-access contracts for the inventory ledger, the request
//!   store and the audit log.
//! - Isolate SQLite query details from lifecycle orchestration.
//!
//! # Invariants
//! - Repositories are passive: they expose atomic read/compare-and-write
//!   primitives and never decide transitions themselves.
//! - Repository APIs return semantic errors (`BookNotFound`, `StaleState`,
//!   `InsufficientInventory`) in addition to DB transport errors.

use crate::db::DbError;
use crate::model::book::{BookId, BookValidationError};
use crate::model::request::{RequestId, RequestState};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod audit_repo;
pub mod book_repo;
pub mod request_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence and query error shared by all repositories.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Validation(BookValidationError),
    BookNotFound(BookId),
    RequestNotFound(RequestId),
    /// Compare-and-swap precondition failed: the request is no longer in
    /// any of the expected states.
    StaleState {
        id: RequestId,
        actual: RequestState,
    },
    /// No copy left to reserve.
    InsufficientInventory(BookId),
    /// Connection has no applied migrations.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::BookNotFound(id) => write!(f, "book not found: {id}"),
            Self::RequestNotFound(id) => write!(f, "borrow request not found: {id}"),
            Self::StaleState { id, actual } => write!(
                f,
                "borrow request {id} changed state concurrently (now {actual:?})"
            ),
            Self::InsufficientInventory(id) => {
                write!(f, "no available copies left for book {id}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version is {actual_version}, expected {expected_version}; run migrations first"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "required table `{table}` is missing")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<BookValidationError> for RepoError {
    fn from(value: BookValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Verifies that migrations ran and the required table exists.
///
/// Called by every repository `try_new` so misconfigured connections fail
/// fast instead of failing on first use.
pub(crate) fn ensure_schema_ready(
    conn: &Connection,
    table: &'static str,
) -> RepoResult<()> {
    let expected = crate::db::migrations::latest_version();
    let actual = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    if actual < expected {
        return Err(RepoError::UninitializedConnection {
            expected_version: expected,
            actual_version: actual,
        });
    }

    let present: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get(0),
    )?;
    if !present {
        return Err(RepoError::MissingRequiredTable(table));
    }

    Ok(())
}
