//! Inventory ledger: book rows and atomic copy-count primitives.
//!
//! # Responsibility
//! - Persist catalog books and their copy counts.
//! - Provide the check-and-decrement / saturating-increment primitives the
//!   lifecycle engine builds approvals and returns on.
//!
//! # Invariants
//! - `available_copies` never goes negative and never exceeds
//!   `total_copies`; both bounds are enforced in the SQL itself, with the
//!   schema `CHECK` constraint as backstop.
//! - A release beyond `total_copies` is reported, never applied silently.

use crate::model::book::{Book, BookId};
use crate::repo::{ensure_schema_ready, RepoError, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const BOOK_SELECT_SQL: &str = "SELECT
    id,
    title,
    total_copies,
    available_copies,
    created_at,
    updated_at
FROM books";

/// Result of a copy release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// One copy went back on the shelf.
    Released,
    /// Every copy was already on the shelf; nothing was changed. Upstream
    /// treats this as a double-return anomaly.
    AlreadyAtCapacity,
}

/// Ledger interface used exclusively by the lifecycle engine.
pub trait BookRepository {
    fn insert_book(&self, book: &Book) -> RepoResult<BookId>;
    fn get_book(&self, id: BookId) -> RepoResult<Option<Book>>;
    fn list_books(&self) -> RepoResult<Vec<Book>>;
    /// Atomic check-and-decrement of `available_copies`.
    fn try_reserve_copy(&self, id: BookId, now: DateTime<Utc>) -> RepoResult<()>;
    /// Atomic saturating increment of `available_copies`.
    fn release_copy(&self, id: BookId, now: DateTime<Utc>) -> RepoResult<ReleaseOutcome>;
    /// Rewrites both copy counters, keeping outstanding loans intact.
    fn resize_book(
        &self,
        id: BookId,
        total_copies: u32,
        available_copies: u32,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;
}

/// SQLite-backed inventory ledger.
pub struct SqliteBookRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBookRepository<'conn> {
    /// Constructs a ledger from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "books")?;
        Ok(Self { conn })
    }

    /// Skips the readiness probe; the caller already verified the schema.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl BookRepository for SqliteBookRepository<'_> {
    fn insert_book(&self, book: &Book) -> RepoResult<BookId> {
        book.validate()?;

        self.conn.execute(
            "INSERT INTO books (
                id,
                title,
                total_copies,
                available_copies,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                book.id.to_string(),
                book.title.as_str(),
                book.total_copies,
                book.available_copies,
                book.created_at,
                book.updated_at,
            ],
        )?;

        Ok(book.id)
    }

    fn get_book(&self, id: BookId) -> RepoResult<Option<Book>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BOOK_SELECT_SQL} WHERE id = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_book_row(row)?));
        }

        Ok(None)
    }

    fn list_books(&self) -> RepoResult<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BOOK_SELECT_SQL} ORDER BY title ASC, id ASC;"))?;

        let mut rows = stmt.query([])?;
        let mut books = Vec::new();
        while let Some(row) = rows.next()? {
            books.push(parse_book_row(row)?);
        }

        Ok(books)
    }

    fn try_reserve_copy(&self, id: BookId, now: DateTime<Utc>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE books
             SET available_copies = available_copies - 1,
                 updated_at = ?2
             WHERE id = ?1
               AND available_copies > 0;",
            params![id.to_string(), now],
        )?;

        if changed == 0 {
            return if self.book_exists(id)? {
                Err(RepoError::InsufficientInventory(id))
            } else {
                Err(RepoError::BookNotFound(id))
            };
        }

        Ok(())
    }

    fn release_copy(&self, id: BookId, now: DateTime<Utc>) -> RepoResult<ReleaseOutcome> {
        let changed = self.conn.execute(
            "UPDATE books
             SET available_copies = available_copies + 1,
                 updated_at = ?2
             WHERE id = ?1
               AND available_copies < total_copies;",
            params![id.to_string(), now],
        )?;

        if changed == 0 {
            return if self.book_exists(id)? {
                Ok(ReleaseOutcome::AlreadyAtCapacity)
            } else {
                Err(RepoError::BookNotFound(id))
            };
        }

        Ok(ReleaseOutcome::Released)
    }

    fn resize_book(
        &self,
        id: BookId,
        total_copies: u32,
        available_copies: u32,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        if available_copies > total_copies {
            return Err(RepoError::InvalidData(format!(
                "resize would leave available ({available_copies}) above total ({total_copies})"
            )));
        }

        let changed = self.conn.execute(
            "UPDATE books
             SET total_copies = ?2,
                 available_copies = ?3,
                 updated_at = ?4
             WHERE id = ?1;",
            params![id.to_string(), total_copies, available_copies, now],
        )?;

        if changed == 0 {
            return Err(RepoError::BookNotFound(id));
        }

        Ok(())
    }
}

impl SqliteBookRepository<'_> {
    fn book_exists(&self, id: BookId) -> RepoResult<bool> {
        let present: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM books WHERE id = ?1);",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(present)
    }
}

fn parse_book_row(row: &Row<'_>) -> RepoResult<Book> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in books.id"))
    })?;

    let book = Book {
        id,
        title: row.get("title")?,
        total_copies: row.get("total_copies")?,
        available_copies: row.get("available_copies")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    book.validate()
        .map_err(|err| RepoError::InvalidData(format!("books row {id}: {err}")))?;
    Ok(book)
}
