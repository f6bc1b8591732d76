//! Request store: borrow request rows and the compare-and-swap primitive.
//!
//! # Responsibility
//! - Persist borrow requests across their whole lifecycle.
//! - Provide state transitions as compare-and-swap writes so concurrent
//!   callers acting on the same request cannot both win.
//!
//! # Invariants
//! - Requests are never deleted; terminal rows stay queryable forever.
//! - `transition_state` writes date stamps and the new state in the same
//!   statement, so a row is never observed half-transitioned.

use crate::model::book::BookId;
use crate::model::request::{BorrowRequest, BorrowerId, RequestId, RequestState};
use crate::repo::{ensure_schema_ready, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

const REQUEST_SELECT_SQL: &str = "SELECT
    borrow_requests.id AS id,
    borrow_requests.book_id AS book_id,
    borrow_requests.borrower_id AS borrower_id,
    borrow_requests.state AS state,
    borrow_requests.created_at AS created_at,
    borrow_requests.borrow_date AS borrow_date,
    borrow_requests.expected_return_date AS expected_return_date,
    borrow_requests.return_date AS return_date
FROM borrow_requests";

const LIST_DEFAULT_LIMIT: u32 = 50;
const LIST_LIMIT_MAX: u32 = 200;

/// Date fields written together with a state transition.
///
/// Only `Some` fields are touched; existing stamps are never cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionStamp {
    pub borrow_date: Option<NaiveDate>,
    pub expected_return_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
}

/// Filter options for the read-only request listing projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestListQuery {
    pub state: Option<RequestState>,
    pub borrower_id: Option<BorrowerId>,
    pub book_id: Option<BookId>,
    /// Case-insensitive substring match against the joined book title.
    pub title_match: Option<String>,
    /// Maximum rows to return. Defaults to 50 and clamps to 200.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Store interface for borrow request persistence.
pub trait RequestRepository {
    fn create_request(&self, request: &BorrowRequest) -> RepoResult<RequestId>;
    fn get_request(&self, id: RequestId) -> RepoResult<Option<BorrowRequest>>;
    /// Compare-and-swap transition: succeeds only while the row is in one
    /// of `allowed_from`, otherwise fails with `StaleState`.
    fn transition_state(
        &self,
        id: RequestId,
        allowed_from: &[RequestState],
        to: RequestState,
        stamp: &TransitionStamp,
    ) -> RepoResult<()>;
    /// Approved requests strictly past their expected return date.
    fn overdue_candidates(&self, as_of: NaiveDate) -> RepoResult<Vec<(RequestId, NaiveDate)>>;
    fn list_requests(&self, query: &RequestListQuery) -> RepoResult<Vec<BorrowRequest>>;
}

/// SQLite-backed request store.
pub struct SqliteRequestRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRequestRepository<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "borrow_requests")?;
        Ok(Self { conn })
    }

    /// Skips the readiness probe; the caller already verified the schema.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RequestRepository for SqliteRequestRepository<'_> {
    fn create_request(&self, request: &BorrowRequest) -> RepoResult<RequestId> {
        self.conn.execute(
            "INSERT INTO borrow_requests (
                id,
                book_id,
                borrower_id,
                state,
                created_at,
                borrow_date,
                expected_return_date,
                return_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                request.id.to_string(),
                request.book_id.to_string(),
                request.borrower_id.to_string(),
                state_to_db(request.state),
                request.created_at,
                request.borrow_date,
                request.expected_return_date,
                request.return_date,
            ],
        )?;

        Ok(request.id)
    }

    fn get_request(&self, id: RequestId) -> RepoResult<Option<BorrowRequest>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{REQUEST_SELECT_SQL} WHERE borrow_requests.id = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_request_row(row)?));
        }

        Ok(None)
    }

    fn transition_state(
        &self,
        id: RequestId,
        allowed_from: &[RequestState],
        to: RequestState,
        stamp: &TransitionStamp,
    ) -> RepoResult<()> {
        if allowed_from.is_empty() {
            return Err(RepoError::InvalidData(
                "transition_state requires at least one allowed source state".to_string(),
            ));
        }

        let mut sql = String::from("UPDATE borrow_requests SET state = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(state_to_db(to).to_string())];

        if let Some(date) = stamp.borrow_date {
            sql.push_str(", borrow_date = ?");
            bind_values.push(Value::Text(date.to_string()));
        }
        if let Some(date) = stamp.expected_return_date {
            sql.push_str(", expected_return_date = ?");
            bind_values.push(Value::Text(date.to_string()));
        }
        if let Some(date) = stamp.return_date {
            sql.push_str(", return_date = ?");
            bind_values.push(Value::Text(date.to_string()));
        }

        sql.push_str(" WHERE id = ?");
        bind_values.push(Value::Text(id.to_string()));

        sql.push_str(" AND state IN (");
        for (index, state) in allowed_from.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            bind_values.push(Value::Text(state_to_db(*state).to_string()));
        }
        sql.push_str(");");

        let changed = self
            .conn
            .execute(&sql, params_from_iter(bind_values))?;

        if changed == 0 {
            return match self.current_state(id)? {
                Some(actual) => Err(RepoError::StaleState { id, actual }),
                None => Err(RepoError::RequestNotFound(id)),
            };
        }

        Ok(())
    }

    fn overdue_candidates(&self, as_of: NaiveDate) -> RepoResult<Vec<(RequestId, NaiveDate)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, expected_return_date
             FROM borrow_requests
             WHERE state = 'approved'
               AND expected_return_date IS NOT NULL
               AND expected_return_date < ?1
             ORDER BY expected_return_date ASC, id ASC;",
        )?;

        let mut rows = stmt.query(params![as_of])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            let id = parse_uuid(&id_text, "borrow_requests.id")?;
            let due: NaiveDate = row.get(1)?;
            candidates.push((id, due));
        }

        Ok(candidates)
    }

    fn list_requests(&self, query: &RequestListQuery) -> RepoResult<Vec<BorrowRequest>> {
        let mut sql = String::from(REQUEST_SELECT_SQL);
        let mut bind_values: Vec<Value> = Vec::new();

        if query.title_match.is_some() {
            sql.push_str(" INNER JOIN books ON books.id = borrow_requests.book_id");
        }
        sql.push_str(" WHERE 1 = 1");

        if let Some(state) = query.state {
            sql.push_str(" AND borrow_requests.state = ?");
            bind_values.push(Value::Text(state_to_db(state).to_string()));
        }
        if let Some(borrower_id) = query.borrower_id {
            sql.push_str(" AND borrow_requests.borrower_id = ?");
            bind_values.push(Value::Text(borrower_id.to_string()));
        }
        if let Some(book_id) = query.book_id {
            sql.push_str(" AND borrow_requests.book_id = ?");
            bind_values.push(Value::Text(book_id.to_string()));
        }
        if let Some(term) = query.title_match.as_deref() {
            sql.push_str(" AND books.title LIKE ? ESCAPE '\\'");
            bind_values.push(Value::Text(format!("%{}%", escape_like(term))));
        }

        sql.push_str(" ORDER BY borrow_requests.created_at DESC, borrow_requests.id ASC");

        let limit = query.limit.unwrap_or(LIST_DEFAULT_LIMIT).min(LIST_LIMIT_MAX);
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut requests = Vec::new();
        while let Some(row) = rows.next()? {
            requests.push(parse_request_row(row)?);
        }

        Ok(requests)
    }
}

impl SqliteRequestRepository<'_> {
    fn current_state(&self, id: RequestId) -> RepoResult<Option<RequestState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state FROM borrow_requests WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;

        if let Some(row) = rows.next()? {
            let state_text: String = row.get(0)?;
            let state = parse_state(&state_text).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid state `{state_text}` in borrow_requests.state"
                ))
            })?;
            return Ok(Some(state));
        }

        Ok(None)
    }
}

fn parse_request_row(row: &Row<'_>) -> RepoResult<BorrowRequest> {
    let id_text: String = row.get("id")?;
    let book_id_text: String = row.get("book_id")?;
    let borrower_id_text: String = row.get("borrower_id")?;

    let state_text: String = row.get("state")?;
    let state = parse_state(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid state `{state_text}` in borrow_requests.state"
        ))
    })?;

    Ok(BorrowRequest {
        id: parse_uuid(&id_text, "borrow_requests.id")?,
        book_id: parse_uuid(&book_id_text, "borrow_requests.book_id")?,
        borrower_id: parse_uuid(&borrower_id_text, "borrow_requests.borrower_id")?,
        state,
        created_at: row.get("created_at")?,
        borrow_date: row.get("borrow_date")?,
        expected_return_date: row.get("expected_return_date")?,
        return_date: row.get("return_date")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn state_to_db(state: RequestState) -> &'static str {
    match state {
        RequestState::Pending => "pending",
        RequestState::Approved => "approved",
        RequestState::Rejected => "rejected",
        RequestState::ToReturn => "to_return",
        RequestState::Returned => "returned",
        RequestState::Cancelled => "cancelled",
    }
}

fn parse_state(value: &str) -> Option<RequestState> {
    match value {
        "pending" => Some(RequestState::Pending),
        "approved" => Some(RequestState::Approved),
        "rejected" => Some(RequestState::Rejected),
        "to_return" => Some(RequestState::ToReturn),
        "returned" => Some(RequestState::Returned),
        "cancelled" => Some(RequestState::Cancelled),
        _ => None,
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
