//! Borrow-request lifecycle engine.
//!
//! # Responsibility
//! - Validate and apply every state transition a borrow request can make.
//! - Coordinate ledger, store and audit writes as one atomic unit per
//!   operation.
//!
//! # Invariants
//! - This engine is the only writer of `books.available_copies` and
//!   `borrow_requests.state`.
//! - Each mutating operation commits data change + audit entry together,
//!   or rolls both back.
//! - Two approvals racing for the last copy resolve to exactly one
//!   success; the loser sees `InsufficientInventory`.

use crate::model::audit::{Actor, ActorContext, AuditAction, NewAuditEntry, TargetType};
use crate::model::book::{Book, BookId};
use crate::model::request::{BorrowRequest, BorrowerId, RequestId, RequestState};
use crate::repo::audit_repo::{
    AuditLogQuery, AuditPage, AuditRepository, SqliteAuditRepository,
};
use crate::repo::book_repo::{BookRepository, ReleaseOutcome, SqliteBookRepository};
use crate::repo::request_repo::{
    RequestListQuery, RequestRepository, SqliteRequestRepository, TransitionStamp,
};
use crate::repo::RepoError;
use crate::service::clock::{Clock, SystemClock};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

/// Caller-facing failure taxonomy of the lifecycle engine.
///
/// Every variant is a distinct, stable kind so the boundary can present
/// specific guidance ("no copies available" vs "already processed").
#[derive(Debug)]
pub enum EngineError {
    BookNotFound(BookId),
    RequestNotFound(RequestId),
    /// Caller is not authorized for the requested transition.
    Forbidden { request: RequestId },
    /// The request's current state does not permit the operation.
    InvalidTransition {
        request: RequestId,
        state: RequestState,
    },
    /// Approval attempted with zero available copies.
    InsufficientInventory { book: BookId },
    InvalidInput(String),
    /// Storage transport failure; the only retry-worthy class.
    Storage(RepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BookNotFound(id) => write!(f, "book not found: {id}"),
            Self::RequestNotFound(id) => write!(f, "borrow request not found: {id}"),
            Self::Forbidden { request } => {
                write!(f, "caller is not allowed to act on request {request}")
            }
            Self::InvalidTransition { request, state } => write!(
                f,
                "request {request} is in state {state:?}, which does not permit this operation"
            ),
            Self::InsufficientInventory { book } => {
                write!(f, "no available copies left for book {book}")
            }
            Self::InvalidInput(message) => write!(f, "{message}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::BookNotFound(id) => Self::BookNotFound(id),
            RepoError::RequestNotFound(id) => Self::RequestNotFound(id),
            RepoError::StaleState { id, actual } => Self::InvalidTransition {
                request: id,
                state: actual,
            },
            RepoError::InsufficientInventory(id) => Self::InsufficientInventory { book: id },
            RepoError::Validation(err) => Self::InvalidInput(err.to_string()),
            other => Self::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(RepoError::from(value))
    }
}

/// Outcome of one due-date sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub as_of: NaiveDate,
    /// Requests transitioned `Approved -> ToReturn` by this run.
    pub marked: u64,
}

impl SweepReport {
    /// Human-readable summary returned through the due-check boundary.
    pub fn message(&self) -> String {
        match self.marked {
            0 => "No books due for return.".to_string(),
            1 => "1 book marked as due for return.".to_string(),
            n => format!("{n} books marked as due for return."),
        }
    }
}

/// The state machine driving borrow requests from submission to
/// resolution.
///
/// Each engine owns one SQLite connection; concurrent callers hold their
/// own engine over the same database file. Mutating operations run inside
/// a `BEGIN IMMEDIATE` transaction so writers serialize and the ledger's
/// conditional updates stay linearizable per book.
pub struct LifecycleEngine<C: Clock = SystemClock> {
    conn: Connection,
    clock: C,
}

impl LifecycleEngine<SystemClock> {
    /// Creates an engine on a migrated connection, using wall-clock time.
    pub fn new(conn: Connection) -> EngineResult<Self> {
        Self::with_clock(conn, SystemClock)
    }
}

impl<C: Clock> LifecycleEngine<C> {
    /// Creates an engine with an explicit time source.
    ///
    /// Fails fast when the connection has no applied schema.
    pub fn with_clock(conn: Connection, clock: C) -> EngineResult<Self> {
        SqliteBookRepository::try_new(&conn)?;
        SqliteRequestRepository::try_new(&conn)?;
        SqliteAuditRepository::try_new(&conn)?;
        Ok(Self { conn, clock })
    }

    pub(crate) fn clock_today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Submits a borrow request for review.
    ///
    /// No inventory check happens here; reservation is decided at
    /// approval time, first come, first approved.
    pub fn submit(
        &mut self,
        book_id: BookId,
        borrower_id: BorrowerId,
        ctx: &ActorContext,
    ) -> EngineResult<BorrowRequest> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let request = {
            let books = SqliteBookRepository::new_unchecked(&tx);
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let book = books
                .get_book(book_id)?
                .ok_or(EngineError::BookNotFound(book_id))?;

            let request = BorrowRequest::new(book_id, borrower_id, now);
            requests.create_request(&request)?;

            append_audit(
                &tx,
                ctx,
                AuditAction::SubmitRequest,
                TargetType::Request,
                request.id.to_string(),
                Some(format!("requested \"{}\"", book.title)),
                now,
            )?;

            request
        };
        tx.commit()?;

        info!(
            "event=request_submitted module=lifecycle status=ok request_id={} book_id={book_id} borrower_id={borrower_id}",
            request.id
        );
        Ok(request)
    }

    /// Approves a pending request, reserving one copy.
    ///
    /// Reservation, state change and audit append are one atomic unit: if
    /// two approvals race for the last copy, exactly one commits.
    pub fn approve(
        &mut self,
        request_id: RequestId,
        expected_return_date: NaiveDate,
        ctx: &ActorContext,
    ) -> EngineResult<BorrowRequest> {
        let now = self.clock.now();
        let today = self.clock.today();
        if expected_return_date < today {
            return Err(EngineError::InvalidInput(format!(
                "expected return date {expected_return_date} is before today ({today})"
            )));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let approved = {
            let books = SqliteBookRepository::new_unchecked(&tx);
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let request = requests
                .get_request(request_id)?
                .ok_or(EngineError::RequestNotFound(request_id))?;
            ensure_permits(&request, RequestState::Approved)?;

            let book = books
                .get_book(request.book_id)?
                .ok_or(EngineError::BookNotFound(request.book_id))?;

            books.try_reserve_copy(request.book_id, now)?;
            requests.transition_state(
                request_id,
                &[RequestState::Pending],
                RequestState::Approved,
                &TransitionStamp {
                    borrow_date: Some(today),
                    expected_return_date: Some(expected_return_date),
                    ..TransitionStamp::default()
                },
            )?;

            append_audit(
                &tx,
                ctx,
                AuditAction::ApproveRequest,
                TargetType::Request,
                request_id.to_string(),
                Some(format!(
                    "approved \"{}\"; due {expected_return_date}",
                    book.title
                )),
                now,
            )?;

            reload_request(&requests, request_id)?
        };
        tx.commit()?;

        info!(
            "event=request_approved module=lifecycle status=ok request_id={request_id} book_id={} due={expected_return_date}",
            approved.book_id
        );
        Ok(approved)
    }

    /// Rejects a pending request. No inventory effect.
    pub fn reject(
        &mut self,
        request_id: RequestId,
        ctx: &ActorContext,
    ) -> EngineResult<BorrowRequest> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rejected = {
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let request = requests
                .get_request(request_id)?
                .ok_or(EngineError::RequestNotFound(request_id))?;
            ensure_permits(&request, RequestState::Rejected)?;

            requests.transition_state(
                request_id,
                &[RequestState::Pending],
                RequestState::Rejected,
                &TransitionStamp::default(),
            )?;

            append_audit(
                &tx,
                ctx,
                AuditAction::RejectRequest,
                TargetType::Request,
                request_id.to_string(),
                Some("rejected while pending".to_string()),
                now,
            )?;

            reload_request(&requests, request_id)?
        };
        tx.commit()?;

        info!(
            "event=request_rejected module=lifecycle status=ok request_id={request_id}"
        );
        Ok(rejected)
    }

    /// Cancels a pending request on behalf of its borrower.
    ///
    /// Only the original borrower may cancel; anyone else gets
    /// `Forbidden` regardless of the request's state.
    pub fn cancel(
        &mut self,
        request_id: RequestId,
        ctx: &ActorContext,
    ) -> EngineResult<BorrowRequest> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let cancelled = {
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let request = requests
                .get_request(request_id)?
                .ok_or(EngineError::RequestNotFound(request_id))?;

            let caller_is_borrower = matches!(
                ctx.actor,
                Actor::Borrower { id } if id == request.borrower_id
            );
            if !caller_is_borrower {
                return Err(EngineError::Forbidden { request: request_id });
            }
            ensure_permits(&request, RequestState::Cancelled)?;

            requests.transition_state(
                request_id,
                &[RequestState::Pending],
                RequestState::Cancelled,
                &TransitionStamp::default(),
            )?;

            append_audit(
                &tx,
                ctx,
                AuditAction::CancelRequest,
                TargetType::Request,
                request_id.to_string(),
                Some("cancelled by borrower".to_string()),
                now,
            )?;

            reload_request(&requests, request_id)?
        };
        tx.commit()?;

        info!(
            "event=request_cancelled module=lifecycle status=ok request_id={request_id}"
        );
        Ok(cancelled)
    }

    /// Marks an approved or overdue loan as returned, releasing the copy.
    pub fn mark_returned(
        &mut self,
        request_id: RequestId,
        ctx: &ActorContext,
    ) -> EngineResult<BorrowRequest> {
        let now = self.clock.now();
        let today = self.clock.today();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (returned, release) = {
            let books = SqliteBookRepository::new_unchecked(&tx);
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let request = requests
                .get_request(request_id)?
                .ok_or(EngineError::RequestNotFound(request_id))?;
            if !request.is_active_loan() {
                return Err(EngineError::InvalidTransition {
                    request: request_id,
                    state: request.state,
                });
            }

            requests.transition_state(
                request_id,
                &RequestState::RETURNABLE,
                RequestState::Returned,
                &TransitionStamp {
                    return_date: Some(today),
                    ..TransitionStamp::default()
                },
            )?;
            let release = books.release_copy(request.book_id, now)?;

            append_audit(
                &tx,
                ctx,
                AuditAction::ReturnBook,
                TargetType::Request,
                request_id.to_string(),
                Some("copy returned to shelf".to_string()),
                now,
            )?;

            (reload_request(&requests, request_id)?, release)
        };
        tx.commit()?;

        if release == ReleaseOutcome::AlreadyAtCapacity {
            // Every copy was already on the shelf: a double-return slipped
            // past an upstream guard. The counter stays at total.
            warn!(
                "event=copy_release_saturated module=lifecycle status=anomaly request_id={request_id} book_id={}",
                returned.book_id
            );
        }
        info!(
            "event=request_returned module=lifecycle status=ok request_id={request_id} book_id={}",
            returned.book_id
        );
        Ok(returned)
    }

    /// Flags every approved loan strictly past its due date as `ToReturn`.
    ///
    /// Day-granularity comparison; a loan due exactly on `as_of` is not
    /// overdue. Re-running with the same or a later date never
    /// double-transitions a request, so the sweep is safe at any
    /// frequency.
    pub fn sweep_overdue(&mut self, as_of: NaiveDate) -> EngineResult<SweepReport> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let marked = {
            let requests = SqliteRequestRepository::new_unchecked(&tx);

            let mut marked: u64 = 0;
            for (request_id, due) in requests.overdue_candidates(as_of)? {
                match requests.transition_state(
                    request_id,
                    &[RequestState::Approved],
                    RequestState::ToReturn,
                    &TransitionStamp::default(),
                ) {
                    Ok(()) => {}
                    // Lost the race against a concurrent return; skipping
                    // is the correct outcome.
                    Err(RepoError::StaleState { .. }) => continue,
                    Err(err) => return Err(err.into()),
                }

                append_audit(
                    &tx,
                    &ActorContext::system(),
                    AuditAction::MarkOverdue,
                    TargetType::Request,
                    request_id.to_string(),
                    Some(format!("due {due}, flagged as of {as_of}")),
                    now,
                )?;
                marked += 1;
            }
            marked
        };
        tx.commit()?;

        info!(
            "event=overdue_sweep module=lifecycle status=ok as_of={as_of} marked={marked}"
        );
        Ok(SweepReport { as_of, marked })
    }

    /// Adds a book to the catalog with every copy available.
    pub fn add_book(
        &mut self,
        title: impl Into<String>,
        total_copies: u32,
        ctx: &ActorContext,
    ) -> EngineResult<Book> {
        let now = self.clock.now();
        let book = Book::new(title, total_copies, now);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let books = SqliteBookRepository::new_unchecked(&tx);
            books.insert_book(&book)?;

            append_audit(
                &tx,
                ctx,
                AuditAction::AddBook,
                TargetType::Book,
                book.id.to_string(),
                Some(format!(
                    "added \"{}\" with {total_copies} copies",
                    book.title
                )),
                now,
            )?;
        }
        tx.commit()?;

        info!(
            "event=book_added module=lifecycle status=ok book_id={} total_copies={total_copies}",
            book.id
        );
        Ok(book)
    }

    /// Resizes a book's print run, keeping outstanding loans intact.
    ///
    /// Fails with `InvalidInput` when `new_total` is smaller than the
    /// number of copies currently out.
    pub fn set_total_copies(
        &mut self,
        book_id: BookId,
        new_total: u32,
        ctx: &ActorContext,
    ) -> EngineResult<Book> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = {
            let books = SqliteBookRepository::new_unchecked(&tx);

            let book = books
                .get_book(book_id)?
                .ok_or(EngineError::BookNotFound(book_id))?;
            let on_loan = book.copies_on_loan();
            if new_total < on_loan {
                return Err(EngineError::InvalidInput(format!(
                    "cannot shrink \"{}\" to {new_total} copies while {on_loan} are on loan",
                    book.title
                )));
            }

            books.resize_book(book_id, new_total, new_total - on_loan, now)?;

            append_audit(
                &tx,
                ctx,
                AuditAction::UpdateBook,
                TargetType::Book,
                book_id.to_string(),
                Some(format!(
                    "total copies {} -> {new_total}",
                    book.total_copies
                )),
                now,
            )?;

            books
                .get_book(book_id)?
                .ok_or(EngineError::BookNotFound(book_id))?
        };
        tx.commit()?;

        info!(
            "event=book_resized module=lifecycle status=ok book_id={book_id} total_copies={new_total}"
        );
        Ok(updated)
    }

    /// Gets one book. Read-only projection.
    pub fn get_book(&self, book_id: BookId) -> EngineResult<Book> {
        let books = SqliteBookRepository::new_unchecked(&self.conn);
        books
            .get_book(book_id)?
            .ok_or(EngineError::BookNotFound(book_id))
    }

    /// Lists the whole catalog. Read-only projection.
    pub fn list_books(&self) -> EngineResult<Vec<Book>> {
        let books = SqliteBookRepository::new_unchecked(&self.conn);
        Ok(books.list_books()?)
    }

    /// Gets one request. Read-only projection.
    pub fn get_request(&self, request_id: RequestId) -> EngineResult<BorrowRequest> {
        let requests = SqliteRequestRepository::new_unchecked(&self.conn);
        requests
            .get_request(request_id)?
            .ok_or(EngineError::RequestNotFound(request_id))
    }

    /// Lists requests by state/borrower/book/title filter. Read-only
    /// projection for the admin and borrower views; carries no lifecycle
    /// invariants.
    pub fn list_requests(&self, query: &RequestListQuery) -> EngineResult<Vec<BorrowRequest>> {
        let requests = SqliteRequestRepository::new_unchecked(&self.conn);
        Ok(requests.list_requests(query)?)
    }

    /// Queries the audit trail, newest first. Read-only projection.
    pub fn audit_log(&self, query: &AuditLogQuery) -> EngineResult<AuditPage> {
        let audit = SqliteAuditRepository::new_unchecked(&self.conn);
        Ok(audit.query(query)?)
    }
}

/// Rejects operations whose target state the graph does not permit from
/// the request's current state, before any write happens.
fn ensure_permits(request: &BorrowRequest, next: RequestState) -> EngineResult<()> {
    if !request.state.permits(next) {
        return Err(EngineError::InvalidTransition {
            request: request.id,
            state: request.state,
        });
    }
    Ok(())
}

fn reload_request(
    requests: &SqliteRequestRepository<'_>,
    id: RequestId,
) -> EngineResult<BorrowRequest> {
    requests
        .get_request(id)?
        .ok_or(EngineError::RequestNotFound(id))
}

fn append_audit(
    tx: &Transaction<'_>,
    ctx: &ActorContext,
    action: AuditAction,
    target_type: TargetType,
    target_id: String,
    details: Option<String>,
    created_at: DateTime<Utc>,
) -> EngineResult<i64> {
    let audit = SqliteAuditRepository::new_unchecked(tx);
    let id = audit.append(&NewAuditEntry {
        actor: ctx.actor.clone(),
        action,
        target_type,
        target_id,
        details,
        origin: ctx.origin.clone(),
        created_at,
    })?;
    Ok(id)
}
