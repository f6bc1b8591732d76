//! Borrow request model and state graph.
//!
//! # Responsibility
//! - Define the borrow request record and its lifecycle states.
//! - Encode which transitions the lifecycle engine may apply.
//!
//! # Invariants
//! - `Rejected`, `Cancelled` and `Returned` are terminal.
//! - `ToReturn` is reached only via the due-date sweep, never directly
//!   by an admin action.
//! - Date fields are stamped by the transition that introduces them and
//!   never cleared afterwards.

use crate::model::book::BookId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a borrow request.
pub type RequestId = Uuid;

/// Stable identifier for a borrower account.
pub type BorrowerId = Uuid;

/// Lifecycle state of a borrow request.
///
/// Serialized names match the wire vocabulary consumed by the admin UI
/// (`pending`, `toReturn`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestState {
    /// Submitted, awaiting admin review.
    Pending,
    /// Approved; one copy is reserved for the borrower.
    Approved,
    /// Declined by an admin.
    Rejected,
    /// Past its expected return date, flagged by the sweep.
    ToReturn,
    /// Copy back on the shelf.
    Returned,
    /// Withdrawn by the borrower before review.
    Cancelled,
}

impl RequestState {
    /// States from which `mark_returned` is allowed.
    pub const RETURNABLE: [RequestState; 2] = [RequestState::Approved, RequestState::ToReturn];

    /// Whether this state accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Rejected | RequestState::Returned | RequestState::Cancelled
        )
    }

    /// Whether the lifecycle graph permits `self -> next`.
    pub fn permits(self, next: RequestState) -> bool {
        use RequestState::{Approved, Cancelled, Pending, Rejected, Returned, ToReturn};
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, ToReturn)
                | (Approved, Returned)
                | (ToReturn, Returned)
        )
    }
}

/// A loan request from submission to resolution.
///
/// Cancellation and rejection are terminal states, not deletions, so the
/// full request history stays queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub id: RequestId,
    pub book_id: BookId,
    pub borrower_id: BorrowerId,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    /// Day the loan was approved. Set on approval.
    pub borrow_date: Option<NaiveDate>,
    /// Day the copy is due back. Set on approval.
    pub expected_return_date: Option<NaiveDate>,
    /// Day the copy came back. Set on return.
    pub return_date: Option<NaiveDate>,
}

impl BorrowRequest {
    /// Creates a freshly submitted request in `Pending`.
    pub fn new(book_id: BookId, borrower_id: BorrowerId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            borrower_id,
            state: RequestState::Pending,
            created_at: now,
            borrow_date: None,
            expected_return_date: None,
            return_date: None,
        }
    }

    /// Whether a copy is currently out with the borrower.
    pub fn is_active_loan(&self) -> bool {
        matches!(
            self.state,
            RequestState::Approved | RequestState::ToReturn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RequestState;

    const ALL: [RequestState; 6] = [
        RequestState::Pending,
        RequestState::Approved,
        RequestState::Rejected,
        RequestState::ToReturn,
        RequestState::Returned,
        RequestState::Cancelled,
    ];

    #[test]
    fn terminal_states_permit_nothing() {
        for from in ALL.into_iter().filter(|state| state.is_terminal()) {
            for to in ALL {
                assert!(!from.permits(to), "{from:?} -> {to:?} must be rejected");
            }
        }
    }

    #[test]
    fn pending_permits_exactly_review_outcomes() {
        assert!(RequestState::Pending.permits(RequestState::Approved));
        assert!(RequestState::Pending.permits(RequestState::Rejected));
        assert!(RequestState::Pending.permits(RequestState::Cancelled));
        assert!(!RequestState::Pending.permits(RequestState::ToReturn));
        assert!(!RequestState::Pending.permits(RequestState::Returned));
    }

    #[test]
    fn to_return_is_reached_only_from_approved() {
        for from in ALL {
            assert_eq!(
                from.permits(RequestState::ToReturn),
                from == RequestState::Approved
            );
        }
    }

    #[test]
    fn wire_names_match_admin_ui_vocabulary() {
        let json = serde_json::to_string(&RequestState::ToReturn).unwrap();
        assert_eq!(json, "\"toReturn\"");
        let json = serde_json::to_string(&RequestState::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
