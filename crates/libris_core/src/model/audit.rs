//! Audit trail model.
//!
//! # Responsibility
//! - Define the append-only audit record and its closed action vocabulary.
//! - Carry actor identity and origin address for every mutating call.
//!
//! # Invariants
//! - Entries are immutable once written.
//! - `id` is monotonic (storage rowid) and defines the log order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::request::BorrowerId;

/// Who performed a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Admin { username: String },
    Borrower { id: BorrowerId },
    System,
}

impl Actor {
    /// Display name recorded in the audit log.
    pub fn name(&self) -> String {
        match self {
            Self::Admin { username } => username.clone(),
            Self::Borrower { id } => id.to_string(),
            Self::System => "system".to_string(),
        }
    }
}

/// Caller identity attached to every mutating engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub actor: Actor,
    /// Network address of the caller, when the boundary knows it.
    pub origin: Option<String>,
}

impl ActorContext {
    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            actor: Actor::Admin {
                username: username.into(),
            },
            origin: None,
        }
    }

    pub fn borrower(id: BorrowerId) -> Self {
        Self {
            actor: Actor::Borrower { id },
            origin: None,
        }
    }

    pub fn system() -> Self {
        Self {
            actor: Actor::System,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Closed action vocabulary for the audit trail.
///
/// Wire names keep the admin UI's historical `SCREAMING_SNAKE_CASE`
/// vocabulary (`APPROVE_REQUEST`, `RETURN_BOOK`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AddBook,
    UpdateBook,
    SubmitRequest,
    ApproveRequest,
    RejectRequest,
    CancelRequest,
    ReturnBook,
    MarkOverdue,
}

/// Entity class an audit entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Book,
    Request,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic storage id; newest entries have the largest ids.
    pub id: i64,
    pub actor: Actor,
    pub action: AuditAction,
    pub target_type: TargetType,
    /// Id of the targeted entity, as text.
    pub target_id: String,
    pub details: Option<String>,
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload for appending one audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub target_type: TargetType,
    pub target_id: String,
    pub details: Option<String>,
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{Actor, ActorContext, AuditAction};
    use uuid::Uuid;

    #[test]
    fn actor_names_are_stable() {
        assert_eq!(Actor::System.name(), "system");
        let id = Uuid::new_v4();
        assert_eq!(Actor::Borrower { id }.name(), id.to_string());
        assert_eq!(
            Actor::Admin {
                username: "ms.reyes".to_string()
            }
            .name(),
            "ms.reyes"
        );
    }

    #[test]
    fn action_wire_names_keep_admin_ui_vocabulary() {
        let json = serde_json::to_string(&AuditAction::ApproveRequest).unwrap();
        assert_eq!(json, "\"APPROVE_REQUEST\"");
        let json = serde_json::to_string(&AuditAction::MarkOverdue).unwrap();
        assert_eq!(json, "\"MARK_OVERDUE\"");
    }

    #[test]
    fn context_builder_attaches_origin() {
        let ctx = ActorContext::admin("root").with_origin("10.0.0.7");
        assert_eq!(ctx.origin.as_deref(), Some("10.0.0.7"));
    }
}
