//! Audit log: append-only trail of every mutating operation.
//!
//! # Responsibility
//! - Append one immutable entry per successful state transition.
//! - Serve paginated, newest-first queries for external reporting.
//!
//! # Invariants
//! - `append` is the only mutation; rows are never updated or deleted.
//! - An append failure must fail the enclosing engine transaction, so the
//!   trail and the data it describes commit together.

use crate::model::audit::{Actor, AuditAction, AuditEntry, NewAuditEntry, TargetType};
use crate::repo::{ensure_schema_ready, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

const AUDIT_SELECT_SQL: &str = "SELECT
    id,
    actor_kind,
    actor_name,
    action,
    target_type,
    target_id,
    details,
    origin,
    created_at
FROM audit_log";

const PAGE_SIZE_DEFAULT: u32 = 50;
const PAGE_SIZE_MAX: u32 = 200;

/// Filter and pagination options for audit reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditLogQuery {
    pub action: Option<AuditAction>,
    /// Exact match on the recorded actor name.
    pub actor_name: Option<String>,
    /// 1-based page number; 0 is treated as the first page.
    pub page: u32,
    /// Rows per page. Defaults to 50 and clamps to 200.
    pub per_page: Option<u32>,
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub page: u32,
    pub total_entries: u64,
    pub total_pages: u64,
}

/// Append-only audit trail interface.
pub trait AuditRepository {
    fn append(&self, entry: &NewAuditEntry) -> RepoResult<i64>;
    fn query(&self, query: &AuditLogQuery) -> RepoResult<AuditPage>;
}

/// SQLite-backed audit trail.
pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    /// Constructs an audit trail from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "audit_log")?;
        Ok(Self { conn })
    }

    /// Skips the readiness probe; the caller already verified the schema.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl AuditRepository for SqliteAuditRepository<'_> {
    fn append(&self, entry: &NewAuditEntry) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO audit_log (
                actor_kind,
                actor_name,
                action,
                target_type,
                target_id,
                details,
                origin,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                actor_kind_to_db(&entry.actor),
                entry.actor.name(),
                action_to_db(entry.action),
                target_type_to_db(entry.target_type),
                entry.target_id.as_str(),
                entry.details.as_deref(),
                entry.origin.as_deref(),
                entry.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn query(&self, query: &AuditLogQuery) -> RepoResult<AuditPage> {
        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(action) = query.action {
            where_sql.push_str(" AND action = ?");
            bind_values.push(Value::Text(action_to_db(action).to_string()));
        }
        if let Some(actor_name) = query.actor_name.as_deref() {
            where_sql.push_str(" AND actor_name = ?");
            bind_values.push(Value::Text(actor_name.to_string()));
        }

        let total_entries: u64 = {
            let sql = format!("SELECT COUNT(*) FROM audit_log{where_sql};");
            let mut stmt = self.conn.prepare(&sql)?;
            stmt.query_row(params_from_iter(bind_values.clone()), |row| {
                row.get::<_, i64>(0)
            })? as u64
        };

        let per_page = query
            .per_page
            .unwrap_or(PAGE_SIZE_DEFAULT)
            .clamp(1, PAGE_SIZE_MAX);
        let page = query.page.max(1);
        let total_pages = (total_entries.div_ceil(u64::from(per_page))).max(1);

        let sql = format!(
            "{AUDIT_SELECT_SQL}{where_sql} ORDER BY id DESC LIMIT ? OFFSET ?;"
        );
        bind_values.push(Value::Integer(i64::from(per_page)));
        bind_values.push(Value::Integer(
            i64::from(per_page) * (i64::from(page) - 1),
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_audit_row(row)?);
        }

        Ok(AuditPage {
            entries,
            page,
            total_entries,
            total_pages,
        })
    }
}

fn parse_audit_row(row: &Row<'_>) -> RepoResult<AuditEntry> {
    let actor_kind: String = row.get("actor_kind")?;
    let actor_name: String = row.get("actor_name")?;
    let actor = parse_actor(&actor_kind, &actor_name)?;

    let action_text: String = row.get("action")?;
    let action = parse_action(&action_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid action `{action_text}` in audit_log.action"))
    })?;

    let target_text: String = row.get("target_type")?;
    let target_type = parse_target_type(&target_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid target type `{target_text}` in audit_log.target_type"
        ))
    })?;

    Ok(AuditEntry {
        id: row.get("id")?,
        actor,
        action,
        target_type,
        target_id: row.get("target_id")?,
        details: row.get("details")?,
        origin: row.get("origin")?,
        created_at: row.get("created_at")?,
    })
}

fn actor_kind_to_db(actor: &Actor) -> &'static str {
    match actor {
        Actor::Admin { .. } => "admin",
        Actor::Borrower { .. } => "borrower",
        Actor::System => "system",
    }
}

fn parse_actor(kind: &str, name: &str) -> RepoResult<Actor> {
    match kind {
        "admin" => Ok(Actor::Admin {
            username: name.to_string(),
        }),
        "borrower" => {
            let id = Uuid::parse_str(name).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid borrower id `{name}` in audit_log.actor_name"
                ))
            })?;
            Ok(Actor::Borrower { id })
        }
        "system" => Ok(Actor::System),
        other => Err(RepoError::InvalidData(format!(
            "invalid actor kind `{other}` in audit_log.actor_kind"
        ))),
    }
}

fn action_to_db(action: AuditAction) -> &'static str {
    match action {
        AuditAction::AddBook => "ADD_BOOK",
        AuditAction::UpdateBook => "UPDATE_BOOK",
        AuditAction::SubmitRequest => "SUBMIT_REQUEST",
        AuditAction::ApproveRequest => "APPROVE_REQUEST",
        AuditAction::RejectRequest => "REJECT_REQUEST",
        AuditAction::CancelRequest => "CANCEL_REQUEST",
        AuditAction::ReturnBook => "RETURN_BOOK",
        AuditAction::MarkOverdue => "MARK_OVERDUE",
    }
}

fn parse_action(value: &str) -> Option<AuditAction> {
    match value {
        "ADD_BOOK" => Some(AuditAction::AddBook),
        "UPDATE_BOOK" => Some(AuditAction::UpdateBook),
        "SUBMIT_REQUEST" => Some(AuditAction::SubmitRequest),
        "APPROVE_REQUEST" => Some(AuditAction::ApproveRequest),
        "REJECT_REQUEST" => Some(AuditAction::RejectRequest),
        "CANCEL_REQUEST" => Some(AuditAction::CancelRequest),
        "RETURN_BOOK" => Some(AuditAction::ReturnBook),
        "MARK_OVERDUE" => Some(AuditAction::MarkOverdue),
        _ => None,
    }
}

fn target_type_to_db(target: TargetType) -> &'static str {
    match target {
        TargetType::Book => "book",
        TargetType::Request => "request",
    }
}

fn parse_target_type(value: &str) -> Option<TargetType> {
    match value {
        "book" => Some(TargetType::Book),
        "request" => Some(TargetType::Request),
        _ => None,
    }
}
