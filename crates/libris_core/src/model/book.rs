//! Book catalog model.
//!
//! # Responsibility
//! - Define the book record carrying the shared copy inventory.
//!
//! # Invariants
//! - `available_copies <= total_copies` at all times.
//! - `available_copies` is mutated only through ledger primitives driven
//!   by the lifecycle engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a catalog book.
pub type BookId = Uuid;

/// A lendable title and its physical copy counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    /// Number of physical copies the library owns.
    pub total_copies: u32,
    /// Copies currently on the shelf and free to lend.
    pub available_copies: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validation failure for book records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookValidationError {
    EmptyTitle,
    AvailableExceedsTotal { available: u32, total: u32 },
}

impl Display for BookValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "book title must not be empty"),
            Self::AvailableExceedsTotal { available, total } => write!(
                f,
                "available copies ({available}) exceed total copies ({total})"
            ),
        }
    }
}

impl Error for BookValidationError {}

impl Book {
    /// Creates a new book with every copy on the shelf.
    pub fn new(title: impl Into<String>, total_copies: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            total_copies,
            available_copies: total_copies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copies currently lent out.
    pub fn copies_on_loan(&self) -> u32 {
        self.total_copies - self.available_copies
    }

    /// Checks record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        if self.title.trim().is_empty() {
            return Err(BookValidationError::EmptyTitle);
        }
        if self.available_copies > self.total_copies {
            return Err(BookValidationError::AvailableExceedsTotal {
                available: self.available_copies,
                total: self.total_copies,
            });
        }
        Ok(())
    }
}
