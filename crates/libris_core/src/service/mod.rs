//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate ledger/store/audit repositories into lifecycle
//!   operations with transactional guarantees.
//! - Keep callers (HTTP/UI layers) decoupled from storage details.

pub mod clock;
pub mod lifecycle;
pub mod sweeper;
