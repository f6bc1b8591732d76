//! Due-date sweeper.
//!
//! # Responsibility
//! - Drive the engine's overdue sweep from a scheduler or an operator
//!   trigger.
//!
//! # Invariants
//! - Holds no state of its own; safe to invoke at any frequency,
//!   including zero or many times for the same day.

use crate::service::clock::Clock;
use crate::service::lifecycle::{EngineResult, LifecycleEngine, SweepReport};
use chrono::NaiveDate;

/// Scheduler-facing wrapper around [`LifecycleEngine::sweep_overdue`].
pub struct DueDateSweeper<'engine, C: Clock> {
    engine: &'engine mut LifecycleEngine<C>,
}

impl<'engine, C: Clock> DueDateSweeper<'engine, C> {
    pub fn new(engine: &'engine mut LifecycleEngine<C>) -> Self {
        Self { engine }
    }

    /// Sweeps as of the engine clock's current day.
    pub fn run(&mut self) -> EngineResult<SweepReport> {
        let today = self.engine.clock_today();
        self.engine.sweep_overdue(today)
    }

    /// Sweeps as of an explicit day; used by replays and manual triggers.
    pub fn run_as_of(&mut self, as_of: NaiveDate) -> EngineResult<SweepReport> {
        self.engine.sweep_overdue(as_of)
    }
}
