use chrono::NaiveDate;
use libris_core::db::open_db_in_memory;
use libris_core::{
    Actor, ActorContext, AuditAction, AuditLogQuery, DueDateSweeper, EngineError, FixedClock,
    LifecycleEngine, RequestId, RequestState,
};
use uuid::Uuid;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn admin() -> ActorContext {
    ActorContext::admin("ms.reyes")
}

/// Engine pinned to 2025-01-05 with one request approved and due
/// 2025-01-10.
fn engine_with_approved_loan() -> (LifecycleEngine<FixedClock>, RequestId) {
    let conn = open_db_in_memory().unwrap();
    let mut engine =
        LifecycleEngine::with_clock(conn, FixedClock::on_day(day(2025, 1, 5))).unwrap();

    let book = engine.add_book("Dune", 1, &admin()).unwrap();
    let borrower = Uuid::new_v4();
    let request = engine
        .submit(book.id, borrower, &ActorContext::borrower(borrower))
        .unwrap();
    engine
        .approve(request.id, day(2025, 1, 10), &admin())
        .unwrap();

    (engine, request.id)
}

#[test]
fn a_loan_due_today_is_not_overdue() {
    let (mut engine, request_id) = engine_with_approved_loan();

    let report = engine.sweep_overdue(day(2025, 1, 10)).unwrap();
    assert_eq!(report.marked, 0);
    assert_eq!(
        engine.get_request(request_id).unwrap().state,
        RequestState::Approved
    );
}

#[test]
fn a_loan_strictly_past_its_due_date_is_flagged() {
    let (mut engine, request_id) = engine_with_approved_loan();

    let report = engine.sweep_overdue(day(2025, 1, 11)).unwrap();
    assert_eq!(report.marked, 1);
    assert_eq!(
        engine.get_request(request_id).unwrap().state,
        RequestState::ToReturn
    );

    let entries = engine
        .audit_log(&AuditLogQuery {
            action: Some(AuditAction::MarkOverdue),
            ..AuditLogQuery::default()
        })
        .unwrap();
    assert_eq!(entries.total_entries, 1);
    assert_eq!(entries.entries[0].actor, Actor::System);
    assert_eq!(entries.entries[0].target_id, request_id.to_string());
}

#[test]
fn sweeping_twice_is_idempotent() {
    let (mut engine, request_id) = engine_with_approved_loan();

    let first = engine.sweep_overdue(day(2025, 1, 11)).unwrap();
    let second = engine.sweep_overdue(day(2025, 1, 11)).unwrap();
    assert_eq!(first.marked, 1);
    assert_eq!(second.marked, 0);

    // A later sweep does not re-flag it either.
    let third = engine.sweep_overdue(day(2025, 2, 1)).unwrap();
    assert_eq!(third.marked, 0);
    assert_eq!(
        engine.get_request(request_id).unwrap().state,
        RequestState::ToReturn
    );

    // No duplicate audit entries.
    let entries = engine
        .audit_log(&AuditLogQuery {
            action: Some(AuditAction::MarkOverdue),
            ..AuditLogQuery::default()
        })
        .unwrap();
    assert_eq!(entries.total_entries, 1);
}

#[test]
fn returning_a_flagged_loan_releases_the_copy() {
    let (mut engine, request_id) = engine_with_approved_loan();
    engine.sweep_overdue(day(2025, 1, 11)).unwrap();

    let returned = engine.mark_returned(request_id, &admin()).unwrap();
    assert_eq!(returned.state, RequestState::Returned);
    assert_eq!(
        engine.get_book(returned.book_id).unwrap().available_copies,
        1
    );

    let err = engine.mark_returned(request_id, &admin()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[test]
fn a_returned_loan_is_not_swept() {
    let (mut engine, request_id) = engine_with_approved_loan();
    engine.mark_returned(request_id, &admin()).unwrap();

    let report = engine.sweep_overdue(day(2025, 1, 11)).unwrap();
    assert_eq!(report.marked, 0);
    assert_eq!(
        engine.get_request(request_id).unwrap().state,
        RequestState::Returned
    );
}

#[test]
fn only_approved_loans_in_the_window_are_flagged() {
    let conn = open_db_in_memory().unwrap();
    let mut engine =
        LifecycleEngine::with_clock(conn, FixedClock::on_day(day(2025, 1, 5))).unwrap();
    let book = engine.add_book("Dune", 3, &admin()).unwrap();

    let mut submit_and_approve = |due: NaiveDate| {
        let borrower = Uuid::new_v4();
        let request = engine
            .submit(book.id, borrower, &ActorContext::borrower(borrower))
            .unwrap();
        engine.approve(request.id, due, &admin()).unwrap();
        request.id
    };
    let due_early = submit_and_approve(day(2025, 1, 8));
    let due_late = submit_and_approve(day(2025, 1, 20));
    let pending = {
        let borrower = Uuid::new_v4();
        engine
            .submit(book.id, borrower, &ActorContext::borrower(borrower))
            .unwrap()
            .id
    };

    let report = engine.sweep_overdue(day(2025, 1, 10)).unwrap();
    assert_eq!(report.marked, 1);
    assert_eq!(
        engine.get_request(due_early).unwrap().state,
        RequestState::ToReturn
    );
    assert_eq!(
        engine.get_request(due_late).unwrap().state,
        RequestState::Approved
    );
    assert_eq!(
        engine.get_request(pending).unwrap().state,
        RequestState::Pending
    );
}

#[test]
fn sweeper_runs_off_the_engine_clock() {
    let (mut engine, request_id) = engine_with_approved_loan();
    let mut sweeper = DueDateSweeper::new(&mut engine);

    // Clock day is 2025-01-05; the loan due 2025-01-10 is not overdue.
    let report = sweeper.run().unwrap();
    assert_eq!(report.as_of, day(2025, 1, 5));
    assert_eq!(report.marked, 0);

    // Explicit as-of drives replays and manual triggers.
    let report = sweeper.run_as_of(day(2025, 1, 11)).unwrap();
    assert_eq!(report.marked, 1);
    assert_eq!(
        engine.get_request(request_id).unwrap().state,
        RequestState::ToReturn
    );
}

#[test]
fn report_messages_match_the_due_check_wire_format() {
    let (mut engine, _) = engine_with_approved_loan();

    let quiet = engine.sweep_overdue(day(2025, 1, 9)).unwrap();
    assert_eq!(quiet.message(), "No books due for return.");

    let one = engine.sweep_overdue(day(2025, 1, 11)).unwrap();
    assert_eq!(one.message(), "1 book marked as due for return.");
}
