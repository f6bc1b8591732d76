use chrono::{NaiveDate, Utc};
use libris_core::db::open_db_in_memory;
use libris_core::{
    Book, BookRepository, BorrowRequest, ReleaseOutcome, RepoError, RequestRepository,
    RequestState, SqliteBookRepository, SqliteRequestRepository, TransitionStamp,
};
use uuid::Uuid;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn reserve_decrements_until_the_shelf_is_empty() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();

    let book = Book::new("Dune", 2, Utc::now());
    books.insert_book(&book).unwrap();

    books.try_reserve_copy(book.id, Utc::now()).unwrap();
    books.try_reserve_copy(book.id, Utc::now()).unwrap();
    let err = books.try_reserve_copy(book.id, Utc::now()).unwrap_err();
    assert!(matches!(err, RepoError::InsufficientInventory(id) if id == book.id));

    let loaded = books.get_book(book.id).unwrap().unwrap();
    assert_eq!(loaded.available_copies, 0);
    assert_eq!(loaded.total_copies, 2);
}

#[test]
fn release_saturates_at_total_and_reports_the_anomaly() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();

    let book = Book::new("Dune", 1, Utc::now());
    books.insert_book(&book).unwrap();
    books.try_reserve_copy(book.id, Utc::now()).unwrap();

    let outcome = books.release_copy(book.id, Utc::now()).unwrap();
    assert_eq!(outcome, ReleaseOutcome::Released);

    // A second release has nothing to put back; the counter must not
    // climb past total.
    let outcome = books.release_copy(book.id, Utc::now()).unwrap();
    assert_eq!(outcome, ReleaseOutcome::AlreadyAtCapacity);
    let loaded = books.get_book(book.id).unwrap().unwrap();
    assert_eq!(loaded.available_copies, 1);
}

#[test]
fn ledger_primitives_report_unknown_books() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();
    let missing = Uuid::new_v4();

    assert!(matches!(
        books.try_reserve_copy(missing, Utc::now()),
        Err(RepoError::BookNotFound(_))
    ));
    assert!(matches!(
        books.release_copy(missing, Utc::now()),
        Err(RepoError::BookNotFound(_))
    ));
}

#[test]
fn insert_rejects_invalid_books() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();

    let blank = Book::new("  ", 1, Utc::now());
    assert!(matches!(
        books.insert_book(&blank),
        Err(RepoError::Validation(_))
    ));
}

#[test]
fn transition_state_is_a_compare_and_swap() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();
    let requests = SqliteRequestRepository::try_new(&conn).unwrap();

    let book = Book::new("Dune", 1, Utc::now());
    books.insert_book(&book).unwrap();
    let request = BorrowRequest::new(book.id, Uuid::new_v4(), Utc::now());
    requests.create_request(&request).unwrap();

    // Wrong precondition: the row is Pending, not Approved.
    let err = requests
        .transition_state(
            request.id,
            &[RequestState::Approved],
            RequestState::Returned,
            &TransitionStamp::default(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::StaleState {
            actual: RequestState::Pending,
            ..
        }
    ));

    requests
        .transition_state(
            request.id,
            &[RequestState::Pending],
            RequestState::Approved,
            &TransitionStamp {
                borrow_date: Some(day(2025, 1, 5)),
                expected_return_date: Some(day(2025, 1, 10)),
                ..TransitionStamp::default()
            },
        )
        .unwrap();

    let loaded = requests.get_request(request.id).unwrap().unwrap();
    assert_eq!(loaded.state, RequestState::Approved);
    assert_eq!(loaded.borrow_date, Some(day(2025, 1, 5)));
    assert_eq!(loaded.expected_return_date, Some(day(2025, 1, 10)));
    assert_eq!(loaded.return_date, None);
}

#[test]
fn transition_state_reports_unknown_requests() {
    let conn = open_db_in_memory().unwrap();
    let requests = SqliteRequestRepository::try_new(&conn).unwrap();

    let err = requests
        .transition_state(
            Uuid::new_v4(),
            &[RequestState::Pending],
            RequestState::Rejected,
            &TransitionStamp::default(),
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::RequestNotFound(_)));
}

#[test]
fn a_transition_can_accept_several_source_states() {
    let conn = open_db_in_memory().unwrap();
    let books = SqliteBookRepository::try_new(&conn).unwrap();
    let requests = SqliteRequestRepository::try_new(&conn).unwrap();

    let book = Book::new("Dune", 1, Utc::now());
    books.insert_book(&book).unwrap();
    let request = BorrowRequest::new(book.id, Uuid::new_v4(), Utc::now());
    requests.create_request(&request).unwrap();
    requests
        .transition_state(
            request.id,
            &[RequestState::Pending],
            RequestState::Approved,
            &TransitionStamp::default(),
        )
        .unwrap();

    // RETURNABLE covers both Approved and ToReturn.
    requests
        .transition_state(
            request.id,
            &RequestState::RETURNABLE,
            RequestState::Returned,
            &TransitionStamp {
                return_date: Some(day(2025, 1, 12)),
                ..TransitionStamp::default()
            },
        )
        .unwrap();

    let loaded = requests.get_request(request.id).unwrap().unwrap();
    assert_eq!(loaded.state, RequestState::Returned);
    assert_eq!(loaded.return_date, Some(day(2025, 1, 12)));
}
