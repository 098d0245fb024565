//! Cross-thread interruption of a running statement

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sqlbind::{Connection, StatementState};

const LONG_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000) \
                          SELECT count(*) FROM c";

#[test]
fn test_interrupt_from_another_thread() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare(LONG_QUERY).unwrap();
    let handle = conn.interrupt_handle();
    let finished = Arc::new(AtomicBool::new(false));

    let interrupter = {
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                handle.interrupt();
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let result = stmt.step();
    finished.store(true, Ordering::SeqCst);
    interrupter.join().unwrap();

    let err = result.unwrap_err();
    assert!(err.as_engine().unwrap().is_interrupted(), "{}", err);
    assert_eq!(stmt.state(), StatementState::Done);
}

#[test]
fn test_connection_usable_after_interrupt() {
    let conn = Connection::open_in_memory().unwrap();
    let mut long = conn.prepare(LONG_QUERY).unwrap();
    let handle = conn.interrupt_handle();
    let finished = Arc::new(AtomicBool::new(false));

    let interrupter = {
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                handle.interrupt();
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    assert!(long.step().is_err());
    drop(long);
    finished.store(true, Ordering::SeqCst);
    interrupter.join().unwrap();

    let mut stmt = conn.prepare("SELECT 1").unwrap();
    assert_eq!(stmt.step().unwrap(), sqlbind::StepResult::Row);
}

#[test]
fn test_interrupt_idle_connection_is_harmless() {
    let conn = Connection::open_in_memory().unwrap();
    conn.interrupt();

    let mut stmt = conn.prepare("SELECT 1").unwrap();
    assert_eq!(stmt.step().unwrap(), sqlbind::StepResult::Row);
}
