use notestore_core::db::ConnectionPool;
use notestore_core::task::TaskScheduler;
use notestore_core::StorageError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn scheduler(dir: &tempfile::TempDir, read_workers: usize) -> TaskScheduler {
    let pool = ConnectionPool::open(dir.path().join("db.sqlite3"), Duration::from_secs(5)).unwrap();
    TaskScheduler::new(Arc::new(pool), read_workers).unwrap()
}

/// Occupies the writer thread until the returned sender fires.
fn block_writer(scheduler: &TaskScheduler, issuer: &Arc<()>) -> mpsc::Sender<()> {
    let (release, wait) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let _ = scheduler.submit_write("block", Arc::downgrade(issuer), move |_conn| {
        let _ = started_tx.send(());
        let _ = wait.recv();
        Ok(())
    });
    started_rx.recv().unwrap();
    release
}

#[test]
fn writes_run_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 2);
    let issuer = Arc::new(());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..20)
        .map(|index| {
            let seen = Arc::clone(&seen);
            scheduler.submit_write("append", Arc::downgrade(&issuer), move |_conn| {
                seen.lock().push(index);
                Ok(index)
            })
        })
        .collect();

    let results: Vec<i32> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert_eq!(results, (0..20).collect::<Vec<_>>());
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn writes_are_visible_to_later_reads() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 3);
    let issuer = Arc::new(());

    scheduler
        .submit_write("create", Arc::downgrade(&issuer), |conn| {
            conn.execute_batch(
                "CREATE TABLE probe (value INTEGER);
                 INSERT INTO probe (value) VALUES (7);",
            )?;
            Ok(())
        })
        .wait()
        .unwrap();

    let value: i64 = scheduler
        .submit_read("read", Arc::downgrade(&issuer), |conn| {
            Ok(conn.query_row("SELECT value FROM probe;", [], |row| row.get(0))?)
        })
        .wait()
        .unwrap();
    assert_eq!(value, 7);
}

#[test]
fn reads_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 2);
    let issuer = Arc::new(());
    let (first_in, first_seen) = mpsc::channel::<()>();
    let (second_in, second_seen) = mpsc::channel::<()>();

    // Each read waits for the other; a serial pool would never finish.
    let first = scheduler.submit_read("first", Arc::downgrade(&issuer), move |_conn| {
        first_in.send(()).unwrap();
        second_seen
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| StorageError::InvalidData("second read never started".to_string()))
    });
    let second = scheduler.submit_read("second", Arc::downgrade(&issuer), move |_conn| {
        second_in.send(()).unwrap();
        first_seen
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| StorageError::InvalidData("first read never started".to_string()))
    });

    first.wait().unwrap();
    second.wait().unwrap();
}

#[test]
fn canceled_task_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let issuer = Arc::new(());
    let release = block_writer(&scheduler, &issuer);

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_task = Arc::clone(&ran);
    let future = scheduler.submit_write("canceled", Arc::downgrade(&issuer), move |_conn| {
        ran_in_task.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert!(future.cancel());
    release.send(()).unwrap();

    assert!(matches!(future.wait(), Err(StorageError::Canceled)));
    scheduler.shutdown();
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn task_of_dropped_issuer_resolves_handler_destroyed() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let blocker = Arc::new(());
    let release = block_writer(&scheduler, &blocker);

    let issuer = Arc::new(());
    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_task = Arc::clone(&ran);
    let future = scheduler.submit_write("orphan", Arc::downgrade(&issuer), move |_conn| {
        ran_in_task.store(true, Ordering::SeqCst);
        Ok(())
    });
    drop(issuer);
    release.send(()).unwrap();

    assert!(matches!(future.wait(), Err(StorageError::HandlerDestroyed)));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn failing_task_does_not_stop_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let issuer = Arc::new(());

    let failing = scheduler.submit_write("bad_sql", Arc::downgrade(&issuer), |conn| {
        conn.execute_batch("SELECT * FROM missing_table;")?;
        Ok(())
    });
    let next = scheduler.submit_write("ok", Arc::downgrade(&issuer), |_conn| Ok(1));

    assert!(matches!(failing.wait(), Err(StorageError::Database { .. })));
    assert_eq!(next.wait().unwrap(), 1);
}

#[test]
fn submit_after_shutdown_resolves_canceled() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let issuer = Arc::new(());
    scheduler.shutdown();

    let future = scheduler.submit_read("late", Arc::downgrade(&issuer), |_conn| Ok(()));
    assert!(matches!(future.wait(), Err(StorageError::Canceled)));
}

#[test]
fn zero_read_workers_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = ConnectionPool::open(dir.path().join("db.sqlite3"), Duration::from_secs(5)).unwrap();
    let result = TaskScheduler::new(Arc::new(pool), 0);
    assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
}

#[test]
fn cancel_handle_from_another_thread_stops_queued_task() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let issuer = Arc::new(());
    let release = block_writer(&scheduler, &issuer);

    let future = scheduler.submit_write("queued", Arc::downgrade(&issuer), |_conn| Ok(5));
    let handle = future.cancel_handle();
    assert!(!future.is_started());
    assert!(std::thread::spawn(move || handle.cancel()).join().unwrap());
    assert!(!future.cancel());
    release.send(()).unwrap();

    let result = futures::executor::block_on(future);
    assert!(matches!(result, Err(StorageError::Canceled)));
}

#[test]
fn shutdown_runs_already_queued_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&dir, 1);
    let issuer = Arc::new(());
    let ran = Arc::new(Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..5)
        .map(|index| {
            let ran = Arc::clone(&ran);
            scheduler.submit_write("queued", Arc::downgrade(&issuer), move |_conn| {
                std::thread::sleep(Duration::from_millis(5));
                ran.lock().push(index);
                Ok(index)
            })
        })
        .collect();
    scheduler.shutdown();

    assert_eq!(*ran.lock(), (0..5).collect::<Vec<_>>());
    let results: Vec<i32> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert_eq!(results, (0..5).collect::<Vec<_>>());
}
