//! Writer thread + reader pool scheduler.
//!
//! # Responsibility
//! - Run write work strictly FIFO on one dedicated thread.
//! - Run read work concurrently on a fixed pool of threads.
//! - Give every worker its own pooled connection.
//!
//! # Invariants
//! - A task whose issuer has been dropped resolves `HandlerDestroyed`.
//! - A task canceled before it starts resolves `Canceled` and never touches
//!   the database.
//! - No retries happen at this layer.

use super::future::{TaskFuture, TaskState};
use crate::db::ConnectionPool;
use crate::error::{StorageError, StorageResult};
use futures::channel::oneshot;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

type Job = Box<dyn FnOnce(&ConnectionPool) + Send + 'static>;

/// Queue a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Read,
    Write,
}

impl TaskKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Turns storage work into futures.
pub struct TaskScheduler {
    write_sender: Mutex<Option<Sender<Job>>>,
    read_sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Spawns the writer thread and `read_workers` reader threads.
    ///
    /// # Errors
    /// - `InvalidArgument` when `read_workers` is zero.
    /// - `Configuration` when a thread cannot be spawned.
    pub fn new(pool: Arc<ConnectionPool>, read_workers: usize) -> StorageResult<Self> {
        if read_workers == 0 {
            return Err(StorageError::InvalidArgument(
                "scheduler needs at least one read worker".to_string(),
            ));
        }

        let mut workers = Vec::with_capacity(read_workers + 1);

        let (write_sender, write_receiver) = mpsc::channel::<Job>();
        let writer_pool = Arc::clone(&pool);
        workers.push(spawn_worker("notestore-writer", move || {
            writer_loop(&writer_pool, write_receiver)
        })?);

        let (read_sender, read_receiver) = mpsc::channel::<Job>();
        let read_receiver = Arc::new(Mutex::new(read_receiver));
        for index in 0..read_workers {
            let reader_pool = Arc::clone(&pool);
            let receiver = Arc::clone(&read_receiver);
            workers.push(spawn_worker(&format!("notestore-reader-{index}"), move || {
                reader_loop(&reader_pool, &receiver)
            })?);
        }

        info!(
            "event=scheduler_start module=task status=ok read_workers={}",
            read_workers
        );

        Ok(Self {
            write_sender: Mutex::new(Some(write_sender)),
            read_sender: Mutex::new(Some(read_sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Runs `work` on a reader thread.
    pub fn submit_read<T, I, F>(&self, context: &'static str, issuer: Weak<I>, work: F) -> TaskFuture<T>
    where
        T: Send + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        self.submit(TaskKind::Read, context, issuer, work)
    }

    /// Enqueues `work` on the writer thread.
    pub fn submit_write<T, I, F>(&self, context: &'static str, issuer: Weak<I>, work: F) -> TaskFuture<T>
    where
        T: Send + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        self.submit(TaskKind::Write, context, issuer, work)
    }

    /// Stops accepting tasks, lets queued tasks finish and joins all workers.
    pub fn shutdown(&self) {
        let write_sender = self.write_sender.lock().take();
        let read_sender = self.read_sender.lock().take();
        if write_sender.is_none() && read_sender.is_none() {
            return;
        }
        drop(write_sender);
        drop(read_sender);

        let current = std::thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("event=scheduler_stop module=task status=error error=worker_panicked");
            }
        }
        info!("event=scheduler_stop module=task status=ok");
    }

    fn submit<T, I, F>(
        &self,
        kind: TaskKind,
        context: &'static str,
        issuer: Weak<I>,
        work: F,
    ) -> TaskFuture<T>
    where
        T: Send + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let state = Arc::new(TaskState::default());
        let (sender, receiver) = oneshot::channel();
        let job_state = Arc::clone(&state);
        let job: Job = Box::new(move |pool: &ConnectionPool| {
            let result = run_task(kind, context, &issuer, &job_state, pool, work);
            // The caller may have dropped the future; the result is discarded.
            let _ = sender.send(result);
        });

        let queue = match kind {
            TaskKind::Read => &self.read_sender,
            TaskKind::Write => &self.write_sender,
        };
        let queued = match queue.lock().as_ref() {
            Some(queue) => queue.send(job).is_ok(),
            None => false,
        };
        if !queued {
            warn!(
                "event=task_submit module=task status=error kind={} context={} error=scheduler_stopped",
                kind.as_str(),
                context
            );
            return TaskFuture::ready(Err(StorageError::Canceled));
        }

        TaskFuture::new(receiver, state)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_task<T, I, F>(
    kind: TaskKind,
    context: &'static str,
    issuer: &Weak<I>,
    state: &TaskState,
    pool: &ConnectionPool,
    work: F,
) -> StorageResult<T>
where
    I: ?Sized,
    F: FnOnce(&mut Connection) -> StorageResult<T>,
{
    if issuer.strong_count() == 0 {
        debug!(
            "event=task_run module=task status=skipped kind={} context={} reason=handler_destroyed",
            kind.as_str(),
            context
        );
        return Err(StorageError::HandlerDestroyed);
    }
    if !state.try_start() {
        debug!(
            "event=task_run module=task status=skipped kind={} context={} reason=canceled",
            kind.as_str(),
            context
        );
        return Err(StorageError::Canceled);
    }

    let started_at = Instant::now();
    let conn = pool.acquire()?;
    let mut conn = conn.lock();
    let result = work(&mut conn);
    match &result {
        Ok(_) => debug!(
            "event=task_run module=task status=ok kind={} context={} duration_ms={}",
            kind.as_str(),
            context,
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=task_run module=task status=error kind={} context={} duration_ms={} error_code={} error={}",
            kind.as_str(),
            context,
            started_at.elapsed().as_millis(),
            err.log_code(),
            err
        ),
    }
    result
}

fn spawn_worker<F>(name: &str, body: F) -> StorageResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|err| StorageError::Configuration(format!("cannot spawn `{name}`: {err}")))
}

fn writer_loop(pool: &ConnectionPool, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        run_job(pool, job);
    }
    pool.release_current_thread();
}

fn reader_loop(pool: &ConnectionPool, receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = receiver.lock().recv();
        match job {
            Ok(job) => run_job(pool, job),
            Err(_) => break,
        }
    }
    pool.release_current_thread();
}

fn run_job(pool: &ConnectionPool, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(|| job(pool))).is_err() {
        error!("event=task_run module=task status=error error=task_panicked");
    }
}
