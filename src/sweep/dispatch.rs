//! Worker pool and completion tracking.
//!
//! Batches are queued on a bounded channel consumed by named worker threads.
//! Each submission returns a [`PendingHandle`] whose events (start, result)
//! arrive over a private channel; the orchestrating thread owns the
//! [`PendingSet`] and drains it before exit.

use crate::error::{SweepError, SweepResult};
use crate::sweep::grouper::BatchId;
use crate::sweep::progress::ProgressHub;
use crate::sweep::sink::{BatchJob, BatchOutcome, BatchSink};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded,
};
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often a wait on a not-yet-started batch, or a submit on a full queue,
/// re-checks timeouts and the abort flag.
const START_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    BatchFailed,
    Interrupted,
}

/// Shared run-wide abort switch. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    state: Arc<AtomicU8>,
}

impl AbortFlag {
    pub fn trip(&self, reason: AbortReason) {
        let code = match reason {
            AbortReason::BatchFailed => 1,
            AbortReason::Interrupted => 2,
        };
        let _ = self
            .state
            .compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn reason(&self) -> Option<AbortReason> {
        match self.state.load(Ordering::SeqCst) {
            1 => Some(AbortReason::BatchFailed),
            2 => Some(AbortReason::Interrupted),
            _ => None,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.reason().is_some()
    }
}

enum JobEvent {
    Started(Instant),
    Finished(SweepResult<BatchOutcome>),
}

struct Task {
    job: BatchJob,
    events: Sender<JobEvent>,
}

pub struct PendingHandle {
    id: BatchId,
    events: Receiver<JobEvent>,
    started: Option<Instant>,
}

/// Answer every task still sitting in the queue with `Cancelled`. Used once
/// the run is aborted, when workers may all be stuck and never reach them.
fn cancel_queued(backlog: &Receiver<Task>) -> usize {
    let mut cancelled = 0;
    while let Ok(Task { job, events }) = backlog.try_recv() {
        let _ = events.send(JobEvent::Finished(Err(SweepError::Cancelled {
            batch: job.id,
        })));
        cancelled += 1;
    }
    cancelled
}

impl PendingHandle {
    /// Non-blocking check: the result if the batch finished, or a timeout
    /// error if it has run past `timeout`.
    fn poll(&mut self, timeout: Option<Duration>) -> Option<SweepResult<BatchOutcome>> {
        loop {
            match self.events.try_recv() {
                Ok(JobEvent::Started(at)) => self.started = Some(at),
                Ok(JobEvent::Finished(result)) => return Some(result),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Some(Err(SweepError::WorkerLost {
                        batch: self.id.clone(),
                    }));
                }
            }
        }
        match (self.started, timeout) {
            (Some(at), Some(limit)) if at.elapsed() >= limit => {
                Some(Err(SweepError::BatchTimeout {
                    batch: self.id.clone(),
                    after_secs: limit.as_secs(),
                }))
            }
            _ => None,
        }
    }

    /// Block until the batch reports a result. The timeout counts from the
    /// moment a worker picked the batch up, not from submission. While the
    /// batch is still queued the abort flag is polled; once it trips, queued
    /// work is cancelled from here.
    fn wait(
        self,
        timeout: Option<Duration>,
        abort: &AbortFlag,
        backlog: &Receiver<Task>,
    ) -> SweepResult<BatchOutcome> {
        let mut started = self.started;
        loop {
            let event = match (started, timeout) {
                (Some(at), Some(limit)) => match self.events.recv_deadline(at + limit) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(SweepError::BatchTimeout {
                            batch: self.id,
                            after_secs: limit.as_secs(),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(SweepError::WorkerLost { batch: self.id });
                    }
                },
                (Some(_), None) => match self.events.recv() {
                    Ok(event) => event,
                    Err(_) => return Err(SweepError::WorkerLost { batch: self.id }),
                },
                (None, _) => match self.events.recv_timeout(START_POLL) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        if abort.is_tripped() {
                            let cancelled = cancel_queued(backlog);
                            if cancelled > 0 {
                                debug!(cancelled, "cancelled queued batches");
                            }
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(SweepError::WorkerLost { batch: self.id });
                    }
                },
            };
            match event {
                JobEvent::Started(at) => started = Some(at),
                JobEvent::Finished(result) => return result,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub succeeded: Vec<BatchOutcome>,
    pub failed: Vec<SweepError>,
    pub cancelled: Vec<BatchId>,
    /// A worker may still be stuck inside a timed-out batch.
    pub timed_out: bool,
}

/// In-flight batches, owned by the orchestrating thread.
#[derive(Default)]
pub struct PendingSet {
    handles: Vec<PendingHandle>,
}

impl PendingSet {
    pub fn push(&mut self, handle: PendingHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Record one observed result. Any failure trips `abort` so queued
    /// batches are cancelled while running ones finish.
    fn settle(report: &mut DrainReport, abort: &AbortFlag, result: SweepResult<BatchOutcome>) {
        match result {
            Ok(outcome) => report.succeeded.push(outcome),
            Err(SweepError::Cancelled { batch }) => {
                warn!(batch = %batch, "batch cancelled before start");
                report.cancelled.push(batch);
            }
            Err(err) => {
                error!(code = err.code().as_str(), "{err}");
                report.timed_out |= matches!(err, SweepError::BatchTimeout { .. });
                abort.trip(AbortReason::BatchFailed);
                report.failed.push(err);
            }
        }
    }

    /// Settle the handles that already have a result (or ran out of time)
    /// without blocking on the rest.
    fn reap(&mut self, timeout: Option<Duration>, abort: &AbortFlag, report: &mut DrainReport) {
        let mut still_pending = Vec::with_capacity(self.handles.len());
        for mut handle in std::mem::take(&mut self.handles) {
            match handle.poll(timeout) {
                Some(result) => Self::settle(report, abort, result),
                None => still_pending.push(handle),
            }
        }
        self.handles = still_pending;
    }

    /// Await every pending batch. A handle leaves the set only once its result
    /// (or timeout) has been observed.
    fn drain(
        &mut self,
        timeout: Option<Duration>,
        abort: &AbortFlag,
        backlog: &Receiver<Task>,
        report: &mut DrainReport,
    ) {
        while !self.is_empty() {
            let snapshot = std::mem::take(&mut self.handles);
            debug!(pending = snapshot.len(), "draining pending batches");
            for handle in snapshot {
                let result = handle.wait(timeout, abort, backlog);
                Self::settle(report, abort, result);
            }
        }
    }
}

pub struct WorkerPool {
    queue: Option<Sender<Task>>,
    /// Consumer side kept by the pool so an aborted drain can empty the queue.
    backlog: Receiver<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        size: NonZeroUsize,
        sink: Arc<dyn BatchSink>,
        progress: ProgressHub,
        abort: AbortFlag,
    ) -> io::Result<Self> {
        let size = size.get();
        let (queue, tasks) = bounded::<Task>(size * 2);

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let tasks = tasks.clone();
            let sink = Arc::clone(&sink);
            let progress = progress.clone();
            let abort = abort.clone();
            let handle = thread::Builder::new()
                .name(format!("sweep-worker-{n}"))
                .spawn(move || worker_loop(&tasks, sink.as_ref(), &progress, &abort))?;
            workers.push(handle);
        }

        Ok(Self {
            queue: Some(queue),
            backlog: tasks,
            workers,
        })
    }

    /// Queue a batch. While the queue is full `while_full` runs every
    /// [`START_POLL`]; once the run is aborted the queue is emptied so the
    /// batch still gets in (and is cancelled like the rest).
    pub fn submit(
        &self,
        job: BatchJob,
        abort: &AbortFlag,
        mut while_full: impl FnMut(),
    ) -> PendingHandle {
        let (events, receiver) = bounded(2);
        let id = job.id.clone();
        if let Some(queue) = &self.queue {
            let mut task = Task { job, events };
            loop {
                match queue.send_timeout(task, START_POLL) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(back)) => {
                        task = back;
                        while_full();
                        if abort.is_tripped() {
                            cancel_queued(&self.backlog);
                        }
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        // Every worker is gone; the dropped sender surfaces as WorkerLost.
                        warn!(batch = %id, "worker pool is closed");
                        break;
                    }
                }
            }
        }
        PendingHandle {
            id,
            events: receiver,
            started: None,
        }
    }

    /// Close the queue. Workers are joined unless one may be stuck.
    pub fn shutdown(mut self, join: bool) {
        self.queue.take();
        if !join {
            warn!("not waiting for workers; a timed-out batch may still be running");
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

fn worker_loop(
    tasks: &Receiver<Task>,
    sink: &dyn BatchSink,
    progress: &ProgressHub,
    abort: &AbortFlag,
) {
    for Task { job, events } in tasks.iter() {
        if abort.is_tripped() {
            let _ = events.send(JobEvent::Finished(Err(SweepError::Cancelled {
                batch: job.id,
            })));
            continue;
        }

        let _ = events.send(JobEvent::Started(Instant::now()));
        info!(batch = %job.id, files = job.batch.len(), mode = %sink.mode(), "batch started");
        let bar = progress.batch(&job.id, job.batch.len());
        let result = sink.process(&job, &bar);
        match &result {
            Ok(_) => bar.finish(),
            Err(_) => {
                bar.abandon();
                abort.trip(AbortReason::BatchFailed);
            }
        }
        let _ = events.send(JobEvent::Finished(result));
    }
}

pub struct DispatchConfig {
    pub workers: NonZeroUsize,
    pub batch_timeout: Option<Duration>,
}

/// Pool plus pending set: submit batches, then [`Dispatcher::finish`].
pub struct Dispatcher {
    pool: WorkerPool,
    pending: PendingSet,
    /// Results settled early, while a full queue held up a submit.
    settled: DrainReport,
    batch_timeout: Option<Duration>,
    abort: AbortFlag,
    next_seq: u64,
}

impl Dispatcher {
    pub fn spawn(
        config: DispatchConfig,
        sink: Arc<dyn BatchSink>,
        progress: ProgressHub,
        abort: AbortFlag,
    ) -> io::Result<Self> {
        let pool = WorkerPool::spawn(config.workers, sink, progress, abort.clone())?;
        Ok(Self {
            pool,
            pending: PendingSet::default(),
            settled: DrainReport::default(),
            batch_timeout: config.batch_timeout,
            abort,
            next_seq: 0,
        })
    }

    /// Run-wide sequence number for the next batch.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn submit(&mut self, job: BatchJob) {
        debug!(batch = %job.id, "submit");
        let pending = &mut self.pending;
        let settled = &mut self.settled;
        let (timeout, abort) = (self.batch_timeout, &self.abort);
        let handle = self
            .pool
            .submit(job, abort, || pending.reap(timeout, abort, settled));
        self.pending.push(handle);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn finish(mut self) -> DrainReport {
        let mut report = std::mem::take(&mut self.settled);
        self.pending.drain(
            self.batch_timeout,
            &self.abort,
            &self.pool.backlog,
            &mut report,
        );
        self.pool.shutdown(!report.timed_out);
        report
    }
}
