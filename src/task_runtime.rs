//! Drives one source task through its lifecycle on a dedicated worker
//! thread: poll, enqueue, periodic offset commit, clean shutdown.
//!
//! The worker-thread shape (dedicated `std::thread`, `Instant`-based
//! periodic trigger, final flush on shutdown) follows the storage engine's
//! Sandstone background worker (`worker_loop`/`flush_dirty_tables`),
//! generalized from "flush dirty tables on an interval" to "flush staged
//! offsets on an interval, driven off a poll loop". Per the design notes'
//! third open question, the idle wait uses `mpsc::Receiver::recv_timeout`
//! rather than a busy-wait tight loop, so a stop signal interrupts the
//! wait immediately instead of only being observed on the next timer tick.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::connector::{DdlSink, OffsetReader, SourceTask};
use crate::error::EngineError;
use crate::model::OffsetRecord;
use crate::offset_store::{FlushOutcome, OffsetStore};

/// Task lifecycle state. `Failed` and `Stopped` are both terminal;
/// `is_terminal` treats them identically for `await` purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Created
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Stopping => "STOPPING",
            TaskState::Stopped => "STOPPED",
            TaskState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Stopped | TaskState::Failed)
    }
}

/// Timing knobs consumed by the worker loop, a subset of `EngineConfig`.
#[derive(Debug, Clone)]
pub struct RuntimeTiming {
    pub poll_interval: Duration,
    pub offset_flush_interval: Duration,
    pub offset_commit_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub max_flush_retries: u32,
}

type CompletionCallback = Box<dyn FnOnce(bool, String, Option<EngineError>) + Send>;

struct DoneLatch {
    mutex: Mutex<bool>,
    cvar: Condvar,
}

impl DoneLatch {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn finish(&self) {
        let mut done = self.mutex.lock().unwrap();
        *done = true;
        self.cvar.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let done = self.mutex.lock().unwrap();
        if *done {
            return true;
        }
        let (done, _) = self.cvar.wait_timeout(done, timeout).unwrap();
        *done
    }

    fn wait_forever(&self) {
        let mut done = self.mutex.lock().unwrap();
        while !*done {
            done = self.cvar.wait(done).unwrap();
        }
    }
}

pub struct TaskRuntime {
    state: Arc<Mutex<TaskState>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    done: Arc<DoneLatch>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskRuntime {
    /// Builds the runtime and immediately spawns its worker thread; the
    /// worker moves the task from `Created` through `Starting` to
    /// `Running` (or `Failed`, if `task.start` errors) on its own.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        mut task: Box<dyn SourceTask>,
        config: HashMap<String, String>,
        offset_reader: Arc<dyn OffsetReader>,
        ddl_sink: Arc<dyn DdlSink>,
        producer: crate::queue::RecordProducer,
        offset_store: Arc<OffsetStore>,
        timing: RuntimeTiming,
        on_complete: CompletionCallback,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(TaskState::Created));
        let done = Arc::new(DoneLatch::new());
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let runtime = Arc::new(Self {
            state: Arc::clone(&state),
            stop_tx: Mutex::new(Some(stop_tx)),
            done: Arc::clone(&done),
            worker: Mutex::new(None),
        });

        let worker = thread::spawn(move || {
            worker_loop(
                task.as_mut(),
                config,
                offset_reader,
                ddl_sink,
                producer,
                offset_store,
                stop_rx,
                state,
                done,
                timing,
                on_complete,
            );
        });

        *runtime.worker.lock().unwrap() = Some(worker);
        runtime
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap()
    }

    /// Idempotent and non-blocking: signals the worker to stop on its next
    /// loop iteration. Calling this more than once has no additional
    /// effect.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Blocks the calling thread up to `timeout`, returning true once the
    /// runtime reaches a terminal state.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.done.wait(timeout)
    }

    /// Blocks the calling thread indefinitely until the runtime reaches a
    /// terminal state. Used by `Engine::run`, which is documented as
    /// blocking for as long as the task runs.
    pub fn block_until_terminal(&self) {
        self.done.wait_forever();
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    task: &mut dyn SourceTask,
    config: HashMap<String, String>,
    offset_reader: Arc<dyn OffsetReader>,
    ddl_sink: Arc<dyn DdlSink>,
    producer: crate::queue::RecordProducer,
    offset_store: Arc<OffsetStore>,
    stop_rx: mpsc::Receiver<()>,
    state: Arc<Mutex<TaskState>>,
    done: Arc<DoneLatch>,
    timing: RuntimeTiming,
    on_complete: CompletionCallback,
) {
    set_state(&state, TaskState::Starting);
    if let Err(e) = task.start(&config, offset_reader.as_ref(), ddl_sink) {
        log::error!("task start failed: {e}");
        set_state(&state, TaskState::Failed);
        done.finish();
        on_complete(false, format!("task start failed: {e}"), Some(e));
        return;
    }
    set_state(&state, TaskState::Running);
    log::info!("task runtime running");

    let mut last_flush = Instant::now();
    let mut consecutive_flush_failures: u32 = 0;

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let batch = match task.poll() {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("task poll failed: {e}");
                set_state(&state, TaskState::Failed);
                done.finish();
                on_complete(false, format!("task poll failed: {e}"), Some(e));
                return;
            }
        };

        for record in &batch {
            producer.put(record.clone());
            if let Err(e) = task.commit_record(record) {
                log::warn!("commit_record hook failed: {e}");
            }
            offset_store.stage(OffsetRecord {
                partition: record.position.partition.clone(),
                offset: record.position.offset.clone(),
            });
        }

        let interval_elapsed = last_flush.elapsed() >= timing.offset_flush_interval;
        let flush_after_every_batch = timing.offset_flush_interval.is_zero();
        let should_flush = !batch.is_empty() && (flush_after_every_batch || interval_elapsed);

        if should_flush {
            let deadline = Instant::now() + timing.offset_commit_timeout;
            match offset_store.flush(deadline) {
                FlushOutcome::Committed => {
                    consecutive_flush_failures = 0;
                    last_flush = Instant::now();
                }
                FlushOutcome::Timeout | FlushOutcome::Failed => {
                    consecutive_flush_failures += 1;
                    log::warn!(
                        "offset flush did not complete ({consecutive_flush_failures}/{} consecutive)",
                        timing.max_flush_retries
                    );
                    if consecutive_flush_failures >= timing.max_flush_retries {
                        let err = EngineError::store_unavailable(
                            "offset flush failed too many times in a row",
                        );
                        log::error!("{err}");
                        set_state(&state, TaskState::Failed);
                        done.finish();
                        on_complete(false, err.to_string(), Some(err));
                        return;
                    }
                }
            }
        }

        if batch.is_empty() {
            match stop_rx.recv_timeout(timing.poll_interval) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    set_state(&state, TaskState::Stopping);
    log::info!("task runtime stopping");
    if let Err(e) = task.stop() {
        log::warn!("task.stop() returned an error: {e}");
    }

    let shutdown_deadline = Instant::now() + timing.shutdown_timeout;

    // Drain whatever the task still has buffered, best effort, within the
    // shutdown deadline — a stopped task may still be holding records it
    // already read but hadn't handed over yet.
    loop {
        if Instant::now() >= shutdown_deadline {
            log::warn!("shutdown deadline reached while draining final records");
            break;
        }
        match task.poll() {
            Ok(batch) if batch.is_empty() => break,
            Ok(batch) => {
                for record in &batch {
                    producer.put(record.clone());
                    if let Err(e) = task.commit_record(record) {
                        log::warn!("commit_record hook failed during shutdown drain: {e}");
                    }
                    offset_store.stage(OffsetRecord {
                        partition: record.position.partition.clone(),
                        offset: record.position.offset.clone(),
                    });
                }
            }
            Err(e) => {
                log::warn!("final poll during shutdown failed, abandoning drain: {e}");
                break;
            }
        }
    }

    match offset_store.flush(shutdown_deadline) {
        FlushOutcome::Committed => {
            log::info!("final offset flush committed during shutdown");
        }
        FlushOutcome::Timeout | FlushOutcome::Failed => {
            let err = EngineError::store_unavailable(
                "final offset flush did not complete before the shutdown deadline",
            );
            log::error!("{err}");
            set_state(&state, TaskState::Failed);
            done.finish();
            on_complete(false, err.to_string(), Some(err));
            return;
        }
    }

    set_state(&state, TaskState::Stopped);
    log::info!("task runtime stopped");
    done.finish();
    on_complete(true, "shutdown complete".to_string(), None);
}

fn set_state(state: &Arc<Mutex<TaskState>>, new_state: TaskState) {
    *state.lock().unwrap() = new_state;
}
