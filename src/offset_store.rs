//! Durable `partition -> offset` persistence with atomic group commit.
//!
//! The actual file write lives on a dedicated worker thread, modeled on the
//! WAL's `FsyncState`/`GraniteWorkerHandle` commit-latch: callers stage
//! writes in memory, hand a snapshot to the worker, and block on a
//! condition variable until the worker reports the write durable (or the
//! caller's deadline expires). This keeps the fsync off the caller's
//! thread and lets concurrent `stage` calls from different partitions
//! coalesce into a single flush.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::model::{partition_key, OffsetRecord};

/// Outcome of a `flush` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Committed,
    Timeout,
    Failed,
}

struct FlushRequest {
    generation: u64,
    snapshot: BTreeMap<String, OffsetRecord>,
}

/// Shared commit-latch state between the caller and the flush worker.
struct FlushLatch {
    mutex: Mutex<LatchState>,
    cvar: Condvar,
}

struct LatchState {
    committed_generation: u64,
    last_error: Option<String>,
}

impl FlushLatch {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(LatchState {
                committed_generation: 0,
                last_error: None,
            }),
            cvar: Condvar::new(),
        }
    }

    fn signal_committed(&self, generation: u64) {
        let mut state = self.mutex.lock().unwrap();
        state.committed_generation = generation;
        state.last_error = None;
        self.cvar.notify_all();
    }

    fn signal_failed(&self, generation: u64, message: String) {
        let mut state = self.mutex.lock().unwrap();
        // Still bump the generation so waiters for this flush wake up
        // instead of waiting for a commit that will never come.
        state.committed_generation = generation;
        state.last_error = Some(message);
        self.cvar.notify_all();
    }

    /// Wait until `generation` has been resolved (committed or failed) or
    /// `deadline` passes.
    fn wait_for(&self, generation: u64, deadline: Instant) -> FlushOutcome {
        let mut state = self.mutex.lock().unwrap();
        loop {
            if state.committed_generation >= generation {
                return if state.last_error.is_some() {
                    FlushOutcome::Failed
                } else {
                    FlushOutcome::Committed
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return FlushOutcome::Timeout;
            }
            let (guard, timeout_result) =
                self.cvar.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if timeout_result.timed_out() && state.committed_generation < generation {
                return FlushOutcome::Timeout;
            }
        }
    }
}

/// Persists a `partition -> offset` map with atomic group commit via
/// tempfile-then-fsync-then-rename, the same strategy the catalog uses for
/// its JSON snapshot.
pub struct OffsetStore {
    path: PathBuf,
    staged: Mutex<BTreeMap<String, OffsetRecord>>,
    committed: Mutex<BTreeMap<String, OffsetRecord>>,
    latch: Arc<FlushLatch>,
    sender: mpsc::Sender<FlushRequest>,
    next_generation: Mutex<u64>,
    _worker: thread::JoinHandle<()>,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let committed = read_offset_file(&path)?;

        let (sender, receiver) = mpsc::channel::<FlushRequest>();
        let latch = Arc::new(FlushLatch::new());
        let worker_path = path.clone();
        let worker_latch = Arc::clone(&latch);
        let worker = thread::spawn(move || {
            offset_worker_thread(worker_path, receiver, worker_latch);
        });

        Ok(Self {
            path,
            staged: Mutex::new(BTreeMap::new()),
            committed: Mutex::new(committed),
            latch,
            sender,
            next_generation: Mutex::new(0),
            _worker: worker,
        })
    }

    /// Returns every persisted pair. A missing or empty store is the empty
    /// mapping, not an error.
    pub fn load(&self) -> BTreeMap<String, OffsetRecord> {
        self.committed.lock().unwrap().clone()
    }

    pub fn offset_for_partition(&self, partition: &BTreeMap<String, String>) -> Option<OffsetRecord> {
        let key = partition_key(partition);
        self.committed.lock().unwrap().get(&key).cloned()
    }

    /// Records a pending write in memory. Does not touch disk.
    pub fn stage(&self, record: OffsetRecord) {
        let key = partition_key(&record.partition);
        self.staged.lock().unwrap().insert(key, record);
    }

    /// Writes every staged entry atomically and clears the staged set on
    /// success. Failures leave the staged set intact so the caller can
    /// retry.
    pub fn flush(&self, deadline: Instant) -> FlushOutcome {
        let staged_snapshot = {
            let staged = self.staged.lock().unwrap();
            if staged.is_empty() {
                return FlushOutcome::Committed;
            }
            staged.clone()
        };

        let full_snapshot = {
            let mut committed = self.committed.lock().unwrap();
            for (k, v) in &staged_snapshot {
                committed.insert(k.clone(), v.clone());
            }
            committed.clone()
        };

        let generation = {
            let mut next = self.next_generation.lock().unwrap();
            *next += 1;
            *next
        };

        if self
            .sender
            .send(FlushRequest {
                generation,
                snapshot: full_snapshot,
            })
            .is_err()
        {
            return FlushOutcome::Failed;
        }

        let outcome = self.latch.wait_for(generation, deadline);
        if outcome == FlushOutcome::Committed {
            let mut staged = self.staged.lock().unwrap();
            for key in staged_snapshot.keys() {
                staged.remove(key);
            }
        }
        outcome
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn offset_worker_thread(
    path: PathBuf,
    receiver: mpsc::Receiver<FlushRequest>,
    latch: Arc<FlushLatch>,
) {
    log::info!("offset store worker started for {}", path.display());
    while let Ok(request) = receiver.recv() {
        match write_offset_file(&path, &request.snapshot) {
            Ok(()) => latch.signal_committed(request.generation),
            Err(err) => {
                log::error!("offset store flush failed: {err}");
                latch.signal_failed(request.generation, err.to_string());
            }
        }
    }
    log::info!("offset store worker stopped for {}", path.display());
}

fn read_offset_file(path: &Path) -> Result<BTreeMap<String, OffsetRecord>> {
    match fs::read(path) {
        Ok(bytes) => {
            if bytes.is_empty() {
                return Ok(BTreeMap::new());
            }
            serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::store_unavailable(format!("corrupt offset file: {e}")))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(EngineError::store_unavailable(err.to_string())),
    }
}

fn write_offset_file(path: &Path, snapshot: &BTreeMap<String, OffsetRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(snapshot)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&body)?;
        file.sync_data()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
