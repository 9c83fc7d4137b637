//! Single-connector embedded host: configures, owns, and supervises one
//! Task Runtime; exposes the blocking `run`/`stop` control surface.
//!
//! Shaped like the storage engine's `Server::new`/`Server::run`: build
//! every owned subsystem up front in `new`, then block in `run` logging
//! lifecycle transitions via `log::info!`/`log::error!`. Where `Server`
//! accepts TCP connections in a loop, this accepts nothing — per scope,
//! the core exposes no network surface — and instead drives a single
//! `TaskRuntime` to completion.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connector::{DdlSink, OffsetReader, SourceConnector};
use crate::ddl_history::{DdlHistory, NumericPosComparator};
use crate::error::{EngineError, Result};
use crate::model::OffsetRecord;
use crate::offset_store::OffsetStore;
use crate::queue::RecordQueue;
use crate::schema_registry::ddl_parser::SqlDdlParser;
use crate::schema_registry::{DdlOnError, SchemaFilters, SchemaRegistry};
use crate::task_runtime::{RuntimeTiming, TaskRuntime, TaskState};

/// `offset.commit.policy`: `Periodic` flushes on `offset_flush_interval`;
/// `Always` flushes after every poll batch regardless of the configured
/// interval (equivalent to forcing the interval to zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetCommitPolicy {
    Periodic,
    Always,
}

impl Default for OffsetCommitPolicy {
    fn default() -> Self {
        OffsetCommitPolicy::Periodic
    }
}

/// Every configuration field recognized by the Engine (§4.6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub offset_storage_file: PathBuf,
    pub ddl_history_file: PathBuf,
    pub offset_flush_interval: Duration,
    pub offset_commit_timeout: Duration,
    pub offset_commit_policy: OffsetCommitPolicy,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub max_flush_retries: u32,
    pub ddl_on_error: DdlOnError,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "cdc-engine".to_string(),
            offset_storage_file: PathBuf::from("offsets.json"),
            ddl_history_file: PathBuf::from("ddl-history.bin"),
            offset_flush_interval: Duration::from_millis(60_000),
            offset_commit_timeout: Duration::from_millis(5_000),
            offset_commit_policy: OffsetCommitPolicy::Periodic,
            queue_capacity: 2_048,
            poll_interval: Duration::from_millis(1_000),
            shutdown_timeout: Duration::from_millis(10_000),
            max_flush_retries: 5,
            ddl_on_error: DdlOnError::Continue,
        }
    }
}

impl EngineConfig {
    /// Parses the dotted-key configuration map named in §4.6/§9. Unknown
    /// keys are logged and ignored; a required key with an unparseable
    /// value fails with `EngineError::Config`. `connector.class` is not
    /// stored here — the Engine resolves it against its own connector
    /// registry, since this crate has no class loader to model.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = EngineConfig::default();

        for (key, value) in map {
            match key.as_str() {
                "name" => config.name = value.clone(),
                "offset.storage.file.filename" => config.offset_storage_file = PathBuf::from(value),
                "ddl.history.file.filename" => config.ddl_history_file = PathBuf::from(value),
                "offset.flush.interval.ms" => {
                    config.offset_flush_interval = Duration::from_millis(parse_u64(key, value)?)
                }
                "offset.commit.timeout.ms" => {
                    config.offset_commit_timeout = Duration::from_millis(parse_u64(key, value)?)
                }
                "offset.commit.policy" => {
                    config.offset_commit_policy = match value.as_str() {
                        "periodic" => OffsetCommitPolicy::Periodic,
                        "always" => OffsetCommitPolicy::Always,
                        other => {
                            return Err(EngineError::config(format!(
                                "offset.commit.policy must be 'periodic' or 'always', got '{other}'"
                            )))
                        }
                    }
                }
                "queue.capacity" => config.queue_capacity = parse_u64(key, value)? as usize,
                "poll.interval.ms" => {
                    config.poll_interval = Duration::from_millis(parse_u64(key, value)?)
                }
                "shutdown.timeout.ms" => {
                    config.shutdown_timeout = Duration::from_millis(parse_u64(key, value)?)
                }
                "max.flush.retries" => config.max_flush_retries = parse_u64(key, value)? as u32,
                "ddl.on.error" => {
                    config.ddl_on_error = match value.as_str() {
                        "continue" => DdlOnError::Continue,
                        "fail" => DdlOnError::Fail,
                        "skip" => DdlOnError::Skip,
                        other => {
                            return Err(EngineError::config(format!(
                                "ddl.on.error must be 'continue', 'fail', or 'skip', got '{other}'"
                            )))
                        }
                    }
                }
                "connector.class" | "connector.factory" => {
                    // Resolved separately by the Engine's connector
                    // registry, not stored on EngineConfig.
                }
                other => {
                    log::warn!("ignoring unrecognized configuration key '{other}'");
                }
            }
        }

        if config.offset_commit_policy == OffsetCommitPolicy::Always {
            config.offset_flush_interval = Duration::ZERO;
        }

        Ok(config)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| EngineError::config(format!("'{key}' expects an integer, got '{value}'")))
}

struct OffsetStoreReader {
    store: Arc<OffsetStore>,
}

impl OffsetReader for OffsetStoreReader {
    fn offsets_for(&self, partition: &BTreeMap<String, String>) -> Option<OffsetRecord> {
        self.store.offset_for_partition(partition)
    }
}

type CompletionCallback = Box<dyn FnOnce(bool, String, Option<EngineError>) + Send>;

/// Owns one connector's task runtime end to end. `run` is blocking: it
/// returns only after the completion callback has fired (clean shutdown,
/// startup failure, or task failure).
pub struct Engine {
    config: EngineConfig,
    offset_store: Arc<OffsetStore>,
    schema_registry: Arc<SchemaRegistry>,
    queue: Arc<RecordQueue>,
    connector: Box<dyn SourceConnector>,
    completion: Mutex<Option<CompletionCallback>>,
    runtime: Mutex<Option<Arc<TaskRuntime>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        connector: Box<dyn SourceConnector>,
        completion: CompletionCallback,
    ) -> Result<Self> {
        log::info!("engine '{}' initializing", config.name);
        let offset_store = Arc::new(OffsetStore::new(&config.offset_storage_file)?);
        let ddl_history = Arc::new(DdlHistory::start(&config.ddl_history_file)?);
        let schema_registry = Arc::new(SchemaRegistry::new(
            ddl_history,
            Box::new(SqlDdlParser),
            Box::new(NumericPosComparator),
            SchemaFilters::default(),
            config.ddl_on_error,
        ));
        let queue = Arc::new(RecordQueue::new(config.queue_capacity));
        Ok(Self {
            config,
            offset_store,
            schema_registry,
            queue,
            connector,
            completion: Mutex::new(Some(completion)),
            runtime: Mutex::new(None),
        })
    }

    /// Every record notification, dispatched after a record leaves the
    /// queue, synchronously on the calling thread — per §5, offset flush
    /// only covers records whose notification has *returned* before the
    /// flush began, so callers depending on that must process records
    /// synchronously here before the next `take`.
    pub fn consume_forever(&self, mut on_record: impl FnMut(crate::model::Record)) {
        loop {
            match self.queue.take(Duration::from_millis(200)) {
                Ok(record) => on_record(record),
                Err(_) => {
                    if self.runtime_state().map(TaskState::is_terminal).unwrap_or(true) {
                        break;
                    }
                }
            }
        }
        // Final drain: records that landed between the last timed-out
        // `take` and the runtime reaching a terminal state.
        for record in self.queue.drain(usize::MAX) {
            on_record(record);
        }
    }

    fn runtime_state(&self) -> Option<TaskState> {
        self.runtime.lock().unwrap().as_ref().map(|r| r.state())
    }

    /// Blocking: initializes the connector, starts its task on a worker
    /// thread, and waits for the task runtime to reach a terminal state.
    /// The completion callback fires exactly once, whether that happens
    /// here or the caller observes it asynchronously via `stop`.
    pub fn run(&self) -> Result<()> {
        log::info!("engine '{}' starting task runtime", self.config.name);
        let task_configs = match self.connector.initialize(&HashMap::new()) {
            Ok(configs) if !configs.is_empty() => configs,
            Ok(_) => {
                return self.fail_startup(EngineError::config(
                    "connector.initialize returned no task configurations",
                ))
            }
            Err(e) => return self.fail_startup(e),
        };
        let task_config = task_configs.into_iter().next().unwrap();

        let task = self.connector.task();
        let offset_reader = Arc::new(OffsetStoreReader {
            store: Arc::clone(&self.offset_store),
        });
        let ddl_sink: Arc<dyn DdlSink> = Arc::clone(&self.schema_registry) as Arc<dyn DdlSink>;
        let producer = self.queue.producer();

        let timing = RuntimeTiming {
            poll_interval: self.config.poll_interval,
            offset_flush_interval: self.config.offset_flush_interval,
            offset_commit_timeout: self.config.offset_commit_timeout,
            shutdown_timeout: self.config.shutdown_timeout,
            max_flush_retries: self.config.max_flush_retries,
        };

        let completion = Arc::new(Mutex::new(self.completion.lock().unwrap().take()));
        let completion_for_worker = Arc::clone(&completion);
        let engine_name = self.config.name.clone();

        let runtime = TaskRuntime::start(
            task,
            task_config,
            offset_reader,
            ddl_sink,
            producer,
            Arc::clone(&self.offset_store),
            timing,
            Box::new(move |success, message, error| {
                if success {
                    log::info!("engine '{engine_name}' completed: {message}");
                } else {
                    log::error!("engine '{engine_name}' failed: {message}");
                }
                if let Some(callback) = completion_for_worker.lock().unwrap().take() {
                    callback(success, message, error);
                }
            }),
        );
        *self.runtime.lock().unwrap() = Some(Arc::clone(&runtime));

        runtime.block_until_terminal();
        Ok(())
    }

    fn fail_startup(&self, err: EngineError) -> Result<()> {
        log::error!("engine '{}' failed to start: {err}", self.config.name);
        let message = err.to_string();
        if let Some(callback) = self.completion.lock().unwrap().take() {
            callback(false, message, Some(err));
        }
        Ok(())
    }

    /// Non-blocking, idempotent request for the task runtime to stop.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.lock().unwrap().as_ref() {
            runtime.stop();
        }
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        match self.runtime.lock().unwrap().as_ref() {
            Some(runtime) => runtime.await_termination(timeout),
            None => false,
        }
    }

    pub fn offset_store(&self) -> &Arc<OffsetStore> {
        &self.offset_store
    }

    pub fn schema_registry(&self) -> &Arc<SchemaRegistry> {
        &self.schema_registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::reference::InMemoryConnector;
    use crate::model::{Record, SourcePosition};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn record(n: i64) -> Record {
        let mut partition = BTreeMap::new();
        partition.insert("server".to_string(), "A".to_string());
        let mut offset = BTreeMap::new();
        offset.insert("pos".to_string(), serde_json::json!(n));
        Record {
            topic: "t".to_string(),
            key: None,
            value: None,
            position: SourcePosition::new(partition, offset),
            timestamp_millis: 0,
        }
    }

    #[test]
    fn completion_callback_fires_once_on_startup_config_error() {
        struct FailingConnector;
        impl SourceConnector for FailingConnector {
            fn initialize(
                &self,
                _config: &HashMap<String, String>,
            ) -> Result<Vec<HashMap<String, String>>> {
                Err(EngineError::config("bad url"))
            }
            fn task(&self) -> Box<dyn crate::connector::SourceTask> {
                unreachable!("never called when initialize fails")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.offset_storage_file = dir.path().join("offsets.json");
        config.ddl_history_file = dir.path().join("ddl-history.bin");

        let call_count = Arc::new(AtomicUsize::new(0));
        let saw_failure = Arc::new(AtomicBool::new(false));
        let call_count_w = Arc::clone(&call_count);
        let saw_failure_w = Arc::clone(&saw_failure);

        let engine = Engine::new(
            config,
            Box::new(FailingConnector),
            Box::new(move |success, _msg, err| {
                call_count_w.fetch_add(1, Ordering::SeqCst);
                saw_failure_w.store(!success && err.is_some(), Ordering::SeqCst);
            }),
        )
        .unwrap();

        engine.run().unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(saw_failure.load(Ordering::SeqCst));
    }

    #[test]
    fn clean_run_flushes_offsets_and_completes_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.offset_storage_file = dir.path().join("offsets.json");
        config.ddl_history_file = dir.path().join("ddl-history.bin");
        config.offset_flush_interval = Duration::ZERO;
        config.poll_interval = Duration::from_millis(5);

        let connector = InMemoryConnector::new(vec![vec![record(1), record(2), record(3)]]);

        let completed = Arc::new(AtomicBool::new(false));
        let completed_w = Arc::clone(&completed);

        let engine = Arc::new(
            Engine::new(
                config,
                Box::new(connector),
                Box::new(move |success, _msg, _err| {
                    completed_w.store(success, Ordering::SeqCst);
                }),
            )
            .unwrap(),
        );

        let engine_for_consumer = Arc::clone(&engine);
        let consumer = std::thread::spawn(move || {
            let mut seen = 0;
            engine_for_consumer.consume_forever(|_record| {
                seen += 1;
                if seen >= 3 {
                    engine_for_consumer.stop();
                }
            });
            seen
        });

        engine.run().unwrap();
        let seen = consumer.join().unwrap();
        assert_eq!(seen, 3);
        assert!(completed.load(Ordering::SeqCst));
    }

    #[test]
    fn ddl_applied_by_the_task_reaches_the_engines_schema_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.offset_storage_file = dir.path().join("offsets.json");
        config.ddl_history_file = dir.path().join("ddl-history.bin");
        config.poll_interval = Duration::from_millis(5);

        let connector = InMemoryConnector::with_ddl(
            vec![],
            vec![(
                "shop".to_string(),
                "CREATE TABLE orders(id INT PRIMARY KEY)".to_string(),
            )],
        );

        let engine = Arc::new(
            Engine::new(config, Box::new(connector), Box::new(|_, _, _| {})).unwrap(),
        );

        let stopper = Arc::clone(&engine);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });

        engine.run().unwrap();

        let id = crate::model::TableId::in_database("shop", "orders");
        assert!(engine.schema_registry().table_for(&id).is_some());
    }
}
