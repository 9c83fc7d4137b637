//! The connector-facing contract (§6): what a source connector and its
//! task must implement for the Task Runtime to drive it. Optional hooks
//! get default no-op bodies, the same shape as the storage engine's
//! `EngineHandler` trait (`flush`, `begin_transaction`, etc. all default to
//! no-ops so most engines only override what they actually need) — here,
//! most connectors only need to override `start`/`poll`/`stop`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::model::{OffsetRecord, Record, SourcePosition};

/// Gives a task access to the SourcePositions recorded for its partitions
/// before it starts, so it can resume mid-stream instead of re-reading
/// from the beginning.
pub trait OffsetReader: Send + Sync {
    fn offsets_for(&self, partition: &BTreeMap<String, String>) -> Option<OffsetRecord>;
}

/// Gives a task a way to feed DDL it observes in the replication stream
/// into the Schema Registry, the same role the Schema Registry's
/// `applyDdl` plays for a real connector (§4.3). Handed to the task as an
/// owned `Arc` rather than a borrowed reference (unlike `OffsetReader`,
/// which is only consulted once at startup) because a task calls this
/// repeatedly from inside `poll`, long after `start` returns.
pub trait DdlSink: Send + Sync {
    fn apply_ddl(&self, position: &SourcePosition, default_db: &str, ddl_text: &str) -> Result<bool>;
}

/// One running unit of capture. The host calls `start` once, then `poll`
/// repeatedly until `stop` is requested.
pub trait SourceTask: Send {
    fn start(
        &mut self,
        config: &HashMap<String, String>,
        offsets: &dyn OffsetReader,
        ddl_sink: Arc<dyn DdlSink>,
    ) -> Result<()>;

    /// Returns a batch of records, possibly empty if idle. May block
    /// briefly (e.g. on network I/O) but must return within a bounded time
    /// so the runtime can observe a stop signal between batches.
    fn poll(&mut self) -> Result<Vec<Record>>;

    /// Optional hook called after a record is safely enqueued.
    fn commit_record(&mut self, _record: &Record) -> Result<()> {
        Ok(())
    }

    /// Requests the task halt. Non-blocking; the worker observes this by
    /// exiting its poll loop on the next iteration.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A pluggable source, analogous to a Kafka Connect `SourceConnector`: it
/// turns a configuration map into one or more task configurations and
/// manufactures task instances. The host supplies connectors by name via a
/// factory registry (§9: "the core never reflects on class names itself"),
/// since Rust has no dynamic class loading to stand in for Java's
/// class-loader-per-connector model.
pub trait SourceConnector: Send + Sync {
    fn initialize(
        &self,
        config: &HashMap<String, String>,
    ) -> Result<Vec<HashMap<String, String>>>;

    fn task(&self) -> Box<dyn SourceTask>;
}

/// A factory mapping a connector name to a constructor, the registry the
/// Engine resolves `connector.class`-equivalent configuration against.
pub type ConnectorFactory = Box<dyn Fn() -> Box<dyn SourceConnector> + Send + Sync>;

pub mod reference {
    //! An in-memory reference connector used by the crate's own tests and
    //! by the CLI harness (`main.rs`) as a runnable stand-in for a real
    //! binlog reader. Not itself part of the public connector API.

    use super::*;
    use std::sync::Mutex;

    pub struct InMemoryConnector {
        pub batches: Mutex<Vec<Vec<Record>>>,
        /// DDL statements applied through the `DdlSink` as soon as the task
        /// starts, one `(default_db, ddl_text)` pair each — enough to drive
        /// a Schema Registry wired up behind the engine through a DDL round
        /// trip without a real binlog.
        pub ddl_statements: Vec<(String, String)>,
    }

    impl InMemoryConnector {
        pub fn new(batches: Vec<Vec<Record>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                ddl_statements: Vec::new(),
            }
        }

        pub fn with_ddl(batches: Vec<Vec<Record>>, ddl_statements: Vec<(String, String)>) -> Self {
            Self {
                batches: Mutex::new(batches),
                ddl_statements,
            }
        }
    }

    impl SourceConnector for InMemoryConnector {
        fn initialize(
            &self,
            _config: &HashMap<String, String>,
        ) -> Result<Vec<HashMap<String, String>>> {
            Ok(vec![HashMap::new()])
        }

        fn task(&self) -> Box<dyn SourceTask> {
            let batches = self.batches.lock().unwrap().clone();
            Box::new(InMemoryTask {
                remaining: batches,
                stopped: false,
                ddl_statements: self.ddl_statements.clone(),
            })
        }
    }

    pub struct InMemoryTask {
        remaining: Vec<Vec<Record>>,
        stopped: bool,
        ddl_statements: Vec<(String, String)>,
    }

    impl SourceTask for InMemoryTask {
        fn start(
            &mut self,
            _config: &HashMap<String, String>,
            _offsets: &dyn OffsetReader,
            ddl_sink: Arc<dyn DdlSink>,
        ) -> Result<()> {
            let position = SourcePosition::new(BTreeMap::new(), BTreeMap::new());
            for (default_db, ddl_text) in &self.ddl_statements {
                ddl_sink.apply_ddl(&position, default_db, ddl_text)?;
            }
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<Record>> {
            if self.stopped || self.remaining.is_empty() {
                return Ok(Vec::new());
            }
            Ok(self.remaining.remove(0))
        }

        fn stop(&mut self) -> Result<()> {
            self.stopped = true;
            Ok(())
        }
    }
}
