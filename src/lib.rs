pub mod connector;
pub mod ddl_history;
pub mod engine;
pub mod error;
pub mod model;
pub mod offset_store;
pub mod queue;
pub mod schema_registry;
pub mod task_runtime;

pub use connector::{ConnectorFactory, DdlSink, OffsetReader, SourceConnector, SourceTask};
pub use engine::{Engine, EngineConfig, OffsetCommitPolicy};
pub use error::{EngineError, ErrorKind, Result};
pub use model::{ColumnDef, DataType, Record, SourcePosition, TableDef, TableId, TypedSchema, Value};
pub use schema_registry::{DdlOnError, SchemaFilters, SchemaRegistry};
