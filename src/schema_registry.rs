//! In-memory table catalog: ingests DDL, derives typed schemas, and
//! recovers from the DDL history. The catalog map and its derived schema
//! cache live behind `RwLock`s, the same shape as the storage engine's
//! `Arc<RwLock<HashMap<...>>>` catalog: single-writer (only the task
//! worker calls `apply_ddl`/`load_history`), many readers.

pub mod ddl_parser;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::connector::DdlSink;
use crate::ddl_history::{DdlHistory, DdlParser, PositionComparator, RecoverySink};
use crate::error::{EngineError, Result};
use crate::model::{DdlHistoryRecord, SourcePosition, TableDef, TableId, TypedSchema};

/// `ddl.on.error` policy (§9 OQ1): how `apply_ddl` reacts to a DDL
/// statement its parser rejects. Every variant still appends the
/// statement to history (step 4 always runs), so replay sees the same
/// input stream regardless of which policy was active when it was first
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOnError {
    /// Log a warning, keep the catalog as it was before the statement,
    /// and carry on. The default.
    Continue,
    /// Return `EngineError::Parse` to the caller after the statement is
    /// recorded, so the task treats the failure as fatal.
    Fail,
    /// Treat the statement exactly like an ignored transaction-control
    /// statement: no warning logged, no catalog change.
    Skip,
}

impl Default for DdlOnError {
    fn default() -> Self {
        DdlOnError::Continue
    }
}

/// Reads a connector's live schema (e.g. via JDBC metadata) for bootstrap
/// snapshots. A trait so tests and the reference connector can supply a
/// static in-memory answer without a real database connection.
pub trait SchemaSnapshotReader {
    fn read_tables(&self) -> std::result::Result<Vec<TableDef>, String>;
}

/// A `SchemaSnapshotReader` backed by a fixed `Vec<TableDef>`, for tests
/// and the reference connector's bootstrap path.
pub struct StaticSnapshotReader(pub Vec<TableDef>);

impl SchemaSnapshotReader for StaticSnapshotReader {
    fn read_tables(&self) -> std::result::Result<Vec<TableDef>, String> {
        Ok(self.0.clone())
    }
}

/// Predicate over a catalog/database name, table id, or (table, column)
/// pair. `None` means "accept everything" for that dimension.
pub struct SchemaFilters {
    pub database: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    pub table: Option<Arc<dyn Fn(&TableId) -> bool + Send + Sync>>,
    pub column: Option<Arc<dyn Fn(&TableId, &str) -> bool + Send + Sync>>,
}

impl Default for SchemaFilters {
    fn default() -> Self {
        Self {
            database: None,
            table: None,
            column: None,
        }
    }
}

impl SchemaFilters {
    fn accepts_table(&self, id: &TableId) -> bool {
        if let Some(db_filter) = &self.database {
            if !db_filter(&id.catalog) {
                return false;
            }
        }
        if let Some(table_filter) = &self.table {
            if !table_filter(id) {
                return false;
            }
        }
        true
    }

    fn accepts_column(&self, id: &TableId, column: &str) -> bool {
        match &self.column {
            Some(f) => f(id, column),
            None => true,
        }
    }
}

pub struct SchemaRegistry {
    tables: RwLock<HashMap<TableId, TableDef>>,
    typed_schemas: RwLock<HashMap<TableId, TypedSchema>>,
    history: Arc<DdlHistory>,
    parser: Box<dyn DdlParser>,
    comparator: Box<dyn PositionComparator>,
    filters: SchemaFilters,
    on_error: DdlOnError,
}

impl SchemaRegistry {
    pub fn new(
        history: Arc<DdlHistory>,
        parser: Box<dyn DdlParser>,
        comparator: Box<dyn PositionComparator>,
        filters: SchemaFilters,
        on_error: DdlOnError,
    ) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            typed_schemas: RwLock::new(HashMap::new()),
            history,
            parser,
            comparator,
            filters,
            on_error,
        }
    }

    /// Bootstraps the catalog from a live metadata reader (e.g. JDBC). On
    /// success, rebuilds every TypedSchema and appends a synthetic DDL
    /// record per changed table so later restarts can recover from history
    /// alone. On failure, the catalog is left untouched (no mutation has
    /// happened yet) and the error is returned.
    pub fn load_from_snapshot(
        &self,
        reader: &dyn SchemaSnapshotReader,
        position: &SourcePosition,
        default_db: &str,
    ) -> Result<()> {
        let new_tables = reader
            .read_tables()
            .map_err(|e| EngineError::config(format!("snapshot read failed: {e}")))?;

        let previous: Vec<TableDef> = {
            let tables = self.tables.read().unwrap();
            tables.values().cloned().collect()
        };

        {
            let mut tables = self.tables.write().unwrap();
            tables.clear();
            for table in &new_tables {
                tables.insert(table.id.clone(), table.clone());
            }
        }
        self.rebuild_all_typed_schemas();

        let changed_ids: std::collections::HashSet<TableId> = previous
            .iter()
            .map(|t| t.id.clone())
            .chain(new_tables.iter().map(|t| t.id.clone()))
            .collect();

        for id in changed_ids {
            let ddl = format!("DROP TABLE {id}; CREATE TABLE {id} (snapshot)");
            self.history.record(&DdlHistoryRecord {
                position: position.clone(),
                database_name: default_db.to_string(),
                ddl,
                tables: new_tables.clone(),
            })?;
        }

        Ok(())
    }

    /// Resets the catalog to empty and replays the DDL history up to
    /// `starting_position`, then rebuilds every TypedSchema.
    pub fn load_history(&self, starting_position: &SourcePosition) -> Result<()> {
        {
            let mut tables = self.tables.write().unwrap();
            tables.clear();
        }
        let mut sink: &SchemaRegistry = self;
        self.history.recover(
            starting_position,
            self.comparator.as_ref(),
            self.parser.as_ref(),
            &mut sink,
        )?;
        self.rebuild_all_typed_schemas();
        Ok(())
    }

    /// Applies one DDL statement at `position`. Returns whether the
    /// catalog changed. Always appends the statement to history (step 4),
    /// regardless of whether parsing succeeded or any filter would exclude
    /// the affected tables — later restarts must replay the same input.
    pub fn apply_ddl(
        &self,
        position: &SourcePosition,
        default_db: &str,
        ddl_text: &str,
        mut per_db_consumer: Option<&mut dyn FnMut(&str, &str)>,
    ) -> Result<bool> {
        let default_db = canonicalize_db_name(default_db);

        if ddl_parser::is_ignored_statement(ddl_text) {
            return Ok(false);
        }

        let previous: Vec<TableDef> = {
            let tables = self.tables.read().unwrap();
            tables.values().cloned().collect()
        };

        let parse_result = self.parser.parse(ddl_text, &default_db, &previous);
        let mut parse_error: Option<String> = None;
        let (new_tables, affected_dbs) = match parse_result {
            Ok((tables, dbs)) => (tables, dbs),
            Err(e) => {
                if self.on_error != DdlOnError::Skip {
                    log::warn!("ddl parse error at {position:?}, catalog unchanged: {e}");
                }
                parse_error = Some(e);
                (previous.clone(), vec![])
            }
        };

        if let Some(consumer) = per_db_consumer.as_deref_mut() {
            let dbs_to_notify: Vec<String> = if affected_dbs.is_empty() {
                vec![default_db.clone()]
            } else {
                affected_dbs
            };
            for db in dbs_to_notify {
                if self.filters.database.as_ref().map(|f| f(&db)).unwrap_or(true) {
                    consumer(&db, ddl_text);
                }
            }
        }

        self.history.record(&DdlHistoryRecord {
            position: position.clone(),
            database_name: default_db.clone(),
            ddl: ddl_text.to_string(),
            tables: new_tables.clone(),
        })?;

        if let Some(e) = parse_error {
            if self.on_error == DdlOnError::Fail {
                return Err(EngineError::parse(e));
            }
        }

        let changed = new_tables != previous;

        let previous_ids: std::collections::HashSet<TableId> =
            previous.iter().map(|t| t.id.clone()).collect();
        let new_ids: std::collections::HashSet<TableId> =
            new_tables.iter().map(|t| t.id.clone()).collect();
        let touched: std::collections::HashSet<TableId> =
            previous_ids.union(&new_ids).cloned().collect();

        {
            let mut tables = self.tables.write().unwrap();
            tables.clear();
            for table in &new_tables {
                tables.insert(table.id.clone(), table.clone());
            }
        }

        {
            let mut schemas = self.typed_schemas.write().unwrap();
            for id in touched {
                match self.table_internal(&id) {
                    Some(def) => {
                        schemas.insert(id.clone(), self.derive_schema(&def));
                    }
                    None => {
                        schemas.remove(&id);
                    }
                }
            }
        }

        Ok(changed)
    }

    /// Current TableDef for `id`, filtered through include/exclude
    /// predicates. `None` if excluded or absent.
    pub fn table_for(&self, id: &TableId) -> Option<TableDef> {
        if !self.filters.accepts_table(id) {
            return None;
        }
        self.table_internal(id)
    }

    /// Current TypedSchema for `id`, filtered the same way as `table_for`.
    pub fn schema_for(&self, id: &TableId) -> Option<TypedSchema> {
        if !self.filters.accepts_table(id) {
            return None;
        }
        self.typed_schemas.read().unwrap().get(id).cloned()
    }

    fn table_internal(&self, id: &TableId) -> Option<TableDef> {
        self.tables.read().unwrap().get(id).cloned()
    }

    fn derive_schema(&self, def: &TableDef) -> TypedSchema {
        let id = def.id.clone();
        TypedSchema::derive(def, move |col| self.filters.accepts_column(&id, col))
    }

    fn rebuild_all_typed_schemas(&self) {
        let tables = self.tables.read().unwrap();
        let mut schemas = self.typed_schemas.write().unwrap();
        schemas.clear();
        for def in tables.values() {
            schemas.insert(def.id.clone(), self.derive_schema(def));
        }
    }
}

impl RecoverySink for &SchemaRegistry {
    fn apply_snapshot(&mut self, tables: Vec<TableDef>) {
        let mut guard = self.tables.write().unwrap();
        guard.clear();
        for table in tables {
            guard.insert(table.id.clone(), table);
        }
    }
}

/// Lets a `SourceTask` feed DDL it observes straight into the registry
/// through the same `apply_ddl` path used elsewhere, without a
/// per-database consumer callback.
impl DdlSink for SchemaRegistry {
    fn apply_ddl(&self, position: &SourcePosition, default_db: &str, ddl_text: &str) -> Result<bool> {
        SchemaRegistry::apply_ddl(self, position, default_db, ddl_text, None)
    }
}

/// Per §9 Open Question 2: normalize "no default database" to `""` before
/// any comparison, never compare by reference against a null sentinel.
pub fn canonicalize_db_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("null") {
        String::new()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl_history::NumericPosComparator;
    use crate::schema_registry::ddl_parser::SqlDdlParser;
    use std::collections::BTreeMap;

    fn pos(n: i64) -> SourcePosition {
        let mut partition = BTreeMap::new();
        partition.insert("server".to_string(), "A".to_string());
        let mut offset = BTreeMap::new();
        offset.insert("pos".to_string(), serde_json::json!(n));
        SourcePosition::new(partition, offset)
    }

    fn registry(dir: &tempfile::TempDir) -> SchemaRegistry {
        let history = Arc::new(DdlHistory::start(dir.path().join("history.bin")).unwrap());
        SchemaRegistry::new(
            history,
            Box::new(SqlDdlParser),
            Box::new(NumericPosComparator),
            SchemaFilters::default(),
            DdlOnError::Continue,
        )
    }

    #[test]
    fn ddl_round_trip_matches_spec_scenario_3() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let changed = registry
            .apply_ddl(
                &pos(1),
                "db",
                "CREATE TABLE t(id INT PRIMARY KEY, v VARCHAR(32))",
                None,
            )
            .unwrap();
        assert!(changed);

        let changed = registry
            .apply_ddl(&pos(2), "db", "ALTER TABLE t ADD c INT", None)
            .unwrap();
        assert!(changed);

        let changed = registry
            .apply_ddl(&pos(3), "db", "DROP TABLE t", None)
            .unwrap();
        assert!(changed);

        let id = TableId::in_database("db", "t");

        registry.load_history(&pos(3)).unwrap();
        let table = registry.table_for(&id).unwrap();
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.primary_key, vec!["id".to_string()]);

        registry.load_history(&pos(4)).unwrap();
        assert!(registry.table_for(&id).is_none());
    }

    #[test]
    fn ignored_statement_leaves_catalog_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        let changed = registry.apply_ddl(&pos(1), "db", "BEGIN", None).unwrap();
        assert!(!changed);
        let id = TableId::in_database("db", "anything");
        assert!(registry.table_for(&id).is_none());
    }

    #[test]
    fn database_filter_hides_excluded_tables() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(DdlHistory::start(dir.path().join("history.bin")).unwrap());
        let filters = SchemaFilters {
            database: Some(Arc::new(|db: &str| db == "allowed")),
            table: None,
            column: None,
        };
        let registry = SchemaRegistry::new(
            history,
            Box::new(SqlDdlParser),
            Box::new(NumericPosComparator),
            filters,
            DdlOnError::Continue,
        );

        registry
            .apply_ddl(&pos(1), "blocked", "CREATE TABLE t(id INT PRIMARY KEY)", None)
            .unwrap();

        let id = TableId::in_database("blocked", "t");
        assert!(registry.table_for(&id).is_none());
        assert!(registry.schema_for(&id).is_none());
    }

    #[test]
    fn parse_error_still_appends_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        let changed = registry
            .apply_ddl(&pos(1), "db", "ALTER TABLE ghost ADD c INT", None)
            .unwrap();
        assert!(!changed);
        // History still recorded the statement; recovering from it should
        // not error even though the table never existed.
        registry.load_history(&pos(2)).unwrap();
    }

    #[test]
    fn on_error_fail_escalates_parse_error_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(DdlHistory::start(dir.path().join("history.bin")).unwrap());
        let registry = SchemaRegistry::new(
            history,
            Box::new(SqlDdlParser),
            Box::new(NumericPosComparator),
            SchemaFilters::default(),
            DdlOnError::Fail,
        );

        let err = registry
            .apply_ddl(&pos(1), "db", "ALTER TABLE ghost ADD c INT", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));

        // Still appended to history despite the failure, per the "always
        // record" invariant.
        registry.load_history(&pos(2)).unwrap();
    }

    #[test]
    fn on_error_skip_leaves_catalog_unchanged_like_continue() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(DdlHistory::start(dir.path().join("history.bin")).unwrap());
        let registry = SchemaRegistry::new(
            history,
            Box::new(SqlDdlParser),
            Box::new(NumericPosComparator),
            SchemaFilters::default(),
            DdlOnError::Skip,
        );

        let changed = registry
            .apply_ddl(&pos(1), "db", "ALTER TABLE ghost ADD c INT", None)
            .unwrap();
        assert!(!changed);
        registry.load_history(&pos(2)).unwrap();
    }
}
