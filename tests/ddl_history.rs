//! Crate-level coverage of the DDL round-trip and ignored-statement
//! scenarios, driven through the public `SchemaRegistry` API rather than
//! the history log directly.

use std::sync::Arc;

use cdc_engine::ddl_history::{DdlHistory, NumericPosComparator};
use cdc_engine::model::{SourcePosition, TableId};
use cdc_engine::schema_registry::ddl_parser::SqlDdlParser;
use cdc_engine::schema_registry::{DdlOnError, SchemaFilters, SchemaRegistry};

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
fn create_alter_drop_recovers_correctly_at_each_position() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);
    let id = TableId::in_database("shop", "orders");

    registry
        .apply_ddl(
            &pos(1),
            "shop",
            "CREATE TABLE orders(id INT PRIMARY KEY, total FLOAT)",
            None,
        )
        .unwrap();
    registry
        .apply_ddl(&pos(2), "shop", "ALTER TABLE orders ADD shipped_at DATETIME", None)
        .unwrap();
    registry
        .apply_ddl(&pos(3), "shop", "DROP TABLE orders", None)
        .unwrap();

    // A fresh registry over the same history file, recovering up to just
    // before the DROP, should see the post-ALTER shape.
    let dir2_history = Arc::new(DdlHistory::start(dir.path().join("history.bin")).unwrap());
    let reopened = SchemaRegistry::new(
        dir2_history,
        Box::new(SqlDdlParser),
        Box::new(NumericPosComparator),
        SchemaFilters::default(),
        DdlOnError::Continue,
    );
    reopened.load_history(&pos(3)).unwrap();
    let table = reopened.table_for(&id).unwrap();
    assert_eq!(table.columns.len(), 3);

    reopened.load_history(&pos(4)).unwrap();
    assert!(reopened.table_for(&id).is_none());
}

#[test]
fn transaction_control_statements_never_touch_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);

    for stmt in ["BEGIN", "START TRANSACTION", "COMMIT", "ROLLBACK"] {
        let changed = registry.apply_ddl(&pos(1), "shop", stmt, None).unwrap();
        assert!(!changed, "'{stmt}' must not change the catalog");
    }
}
