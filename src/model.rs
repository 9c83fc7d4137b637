//! Core data types shared by every component: positions, records, table
//! definitions, typed schemas and the on-disk history/offset record shapes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque point in a replication log for one partition. Only the
/// connector understands the contents of `offset`; the engine treats both
/// maps as opaque key/value bags and never interprets their values itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub partition: BTreeMap<String, String>,
    pub offset: BTreeMap<String, serde_json::Value>,
}

impl SourcePosition {
    pub fn new(
        partition: BTreeMap<String, String>,
        offset: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self { partition, offset }
    }

    /// Canonical string key for a partition, used to index the offset store
    /// and to compare positions within the same partition. Partition maps
    /// compare structurally: same keys, same values.
    pub fn partition_key(&self) -> String {
        partition_key(&self.partition)
    }
}

pub fn partition_key(partition: &BTreeMap<String, String>) -> String {
    // BTreeMap iterates in key order, so this is deterministic regardless of
    // insertion order.
    let mut key = String::new();
    for (k, v) in partition {
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push(';');
    }
    key
}

/// A typed scalar value carried by a record field. Mirrors the column value
/// representation used throughout the schema and record model; `Json` lets
/// a connector pass through nested structured payloads (e.g. JSON columns)
/// without a second value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Logical column type carried in a `TableDef`/`TypedSchema`. Kept distinct
/// from `Value`'s runtime representation because a column can be
/// `Integer`-typed and still hold a `Null` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Varchar,
    Text,
    Boolean,
    Json,
    Date,
    DateTime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "INT",
            DataType::Float => "FLOAT",
            DataType::Varchar => "VARCHAR",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
            DataType::Json => "JSON",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
        };
        write!(f, "{name}")
    }
}

/// Structural identity of a table: catalog / schema / table name, any of
/// which may be empty for connectors that don't model one of those levels
/// (MySQL has no separate "schema" level distinct from database, so
/// `schema` is typically empty and `catalog` carries the database name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// A table id scoped only by database name, the common MySQL case.
    pub fn in_database(catalog: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(catalog, "", table)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema.is_empty() {
            write!(f, "{}.{}", self.catalog, self.table)
        } else {
            write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
        }
    }
}

/// A single column in a `TableDef`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// VARCHAR length, DECIMAL precision, etc. Meaning depends on `data_type`.
    pub length: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub auto_increment: bool,
    /// True for computed/generated columns, which a sink typically excludes
    /// from its write path even though they appear in the captured schema.
    pub generated: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            scale: None,
            nullable: true,
            auto_increment: false,
            generated: false,
        }
    }
}

/// The structural description of a table at a point in DDL history: ordered
/// columns and the subset of column names making up the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableDef {
    pub fn new(id: TableId, columns: Vec<ColumnDef>, primary_key: Vec<String>) -> Self {
        Self {
            id,
            columns,
            primary_key,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// A single field of a `TypedSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// A serialization-ready schema derived from a `TableDef` with column
/// filters applied. Reflects the `TableDef` at the moment it was derived;
/// callers must fetch a fresh one after any DDL affecting the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSchema {
    pub table: TableId,
    pub fields: Vec<SchemaField>,
}

impl TypedSchema {
    /// Derive a schema from a `TableDef`, keeping only columns accepted by
    /// `column_filter` (a predicate over column name).
    pub fn derive(def: &TableDef, column_filter: impl Fn(&str) -> bool) -> Self {
        let fields = def
            .columns
            .iter()
            .filter(|c| column_filter(&c.name))
            .map(|c| SchemaField {
                name: c.name.clone(),
                data_type: c.data_type,
                nullable: c.nullable,
            })
            .collect();
        TypedSchema {
            table: def.id.clone(),
            fields,
        }
    }
}

/// A single captured change event: topic, optional key, value, the
/// position it was read from, and a capture timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub topic: String,
    pub key: Option<(Vec<Value>, TypedSchema)>,
    pub value: Option<(Vec<Value>, TypedSchema)>,
    pub position: SourcePosition,
    pub timestamp_millis: u64,
}

/// One append-only DDL history entry: the statement text, the default
/// database it ran against, the position it was captured at, and a
/// snapshot of every table definition as of that position (used for fast
/// recovery without re-parsing every prior statement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlHistoryRecord {
    pub position: SourcePosition,
    pub database_name: String,
    pub ddl: String,
    pub tables: Vec<TableDef>,
}

/// A single partition/offset pair as persisted by the offset store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub partition: BTreeMap<String, String>,
    pub offset: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(server: &str, pos: i64) -> SourcePosition {
        let mut partition = BTreeMap::new();
        partition.insert("server".to_string(), server.to_string());
        let mut offset = BTreeMap::new();
        offset.insert("pos".to_string(), serde_json::json!(pos));
        SourcePosition::new(partition, offset)
    }

    #[test]
    fn partition_key_is_order_independent_of_insertion() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());
        assert_eq!(partition_key(&a), partition_key(&b));
    }

    #[test]
    fn partition_key_distinguishes_different_partitions() {
        let p1 = position("A", 1);
        let p2 = position("B", 1);
        assert_ne!(p1.partition_key(), p2.partition_key());
    }

    #[test]
    fn typed_schema_derive_applies_column_filter() {
        let def = TableDef::new(
            TableId::in_database("db", "t"),
            vec![
                ColumnDef::new("id", DataType::Integer),
                ColumnDef::new("secret", DataType::Text),
            ],
            vec!["id".to_string()],
        );
        let schema = TypedSchema::derive(&def, |name| name != "secret");
        assert_eq!(schema.fields.len(), 1);
        assert_eq!(schema.fields[0].name, "id");
    }

    #[test]
    fn table_id_display_omits_empty_schema() {
        let id = TableId::in_database("db", "t");
        assert_eq!(id.to_string(), "db.t");
        let id2 = TableId::new("cat", "sch", "t");
        assert_eq!(id2.to_string(), "cat.sch.t");
    }
}
