//! Append-only DDL history: a single growable file of length-prefixed,
//! `bincode`-framed `DdlHistoryRecord`s, scannable in write order.
//!
//! The framing and recovery-time corrupt-tail handling mirror the WAL: a
//! 4-byte little-endian length prefix followed by the `bincode`-encoded
//! record, read back sequentially with a truncated or malformed trailing
//! record logged and treated as the end of the log rather than a fatal
//! error (a process can crash mid-write; the prior complete records must
//! still recover cleanly).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::model::{DdlHistoryRecord, SourcePosition, TableDef};

const LENGTH_PREFIX_BYTES: usize = 4;

/// How `recover` orders positions: `Less` means `a` comes strictly before
/// `b` and must be replayed; anything else stops replay at that record.
/// Supplied by the connector, since only it understands its own position
/// encoding (e.g. binlog file + byte offset + row-in-event).
pub trait PositionComparator: Send + Sync {
    fn compare(&self, a: &SourcePosition, b: &SourcePosition) -> std::cmp::Ordering;
}

/// Default comparator for connectors whose `offset` map carries a single
/// monotonically increasing numeric field named `pos`. Falls back to
/// append order (`Equal`) if either position lacks that field, which
/// `DdlHistory::recover` treats as "replay strictly by append order".
pub struct NumericPosComparator;

impl PositionComparator for NumericPosComparator {
    fn compare(&self, a: &SourcePosition, b: &SourcePosition) -> std::cmp::Ordering {
        match (a.offset.get("pos"), b.offset.get("pos")) {
            (Some(x), Some(y)) => {
                let xn = x.as_i64();
                let yn = y.as_i64();
                match (xn, yn) {
                    (Some(xn), Some(yn)) => xn.cmp(&yn),
                    _ => std::cmp::Ordering::Equal,
                }
            }
            _ => std::cmp::Ordering::Equal,
        }
    }
}

/// A pure parse function: given DDL text and the current set of table
/// definitions, returns the new table set and which databases were
/// affected. Modeling the parser this way (rather than a mutable listener)
/// keeps catalog mutation explicitly owned by the Schema Registry.
pub trait DdlParser: Send + Sync {
    fn parse(
        &self,
        ddl_text: &str,
        default_db: &str,
        tables: &[TableDef],
    ) -> std::result::Result<(Vec<TableDef>, Vec<String>), String>;
}

/// The replay target: rebuilds a table catalog as history is replayed.
pub trait RecoverySink {
    fn apply_snapshot(&mut self, tables: Vec<TableDef>);
}

pub struct DdlHistory {
    path: PathBuf,
    file: Mutex<File>,
}

impl DdlHistory {
    /// Acquires the backing file, creating it if absent.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Releases the backing file handle. After `stop`, the `DdlHistory`
    /// must not be used again.
    pub fn stop(self) {
        drop(self);
    }

    /// Appends one record. Internally synchronized against concurrent
    /// `record`/`recover` calls.
    pub fn record(&self, record: &DdlHistoryRecord) -> Result<()> {
        let body = bincode::serialize(record)
            .map_err(|e| EngineError::history_write(e.to_string()))?;
        let len = body.len() as u32;

        let mut file = self.file.lock().unwrap();
        file.write_all(&len.to_le_bytes())
            .map_err(|e| EngineError::history_write(e.to_string()))?;
        file.write_all(&body)
            .map_err(|e| EngineError::history_write(e.to_string()))?;
        file.flush()
            .map_err(|e| EngineError::history_write(e.to_string()))?;
        file.sync_data()
            .map_err(|e| EngineError::history_write(e.to_string()))?;
        Ok(())
    }

    /// Replays every record whose position compares strictly before
    /// `stopping_position`, feeding `ddl` to `parser` and the resulting
    /// table set to `sink`. Serializes against concurrent `record` calls
    /// by reading under the same lock.
    pub fn recover(
        &self,
        stopping_position: &SourcePosition,
        comparator: &dyn PositionComparator,
        parser: &dyn DdlParser,
        sink: &mut dyn RecoverySink,
    ) -> Result<()> {
        let _guard = self.file.lock().unwrap();
        let mut reader = BufReader::new(
            File::open(&self.path).map_err(|e| EngineError::history_write(e.to_string()))?,
        );

        let mut tables: Vec<TableDef> = Vec::new();
        loop {
            let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(EngineError::history_write(e.to_string())),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            if reader.read_exact(&mut body).is_err() {
                log::warn!(
                    "ddl history {} ends with a truncated record, stopping replay",
                    self.path.display()
                );
                break;
            }
            let record: DdlHistoryRecord = match bincode::deserialize(&body) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping malformed ddl history record: {e}");
                    continue;
                }
            };

            if comparator.compare(&record.position, stopping_position) != std::cmp::Ordering::Less
            {
                break;
            }

            if !record.tables.is_empty() {
                // Snapshot present: fast-path, skip re-parsing this entry.
                tables = record.tables.clone();
            } else {
                match parser.parse(&record.ddl, &record.database_name, &tables) {
                    Ok((new_tables, _affected)) => tables = new_tables,
                    Err(e) => {
                        log::warn!("ddl history replay: parse error, keeping prior state: {e}");
                    }
                }
            }
        }

        sink.apply_snapshot(tables);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
