//! Crate-wide error type.
//!
//! Hand-rolled rather than built with a derive macro: each variant maps
//! directly to one of the error kinds the engine's components can raise,
//! and the classification methods below (`is_fatal`, `kind`) let call sites
//! branch on error shape without re-deriving it from the `Display` text.

use std::fmt;

/// Cheap, `Copy` classification of an `EngineError`, for call sites that
/// need to branch on error shape without matching the full enum (which can
/// carry a boxed source error that isn't `Copy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    StoreUnavailable,
    HistoryWrite,
    Parse,
    Task,
    Interrupted,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::HistoryWrite => "HistoryWriteError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Task => "TaskError",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Io => "IoError",
        };
        write!(f, "{s}")
    }
}

/// Unified error type for every engine component.
#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed configuration. Fatal at start; the engine never
    /// reaches `Running`.
    Config(String),
    /// Offset store could not be read or written. Fatal after the
    /// configured number of consecutive flush failures.
    StoreUnavailable(String),
    /// DDL history append failed. Fatal immediately: continuing would leave
    /// the history inconsistent with the catalog.
    HistoryWrite(String),
    /// DDL could not be parsed. Non-fatal: logged, still recorded to
    /// history, the catalog keeps whatever partial changes were applied.
    Parse(String),
    /// Raised by the connector task. Fatal; the original error is kept for
    /// the completion callback.
    Task(Box<dyn std::error::Error + Send + Sync>),
    /// Cancellation observed between poll batches. Not a failure condition;
    /// translates to a clean shutdown.
    Interrupted,
    /// Low-level I/O failure underlying one of the above.
    Io(std::io::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            EngineError::HistoryWrite(_) => ErrorKind::HistoryWrite,
            EngineError::Parse(_) => ErrorKind::Parse,
            EngineError::Task(_) => ErrorKind::Task,
            EngineError::Interrupted => ErrorKind::Interrupted,
            EngineError::Io(_) => ErrorKind::Io,
        }
    }

    /// Per §7: only `Parse` and `Interrupted` are non-fatal. Everything
    /// else either prevents startup or moves the task runtime to `Failed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Parse | ErrorKind::Interrupted)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        EngineError::StoreUnavailable(msg.into())
    }

    pub fn history_write(msg: impl Into<String>) -> Self {
        EngineError::HistoryWrite(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        EngineError::Parse(msg.into())
    }

    pub fn task(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        EngineError::Task(Box::new(err))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "configuration error: {msg}"),
            EngineError::StoreUnavailable(msg) => write!(f, "offset store unavailable: {msg}"),
            EngineError::HistoryWrite(msg) => write!(f, "ddl history write failed: {msg}"),
            EngineError::Parse(msg) => write!(f, "ddl parse error: {msg}"),
            EngineError::Task(err) => write!(f, "task error: {err}"),
            EngineError::Interrupted => write!(f, "interrupted"),
            EngineError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Task(err) => Some(err.as_ref()),
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_interrupted_are_non_fatal() {
        assert!(!EngineError::parse("bad ddl").is_fatal());
        assert!(!EngineError::Interrupted.is_fatal());
    }

    #[test]
    fn everything_else_is_fatal() {
        assert!(EngineError::config("missing key").is_fatal());
        assert!(EngineError::store_unavailable("disk full").is_fatal());
        assert!(EngineError::history_write("disk full").is_fatal());
        assert!(EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_fatal());
    }

    #[test]
    fn display_includes_kind_context() {
        let err = EngineError::config("connector.class missing");
        assert!(err.to_string().contains("connector.class missing"));
    }
}
