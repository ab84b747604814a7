use std::fmt;

/// Error surfaced by a storage adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterError(pub String);

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter error: {}", self.0)
    }
}

impl std::error::Error for AdapterError {}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError(e.to_string())
    }
}

/// The three-method blob I/O contract a database persists through.
///
/// Payloads are serialized database strings. A call returns only once the
/// operation has completed; there is no callback indirection. `load`
/// distinguishes "no database stored under this name" (`Ok(None)`) from an
/// actual failure (`Err`).
pub trait Adapter {
    fn load(&self, name: &str) -> Result<Option<String>, AdapterError>;

    fn save(&mut self, name: &str, payload: &str) -> Result<(), AdapterError>;

    fn delete(&mut self, name: &str) -> Result<(), AdapterError>;
}
