use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::adapter::{Adapter, AdapterError};

/// Filesystem adapter: one file per database, whole-payload writes.
/// The database name is joined onto an optional base directory.
#[derive(Debug, Clone, Default)]
pub struct FsAdapter {
    base_dir: Option<PathBuf>,
}

impl FsAdapter {
    pub fn new() -> FsAdapter {
        FsAdapter::default()
    }

    pub fn with_base_dir(dir: impl Into<PathBuf>) -> FsAdapter {
        FsAdapter {
            base_dir: Some(dir.into()),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.join(name),
            None => Path::new(name).to_path_buf(),
        }
    }
}

impl Adapter for FsAdapter {
    fn load(&self, name: &str) -> Result<Option<String>, AdapterError> {
        match std::fs::read_to_string(self.path_for(name)) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, name: &str, payload: &str) -> Result<(), AdapterError> {
        let path = self.path_for(name);
        debug!(name, bytes = payload.len(), "writing database file");
        std::fs::write(path, payload)?;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), AdapterError> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
