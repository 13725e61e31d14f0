//! Non-volatile storage backends
//!
//! The configuration record persists through [`NvStore`], a minimal
//! whole-blob read/write seam. [`MemoryStore`] stands in for a flash
//! partition in tests and simulations, including the erased-flash
//! pattern and deliberate corruption. [`FileStore`] keeps the record in
//! a single file on a real filesystem.
//!
//! Stores are deliberately dumb: validation (magic, checksum) belongs
//! to the record layer, not the backend.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

/// Whole-record non-volatile storage.
///
/// `load` returns None when nothing has ever been written. A store may
/// instead return stale or erased bytes; callers must validate the
/// record themselves.
pub trait NvStore {
    /// Read the stored record, None when the backend is empty
    fn load(&mut self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored record
    fn store(&mut self, data: &[u8]) -> Result<()>;
}

/// In-memory store with flash-like failure modes for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Option<Vec<u8>>,
    writes: usize,
}

impl MemoryStore {
    /// An empty store, as if never provisioned
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding `len` bytes of 0xFF, the erased-flash pattern
    pub fn erased(len: usize) -> Self {
        Self {
            data: Some(vec![0xFF; len]),
            writes: 0,
        }
    }

    /// Flip every bit of the byte at `index`, if present
    pub fn corrupt(&mut self, index: usize) {
        if let Some(data) = self.data.as_mut() {
            if let Some(byte) = data.get_mut(index) {
                *byte ^= 0xFF;
            }
        }
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// The raw stored bytes, if any
    pub fn raw(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

impl NvStore for MemoryStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.data.clone())
    }

    fn store(&mut self, data: &[u8]) -> Result<()> {
        self.data = Some(data.to_vec());
        self.writes += 1;
        Ok(())
    }
}

/// File-backed store, one record per file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Use `path` as the backing file; it need not exist yet
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NvStore for FileStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                reason: e.to_string(),
            }
            .into()),
        }
    }

    fn store(&mut self, data: &[u8]) -> Result<()> {
        fs::write(&self.path, data).map_err(|e| {
            StorageError::Io {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
