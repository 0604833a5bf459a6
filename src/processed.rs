//! Processed Transaction Store
//!
//! Durable set of transaction identifiers that have already been examined.
//! Loaded once per run, grown in memory, and written back wholesale.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// Default location of the processed-transaction store
pub const DEFAULT_STATE_PATH: &str = "processed_transactions.json";

/// Errors that can occur while persisting the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Set of transaction identifiers already examined by a previous or current run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    txids: HashSet<String>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the set from disk
    ///
    /// A missing file yields an empty set. So does an unreadable or corrupt file;
    /// that case is logged but never fails the run.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No processed-transaction store at {}, starting empty", path.display());
                return Self::new();
            }
            Err(e) => {
                warn!("Cannot read processed-transaction store {}: {}", path.display(), e);
                return Self::new();
            }
        };

        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(txids) => {
                let set: Self = txids.into_iter().collect();
                info!("Loaded {} processed transactions from {}", set.len(), path.display());
                set
            }
            Err(e) => {
                warn!(
                    "Processed-transaction store {} is corrupt, starting empty: {}",
                    path.display(),
                    e
                );
                Self::new()
            }
        }
    }

    /// Write the set to disk, replacing any previous contents atomically
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.sorted())?;
        write_atomic(path, &json)?;
        info!("Saved {} processed transactions to {}", self.len(), path.display());
        Ok(())
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.txids.contains(txid)
    }

    /// Record a transaction as processed
    ///
    /// # Returns
    /// `true` if the identifier was not present before
    pub fn insert(&mut self, txid: impl Into<String>) -> bool {
        self.txids.insert(txid.into())
    }

    pub fn len(&self) -> usize {
        self.txids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txids.is_empty()
    }

    pub fn is_superset(&self, other: &ProcessedSet) -> bool {
        self.txids.is_superset(&other.txids)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.txids.iter().map(String::as_str)
    }

    /// Identifiers in lexical order, as written to disk
    pub fn sorted(&self) -> Vec<&str> {
        let mut txids: Vec<&str> = self.iter().collect();
        txids.sort_unstable();
        txids
    }
}

impl FromIterator<String> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            txids: iter.into_iter().collect(),
        }
    }
}

/// Replace `path` with `bytes` via a sibling temp file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let replaced = write_and_sync(&temp_path, bytes).and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = replaced {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Cannot remove temp file {}: {}", temp_path.display(), cleanup);
            }
        }
        return Err(io_err(e));
    }
    Ok(())
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
