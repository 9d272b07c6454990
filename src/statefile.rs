//! Persisted host state.
//!
//! A [`HostState`] is the normalized snapshot of one watched service: a
//! reference string naming the source object plus an ordered list of
//! name → address pairs.  It is written to disk as a single JSON
//! document:
//!
//! ```text
//! {"ref":"k8s: ns1 service/svc-a","items":[{"name":"svc-a","ipv4":"10.0.0.1","target":"external"}]}
//! ```
//!
//! The field names and the `target` values are consumed by other
//! programs and must not change.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while persisting a [`HostState`].
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The destination (or its temporary sibling) could not be written.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state could not be encoded as JSON.
    #[error("failed to encode host state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where an address is reachable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    External,
    Internal,
}

/// A single name/address pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    #[serde(rename = "ipv4")]
    pub ipv4_address: String,
    pub target: Target,
}

/// The overall state of the watched addresses.
///
/// The default value (empty reference, no items) is the state the update
/// loop starts from, so the first real event always counts as a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    #[serde(rename = "ref")]
    pub reference: String,
    pub items: Vec<HostInfo>,
}

impl HostState {
    /// Returns true if `other` is not equivalent to this state.
    ///
    /// Items are compared by position, so a reordering counts as a
    /// difference.
    pub fn differs(&self, other: &HostState) -> bool {
        if self.reference != other.reference {
            return true;
        }
        if self.items.len() != other.items.len() {
            return true;
        }
        self.items.iter().zip(&other.items).any(|(a, b)| a != b)
    }

    /// Write the state to `path`, replacing any previous content.
    ///
    /// The document is written to `<path>.tmp` first and renamed over the
    /// destination, so readers only ever see a complete file. The parent
    /// directory must already exist.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');

        let temp_path = temp_path_for(path);
        let result = write_synced(&temp_path, &buf).and_then(|()| fs::rename(&temp_path, path));
        if let Err(source) = result {
            // never leave a partial document behind
            let _ = fs::remove_file(&temp_path);
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

fn write_synced(path: &Path, buf: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(buf)?;
    file.sync_all()
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Durable storage for the current host state.
///
/// The update loop only talks to this trait; [`FileStore`] is the real
/// implementation.
pub trait StateStore: Send {
    fn save(&mut self, state: &HostState) -> Result<(), StateError>;
}

/// Stores the host state as a JSON file at a fixed path.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStore {
    fn save(&mut self, state: &HostState) -> Result<(), StateError> {
        state.save(&self.path)
    }
}
