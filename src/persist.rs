//! Flag persistence hooks.
//!
//! The SDK reads and writes opaque blobs through a narrow named-blob
//! interface so embedders can route storage wherever they like.  The blob
//! for a user's flags is named `features-<user_key>`; its content is
//! whatever `save_flags` produced.

use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Named-blob storage the client persists flags through.
pub trait PersistentStore: Send + Sync {
    /// Store `blob` under `name`, replacing any previous value.  Returns
    /// whether the write was accepted.
    fn write(&self, name: &str, blob: &str) -> bool;
    /// Fetch the blob stored under `name`, if any.
    fn read(&self, name: &str) -> Option<String>;
}

/// Blob name for a user's saved flags.
pub(crate) fn flags_blob_name(user_key: &str) -> String {
    format!("features-{user_key}")
}

/// File-backed [`PersistentStore`]: one `togglekit-<name>.json` file per
/// blob inside a caller-chosen directory.
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FilePersistence { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("togglekit-{name}.json"))
    }
}

impl PersistentStore for FilePersistence {
    fn write(&self, name: &str, blob: &str) -> bool {
        let path = self.path_for(name);
        match fs::write(&path, blob) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to persist blob");
                false
            }
        }
    }

    fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.path_for(name)).ok()
    }
}
