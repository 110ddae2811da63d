//! Per-plugin debug log files.
//!
//! Only plugins with their `debug` flag set write here. Each plugin gets
//! `<dir>/<plugin>.log`; once a file grows past the size cap it is rotated to
//! `<plugin>.log.1` (replacing any previous rotation).

use crate::store::file_key;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default rotation threshold (1 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

pub struct DebugLog {
    dir: PathBuf,
    max_bytes: u64,
    /// Serializes writers so lines from hooks logging in the same pass don't
    /// interleave.
    console_lock: Mutex<()>,
}

impl DebugLog {
    pub fn new(dir: impl AsRef<Path>, max_bytes: u64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_bytes: max_bytes.max(1),
            console_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, plugin: &str) -> PathBuf {
        self.dir.join(format!("{}.log", file_key(plugin)))
    }

    /// Append one timestamped line to `plugin`'s log, rotating first if the
    /// file is already over the cap.
    pub fn append(&self, plugin: &str, line: &str) -> std::io::Result<()> {
        let _guard = self
            .console_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(plugin);

        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() >= self.max_bytes {
                let rotated = path.with_extension("log.1");
                fs::rename(&path, rotated)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            line
        )
    }
}

impl std::fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLog")
            .field("dir", &self.dir)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
