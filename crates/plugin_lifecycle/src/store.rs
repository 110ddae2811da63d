//! Persistent per-plugin state and options.
//!
//! Every plugin type owns two independent records:
//!
//! - a **state** record ([`StateRecord`]): name, priority, debug/quiet flags
//!   and, for modules, the enabled flag;
//! - an **options** record ([`OptionsEnvelope`]): the plugin's own
//!   configuration object, tagged with its type so a stale blob can be
//!   detected and discarded on load.
//!
//! [`FileStateStore`] keeps one JSON file per record under
//! `<root>/state/` and `<root>/options/`. [`MemoryStateStore`] keeps them in
//! memory and is handy for hosts that don't persist and for tests.

use crate::declaration::PluginTypeId;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Persisted lifecycle state for one plugin type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub name: String,
    pub priority: i32,
    pub debug: bool,
    pub quiet: bool,
    /// Only present for modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Type-tagged options blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsEnvelope {
    pub type_tag: String,
    pub data: serde_json::Value,
}

/// Storage backend for plugin state and options.
pub trait StateStore: Send + Sync {
    fn save_state(&self, key: &PluginTypeId, record: &StateRecord) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing was stored yet (first boot) or the record is
    /// empty.
    fn load_state(&self, key: &PluginTypeId) -> Result<Option<StateRecord>, StoreError>;

    fn save_options(&self, key: &PluginTypeId, envelope: &OptionsEnvelope)
        -> Result<(), StoreError>;

    fn load_options(&self, key: &PluginTypeId) -> Result<Option<OptionsEnvelope>, StoreError>;

    /// Copy everything stored so far into a fresh timestamped directory under
    /// `destination`, keeping at most `keep` backups. Returns the directory
    /// written, or `None` if this store has nothing on disk to back up.
    fn backup(&self, destination: &Path, keep: usize) -> Result<Option<PathBuf>, StoreError>;
}

/// Turn an arbitrary identity into a safe file name.
pub(crate) fn file_key(id: &str) -> String {
    let key: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if key.is_empty() {
        "_".to_string()
    } else {
        key
    }
}

const STATE_DIR: &str = "state";
const OPTIONS_DIR: &str = "options";

/// JSON files on disk, one per plugin type and record kind.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    /// Guards the whole tree so a backup never copies a half-written record.
    io_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self, key: &PluginTypeId) -> PathBuf {
        self.root
            .join(STATE_DIR)
            .join(format!("{}.json", file_key(key.as_str())))
    }

    pub fn options_path(&self, key: &PluginTypeId) -> PathBuf {
        self.root
            .join(OPTIONS_DIR)
            .join(format!("{}.json", file_key(key.as_str())))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let _guard = self.io_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash mid-write leaves the old record intact.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let _guard = self.io_lock.lock().unwrap_or_else(|p| p.into_inner());
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl StateStore for FileStateStore {
    fn save_state(&self, key: &PluginTypeId, record: &StateRecord) -> Result<(), StoreError> {
        self.write_json(&self.state_path(key), record)
    }

    fn load_state(&self, key: &PluginTypeId) -> Result<Option<StateRecord>, StoreError> {
        self.read_json(&self.state_path(key))
    }

    fn save_options(
        &self,
        key: &PluginTypeId,
        envelope: &OptionsEnvelope,
    ) -> Result<(), StoreError> {
        self.write_json(&self.options_path(key), envelope)
    }

    fn load_options(&self, key: &PluginTypeId) -> Result<Option<OptionsEnvelope>, StoreError> {
        self.read_json(&self.options_path(key))
    }

    fn backup(&self, destination: &Path, keep: usize) -> Result<Option<PathBuf>, StoreError> {
        let _guard = self.io_lock.lock().unwrap_or_else(|p| p.into_inner());
        if !self.root.exists() {
            debug!("Nothing to back up, {} does not exist", self.root.display());
            return Ok(None);
        }
        if is_within(destination, &self.root) {
            return Err(StoreError::NestedBackup {
                backup: destination.display().to_string(),
                root: self.root.display().to_string(),
            });
        }

        fs::create_dir_all(destination)?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let mut target = destination.join(&stamp);
        let mut suffix = 1;
        while target.exists() {
            target = destination.join(format!("{}-{}", stamp, suffix));
            suffix += 1;
        }

        copy_tree(&self.root, &target)?;
        prune_backups(destination, keep)?;
        info!("Backed up plugin state to {}", target.display());
        Ok(Some(target))
    }
}

/// Whether `path` is `root` or below it, comparing resolved paths where they
/// exist.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let resolve = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    path.starts_with(root) || resolve(path).starts_with(resolve(root))
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&path, &dest)?;
        } else if path.extension().map_or(true, |ext| ext != "tmp") {
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}

/// Remove the oldest backup directories beyond `keep`. Names are timestamps,
/// so lexical order is chronological.
fn prune_backups(destination: &Path, keep: usize) -> std::io::Result<()> {
    let mut backups: Vec<PathBuf> = fs::read_dir(destination)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    backups.sort();

    let keep = keep.max(1);
    if backups.len() > keep {
        for stale in &backups[..backups.len() - keep] {
            debug!("Pruning old backup {}", stale.display());
            fs::remove_dir_all(stale)?;
        }
    }
    Ok(())
}

/// In-memory store. Backups are a no-op.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<PluginTypeId, StateRecord>>,
    options: Mutex<HashMap<PluginTypeId, OptionsEnvelope>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn save_state(&self, key: &PluginTypeId, record: &StateRecord) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.clone(), record.clone());
        Ok(())
    }

    fn load_state(&self, key: &PluginTypeId) -> Result<Option<StateRecord>, StoreError> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    fn save_options(
        &self,
        key: &PluginTypeId,
        envelope: &OptionsEnvelope,
    ) -> Result<(), StoreError> {
        self.options
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.clone(), envelope.clone());
        Ok(())
    }

    fn load_options(&self, key: &PluginTypeId) -> Result<Option<OptionsEnvelope>, StoreError> {
        Ok(self
            .options
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    fn backup(&self, _destination: &Path, _keep: usize) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(enabled: Option<bool>) -> StateRecord {
        StateRecord {
            name: "Vendors".to_string(),
            priority: 250,
            debug: true,
            quiet: false,
            enabled,
        }
    }

    #[test]
    fn file_key_flattens_type_paths() {
        assert_eq!(file_key("game::vendors::Vendors"), "game__vendors__Vendors");
        assert_eq!(file_key("a<b>"), "a_b_");
        assert_eq!(file_key(""), "_");
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = PluginTypeId::new("game::Vendors");

        assert!(store.load_state(&key).unwrap().is_none());
        store.save_state(&key, &record(Some(true))).unwrap();

        let reopened = FileStateStore::new(dir.path());
        assert_eq!(reopened.load_state(&key).unwrap(), Some(record(Some(true))));
    }

    #[test]
    fn service_state_omits_enabled() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = PluginTypeId::new("game::Mime");

        store.save_state(&key, &record(None)).unwrap();
        let raw = fs::read_to_string(store.state_path(&key)).unwrap();
        assert!(!raw.contains("enabled"));
    }

    #[test]
    fn empty_record_reads_as_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = PluginTypeId::new("game::Empty");

        let path = store.state_path(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "  \n").unwrap();

        assert!(store.load_state(&key).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = PluginTypeId::new("game::Corrupt");

        let path = store.state_path(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(store.load_state(&key), Err(StoreError::Json(_))));
    }

    #[test]
    fn state_and_options_are_independent_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = PluginTypeId::new("game::Battles");

        store
            .save_options(
                &key,
                &OptionsEnvelope {
                    type_tag: "BattleOptions".to_string(),
                    data: json!({ "max_teams": 4 }),
                },
            )
            .unwrap();

        assert!(store.options_path(&key).exists());
        assert!(!store.state_path(&key).exists());
        assert_eq!(
            store.load_options(&key).unwrap().unwrap().data,
            json!({ "max_teams": 4 })
        );
    }

    #[test]
    fn backup_copies_tree_and_prunes() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("cache"));
        let backups = dir.path().join("backups");
        let key = PluginTypeId::new("game::Vendors");
        store.save_state(&key, &record(Some(false))).unwrap();

        let mut written = Vec::new();
        for _ in 0..3 {
            written.push(store.backup(&backups, 2).unwrap().unwrap());
        }

        let remaining: Vec<_> = fs::read_dir(&backups).unwrap().collect();
        assert_eq!(remaining.len(), 2);
        assert!(!written[0].exists());
        assert!(written[2].join("state").join("game__Vendors.json").exists());
    }

    #[test]
    fn backup_inside_the_store_is_refused() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let store = FileStateStore::new(&root);
        store
            .save_state(&PluginTypeId::new("game::Vendors"), &record(None))
            .unwrap();

        let nested = root.join("backups");
        assert!(matches!(
            store.backup(&nested, 3),
            Err(StoreError::NestedBackup { .. })
        ));
        assert!(!nested.exists());
        assert!(matches!(
            store.backup(&root, 3),
            Err(StoreError::NestedBackup { .. })
        ));
    }

    #[test]
    fn backup_without_data_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("never-written"));
        assert!(store.backup(&dir.path().join("backups"), 3).unwrap().is_none());
    }
}
