//! Bounded record of content hashes that have already been evaluated.
//!
//! Data model:
//!   entries  → FIFO of content hashes, oldest at the front (capped at max_size)
//!   index    → membership set mirroring `entries`
//!   file     → optional JSON array of the same hashes, oldest first
//!
//! The file is only ever replaced whole: the new contents are written to a
//! sibling temp file, synced, then renamed over the old one, so an interrupt
//! leaves either the previous or the next state on disk.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not a JSON array of strings: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// FIFO-bounded set of processed content hashes.
#[derive(Debug)]
pub struct ProcessedSet {
    entries: VecDeque<String>,
    index: HashSet<String>,
    max_size: usize,
    path: Option<PathBuf>,
    dirty: bool,
}

impl ProcessedSet {
    /// In-memory only; nothing survives a restart.
    pub fn in_memory(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: HashSet::new(),
            max_size: max_size.max(1),
            path: None,
            dirty: false,
        }
    }

    /// Empty set that persists to `path`, ignoring whatever is there now.
    pub fn with_path(path: impl Into<PathBuf>, max_size: usize) -> Self {
        let mut set = Self::in_memory(max_size);
        set.path = Some(path.into());
        set
    }

    /// Load from `path` if it exists, keeping only the most recent `max_size`
    /// entries. A missing file yields an empty set bound to that path.
    pub fn open(path: impl Into<PathBuf>, max_size: usize) -> Result<Self, PersistenceError> {
        let path = path.into();
        let mut set = Self::with_path(path.clone(), max_size);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no processed-hash state file, starting empty");
                return Ok(set);
            }
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };

        let hashes: Vec<String> = serde_json::from_slice(&raw)
            .map_err(|source| PersistenceError::Corrupt { path: path.clone(), source })?;

        let loaded = hashes.len();
        for hash in hashes {
            set.add(hash);
        }
        // Loading is not a change worth rewriting the file for.
        set.dirty = false;

        info!(
            loaded,
            kept = set.len(),
            max = set.max_size,
            "loaded processed-hash state"
        );
        Ok(set)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains(hash)
    }

    /// Record `hash`. Returns the evicted oldest entry when the cap is exceeded.
    /// Re-adding a present hash is a no-op.
    pub fn add(&mut self, hash: impl Into<String>) -> Option<String> {
        let hash = hash.into();
        if self.index.contains(&hash) {
            return None;
        }
        self.index.insert(hash.clone());
        self.entries.push_back(hash);
        self.dirty = true;

        if self.entries.len() > self.max_size {
            let evicted = self.entries.pop_front()?;
            self.index.remove(&evicted);
            debug!(evicted = %evicted, "processed set full, evicted oldest hash");
            return Some(evicted);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Hashes oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Write the set if it changed since the last save. No-op in memory mode.
    pub fn save_if_dirty(&mut self) -> Result<bool, PersistenceError> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Atomically replace the state file with the current contents.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };

        let hashes: Vec<&str> = self.iter().collect();
        let json = serde_json::to_vec_pretty(&hashes)
            .map_err(|source| PersistenceError::Corrupt { path: path.clone(), source })?;

        let tmp = temp_path(&path);
        let io_err = |source| PersistenceError::Io { path: tmp.clone(), source };

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        if let Err(source) = fs::rename(&tmp, &path) {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %e, "failed to clean up temp state file");
            }
            return Err(PersistenceError::Io { path, source });
        }

        self.dirty = false;
        debug!(path = %path.display(), entries = self.len(), "processed-hash state saved");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "processed_hashes.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(set: &ProcessedSet) -> Vec<String> {
        set.iter().map(str::to_string).collect()
    }

    #[test]
    fn test_add_and_contains() {
        let mut set = ProcessedSet::in_memory(3);
        assert!(!set.contains("QmA"));
        assert_eq!(set.add("QmA"), None);
        assert!(set.contains("QmA"));
        assert_eq!(set.add("QmA"), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_overflow_by_one_evicts_oldest() {
        let mut set = ProcessedSet::in_memory(3);
        for h in ["h1", "h2", "h3"] {
            assert_eq!(set.add(h), None);
        }
        assert_eq!(set.add("h4"), Some("h1".to_string()));
        assert_eq!(set.len(), 3);
        assert!(!set.contains("h1"));
        assert_eq!(hashes(&set), vec!["h2", "h3", "h4"]);
    }

    #[test]
    fn test_overflow_by_two() {
        let mut set = ProcessedSet::in_memory(3);
        for h in ["h1", "h2", "h3", "h4", "h5"] {
            set.add(h);
        }
        assert_eq!(hashes(&set), vec!["h3", "h4", "h5"]);
        assert!(!set.contains("h1"));
        assert!(!set.contains("h2"));
    }

    #[test]
    fn test_overflow_by_n_never_exceeds_cap() {
        let cap = 5;
        let mut set = ProcessedSet::in_memory(cap);
        for i in 0..50 {
            set.add(format!("h{i}"));
            assert!(set.len() <= cap);
        }
        let expected: Vec<String> = (45..50).map(|i| format!("h{i}")).collect();
        assert_eq!(hashes(&set), expected);
    }

    #[test]
    fn test_evicted_hash_can_return() {
        let mut set = ProcessedSet::in_memory(2);
        set.add("h1");
        set.add("h2");
        set.add("h3");
        assert!(!set.contains("h1"));
        assert_eq!(set.add("h1"), Some("h2".to_string()));
        assert_eq!(hashes(&set), vec!["h3", "h1"]);
    }

    #[test]
    fn test_restart_reloads_last_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_hashes.json");

        let mut set = ProcessedSet::open(&path, 3).unwrap();
        assert!(set.is_empty());
        for h in ["h1", "h2", "h3", "h4"] {
            set.add(h);
        }
        set.save().unwrap();

        let reloaded = ProcessedSet::open(&path, 3).unwrap();
        assert_eq!(hashes(&reloaded), vec!["h2", "h3", "h4"]);
        assert!(reloaded.is_persistent());
    }

    #[test]
    fn test_reload_trims_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"["a","b","c","d","e"]"#).unwrap();

        let set = ProcessedSet::open(&path, 2).unwrap();
        assert_eq!(hashes(&set), vec!["d", "e"]);
    }

    #[test]
    fn test_save_is_atomic_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut set = ProcessedSet::open(&path, 10).unwrap();
        set.add("QmX");
        assert!(set.save_if_dirty().unwrap());
        assert!(!set.save_if_dirty().unwrap());

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        let on_disk: Vec<String> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["QmX"]);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProcessedSet::open(&path, 10),
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_in_memory_save_is_noop() {
        let mut set = ProcessedSet::in_memory(2);
        set.add("h1");
        assert!(set.save_if_dirty().unwrap());
        assert!(!set.is_persistent());
    }
}
