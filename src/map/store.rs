//! Map storage keyed by string.
//!
//! The store owns every loaded map. Each map sits behind its own `RwLock`:
//! the merge loop is the only writer of the merged map, while lookups take
//! concurrent read handles. Maps are serialized to disk as JSON documents;
//! checkpoints are written to a temp file in the target directory and moved
//! into place with a rename, so the file on disk is always a complete map.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use super::types::ViMap;

/// Key of the single merged map maintained by the server.
pub const MERGED_MAP_KEY: &str = "merged_map";

/// Errors from map storage and the on-disk codec.
#[derive(Error, Debug)]
pub enum MapStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("map codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("no map with key '{0}'")]
    NoSuchMap(String),

    #[error("map key '{0}' already in use")]
    DuplicateKey(String),
}

/// Handle to one stored map.
pub type MapHandle = Arc<RwLock<ViMap>>;

/// All loaded maps, keyed by string.
#[derive(Debug, Default)]
pub struct MapStore {
    maps: Mutex<HashMap<String, MapHandle>>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a map under a fresh key.
    pub fn insert(&self, key: &str, map: ViMap) -> Result<(), MapStoreError> {
        let mut maps = self.lock_maps();
        if maps.contains_key(key) {
            return Err(MapStoreError::DuplicateKey(key.to_string()));
        }
        maps.insert(key.to_string(), Arc::new(RwLock::new(map)));
        Ok(())
    }

    /// Handle to a stored map, if present.
    pub fn get(&self, key: &str) -> Option<MapHandle> {
        self.lock_maps().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_maps().contains_key(key)
    }

    /// Drop a map from the store.
    pub fn remove(&self, key: &str) -> Option<MapHandle> {
        self.lock_maps().remove(key)
    }

    /// Remove a map and take ownership of its contents.
    ///
    /// Used by the merge loop to transfer a processed submap into the merged
    /// map. Falls back to a clone if another handle is still alive.
    pub fn take(&self, key: &str) -> Option<ViMap> {
        let handle = self.remove(key)?;
        match Arc::try_unwrap(handle) {
            Ok(lock) => Some(lock.into_inner().unwrap_or_else(|p| p.into_inner())),
            Err(shared) => Some(shared.read().unwrap_or_else(|p| p.into_inner()).clone()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_maps().keys().cloned().collect()
    }

    /// Load a map file from disk and store it under `key`.
    pub fn load_from_file(&self, key: &str, path: &Path) -> Result<(), MapStoreError> {
        let map = read_map_file(path)?;
        self.insert(key, map)
    }

    /// Serialize a stored map to `path`, atomically replacing any previous
    /// file.
    pub fn save_to_file(&self, key: &str, path: &Path) -> Result<(), MapStoreError> {
        let handle = self
            .get(key)
            .ok_or_else(|| MapStoreError::NoSuchMap(key.to_string()))?;
        let map = handle.read().unwrap_or_else(|p| p.into_inner());
        write_map_file_atomic(path, &map)
    }

    fn lock_maps(&self) -> std::sync::MutexGuard<'_, HashMap<String, MapHandle>> {
        self.maps.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Read a serialized map from disk.
pub fn read_map_file(path: &Path) -> Result<ViMap, MapStoreError> {
    let file = File::open(path)?;
    let map = serde_json::from_reader(BufReader::new(file))?;
    Ok(map)
}

/// Write a map to `path` via a temp file in the same directory plus rename.
///
/// The rename keeps the previous file intact until the new one is complete.
pub fn write_map_file_atomic(path: &Path, map: &ViMap) -> Result<(), MapStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_sibling(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, map)?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        fs::remove_file(&tmp_path).ok();
        return Err(e.into());
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "map".to_string());
    match path.parent() {
        Some(parent) => parent.join(format!(".{}.tmp", file_name)),
        None => PathBuf::from(format!(".{}.tmp", file_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MissionId;
    use crate::map::types::Mission;

    fn test_map() -> ViMap {
        let mut map = ViMap::new();
        let id = MissionId::parse("00112233445566778899aabbccddeeff").unwrap();
        map.insert_mission(Mission::new(id));
        map
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let store = MapStore::new();
        store.insert("a", ViMap::new()).unwrap();
        assert!(matches!(
            store.insert("a", ViMap::new()),
            Err(MapStoreError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_take_transfers_ownership() {
        let store = MapStore::new();
        store.insert("a", test_map()).unwrap();
        let taken = store.take("a").unwrap();
        assert_eq!(taken.num_missions(), 1);
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");

        let store = MapStore::new();
        store.insert("a", test_map()).unwrap();
        store.save_to_file("a", &path).unwrap();

        let reloaded = read_map_file(&path).unwrap();
        assert_eq!(reloaded.num_missions(), 1);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        write_map_file_atomic(&path, &test_map()).unwrap();
        write_map_file_atomic(&path, &test_map()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["checkpoint.json".to_string()]);
    }

    #[test]
    fn test_save_unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = MapStore::new();
        assert!(matches!(
            store.save_to_file("missing", &dir.path().join("x.json")),
            Err(MapStoreError::NoSuchMap(_))
        ));
    }
}
