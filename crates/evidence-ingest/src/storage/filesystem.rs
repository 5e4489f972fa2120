use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::StorageError;

pub const URL_SCHEME: &str = "evidence-store://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Archive,
}

impl Tier {
    pub fn directory(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Archive => "archive",
        }
    }

    fn from_directory(name: &str) -> Option<Self> {
        match name {
            "hot" => Some(Tier::Hot),
            "archive" => Some(Tier::Archive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// `<first two hex chars>/<checksum>.<ext>`
    pub key: String,
    pub size: u64,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl StoredObject {
    pub fn url(&self) -> String {
        storage_url(&self.key)
    }
}

pub fn storage_url(key: &str) -> String {
    format!("{}{}", URL_SCHEME, key)
}

/// Key part of a storage URL, or `None` for foreign URLs.
pub fn key_from_url(url: &str) -> Option<&str> {
    url.strip_prefix(URL_SCHEME)
}

/// Moves `src` to `dst`, falling back to copy and delete across devices.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Content-addressed object store on the local filesystem.
///
/// Objects live under `<root>/<tier>/<key>`. The in-memory index tracks
/// sizes and access times; it is rebuilt from disk by [`FileStorage::open`].
pub struct FileStorage {
    root: PathBuf,
    index: Mutex<HashMap<String, StoredObject>>,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        ensure_directory(&root.join(Tier::Hot.directory()))?;

        let mut index = HashMap::new();
        for entry in WalkDir::new(&root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let mut parts = relative.components().map(|c| c.as_os_str().to_string_lossy());
            let (Some(tier), Some(shard), Some(name)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Some(tier) = Tier::from_directory(&tier) else {
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping unreadable object {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let key = format!("{}/{}", shard, name);
            debug!("Indexed stored object {}", key);
            index.insert(
                key.clone(),
                StoredObject {
                    key,
                    size: metadata.len(),
                    tier,
                    created_at: modified,
                    last_accessed: modified,
                },
            );
        }

        info!(
            "Indexed {} stored objects in {}",
            index.len(),
            root.display()
        );

        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_key(checksum: &str, extension: &str) -> String {
        let shard = checksum.get(..2).unwrap_or("00");
        format!("{}/{}.{}", shard, checksum, extension)
    }

    fn path_for(&self, tier: Tier, key: &str) -> PathBuf {
        self.root.join(tier.directory()).join(key)
    }

    /// Writes `content` to the hot tier under `key`. An existing object with
    /// the same key is left untouched, since keys are derived from content.
    pub fn put(&self, key: &str, content: &[u8]) -> Result<StoredObject, StorageError> {
        if let Some(existing) = self.touch(key) {
            return Ok(existing);
        }

        let path = self.path_for(Tier::Hot, key);
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(content).map_err(|e| StorageError::WriteFile {
                    path: path.clone(),
                    source: e,
                })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("Object {} already on disk", key);
            }
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }

        let now = Utc::now();
        let object = StoredObject {
            key: key.to_string(),
            size: content.len() as u64,
            tier: Tier::Hot,
            created_at: now,
            last_accessed: now,
        };
        self.lock_index()
            .insert(key.to_string(), object.clone());
        Ok(object)
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .touch(key)
            .ok_or_else(|| StorageError::UnknownObject(key.to_string()))?;
        let path = self.path_for(object.tier, key);
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    /// Marks the object as used now. Returns `None` for unknown keys.
    pub fn touch(&self, key: &str) -> Option<StoredObject> {
        let mut index = self.lock_index();
        let object = index.get_mut(key)?;
        object.last_accessed = Utc::now();
        Some(object.clone())
    }

    /// The object stored for `checksum` under any extension, marked as used.
    pub fn find_by_checksum(&self, checksum: &str) -> Option<StoredObject> {
        let prefix = Self::object_key(checksum, "");
        let mut index = self.lock_index();
        let object = index
            .iter_mut()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, object)| object)
            .min_by(|a, b| a.key.cmp(&b.key))?;
        object.last_accessed = Utc::now();
        Some(object.clone())
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock_index().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_index().contains_key(key)
    }

    /// Moves an object from the hot tier into the archive tier.
    pub fn archive(&self, key: &str) -> Result<StoredObject, StorageError> {
        let object = self
            .get(key)
            .ok_or_else(|| StorageError::UnknownObject(key.to_string()))?;
        if object.tier == Tier::Archive {
            return Ok(object);
        }

        let src = self.path_for(Tier::Hot, key);
        let dst = self.path_for(Tier::Archive, key);
        if let Some(parent) = dst.parent() {
            ensure_directory(parent)?;
        }
        move_file(&src, &dst)?;

        let mut index = self.lock_index();
        let entry = index
            .get_mut(key)
            .ok_or_else(|| StorageError::UnknownObject(key.to_string()))?;
        entry.tier = Tier::Archive;
        Ok(entry.clone())
    }

    /// Deletes the object. Returns the freed byte count.
    pub fn remove(&self, key: &str) -> Result<u64, StorageError> {
        let object = self
            .lock_index()
            .remove(key)
            .ok_or_else(|| StorageError::UnknownObject(key.to_string()))?;
        let path = self.path_for(object.tier, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(object.size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StorageError::RemoveFile { path, source: e }),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock_index().values().map(|o| o.size).sum()
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.lock_index().values().cloned().collect()
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredObject>> {
        // The index holds plain data, so a poisoned lock is still consistent.
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
