//! Directory-backed object store.
//!
//! Layout: key `a/b/c.csv` lives at `{root}/a/b/c.csv`. Writes are atomic
//! (write to `.tmp`, rename into place) so a crashed run never leaves a
//! half-written meta file behind.

use super::{ObjectStore, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = ".tmp";

/// A local directory treated as a bucket.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, rejecting keys that would escape it.
    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(invalid("keys are relative and '/'-separated"));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            match segment {
                "" | "." | ".." => return Err(invalid("empty or relative path segment")),
                s => path.push(s),
            }
        }
        Ok(path)
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        };
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.ends_with(TMP_SUFFIX) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.key_path(key)?;
        fs::read(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StoreError::NotFound {
                key: key.to_string(),
            },
            _ => StoreError::Io {
                key: key.to_string(),
                source,
            },
        })
    }

    fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, body).map_err(io_err)?;

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            io_err(source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("2022-11-17/a.csv", b"1".to_vec()).unwrap();
        store.put("2022-11-17/b.csv", b"2".to_vec()).unwrap();
        store.put("2022-11-18/a.csv", b"3".to_vec()).unwrap();

        assert_eq!(store.get("2022-11-17/b.csv").unwrap(), b"2".to_vec());
        assert_eq!(
            store.list_keys("2022-11-17").unwrap(),
            vec!["2022-11-17/a.csv", "2022-11-17/b.csv"]
        );
        assert_eq!(store.list_keys("").unwrap().len(), 3);
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            store.get("meta_file.csv"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("absent"));
        assert!(store.list_keys("").unwrap().is_empty());
    }

    #[test]
    fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        for key in ["../outside.csv", "/abs.csv", "a//b.csv", ""] {
            assert!(
                matches!(store.put(key, vec![]), Err(StoreError::InvalidKey { .. })),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn overwrite_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("meta_file.csv", b"old".to_vec()).unwrap();
        store.put("meta_file.csv", b"new".to_vec()).unwrap();

        assert_eq!(store.get("meta_file.csv").unwrap(), b"new".to_vec());
        assert_eq!(store.list_keys("").unwrap(), vec!["meta_file.csv"]);
        assert!(!dir.path().join("meta_file.csv.tmp").exists());
    }
}
