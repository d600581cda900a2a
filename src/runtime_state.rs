use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

pub struct OperatorPaths {
    home: PathBuf,
}

impl OperatorPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.home.join("environments")
    }

    pub fn gateways_dir(&self) -> PathBuf {
        self.home.join("gateways")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}

/// Maps an entry name onto a file stem. Every byte outside `[A-Za-z0-9_-]`
/// is percent-encoded so distinct names never share a storage unit.
pub fn entry_file_stem(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

/// Writes `value` at `path` only if nothing is stored there yet. The check
/// and the publish are one filesystem operation, so two processes racing on
/// the same name cannot both succeed.
pub fn create_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = write_temp(path, &bytes)?;
    let linked = match std::fs::hard_link(&tmp, path) {
        Err(err) if err.kind() == ErrorKind::Unsupported => {
            if path.exists() {
                Err(std::io::Error::from(ErrorKind::AlreadyExists))
            } else {
                return std::fs::rename(&tmp, path);
            }
        }
        other => other,
    };
    let _ = std::fs::remove_file(&tmp);
    linked
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let value = serde_json::from_slice(&data)?;
    Ok(Some(value))
}

pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp(path, bytes)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Exclusive advisory lock on the entry stored at `path`, held until the
/// returned file is dropped. Mutations that must observe and replace an entry
/// as one step serialize on it, across threads and processes alike.
pub fn lock_entry(path: &Path) -> std::io::Result<File> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(parent.join(format!(".{file_name}.lock")))?;
    lock.lock()?;
    Ok(lock)
}

pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(true)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn encodes_names_injectively() {
        assert_eq!(entry_file_stem("gateway-1_a"), "gateway-1_a");
        assert_eq!(entry_file_stem("1 Org Local"), "1%20Org%20Local");
        assert_eq!(entry_file_stem("../etc"), "%2E%2E%2Fetc");
        assert_ne!(entry_file_stem("a b"), entry_file_stem("a%20b"));
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("sample.json");
        write_json(&path, &Sample { name: "a".into(), count: 1 })?;
        write_json(&path, &Sample { name: "a".into(), count: 2 })?;
        let stored: Option<Sample> = read_json(&path)?;
        assert_eq!(stored, Some(Sample { name: "a".into(), count: 2 }));
        let leftovers = std::fs::read_dir(path.parent().unwrap())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_temp_file(&entry.path()))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn create_json_refuses_existing_unit() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sample.json");
        create_json(&path, &Sample { name: "a".into(), count: 1 })?;
        let err = create_json(&path, &Sample { name: "a".into(), count: 9 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let stored: Option<Sample> = read_json(&path)?;
        assert_eq!(stored.map(|sample| sample.count), Some(1));
        Ok(())
    }

    #[test]
    fn entry_lock_lives_beside_the_entry_as_a_hidden_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("sample.json");
        let lock = lock_entry(&path)?;
        let lock_path = dir.path().join("nested").join(".sample.json.lock");
        assert!(lock_path.is_file());
        assert!(is_temp_file(&lock_path));
        assert!(!path.exists());
        drop(lock);
        let _again = lock_entry(&path)?;
        Ok(())
    }

    #[test]
    fn read_json_of_missing_file_is_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let stored: Option<Sample> = read_json(&dir.path().join("absent.json"))?;
        assert!(stored.is_none());
        Ok(())
    }
}
