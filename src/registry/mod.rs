pub mod environment;
pub mod gateway;

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RegistryError;
use crate::operator_log;
use crate::runtime_state::{self, entry_file_stem};

pub use environment::{
    EnvironmentEntry, EnvironmentGroup, EnvironmentGroupKind, EnvironmentRegistry, EnvironmentType,
};
pub use gateway::{GatewayEntry, GatewayRegistry, TransactionDataDirectory};

/// A value stored one-per-file in a [`PersistedRegistry`].
pub trait RegistryEntry: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn name(&self) -> &str;
}

/// File-backed keyed collection. Each entry is its own JSON unit under
/// `root`, replaced by rename so readers never see half an entry.
pub struct PersistedRegistry<T> {
    root: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T> Clone for PersistedRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            _entry: PhantomData,
        }
    }
}

impl<T: RegistryEntry> PersistedRegistry<T> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _entry: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", entry_file_stem(name)))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entry_path(name).is_file()
    }

    /// Every readable entry, sorted by name. Units that fail to parse are
    /// logged and skipped.
    pub fn get_all(&self) -> Result<Vec<T>, RegistryError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RegistryError::storage(&self.root, err)),
        };
        let mut entries: Vec<T> = Vec::new();
        for item in dir {
            let item = item.map_err(|err| RegistryError::storage(&self.root, err))?;
            let path = item.path();
            if runtime_state::is_temp_file(&path)
                || path.extension().and_then(|ext| ext.to_str()) != Some("json")
            {
                continue;
            }
            match runtime_state::read_json::<T>(&path) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => operator_log::warn(
                    module_path!(),
                    format!(
                        "skipping unreadable {} entry {}: {err}",
                        T::KIND,
                        path.display()
                    ),
                ),
            }
        }
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        let mut seen = BTreeSet::new();
        entries.retain(|entry| seen.insert(entry.name().to_string()));
        Ok(entries)
    }

    pub fn get(&self, name: &str) -> Result<T, RegistryError> {
        let path = self.entry_path(name);
        match runtime_state::read_json::<T>(&path) {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => Err(self.not_found(name)),
            Err(err)
                if matches!(err.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) =>
            {
                Err(RegistryError::Configuration(format!(
                    "malformed {} entry '{name}' at {}: {err}",
                    T::KIND,
                    path.display()
                )))
            }
            Err(err) => Err(RegistryError::storage(path, err)),
        }
    }

    pub fn add(&self, entry: &T) -> Result<(), RegistryError> {
        validate_name::<T>(entry.name())?;
        let path = self.entry_path(entry.name());
        match runtime_state::create_json(&path, entry) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(RegistryError::Duplicate {
                kind: T::KIND,
                name: entry.name().to_string(),
            }),
            Err(err) => Err(RegistryError::storage(path, err)),
        }
    }

    /// Replaces every stored field of an existing entry. The existence check
    /// and the replacement happen under the entry lock, so a racing `delete`
    /// lands either wholly before (`NotFound`) or wholly after.
    pub fn update(&self, entry: &T) -> Result<(), RegistryError> {
        validate_name::<T>(entry.name())?;
        let path = self.entry_path(entry.name());
        if !self.root.is_dir() {
            return Err(self.not_found(entry.name()));
        }
        let _lock = runtime_state::lock_entry(&path)
            .map_err(|err| RegistryError::storage(&path, err))?;
        if !path.is_file() {
            return Err(self.not_found(entry.name()));
        }
        runtime_state::write_json(&path, entry).map_err(|err| RegistryError::storage(path, err))
    }

    /// Writes `entry` whether or not it already exists.
    pub fn put(&self, entry: &T) -> Result<(), RegistryError> {
        validate_name::<T>(entry.name())?;
        let path = self.entry_path(entry.name());
        let _lock = runtime_state::lock_entry(&path)
            .map_err(|err| RegistryError::storage(&path, err))?;
        runtime_state::write_json(&path, entry).map_err(|err| RegistryError::storage(path, err))
    }

    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        if !self.root.is_dir() {
            return Err(self.not_found(name));
        }
        self.remove_unit(self.entry_path(name))
            .map_err(|err| match err {
                Some(err) => err,
                None => self.not_found(name),
            })
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(RegistryError::storage(&self.root, err)),
        };
        for item in dir {
            let path = item
                .map_err(|err| RegistryError::storage(&self.root, err))?
                .path();
            if runtime_state::is_temp_file(&path)
                || path.extension().and_then(|ext| ext.to_str()) != Some("json")
            {
                continue;
            }
            match self.remove_unit(path) {
                Ok(()) | Err(None) => {}
                Err(Some(err)) => return Err(err),
            }
        }
        Ok(())
    }

    /// Removes one unit under its entry lock. `Err(None)` means it was
    /// already gone.
    fn remove_unit(&self, path: PathBuf) -> Result<(), Option<RegistryError>> {
        let _lock = runtime_state::lock_entry(&path)
            .map_err(|err| Some(RegistryError::storage(&path, err)))?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(None),
            Err(err) => Err(Some(RegistryError::storage(path, err))),
        }
    }

    fn not_found(&self, name: &str) -> RegistryError {
        RegistryError::NotFound {
            kind: T::KIND,
            name: name.to_string(),
        }
    }
}

fn validate_name<T: RegistryEntry>(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::Configuration(format!(
            "{} name cannot be empty",
            T::KIND
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        size: u32,
    }

    impl RegistryEntry for Widget {
        const KIND: &'static str = "widget";

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn widget(name: &str, size: u32) -> Widget {
        Widget {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn crud_reflects_surviving_entries() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let registry = PersistedRegistry::<Widget>::new(dir.path().join("widgets"));
        assert!(registry.get_all()?.is_empty());

        registry.add(&widget("b", 1))?;
        registry.add(&widget("a", 2))?;
        registry.add(&widget("c", 3))?;
        registry.update(&widget("b", 10))?;
        registry.delete("c")?;

        assert_eq!(registry.get_all()?, vec![widget("a", 2), widget("b", 10)]);
        assert_eq!(registry.get("b")?.size, 10);
        Ok(())
    }

    #[test]
    fn duplicate_and_missing_names_fail() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let registry = PersistedRegistry::<Widget>::new(dir.path());
        registry.add(&widget("a", 1))?;

        assert!(matches!(
            registry.add(&widget("a", 2)),
            Err(RegistryError::Duplicate { .. })
        ));
        assert!(registry.get("missing").unwrap_err().is_not_found());
        assert!(registry.update(&widget("missing", 1)).unwrap_err().is_not_found());
        assert!(registry.delete("missing").unwrap_err().is_not_found());
        assert!(matches!(
            registry.add(&widget("  ", 1)),
            Err(RegistryError::Configuration(_))
        ));
        assert_eq!(registry.get("a")?.size, 1);
        Ok(())
    }

    #[test]
    fn corrupt_and_temp_units_are_skipped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let registry = PersistedRegistry::<Widget>::new(dir.path());
        registry.add(&widget("good", 1))?;
        std::fs::write(dir.path().join("broken.json"), b"{\"name\": ")?;
        std::fs::write(dir.path().join(".good.json.1234.tmp"), b"{\"name\":\"ghost\",\"size\":1}")?;
        std::fs::write(dir.path().join("notes.txt"), b"ignore me")?;

        assert_eq!(registry.get_all()?, vec![widget("good", 1)]);
        assert!(matches!(
            registry.get("broken"),
            Err(RegistryError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn names_with_separators_stay_inside_root() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("widgets");
        let registry = PersistedRegistry::<Widget>::new(&root);
        registry.add(&widget("../escape", 1))?;
        registry.add(&widget("1 Org Local", 2))?;
        assert!(registry.entry_path("../escape").starts_with(&root));
        assert_eq!(registry.get("../escape")?.size, 1);
        assert_eq!(registry.get_all()?.len(), 2);
        Ok(())
    }

    #[test]
    fn clear_removes_everything() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let registry = PersistedRegistry::<Widget>::new(dir.path().join("widgets"));
        registry.clear()?;
        registry.add(&widget("a", 1))?;
        registry.add(&widget("b", 1))?;
        registry.clear()?;
        assert!(registry.get_all()?.is_empty());
        registry.add(&widget("a", 3))?;
        assert_eq!(registry.get("a")?.size, 3);
        Ok(())
    }
}
