//! Local settings persistence.
//!
//! A small string-keyed store persisted as one JSON object on disk. The UI
//! owns the shape of every setting; the bridge only stores JSON blobs under
//! `settings.<key>` and hands them back, or `None` when a value is missing or
//! cannot be decoded.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{json, Value};

use crate::error::Result;

/// File-backed settings store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl Settings {
    /// Opens the store at `path`.
    ///
    /// A missing file yields an empty store. So does a corrupt one: settings
    /// are a convenience, and losing them must not prevent startup.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("ignoring corrupt settings in {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, entries })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw string stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Stores `value` under `key` and persists the store.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written to disk.
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_owned(), value);
        self.persist()
    }

    /// Loads the setting `key`, decoded from JSON.
    #[must_use]
    pub fn load(&self, key: &str) -> Option<Value> {
        let value = self.get(&Self::storage_key(key))?;
        if value.is_empty() {
            return None;
        }

        serde_json::from_str(value)
            .inspect_err(|e| debug!("setting {key} is not valid JSON: {e}"))
            .ok()
    }

    /// Saves the setting `key`, encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written to disk.
    pub fn save(&mut self, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.set(&Self::storage_key(key), encoded)
    }

    /// Queue settings, or their defaults when none were saved.
    #[must_use]
    pub fn queue(&self) -> Value {
        self.load("queue")
            .unwrap_or_else(|| json!({ "repeat": false, "shuffle": false }))
    }

    fn storage_key(key: &str) -> String {
        format!("settings.{key}")
    }

    /// Writes to a sibling file first, so that a crash mid-write leaves the
    /// previous settings intact.
    fn persist(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.entries)?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");

        fs::write(&staging, contents)?;
        fs::rename(&staging, &self.path)?;
        trace!("persisted settings to {}", self.path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_with_queue_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::open(dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.queue(), json!({ "repeat": false, "shuffle": false }));
    }

    #[test]
    fn save_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::open(&path).unwrap();
        settings
            .save("queue", &json!({ "repeat": true, "shuffle": false }))
            .unwrap();

        let settings = Settings::open(&path).unwrap();
        assert_eq!(settings.queue(), json!({ "repeat": true, "shuffle": false }));
        assert!(settings.get("settings.queue").is_some());
    }

    #[test]
    fn undecodable_values_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::open(dir.path().join("settings.json")).unwrap();

        settings.set("settings.queue", "{oops".to_string()).unwrap();
        assert_eq!(settings.load("queue"), None);

        settings.set("settings.queue", String::new()).unwrap();
        assert_eq!(settings.load("queue"), None);
        assert_eq!(settings.queue()["shuffle"], false);
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let settings = Settings::open(&path).unwrap();
        assert_eq!(settings.load("queue"), None);
    }
}
