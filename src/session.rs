//! Session persistence over a flat string key/value store.
//!
//! Everything read back from a store is untrusted: missing keys, unreadable files and
//! malformed values all fall back to defaults without surfacing an error.

use crate::params::{ParameterChange, ParameterGroupKind, ParameterValue};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ACTIVE_PLUGIN_KEY: &str = "session.active_plugin";
const THEME_KEY: &str = "session.theme";
const PARAM_PREFIX: &str = "param.";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// A JSON object of string values, rewritten in full on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::read(&path) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("[session] ignoring unreadable store '{}': {err:#}", path.display());
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("parsing session store '{}'", path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err).with_context(|| format!("reading session store '{}'", path.display())),
        }
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating session directory '{}'", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, json).with_context(|| format!("writing session store '{}'", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredParameter {
    pub group: ParameterGroupKind,
    pub id: String,
    pub value: ParameterValue,
}

/// Typed view over a [`KeyValueStore`].
pub struct SessionState {
    store: Box<dyn KeyValueStore>,
}

impl SessionState {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn active_plugin(&self) -> Option<String> {
        self.store.get(ACTIVE_PLUGIN_KEY).filter(|id| !id.trim().is_empty())
    }

    pub fn set_active_plugin(&mut self, id: Option<&str>) {
        let outcome = match id {
            Some(id) => self.store.set(ACTIVE_PLUGIN_KEY, id),
            None => self.store.remove(ACTIVE_PLUGIN_KEY),
        };
        log_write_failure(outcome);
    }

    pub fn theme(&self) -> Option<String> {
        self.store.get(THEME_KEY)
    }

    pub fn set_theme(&mut self, name: &str) {
        log_write_failure(self.store.set(THEME_KEY, name));
    }

    /// Values saved for `plugin`. Entries that fail to decode are skipped.
    pub fn parameters(&self, plugin: &str) -> Vec<StoredParameter> {
        let prefix = format!("{PARAM_PREFIX}{plugin}.");
        let mut out = Vec::new();
        for key in self.store.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((group, id)) = rest.split_once('.') else {
                continue;
            };
            let Some(group) = ParameterGroupKind::parse(group) else {
                log::debug!("[session] skipping '{key}': unknown group");
                continue;
            };
            let Some(raw) = self.store.get(&key) else {
                continue;
            };
            match serde_json::from_str::<ParameterValue>(&raw) {
                Ok(value) => out.push(StoredParameter { group, id: id.to_string(), value }),
                Err(err) => log::debug!("[session] skipping '{key}': {err}"),
            }
        }
        out
    }

    pub fn save_parameter(&mut self, plugin: &str, change: &ParameterChange) {
        let key = parameter_key(plugin, change.group, &change.id);
        let outcome = serde_json::to_string(&change.value)
            .map_err(anyhow::Error::from)
            .and_then(|encoded| self.store.set(&key, &encoded));
        log_write_failure(outcome);
    }
}

pub fn parameter_key(plugin: &str, group: ParameterGroupKind, id: &str) -> String {
    format!("{PARAM_PREFIX}{plugin}.{group}.{id}")
}

fn log_write_failure(outcome: Result<()>) {
    if let Err(err) = outcome {
        log::warn!("[session] write failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ChangeCause;
    use tempfile::tempdir;

    fn change(group: ParameterGroupKind, id: &str, value: ParameterValue) -> ParameterChange {
        ParameterChange { id: id.to_string(), group, previous: value.clone(), value, cause: ChangeCause::User }
    }

    #[test]
    fn parameters_round_trip_through_memory() {
        let mut session = SessionState::in_memory();
        session.save_parameter("circle", &change(ParameterGroupKind::Visual, "radius", 2.5.into()));
        session.save_parameter("circle", &change(ParameterGroupKind::Advanced, "wire", true.into()));
        session.save_parameter("knot", &change(ParameterGroupKind::Structural, "p", 3.0.into()));
        let mut stored = session.parameters("circle");
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, "radius");
        assert_eq!(stored[0].value, ParameterValue::Number(2.5));
        assert_eq!(stored[1].group, ParameterGroupKind::Advanced);
    }

    #[test]
    fn corrupt_values_are_skipped() {
        let mut store = MemoryStore::new();
        store.set("param.circle.visual.radius", "{oops").unwrap();
        store.set("param.circle.bogus.radius", "1").unwrap();
        store.set("param.circle.visual.color", "\"#ff0000\"").unwrap();
        let session = SessionState::new(Box::new(store));
        let stored = session.parameters("circle");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, ParameterValue::Text("#ff0000".to_string()));
    }

    #[test]
    fn file_store_persists_and_tolerates_garbage() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("session.json");
        {
            let mut store = JsonFileStore::open(&path);
            store.set(ACTIVE_PLUGIN_KEY, "knot").expect("write");
        }
        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get(ACTIVE_PLUGIN_KEY).as_deref(), Some("knot"));

        fs::write(&path, "[1, 2").expect("corrupt file");
        let session = SessionState::new(Box::new(JsonFileStore::open(&path)));
        assert_eq!(session.active_plugin(), None);
    }
}
