use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use filter_engine::{AtomicFileWriter, KeyValueStore, StorageError};
use filter_logging::{filter_info, filter_warn};
use serde_json::{Map, Value};

const SETTINGS_FILENAME: &str = "settings.ron";

/// Settings store kept as one RON map on disk. Every write replaces the whole file.
pub(crate) struct RonFileStore {
    writer: AtomicFileWriter,
    values: Mutex<BTreeMap<String, Value>>,
}

impl RonFileStore {
    /// Opens the store under `dir`. A missing or unreadable file starts empty.
    pub(crate) fn open(dir: PathBuf) -> Self {
        let writer = AtomicFileWriter::new(dir);
        let values = load_values(&writer);
        Self {
            writer,
            values: Mutex::new(values),
        }
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.writer.dir().join(SETTINGS_FILENAME)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>, StorageError> {
        self.values
            .lock()
            .map_err(|_| StorageError::Backend("settings lock poisoned".into()))
    }

    fn save(&self, values: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(values, pretty)
            .map_err(|err| StorageError::Backend(format!("serialize settings: {err}")))?;
        self.writer
            .write(SETTINGS_FILENAME, &content)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(())
    }
}

fn load_values(writer: &AtomicFileWriter) -> BTreeMap<String, Value> {
    let content = match writer.read(SETTINGS_FILENAME) {
        Ok(Some(text)) => text,
        Ok(None) => return BTreeMap::new(),
        Err(err) => {
            filter_warn!("Failed to read settings from {:?}: {}", writer.dir(), err);
            return BTreeMap::new();
        }
    };

    match ron::from_str::<BTreeMap<String, Value>>(&content) {
        Ok(values) => {
            filter_info!("Loaded {} settings from {:?}", values.len(), writer.dir());
            values
        }
        Err(err) => {
            filter_warn!("Failed to parse settings in {:?}: {}", writer.dir(), err);
            BTreeMap::new()
        }
    }
}

#[async_trait]
impl KeyValueStore for RonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let values = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|value| ((*key).to_owned(), value.clone())))
            .collect())
    }

    async fn set(&self, values: Map<String, Value>) -> Result<(), StorageError> {
        let mut stored = self.lock()?;
        stored.extend(values);
        self.save(&stored)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut stored = self.lock()?;
        stored.clear();
        self.save(&stored)
    }
}
