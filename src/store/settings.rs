//! Persisted pipeline settings.
//!
//! A key/value table holding JSON values.  Only keys listed in [`SettingKey`]
//! are accepted; a key that was never written reads back as its default.

use std::fmt;
use std::str::FromStr;

use rusqlite::OptionalExtension;
use tracing::debug;

use super::Store;
use crate::error::{AppError, db_err};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Ordinal (1-based) of the last document whose n-grams were merged.
    LastDocumentProcessed,
}

impl SettingKey {
    pub const ALL: &'static [SettingKey] = &[SettingKey::LastDocumentProcessed];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::LastDocumentProcessed => "last_document_processed",
        }
    }

    pub fn default_value(&self) -> serde_json::Value {
        match self {
            SettingKey::LastDocumentProcessed => serde_json::Value::from(0),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::InvalidSetting(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    store: Store,
}

impl Settings {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn get(&self, key: SettingKey) -> Result<serde_json::Value, AppError> {
        let raw: Option<String> = self.store.read(|tx| {
            tx.query_row(
                "SELECT value FROM database_settings WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("settings: get"))
        })?;
        match raw {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(key.default_value()),
        }
    }

    pub fn set(&self, key: SettingKey, value: serde_json::Value) -> Result<(), AppError> {
        let text = serde_json::to_string(&value)?;
        self.store.write(|tx| {
            tx.execute(
                "INSERT INTO database_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key.as_str(), text.as_str()],
            )
            .map_err(db_err("settings: set"))
        })?;
        debug!(key = %key, value = %text, "settings: updated");
        Ok(())
    }

    /// [`Settings::get`] by name.  Unknown names are [`AppError::InvalidSetting`].
    pub fn get_named(&self, name: &str) -> Result<serde_json::Value, AppError> {
        self.get(name.parse()?)
    }

    pub fn set_named(&self, name: &str, value: serde_json::Value) -> Result<(), AppError> {
        self.set(name.parse()?, value)
    }

    /// Write every key's default.
    pub fn reset_defaults(&self) -> Result<(), AppError> {
        for key in SettingKey::ALL {
            self.set(*key, key.default_value())?;
        }
        Ok(())
    }

    pub fn last_document_processed(&self) -> Result<usize, AppError> {
        let value = self.get(SettingKey::LastDocumentProcessed)?;
        value.as_u64().map(|n| n as usize).ok_or_else(|| {
            AppError::InvalidSetting(format!(
                "{}: expected a non-negative integer, found {value}",
                SettingKey::LastDocumentProcessed
            ))
        })
    }

    pub fn set_last_document_processed(&self, ordinal: usize) -> Result<(), AppError> {
        self.set(SettingKey::LastDocumentProcessed, serde_json::Value::from(ordinal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    fn make_settings() -> (TempDir, Settings) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path().join("corpus.db"), StoreOptions::default()).unwrap();
        (tmp, store.settings())
    }

    #[test]
    fn unset_key_reads_default() {
        let (_tmp, settings) = make_settings();
        assert_eq!(settings.last_document_processed().unwrap(), 0);
    }

    #[test]
    fn set_then_get() {
        let (_tmp, settings) = make_settings();
        settings.set_last_document_processed(42).unwrap();
        assert_eq!(settings.last_document_processed().unwrap(), 42);
        settings.set_named("last_document_processed", serde_json::json!(7)).unwrap();
        assert_eq!(settings.get_named("last_document_processed").unwrap(), serde_json::json!(7));
    }

    #[test]
    fn unknown_key_is_invalid_setting() {
        let (_tmp, settings) = make_settings();
        let err = settings.get_named("favourite_colour").unwrap_err();
        assert!(matches!(err, AppError::InvalidSetting(ref k) if k == "favourite_colour"));
        assert!(settings.set_named("nope", serde_json::json!(1)).is_err());
    }

    #[test]
    fn reset_restores_defaults() {
        let (_tmp, settings) = make_settings();
        settings.set_last_document_processed(9).unwrap();
        settings.reset_defaults().unwrap();
        assert_eq!(settings.last_document_processed().unwrap(), 0);
    }
}
