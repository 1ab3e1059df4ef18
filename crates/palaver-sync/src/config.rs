//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so a client starts with zero configuration.

use std::path::PathBuf;

use palaver_shared::constants::DAY_KEY_FORMAT;
use palaver_store::{LocalStore, StoreError};

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local cache database file. `None` selects the platform data
    /// directory; the value `:memory:` selects a throwaway cache.
    /// Env: `PALAVER_STORE_PATH`
    pub store_path: Option<PathBuf>,

    /// Mark a conversation's messages read when it is opened.
    /// Env: `PALAVER_MARK_READ_ON_OPEN` (true/false)
    /// Default: `true`
    pub mark_read_on_open: bool,

    /// Open realtime channels for open conversations and the list.
    /// Env: `PALAVER_REALTIME` (true/false)
    /// Default: `true`
    pub realtime: bool,

    /// `chrono` format used for day bucket keys.
    /// Default: `%d-%m-%Y`
    pub day_key_format: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            mark_read_on_open: true,
            realtime: true,
            day_key_format: DAY_KEY_FORMAT.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("PALAVER_STORE_PATH") {
            if !path.is_empty() {
                config.store_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("PALAVER_MARK_READ_ON_OPEN") {
            match parse_flag(&val) {
                Some(flag) => config.mark_read_on_open = flag,
                None => tracing::warn!(
                    value = %val,
                    "Invalid PALAVER_MARK_READ_ON_OPEN, using default"
                ),
            }
        }

        if let Some(val) = lookup("PALAVER_REALTIME") {
            match parse_flag(&val) {
                Some(flag) => config.realtime = flag,
                None => tracing::warn!(value = %val, "Invalid PALAVER_REALTIME, using default"),
            }
        }

        config
    }

    /// Handle on the configured local cache. Nothing is opened yet.
    pub fn open_store(&self) -> Result<LocalStore, StoreError> {
        match &self.store_path {
            Some(path) if path.as_os_str() == ":memory:" => Ok(LocalStore::in_memory()),
            Some(path) => Ok(LocalStore::at(path)),
            None => LocalStore::new(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config, SyncConfig::default());
        assert!(config.mark_read_on_open);
        assert!(config.realtime);
        assert_eq!(config.day_key_format, "%d-%m-%Y");
    }

    #[test]
    fn test_flags_and_path() {
        let config = load(&[
            ("PALAVER_STORE_PATH", "/tmp/palaver-test.db"),
            ("PALAVER_MARK_READ_ON_OPEN", "false"),
            ("PALAVER_REALTIME", "0"),
        ]);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/palaver-test.db")));
        assert!(!config.mark_read_on_open);
        assert!(!config.realtime);
    }

    #[test]
    fn test_invalid_flag_keeps_default() {
        let config = load(&[("PALAVER_REALTIME", "sometimes")]);
        assert!(config.realtime);
    }

    #[test]
    fn test_memory_store_path() {
        let config = load(&[("PALAVER_STORE_PATH", ":memory:")]);
        let store = config.open_store().unwrap();
        assert!(store.path().is_none());
    }
}
