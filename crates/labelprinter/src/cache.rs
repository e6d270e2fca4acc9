//! Last-used printer cache.
//!
//! Remembers the printer of the last successful connection so callers can
//! skip a scan. Stored as JSON under the user config directory; entries older
//! than the TTL are treated as missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DriverConfig;
use crate::{LabelPrinterError, Result};

const CACHE_DIR: &str = "labelprinter";
const CACHE_FILE: &str = "last_printer.json";

/// A remembered printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPrinter {
    pub address: String,
    pub name: String,
    pub last_used: DateTime<Utc>,
}

/// JSON file holding the last-used printer.
#[derive(Debug, Clone)]
pub struct PrinterCache {
    path: PathBuf,
    ttl: Duration,
}

impl PrinterCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    /// Cache at `<config dir>/labelprinter/last_printer.json`.
    pub fn open_default(ttl: Duration) -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| LabelPrinterError::Cache("no user config directory".into()))?;
        Ok(Self::new(dir.join(CACHE_DIR).join(CACHE_FILE), ttl))
    }

    /// Default cache with the TTL from `config`.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        Self::open_default(config.cache_ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached printer, if present, readable and not expired.
    pub fn load(&self) -> Option<CachedPrinter> {
        self.load_at(Utc::now())
    }

    fn load_at(&self, now: DateTime<Utc>) -> Option<CachedPrinter> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let cached: CachedPrinter = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable printer cache");
                return None;
            }
        };

        // Timestamps in the future count as fresh.
        let age = now
            .signed_duration_since(cached.last_used)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            tracing::debug!(address = %cached.address, "Printer cache expired");
            return None;
        }
        Some(cached)
    }

    /// Remember `address` as the last-used printer.
    pub fn save(&self, address: &str, name: &str) -> Result<()> {
        self.save_at(address, name, Utc::now())
    }

    fn save_at(&self, address: &str, name: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(cache_error)?;
        }
        let entry = CachedPrinter {
            address: address.to_string(),
            name: name.to_string(),
            last_used: now,
        };
        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| LabelPrinterError::Cache(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(cache_error)?;
        tracing::debug!(address, path = %self.path.display(), "Saved printer cache");
        Ok(())
    }

    /// Remove the cache file. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(cache_error(e)),
        }
    }
}

fn cache_error(err: std::io::Error) -> LabelPrinterError {
    LabelPrinterError::Cache(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(ttl: Duration) -> PrinterCache {
        let dir = std::env::temp_dir().join(format!("labelprinter-test-{}", uuid::Uuid::new_v4()));
        PrinterCache::new(dir.join(CACHE_FILE), ttl)
    }

    #[test]
    fn test_save_then_load() {
        let cache = temp_cache(Duration::from_secs(3600));
        assert!(cache.load().is_none());

        cache.save("AA:BB:CC:DD:EE:FF", "P31S-1A2B").unwrap();
        let cached = cache.load().unwrap();
        assert_eq!(cached.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(cached.name, "P31S-1A2B");

        assert!(cache.clear().unwrap());
        assert!(!cache.clear().unwrap());
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_expired_entry_is_ignored() {
        let cache = temp_cache(Duration::from_secs(24 * 3600));
        let saved_at = Utc::now() - chrono::Duration::hours(25);
        cache.save_at("AA:BB:CC:DD:EE:FF", "P31S", saved_at).unwrap();

        assert!(cache.load().is_none());
        assert!(cache.load_at(saved_at + chrono::Duration::hours(23)).is_some());
        cache.clear().unwrap();
    }

    #[test]
    fn test_from_config_uses_cache_ttl() {
        let config = DriverConfig {
            cache_ttl: Duration::from_secs(600),
            ..DriverConfig::default()
        };
        // Headless CI may have no config directory at all.
        match PrinterCache::from_config(&config) {
            Ok(cache) => {
                assert_eq!(cache.ttl(), Duration::from_secs(600));
                assert!(cache.path().ends_with("labelprinter/last_printer.json"));
            }
            Err(e) => assert!(matches!(e, LabelPrinterError::Cache(_))),
        }
    }

    #[test]
    fn test_corrupt_file_is_treated_as_missing() {
        let cache = temp_cache(Duration::from_secs(3600));
        std::fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        std::fs::write(cache.path(), "{\"address\": 1}").unwrap();
        assert!(cache.load().is_none());
        cache.clear().unwrap();
    }
}
