use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::models::now_utc;

#[derive(Debug, Serialize, Deserialize)]
struct SeenEntry {
    first_seen: i64,
}

/// Persistent cache of (platform, platform_id, project) triples the
/// collector has already stored. Purely an accelerant: the database
/// unique constraint remains the authoritative dedup guard, so a stale
/// or wiped cache only costs extra INSERT OR IGNORE round trips.
pub struct SeenCache {
    db: sled::Db,
}

impl SeenCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Temporary cache for tests
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn key(platform: &str, platform_id: &str, project_id: i64) -> Vec<u8> {
        format!("{platform}\x1f{platform_id}\x1f{project_id}").into_bytes()
    }

    pub fn contains(&self, platform: &str, platform_id: &str, project_id: i64) -> Result<bool> {
        Ok(self
            .db
            .contains_key(Self::key(platform, platform_id, project_id))?)
    }

    pub fn mark_seen(&self, platform: &str, platform_id: &str, project_id: i64) -> Result<()> {
        let entry = SeenEntry {
            first_seen: now_utc().and_utc().timestamp(),
        };
        let encoded = bincode::serialize(&entry)
            .map_err(|e| crate::error::ReplyscoutError::Cache(e.to_string()))?;
        self.db
            .insert(Self::key(platform, platform_id, project_id), encoded)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let bytes = self.db.flush()?;
        debug!(bytes, "seen cache flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_contains() {
        let cache = SeenCache::temporary().unwrap();
        assert!(!cache.contains("x", "123", 1).unwrap());
        cache.mark_seen("x", "123", 1).unwrap();
        assert!(cache.contains("x", "123", 1).unwrap());
        // Same platform id under a different project is distinct
        assert!(!cache.contains("x", "123", 2).unwrap());
    }
}
