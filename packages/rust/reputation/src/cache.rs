//! On-disk response cache, one JSON file per (service, URL).
//!
//! Entries never expire. Writes go to a temp file in the same directory and
//! are renamed into place, so a concurrent run sharing the directory sees
//! either the old state or the complete new file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use phishlens_shared::{CanonicalUrl, PhishLensError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

/// Deterministic cache key: lowercase hex SHA-256 of the canonical URL.
pub fn content_key(url: &CanonicalUrl) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A directory of cached upstream payloads for one service.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PhishLensError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Read the entry for `key`.
    ///
    /// A file that is not valid JSON is logged and reported as a miss so the
    /// next successful fetch replaces it. Any well-formed JSON, including
    /// `null`, is a hit.
    pub fn read(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PhishLensError::io(&path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(?path, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(?path, error = %e, "ignoring malformed cache entry");
                Ok(None)
            }
        }
    }

    /// Atomically write `payload` as the entry for `key`.
    pub fn write(&self, key: &str, payload: &Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::now_v7()));

        let bytes = serde_json::to_vec(payload)
            .map_err(|e| PhishLensError::Cache(format!("failed to serialize payload: {e}")))?;

        std::fs::write(&tmp, bytes).map_err(|e| PhishLensError::io(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(PhishLensError::io(&path, e));
        }

        debug!(?path, "cache entry written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn content_key_is_stable_sha256() {
        let url = CanonicalUrl::from_normalized("http://a.com/x");
        let key = content_key(&url);
        assert_eq!(key.len(), 64);
        assert_eq!(key, content_key(&CanonicalUrl::from_normalized("http://a.com/x")));
        assert_ne!(key, content_key(&CanonicalUrl::from_normalized("http://a.com/y")));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path().join("reputation")).expect("open");

        assert_eq!(store.read("abc").expect("read"), None);

        let payload = json!({"data": {"attributes": {"last_analysis_stats": {"malicious": 1}}}});
        store.write("abc", &payload).expect("write");
        assert_eq!(store.read("abc").expect("read"), Some(payload));
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path()).expect("open");
        store.write("k1", &json!({"a": 1})).expect("write");
        store.write("k1", &json!({"a": 2})).expect("overwrite");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["k1.json"]);
        assert_eq!(store.read("k1").expect("read"), Some(json!({"a": 2})));
    }

    #[test]
    fn malformed_entry_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path()).expect("open");
        // Legacy entries written as Python repr, not JSON.
        std::fs::write(store.path_for("bad"), "{'error': 'HTTP 404'}").expect("write");
        assert_eq!(store.read("bad").expect("read"), None);
    }

    #[test]
    fn null_entry_is_a_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path()).expect("open");
        std::fs::write(store.path_for("nil"), "null").expect("write");
        assert_eq!(store.read("nil").expect("read"), Some(Value::Null));
    }
}
