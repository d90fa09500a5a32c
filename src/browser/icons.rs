//! Session-wide icon cache.
//!
//! Catalogs from every contacted endpoint merge into one map keyed by the
//! served filename; identical keys are last-writer-wins and nothing is
//! evicted mid-session.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::protocol::IconEntry;

const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

#[derive(Debug, Default)]
pub struct IconCache {
    pixmaps: HashMap<String, Vec<u8>>,
}

impl IconCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one endpoint's catalog; undecodable entries are dropped.
    pub fn merge(&mut self, catalog: &[IconEntry]) {
        for entry in catalog {
            match BASE64.decode(&entry.data) {
                Ok(bytes) => {
                    self.pixmaps.insert(entry.filename.clone(), bytes);
                }
                Err(err) => {
                    tracing::warn!("icon {} has undecodable data: {err}", entry.filename);
                }
            }
        }
    }

    /// Resolve an object's `icon` value to PNG bytes: first against the
    /// catalog (exact filename, then basename), then as a legacy inline
    /// base64 payload.
    pub fn resolve(&self, icon: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.pixmaps.get(icon) {
            return Some(bytes.clone());
        }
        if let Some(name) = icon.rsplit('/').next() {
            let suffix = format!("/{name}");
            if let Some(bytes) = self
                .pixmaps
                .iter()
                .find(|(key, _)| key.ends_with(&suffix))
                .map(|(_, bytes)| bytes.clone())
            {
                return Some(bytes);
            }
        }
        // Legacy providers inline the PNG itself.
        match BASE64.decode(icon) {
            Ok(bytes) if bytes.starts_with(&PNG_MAGIC) => Some(bytes),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.pixmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixmaps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, bytes: &[u8]) -> IconEntry {
        IconEntry {
            filename: filename.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    #[test]
    fn test_merge_and_exact_resolution() {
        let mut cache = IconCache::new();
        cache.merge(&[entry("./resources/Job.png", b"jobpng")]);
        assert_eq!(cache.resolve("./resources/Job.png").unwrap(), b"jobpng");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut cache = IconCache::new();
        cache.merge(&[entry("./resources/Job.png", b"first")]);
        cache.merge(&[entry("./resources/Job.png", b"second")]);
        assert_eq!(cache.resolve("./resources/Job.png").unwrap(), b"second");
    }

    #[test]
    fn test_basename_fallback() {
        let mut cache = IconCache::new();
        cache.merge(&[entry("./resources/Partition.png", b"part")]);
        assert_eq!(cache.resolve("Partition.png").unwrap(), b"part");
    }

    #[test]
    fn test_legacy_inline_base64() {
        let cache = IconCache::new();
        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(b"rest");
        let inline = BASE64.encode(&png);
        assert_eq!(cache.resolve(&inline).unwrap(), png);
        // Arbitrary base64 that is not PNG data does not resolve.
        assert!(cache.resolve(&BASE64.encode(b"plain text")).is_none());
        assert!(cache.resolve("./resources/Missing.png").is_none());
    }
}
