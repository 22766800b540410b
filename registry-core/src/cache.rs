//! Advisory caches behind the read path: a parsed-schema cache and a
//! compatibility-result cache, both LRU+TTL via `moka`.
//!
//! Caches are never on the write path directly returned to callers; a miss
//! always falls through to a correct parse/check, and writes never
//! pre-populate an entry they haven't independently verified.

use crate::compatibility::{CompatibilityLevel, CompatibilityResult};
use crate::record::SchemaType;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Key for the parsed-schema cache: `(type, fingerprint)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedSchemaKey {
    pub schema_type: SchemaType,
    pub fingerprint: String,
}

/// Key for the compatibility-result cache: `(level, type, newFp, existingFp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompatibilityKey {
    pub level: CompatibilityLevel,
    pub schema_type: SchemaType,
    pub candidate_fingerprint: String,
    pub existing_fingerprint: String,
}

/// Caches the fingerprint of a successfully parsed schema, keyed by
/// `(type, fingerprint)`, so repeated registrations of the same content
/// skip re-parsing. The cache stores only the fingerprint and canonical
/// string; a schema that must be re-checked structurally is always
/// re-parsed from its original text.
pub struct ParsedSchemaCache {
    inner: Cache<ParsedSchemaKey, Arc<String>>,
}

impl ParsedSchemaCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &ParsedSchemaKey) -> Option<Arc<String>> {
        self.inner.get(key)
    }

    pub fn put(&self, key: ParsedSchemaKey, canonical: Arc<String>) {
        self.inner.insert(key, canonical);
    }

    pub fn invalidate(&self, key: &ParsedSchemaKey) {
        self.inner.invalidate(key);
    }
}

/// Caches `CompatibilityResult`s keyed by `(level, type, newFp, existingFp)`.
pub struct CompatibilityResultCache {
    inner: Cache<CompatibilityKey, Arc<CompatibilityResult>>,
}

impl CompatibilityResultCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &CompatibilityKey) -> Option<Arc<CompatibilityResult>> {
        self.inner.get(key)
    }

    pub fn put(&self, key: CompatibilityKey, result: Arc<CompatibilityResult>) {
        self.inner.insert(key, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_schema_cache_roundtrips() {
        let cache = ParsedSchemaCache::new(100, Duration::from_secs(60));
        let key = ParsedSchemaKey {
            schema_type: SchemaType::Avro,
            fingerprint: "deadbeef".into(),
        };
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Arc::new("canonical".into()));
        assert_eq!(cache.get(&key).map(|s| (*s).clone()), Some("canonical".into()));
    }

    #[test]
    fn compatibility_cache_roundtrips() {
        let cache = CompatibilityResultCache::new(100, Duration::from_secs(60));
        let key = CompatibilityKey {
            level: CompatibilityLevel::Backward,
            schema_type: SchemaType::Avro,
            candidate_fingerprint: "aaa".into(),
            existing_fingerprint: "bbb".into(),
        };
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Arc::new(CompatibilityResult::compatible()));
        assert!(cache.get(&key).unwrap().is_compatible);
    }
}
