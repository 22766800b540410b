//! Process-local backend: a single mutex around the entire store (spec
//! §4.4, "Process-local"). Intended for tests and single-node development.

use super::{Scope, StorageBackend};
use crate::compatibility::CompatibilityLevel;
use crate::error::{Error, Result};
use crate::record::{Mode, SchemaId, SchemaRecord, Version};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    records: HashMap<SchemaId, SchemaRecord>,
    next_id: SchemaId,
    /// Last-allocated version per subject; versions are never reused once
    /// assigned, even across permanent deletion.
    subject_versions: HashMap<String, Version>,
    global_config: Option<CompatibilityLevel>,
    subject_config: HashMap<String, CompatibilityLevel>,
    global_mode: Option<Mode>,
    subject_mode: HashMap<String, Mode>,
}

/// An in-memory [`StorageBackend`] guarded by a single mutex.
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn find_live_by_fingerprint<'a>(
        state: &'a State,
        subject: &str,
        fingerprint: &str,
    ) -> Option<&'a SchemaRecord> {
        state
            .records
            .values()
            .find(|r| r.subject == subject && r.fingerprint == fingerprint && !r.deleted)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_schema(&self, mut record: SchemaRecord) -> Result<SchemaRecord> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");

        if Self::find_live_by_fingerprint(&state, &record.subject, &record.fingerprint).is_some()
        {
            return Err(Error::SchemaExists);
        }

        let id = state.next_id;
        state.next_id += 1;

        let version = state
            .subject_versions
            .get(&record.subject)
            .copied()
            .unwrap_or(0)
            + 1;
        state
            .subject_versions
            .insert(record.subject.clone(), version);

        record.id = id;
        record.version = version;
        record.deleted = false;
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaRecord> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        state
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::SchemaNotFound(id.to_string()))
    }

    async fn get_schema_by_subject_version(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<SchemaRecord> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        state
            .records
            .values()
            .find(|r| r.subject == subject && r.version == version)
            .cloned()
            .ok_or_else(|| Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })
    }

    async fn get_schema_by_fingerprint(
        &self,
        subject: &str,
        fingerprint: &str,
        include_deleted: bool,
    ) -> Result<SchemaRecord> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        state
            .records
            .values()
            .find(|r| {
                r.subject == subject && r.fingerprint == fingerprint && (include_deleted || !r.deleted)
            })
            .cloned()
            .ok_or_else(|| Error::SchemaNotFound(fingerprint.to_string()))
    }

    async fn get_latest_schema(&self, subject: &str) -> Result<SchemaRecord> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        state
            .records
            .values()
            .filter(|r| r.subject == subject && !r.deleted)
            .max_by_key(|r| r.version)
            .cloned()
            .ok_or_else(|| Error::SubjectNotFound(subject.to_string()))
    }

    async fn get_schemas_by_subject(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        let mut records: Vec<SchemaRecord> = state
            .records
            .values()
            .filter(|r| r.subject == subject && (include_deleted || !r.deleted))
            .cloned()
            .collect();
        if records.is_empty()
            && !state.records.values().any(|r| r.subject == subject)
        {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }
        records.sort_by_key(|r| r.version);
        Ok(records)
    }

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        let mut subjects: Vec<String> = state
            .records
            .values()
            .filter(|r| include_deleted || !r.deleted)
            .map(|r| r.subject.clone())
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn get_subjects_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        let mut subjects: Vec<String> = state
            .records
            .values()
            .filter(|r| r.id == id && (include_deleted || !r.deleted))
            .map(|r| r.subject.clone())
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn get_versions_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<Version>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        let mut versions: Vec<Version> = state
            .records
            .values()
            .filter(|r| r.id == id && (include_deleted || !r.deleted))
            .map(|r| r.version)
            .collect();
        versions.sort();
        Ok(versions)
    }

    async fn delete_schema(&self, subject: &str, version: Version, permanent: bool) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");

        let referenced = state.records.values().any(|r| {
            !r.deleted
                && r.references
                    .iter()
                    .any(|reference| reference.subject == subject && reference.version == version)
        });

        let target_id = state
            .records
            .values()
            .find(|r| r.subject == subject && r.version == version)
            .map(|r| r.id)
            .ok_or_else(|| Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;

        if permanent {
            if referenced {
                return Err(Error::ReferencedByOther(1));
            }
            state.records.remove(&target_id);
        } else {
            state.records.get_mut(&target_id).unwrap().deleted = true;
        }
        Ok(())
    }

    async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<Version>> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");

        let ids: Vec<(SchemaId, Version)> = state
            .records
            .values()
            .filter(|r| r.subject == subject)
            .map(|r| (r.id, r.version))
            .collect();

        if ids.is_empty() {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }

        if permanent {
            let referenced_count = ids
                .iter()
                .filter(|(_, version)| {
                    state.records.values().any(|r| {
                        !r.deleted
                            && r.subject != subject
                            && r.references
                                .iter()
                                .any(|reference| reference.subject == subject && reference.version == *version)
                    })
                })
                .count();
            if referenced_count > 0 {
                return Err(Error::ReferencedByOther(referenced_count));
            }
            for (id, _) in &ids {
                state.records.remove(id);
            }
            state.subject_config.remove(subject);
            state.subject_mode.remove(subject);
        } else {
            for (id, _) in &ids {
                state.records.get_mut(id).unwrap().deleted = true;
            }
        }

        let mut versions: Vec<Version> = ids.into_iter().map(|(_, v)| v).collect();
        versions.sort();
        Ok(versions)
    }

    async fn get_referenced_by(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<Vec<(String, Version)>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        let mut referrers: Vec<(String, Version)> = state
            .records
            .values()
            .filter(|r| {
                !r.deleted
                    && r.references
                        .iter()
                        .any(|reference| reference.subject == subject && reference.version == version)
            })
            .map(|r| (r.subject.clone(), r.version))
            .collect();
        referrers.sort();
        Ok(referrers)
    }

    async fn set_config(&self, scope: Scope, level: CompatibilityLevel) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");
        match scope {
            Scope::Global => state.global_config = Some(level),
            Scope::Subject(subject) => {
                state.subject_config.insert(subject, level);
            }
        }
        Ok(())
    }

    async fn get_config(&self, scope: Scope) -> Result<Option<CompatibilityLevel>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        Ok(match scope {
            Scope::Global => state.global_config,
            Scope::Subject(subject) => state.subject_config.get(&subject).copied(),
        })
    }

    async fn delete_config(&self, scope: Scope) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");
        match scope {
            Scope::Global => state.global_config = None,
            Scope::Subject(subject) => {
                state.subject_config.remove(&subject);
            }
        }
        Ok(())
    }

    async fn set_mode(&self, scope: Scope, mode: Mode) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");
        match scope {
            Scope::Global => state.global_mode = Some(mode),
            Scope::Subject(subject) => {
                state.subject_mode.insert(subject, mode);
            }
        }
        Ok(())
    }

    async fn get_mode(&self, scope: Scope) -> Result<Option<Mode>> {
        let state = self.state.lock().expect("memory backend mutex poisoned");
        Ok(match scope {
            Scope::Global => state.global_mode,
            Scope::Subject(subject) => state.subject_mode.get(&subject).copied(),
        })
    }

    async fn delete_mode(&self, scope: Scope) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");
        match scope {
            Scope::Global => state.global_mode = None,
            Scope::Subject(subject) => {
                state.subject_mode.remove(&subject);
            }
        }
        Ok(())
    }

    async fn import_schema(&self, record: SchemaRecord) -> Result<SchemaRecord> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");

        if let Some(existing) = state.records.get(&record.id) {
            if existing.fingerprint != record.fingerprint {
                return Err(Error::SchemaIdConflict { id: record.id });
            }
        }

        let taken = state
            .records
            .values()
            .any(|r| r.subject == record.subject && r.version == record.version);
        if taken {
            return Err(Error::SchemaExists);
        }

        let current = state
            .subject_versions
            .get(&record.subject)
            .copied()
            .unwrap_or(0);
        if record.version > current {
            state
                .subject_versions
                .insert(record.subject.clone(), record.version);
        }

        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_next_id(&self, n: SchemaId) -> Result<()> {
        let mut state = self.state.lock().expect("memory backend mutex poisoned");
        if n > state.next_id {
            state.next_id = n;
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SchemaReference, SchemaType};

    fn record(subject: &str, fingerprint: &str) -> SchemaRecord {
        SchemaRecord::new(0, subject, 0, SchemaType::Avro, "{}", fingerprint, vec![], 0)
    }

    #[tokio::test]
    async fn create_schema_allocates_contiguous_versions() {
        let backend = MemoryBackend::new();
        let first = backend.create_schema(record("s", "fp1")).await.unwrap();
        let second = backend.create_schema(record("s", "fp2")).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_under_subject_is_rejected() {
        let backend = MemoryBackend::new();
        backend.create_schema(record("s", "fp1")).await.unwrap();
        let err = backend.create_schema(record("s", "fp1")).await.unwrap_err();
        assert_eq!(err, Error::SchemaExists);
    }

    #[tokio::test]
    async fn soft_delete_preserves_version_then_continues_sequence() {
        let backend = MemoryBackend::new();
        backend.create_schema(record("s", "fp1")).await.unwrap();
        backend.delete_schema("s", 1, false).await.unwrap();

        let live = backend.get_schemas_by_subject("s", false).await.unwrap();
        assert!(live.is_empty());
        let all = backend.get_schemas_by_subject("s", true).await.unwrap();
        assert_eq!(all.len(), 1);

        let next = backend.create_schema(record("s", "fp2")).await.unwrap();
        assert_eq!(next.version, 2);
    }

    #[tokio::test]
    async fn permanent_delete_refused_when_referenced() {
        let backend = MemoryBackend::new();
        backend.create_schema(record("base", "fp1")).await.unwrap();

        let mut dependent = record("dep", "fp2");
        dependent.references = vec![SchemaReference::new("Base", "base", 1)];
        backend.create_schema(dependent).await.unwrap();

        let err = backend
            .delete_schema("base", 1, true)
            .await
            .unwrap_err();
        assert_eq!(err, Error::ReferencedByOther(1));
    }

    #[tokio::test]
    async fn set_next_id_never_decreases() {
        let backend = MemoryBackend::new();
        backend.set_next_id(100).await.unwrap();
        backend.set_next_id(10).await.unwrap();
        let record = backend.create_schema(record("s", "fp1")).await.unwrap();
        assert!(record.id >= 100);
    }
}
