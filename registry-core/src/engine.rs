//! Orchestrates parse → dedupe → compat-check → persist, and resolves
//! subjects and contexts into the storage layer beneath. This is the
//! service contract everything else (transport, CLI, import) calls into.

use crate::cache::{CompatibilityKey, CompatibilityResultCache, ParsedSchemaCache, ParsedSchemaKey};
use crate::compatibility::{self, CompatibilityLevel, CompatibilityResult};
use crate::context::ContextResolver;
use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, NoopMetricsSink, Outcome};
use crate::parser::{self, ParsedSchema, ReferencedSchema};
use crate::record::{Mode, SchemaId, SchemaReference, SchemaRecord, SchemaType, Version};
use crate::storage::{Scope, StorageBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A version selector for read and compatibility-check operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Exact(Version),
    Latest,
    All,
}

/// Engine-wide tunables fixed at construction.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Compatibility level used when neither a per-subject nor a global
    /// override has been set.
    pub default_compatibility: CompatibilityLevel,
    /// Mode used when neither a per-subject nor a global override has been
    /// set.
    pub default_mode: Mode,
    pub parsed_schema_cache_capacity: u64,
    pub parsed_schema_cache_ttl: Duration,
    pub compatibility_cache_capacity: u64,
    pub compatibility_cache_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_compatibility: CompatibilityLevel::Backward,
            default_mode: Mode::ReadWrite,
            parsed_schema_cache_capacity: 10_000,
            parsed_schema_cache_ttl: Duration::from_secs(600),
            compatibility_cache_capacity: 10_000,
            compatibility_cache_ttl: Duration::from_secs(600),
        }
    }
}

/// Orchestrates the Parser Set, Compatibility Checkers, and a
/// [`StorageBackend`] behind the service contract described by this crate's
/// documentation.
pub struct RegistryEngine {
    backend: Arc<dyn StorageBackend>,
    config: RegistryConfig,
    contexts: ContextResolver,
    parsed_cache: ParsedSchemaCache,
    compat_cache: CompatibilityResultCache,
    metrics: Arc<dyn MetricsSink>,
}

impl RegistryEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, config: RegistryConfig) -> Self {
        Self::with_metrics(backend, config, Arc::new(NoopMetricsSink))
    }

    /// Like [`RegistryEngine::new`], but records counters/histograms through
    /// `metrics` instead of discarding them. The sink is called synchronously
    /// on the hot path, so it must tolerate being invoked from async code and
    /// must not itself block meaningfully.
    pub fn with_metrics(
        backend: Arc<dyn StorageBackend>,
        config: RegistryConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let parsed_cache =
            ParsedSchemaCache::new(config.parsed_schema_cache_capacity, config.parsed_schema_cache_ttl);
        let compat_cache = CompatibilityResultCache::new(
            config.compatibility_cache_capacity,
            config.compatibility_cache_ttl,
        );
        Self {
            backend,
            config,
            contexts: ContextResolver::new(),
            parsed_cache,
            compat_cache,
            metrics,
        }
    }

    /// Checkpoint called between the stages of a long-running operation.
    /// `token` is supplied by the transport layer and cancelled when the
    /// caller has given up on the request; no partial state is observable
    /// once this returns an error.
    fn check_cancelled(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn storage_get_version_async(&self, subject: &str, version: Version) -> Result<SchemaRecord> {
        let start = Instant::now();
        let result = self.backend.get_schema_by_subject_version(subject, version).await;
        self.metrics.record_storage_latency("get_schema_by_subject_version", start.elapsed());
        result
    }

    fn effective_compatibility(
        &self,
        global: Option<CompatibilityLevel>,
        subject_level: Option<CompatibilityLevel>,
    ) -> CompatibilityLevel {
        subject_level
            .or(global)
            .unwrap_or(self.config.default_compatibility)
    }

    fn effective_mode(&self, global: Option<Mode>, subject_mode: Option<Mode>) -> Mode {
        subject_mode.or(global).unwrap_or(self.config.default_mode)
    }

    async fn check_mode_gate(&self, subject: &str) -> Result<()> {
        let global = self.backend.get_mode(Scope::Global).await?;
        let subject_mode = self.backend.get_mode(Scope::Subject(subject.to_string())).await?;
        let mode = self.effective_mode(global, subject_mode);
        if !mode.admits_writes() {
            return Err(Error::ModeForbidden);
        }
        Ok(())
    }

    async fn comparison_set(
        &self,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Result<Vec<SchemaRecord>> {
        if level == CompatibilityLevel::None {
            return Ok(vec![]);
        }
        let mut versions = match self.backend.get_schemas_by_subject(subject, false).await {
            Ok(records) => records,
            Err(e) if e.is_not_found() => return Ok(vec![]),
            Err(e) => return Err(e),
        };
        versions.sort_by_key(|r| r.version);
        if level.is_transitive() {
            Ok(versions)
        } else {
            Ok(versions.into_iter().last().into_iter().collect())
        }
    }

    async fn parse_cached(
        &self,
        schema_type: SchemaType,
        text: &str,
        references: &[SchemaReference],
        resolved: &[ReferencedSchema],
    ) -> Result<Box<dyn ParsedSchema>> {
        parser::parse(schema_type, text, references, resolved).map(|parsed| {
            let key = ParsedSchemaKey {
                schema_type,
                fingerprint: parsed.fingerprint(),
            };
            if self.parsed_cache.get(&key).is_some() {
                self.metrics.record_cache_hit("parsed_schema");
            } else {
                self.metrics.record_cache_miss("parsed_schema");
            }
            self.parsed_cache
                .put(key, Arc::new(parsed.canonical_string()));
            parsed
        })
    }

    async fn check_against(
        &self,
        level: CompatibilityLevel,
        candidate: &dyn ParsedSchema,
        existing_records: &[SchemaRecord],
    ) -> Result<CompatibilityResult> {
        if level == CompatibilityLevel::None || existing_records.is_empty() {
            return Ok(CompatibilityResult::compatible());
        }

        let mut existing_parsed = Vec::with_capacity(existing_records.len());
        for record in existing_records {
            let resolved = self.resolve_references_async(&record.references, record.schema_type, &record.subject).await?;
            let parsed = parser::parse(record.schema_type, &record.schema, &record.references, &resolved)?;
            existing_parsed.push(parsed);
        }

        let candidate_fp = candidate.fingerprint();
        if !level.is_transitive() {
            if let Some(last) = existing_parsed.last() {
                let key = CompatibilityKey {
                    level,
                    schema_type: candidate.schema_type(),
                    candidate_fingerprint: candidate_fp.clone(),
                    existing_fingerprint: last.fingerprint(),
                };
                if let Some(cached) = self.compat_cache.get(&key) {
                    self.metrics.record_cache_hit("compatibility_result");
                    self.record_compatibility_outcome(&cached);
                    return Ok((*cached).clone());
                }
                self.metrics.record_cache_miss("compatibility_result");
                let result = compatibility::check(level, candidate, std::slice::from_ref(last));
                self.record_compatibility_outcome(&result);
                self.compat_cache.put(key, Arc::new(result.clone()));
                return Ok(result);
            }
        }

        let result = compatibility::check(level, candidate, &existing_parsed);
        self.record_compatibility_outcome(&result);
        Ok(result)
    }

    fn record_compatibility_outcome(&self, result: &CompatibilityResult) {
        let outcome = if result.is_compatible { Outcome::Success } else { Outcome::Failure };
        self.metrics.record_compatibility_check(outcome);
    }

    async fn resolve_references_async(
        &self,
        references: &[SchemaReference],
        _schema_type: SchemaType,
        owning_subject: &str,
    ) -> Result<Vec<ReferencedSchema>> {
        let context = self.contexts.resolve_subject(owning_subject).0;
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            let qualified = self.contexts.format_subject(&context, &reference.subject);
            let record = self
                .storage_get_version_async(&qualified, reference.version)
                .await
                .map_err(|_| Error::UnresolvedReference {
                    subject: reference.subject.clone(),
                    version: reference.version,
                })?;
            resolved.push(ReferencedSchema {
                name: reference.name.clone(),
                schema: record.schema,
            });
        }
        Ok(resolved)
    }

    /// `Register(subject, schemaType, schemaText, references)`.
    ///
    /// Returns the existing record unchanged (no new ID/version allocated)
    /// when a live record with the same fingerprint already exists under
    /// `subject`.
    pub async fn register(
        &self,
        raw_subject: &str,
        schema_type: Option<SchemaType>,
        schema_text: &str,
        references: Vec<SchemaReference>,
        token: &CancellationToken,
    ) -> Result<SchemaRecord> {
        self.check_cancelled(token)?;
        let (context, subject) = self.contexts.resolve_subject(raw_subject);
        if self.contexts.is_global_context(&context) {
            return Err(Error::GlobalContextForbidden);
        }
        let qualified = self.contexts.format_subject(&context, &subject);
        self.check_mode_gate(&qualified).await?;

        let schema_type = schema_type.unwrap_or_default();
        let resolved = self.resolve_references_async(&references, schema_type, &qualified).await?;
        let candidate = self
            .parse_cached(schema_type, schema_text, &references, &resolved)
            .await?;
        let fingerprint = candidate.fingerprint();

        if let Ok(existing) = self
            .backend
            .get_schema_by_fingerprint(&qualified, &fingerprint, false)
            .await
        {
            return Ok(existing);
        }

        self.check_cancelled(token)?;
        let global_level = self.backend.get_config(Scope::Global).await?;
        let subject_level = self
            .backend
            .get_config(Scope::Subject(qualified.clone()))
            .await?;
        let level = self.effective_compatibility(global_level, subject_level);

        let comparison = self.comparison_set(&qualified, level).await?;
        let verdict = self.check_against(level, candidate.as_ref(), &comparison).await?;
        self.check_cancelled(token)?;
        if !verdict.is_compatible {
            self.metrics.record_registration(Outcome::Failure);
            return Err(Error::IncompatibleSchema {
                messages: verdict.messages,
            });
        }

        let placeholder = SchemaRecord::new(
            0,
            qualified.clone(),
            0,
            schema_type,
            schema_text,
            fingerprint.clone(),
            references,
            now_millis(),
        );

        let start = Instant::now();
        let outcome = match self.backend.create_schema(placeholder).await {
            Ok(record) => Ok(record),
            Err(Error::SchemaExists) => self
                .backend
                .get_schema_by_fingerprint(&qualified, &fingerprint, false)
                .await,
            Err(e) => Err(e),
        };
        self.metrics.record_storage_latency("create_schema", start.elapsed());
        self.metrics.record_registration(if outcome.is_ok() { Outcome::Success } else { Outcome::Failure });
        outcome
    }

    /// `CheckCompatibility(subject, schemaText, schemaType, references,
    /// versionSpec)`. Side-effect free.
    pub async fn check_compatibility(
        &self,
        raw_subject: &str,
        schema_type: Option<SchemaType>,
        schema_text: &str,
        references: Vec<SchemaReference>,
        version_spec: VersionSpec,
        token: &CancellationToken,
    ) -> Result<CompatibilityResult> {
        self.check_cancelled(token)?;
        let (context, subject) = self.contexts.resolve_subject(raw_subject);
        let qualified = self.contexts.format_subject(&context, &subject);

        let schema_type = schema_type.unwrap_or_default();
        let resolved = self.resolve_references_async(&references, schema_type, &qualified).await?;
        let candidate = parser::parse(schema_type, schema_text, &references, &resolved)?;

        let global_level = self.backend.get_config(Scope::Global).await?;
        let subject_level = self
            .backend
            .get_config(Scope::Subject(qualified.clone()))
            .await?;
        let level = self.effective_compatibility(global_level, subject_level);

        self.check_cancelled(token)?;
        let comparison = match version_spec {
            VersionSpec::Exact(version) => {
                vec![self.backend.get_schema_by_subject_version(&qualified, version).await?]
            }
            VersionSpec::Latest => {
                vec![self.backend.get_latest_schema(&qualified).await?]
            }
            VersionSpec::All => self.comparison_set(&qualified, level).await?,
        };

        self.check_against(level, candidate.as_ref(), &comparison).await
    }

    pub async fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaRecord> {
        self.backend.get_schema_by_id(id).await
    }

    pub async fn get_schema_by_subject_version(
        &self,
        raw_subject: &str,
        version: VersionSpec,
    ) -> Result<SchemaRecord> {
        let qualified = self.qualify(raw_subject);
        match version {
            VersionSpec::Exact(v) => self.backend.get_schema_by_subject_version(&qualified, v).await,
            VersionSpec::Latest => self.backend.get_latest_schema(&qualified).await,
            VersionSpec::All => Err(Error::InvalidSchema(
                "version spec All is not valid for a single-record lookup".to_string(),
            )),
        }
    }

    pub async fn get_schemas_by_subject(
        &self,
        raw_subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>> {
        let qualified = self.qualify(raw_subject);
        self.backend.get_schemas_by_subject(&qualified, include_deleted).await
    }

    pub async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        self.backend.list_subjects(include_deleted).await
    }

    pub async fn get_subjects_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        self.backend.get_subjects_by_schema_id(id, include_deleted).await
    }

    pub async fn get_versions_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<Version>> {
        self.backend.get_versions_by_schema_id(id, include_deleted).await
    }

    pub async fn delete_schema(&self, raw_subject: &str, version: Version, permanent: bool) -> Result<()> {
        let qualified = self.qualify(raw_subject);
        self.check_mode_gate(&qualified).await?;
        if permanent {
            let referrers = self.backend.get_referenced_by(&qualified, version).await?;
            if !referrers.is_empty() {
                return Err(Error::ReferencedByOther(referrers.len()));
            }
        }
        self.backend.delete_schema(&qualified, version, permanent).await
    }

    pub async fn delete_subject(&self, raw_subject: &str, permanent: bool) -> Result<Vec<Version>> {
        let qualified = self.qualify(raw_subject);
        self.check_mode_gate(&qualified).await?;
        if permanent {
            let versions = self.backend.get_schemas_by_subject(&qualified, true).await?;
            for record in &versions {
                let referrers = self.backend.get_referenced_by(&qualified, record.version).await?;
                if !referrers.is_empty() {
                    return Err(Error::ReferencedByOther(referrers.len()));
                }
            }
        }
        self.backend.delete_subject(&qualified, permanent).await
    }

    pub async fn get_referenced_by(
        &self,
        raw_subject: &str,
        version: Version,
    ) -> Result<Vec<(String, Version)>> {
        let qualified = self.qualify(raw_subject);
        self.backend.get_referenced_by(&qualified, version).await
    }

    pub async fn set_config(&self, raw_subject: Option<&str>, level: CompatibilityLevel) -> Result<()> {
        let scope = self.scope_for(raw_subject);
        self.backend.set_config(scope, level).await
    }

    pub async fn get_config(&self, raw_subject: Option<&str>) -> Result<CompatibilityLevel> {
        let scope = self.scope_for(raw_subject);
        Ok(self
            .backend
            .get_config(scope)
            .await?
            .unwrap_or(self.config.default_compatibility))
    }

    pub async fn delete_config(&self, raw_subject: Option<&str>) -> Result<()> {
        let scope = self.scope_for(raw_subject);
        self.backend.delete_config(scope).await
    }

    pub async fn set_mode(&self, raw_subject: Option<&str>, mode: Mode) -> Result<()> {
        let scope = self.scope_for(raw_subject);
        self.backend.set_mode(scope, mode).await
    }

    pub async fn get_mode(&self, raw_subject: Option<&str>) -> Result<Mode> {
        let scope = self.scope_for(raw_subject);
        Ok(self.backend.get_mode(scope).await?.unwrap_or(self.config.default_mode))
    }

    pub async fn delete_mode(&self, raw_subject: Option<&str>) -> Result<()> {
        let scope = self.scope_for(raw_subject);
        self.backend.delete_mode(scope).await
    }

    pub async fn is_healthy(&self) -> bool {
        self.backend.is_healthy().await
    }

    fn qualify(&self, raw_subject: &str) -> String {
        let (context, subject) = self.contexts.resolve_subject(raw_subject);
        self.contexts.format_subject(&context, &subject)
    }

    fn scope_for(&self, raw_subject: Option<&str>) -> Scope {
        match raw_subject {
            Some(raw) => Scope::Subject(self.qualify(raw)),
            None => Scope::Global,
        }
    }

    /// Storage backend handle, used by [`crate::import::ImportEngine`] to
    /// share the same backend and context resolution as this engine.
    pub(crate) fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub(crate) fn contexts(&self) -> &ContextResolver {
        &self.contexts
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
