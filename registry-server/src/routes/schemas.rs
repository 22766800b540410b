//! Schema, subject, config, mode, and import routes: the HTTP surface for
//! every operation the registry core exposes to a transport.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use registry_core::engine::VersionSpec;
use registry_core::parser::ParsedSchema;
use registry_core::{CompatibilityLevel, ImportOutcome, ImportRequest as CoreImportRequest, Mode, SchemaId, SchemaReference, SchemaRecord, SchemaType, Version};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subjects", get(list_subjects))
        .route("/subjects/{subject}", post(lookup_schema_under_subject))
        .route("/subjects/{subject}", delete(delete_subject))
        .route("/subjects/{subject}/versions", get(list_versions))
        .route("/subjects/{subject}/versions", post(register_schema))
        .route("/subjects/{subject}/versions/{version}", get(get_version))
        .route("/subjects/{subject}/versions/{version}", delete(delete_version))
        .route(
            "/compatibility/subjects/{subject}/versions/{version}",
            post(check_compatibility),
        )
        .route("/schemas/ids/{id}", get(get_by_id))
        .route("/schemas/ids/{id}/subjects", get(subjects_by_id))
        .route("/schemas/ids/{id}/versions", get(versions_by_id))
        .route("/config", get(get_global_config).put(put_global_config))
        .route(
            "/config/{subject}",
            get(get_subject_config).put(put_subject_config),
        )
        .route("/mode", get(get_global_mode).put(put_global_mode))
        .route("/mode/{subject}", get(get_subject_mode).put(put_subject_mode))
        .route("/schemas/import", post(import_schemas))
}

#[derive(Debug, Deserialize)]
struct ReferenceDto {
    name: String,
    subject: String,
    version: Version,
}

impl From<ReferenceDto> for SchemaReference {
    fn from(dto: ReferenceDto) -> Self {
        SchemaReference::new(dto.name, dto.subject, dto.version)
    }
}

#[derive(Debug, Serialize)]
struct ReferenceOut {
    name: String,
    subject: String,
    version: Version,
}

impl From<&SchemaReference> for ReferenceOut {
    fn from(r: &SchemaReference) -> Self {
        Self {
            name: r.name.clone(),
            subject: r.subject.clone(),
            version: r.version,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaSubmission {
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    #[serde(default)]
    references: Vec<ReferenceDto>,
    #[serde(default, rename = "includeDeleted")]
    include_deleted: bool,
}

#[derive(Debug, Serialize)]
struct IdResponse {
    id: SchemaId,
}

#[derive(Debug, Serialize)]
struct SchemaResponse {
    id: SchemaId,
    subject: String,
    version: Version,
    #[serde(rename = "schemaType")]
    schema_type: String,
    schema: String,
    references: Vec<ReferenceOut>,
}

impl From<SchemaRecord> for SchemaResponse {
    fn from(record: SchemaRecord) -> Self {
        Self {
            id: record.id,
            subject: record.subject,
            version: record.version,
            schema_type: record.schema_type.as_str().to_string(),
            schema: record.schema,
            references: record.references.iter().map(ReferenceOut::from).collect(),
        }
    }
}

fn parse_schema_type(raw: Option<&str>) -> Result<Option<SchemaType>> {
    raw.map(SchemaType::from_str)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

async fn register_schema(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<SchemaSubmission>,
) -> Result<Json<IdResponse>> {
    let schema_type = parse_schema_type(body.schema_type.as_deref())?;
    let references = body.references.into_iter().map(SchemaReference::from).collect();
    let token = CancellationToken::new();
    let record = state
        .engine
        .register(&subject, schema_type, &body.schema, references, &token)
        .await?;
    Ok(Json(IdResponse { id: record.id }))
}

async fn lookup_schema_under_subject(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<SchemaSubmission>,
) -> Result<Json<SchemaResponse>> {
    let schema_type = parse_schema_type(body.schema_type.as_deref())?;
    let resolved = registry_core::parser::parse(schema_type.unwrap_or_default(), &body.schema, &[], &[])?;
    let record = state
        .engine
        .get_schemas_by_subject(&subject, body.include_deleted)
        .await?
        .into_iter()
        .find(|r| r.fingerprint == resolved.fingerprint())
        .ok_or_else(|| registry_core::Error::SchemaNotFound(resolved.fingerprint()))?;
    Ok(Json(SchemaResponse::from(record)))
}

async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<SchemaId>,
) -> Result<Json<SchemaResponse>> {
    let record = state.engine.get_schema_by_id(id).await?;
    Ok(Json(SchemaResponse::from(record)))
}

fn parse_version_spec(raw: &str) -> Result<VersionSpec> {
    if raw.eq_ignore_ascii_case("latest") {
        Ok(VersionSpec::Latest)
    } else {
        raw.parse::<Version>()
            .map(VersionSpec::Exact)
            .map_err(|_| AppError::BadRequest(format!("invalid version: {raw}")))
    }
}

async fn get_version(
    State(state): State<AppState>,
    Path((subject, version)): Path<(String, String)>,
) -> Result<Json<SchemaResponse>> {
    let spec = parse_version_spec(&version)?;
    let record = state.engine.get_schema_by_subject_version(&subject, spec).await?;
    Ok(Json(SchemaResponse::from(record)))
}

#[derive(Debug, Deserialize)]
struct IncludeDeletedQuery {
    #[serde(default, rename = "deleted")]
    include_deleted: bool,
}

async fn list_versions(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Result<Json<Vec<Version>>> {
    let records = state
        .engine
        .get_schemas_by_subject(&subject, query.include_deleted)
        .await?;
    Ok(Json(records.into_iter().map(|r| r.version).collect()))
}

async fn list_subjects(
    State(state): State<AppState>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.engine.list_subjects(query.include_deleted).await?))
}

#[derive(Debug, Deserialize)]
struct PermanentQuery {
    #[serde(default)]
    permanent: bool,
}

async fn delete_version(
    State(state): State<AppState>,
    Path((subject, version)): Path<(String, String)>,
    Query(query): Query<PermanentQuery>,
) -> Result<Json<Version>> {
    let spec = parse_version_spec(&version)?;
    let resolved_version = match spec.clone() {
        VersionSpec::Exact(v) => v,
        VersionSpec::Latest => state.engine.get_schema_by_subject_version(&subject, spec).await?.version,
        VersionSpec::All => return Err(AppError::BadRequest("version must be an integer or \"latest\"".into())),
    };
    state
        .engine
        .delete_schema(&subject, resolved_version, query.permanent)
        .await?;
    Ok(Json(resolved_version))
}

async fn delete_subject(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<PermanentQuery>,
) -> Result<Json<Vec<Version>>> {
    let versions = state.engine.delete_subject(&subject, query.permanent).await?;
    Ok(Json(versions))
}

#[derive(Debug, Serialize)]
struct CompatibilityCheckResponse {
    #[serde(rename = "is_compatible")]
    is_compatible: bool,
    messages: Vec<String>,
}

async fn check_compatibility(
    State(state): State<AppState>,
    Path((subject, version)): Path<(String, String)>,
    Json(body): Json<SchemaSubmission>,
) -> Result<Json<CompatibilityCheckResponse>> {
    let schema_type = parse_schema_type(body.schema_type.as_deref())?;
    let references = body.references.into_iter().map(SchemaReference::from).collect();
    let spec = parse_version_spec(&version)?;
    let token = CancellationToken::new();
    let result = state
        .engine
        .check_compatibility(&subject, schema_type, &body.schema, references, spec, &token)
        .await?;
    Ok(Json(CompatibilityCheckResponse {
        is_compatible: result.is_compatible,
        messages: result.messages,
    }))
}

async fn subjects_by_id(
    State(state): State<AppState>,
    Path(id): Path<SchemaId>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(
        state.engine.get_subjects_by_schema_id(id, query.include_deleted).await?,
    ))
}

async fn versions_by_id(
    State(state): State<AppState>,
    Path(id): Path<SchemaId>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Result<Json<Vec<Version>>> {
    Ok(Json(
        state.engine.get_versions_by_schema_id(id, query.include_deleted).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct CompatibilityConfigDto {
    compatibility: String,
}

#[derive(Debug, Serialize)]
struct CompatibilityConfigOut {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: String,
}

async fn get_global_config(State(state): State<AppState>) -> Result<Json<CompatibilityConfigOut>> {
    let level = state.engine.get_config(None).await?;
    Ok(Json(CompatibilityConfigOut {
        compatibility_level: level.as_str().to_string(),
    }))
}

async fn put_global_config(
    State(state): State<AppState>,
    Json(body): Json<CompatibilityConfigDto>,
) -> Result<Json<CompatibilityConfigOut>> {
    let level = CompatibilityLevel::from_str(&body.compatibility)?;
    state.engine.set_config(None, level).await?;
    Ok(Json(CompatibilityConfigOut {
        compatibility_level: level.as_str().to_string(),
    }))
}

async fn get_subject_config(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<CompatibilityConfigOut>> {
    let level = state.engine.get_config(Some(&subject)).await?;
    Ok(Json(CompatibilityConfigOut {
        compatibility_level: level.as_str().to_string(),
    }))
}

async fn put_subject_config(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<CompatibilityConfigDto>,
) -> Result<Json<CompatibilityConfigOut>> {
    let level = CompatibilityLevel::from_str(&body.compatibility)?;
    state.engine.set_config(Some(&subject), level).await?;
    Ok(Json(CompatibilityConfigOut {
        compatibility_level: level.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct ModeDto {
    mode: String,
}

#[derive(Debug, Serialize)]
struct ModeOut {
    mode: String,
}

async fn get_global_mode(State(state): State<AppState>) -> Result<Json<ModeOut>> {
    let mode = state.engine.get_mode(None).await?;
    Ok(Json(ModeOut { mode: mode.as_str().to_string() }))
}

async fn put_global_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeDto>,
) -> Result<Json<ModeOut>> {
    let mode = Mode::from_str(&body.mode)?;
    state.engine.set_mode(None, mode).await?;
    Ok(Json(ModeOut { mode: mode.as_str().to_string() }))
}

async fn get_subject_mode(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<ModeOut>> {
    let mode = state.engine.get_mode(Some(&subject)).await?;
    Ok(Json(ModeOut { mode: mode.as_str().to_string() }))
}

async fn put_subject_mode(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<ModeDto>,
) -> Result<Json<ModeOut>> {
    let mode = Mode::from_str(&body.mode)?;
    state.engine.set_mode(Some(&subject), mode).await?;
    Ok(Json(ModeOut { mode: mode.as_str().to_string() }))
}

#[derive(Debug, Deserialize)]
struct ImportElementDto {
    id: SchemaId,
    subject: String,
    version: Version,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    schema: String,
    #[serde(default)]
    references: Vec<ReferenceDto>,
}

#[derive(Debug, Deserialize)]
struct ImportBatchDto {
    schemas: Vec<ImportElementDto>,
}

#[derive(Debug, Serialize)]
struct ImportElementResult {
    id: SchemaId,
    subject: String,
    version: Version,
    error: Option<String>,
}

async fn import_schemas(
    State(state): State<AppState>,
    Json(body): Json<ImportBatchDto>,
) -> Result<Json<Vec<ImportElementResult>>> {
    let mut requests = Vec::with_capacity(body.schemas.len());
    for element in body.schemas {
        let schema_type = parse_schema_type(element.schema_type.as_deref())?.unwrap_or_default();
        requests.push((
            element.id,
            element.subject.clone(),
            element.version,
            CoreImportRequest {
                id: element.id,
                subject: element.subject,
                version: element.version,
                schema_type,
                schema_text: element.schema,
                references: element.references.into_iter().map(SchemaReference::from).collect(),
            },
        ));
    }

    let importer = registry_core::ImportEngine::new(&state.engine);
    let core_requests = requests.iter().map(|(_, _, _, r)| r.clone()).collect::<Vec<_>>();
    let token = CancellationToken::new();
    let outcomes = importer.import_schemas(core_requests, &token).await?;

    let results = requests
        .into_iter()
        .zip(outcomes)
        .map(|((id, subject, version, _), outcome)| match outcome {
            ImportOutcome::Imported(record) => ImportElementResult {
                id: record.id,
                subject: record.subject,
                version: record.version,
                error: None,
            },
            ImportOutcome::Conflict(e) => ImportElementResult {
                id,
                subject,
                version,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(results))
}
