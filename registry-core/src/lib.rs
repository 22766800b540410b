//! # Registry Core
//!
//! The core of a wire-compatible Schema Registry: immutable schema artifacts
//! (Avro, Protobuf, JSON Schema) addressed by a content fingerprint, organized
//! into named *subjects* with dense per-subject *versions*, and governed by
//! pluggable per-language compatibility rules.
//!
//! ## Design Principles
//!
//! - **No transport**: this crate knows nothing about HTTP, auth, or CLIs.
//!   Those are external collaborators (see the `registry-server` crate).
//! - **Storage-delegated concurrency**: the engine holds no locks of its own;
//!   every ordering and uniqueness invariant is the storage backend's job.
//! - **Content-addressed**: identity is the SHA-256 of a language-specific
//!   canonical form, never the raw submitted text.
//!
//! ## Core Concepts
//!
//! ### Schema Records
//!
//! The immutable unit of storage: a global [`SchemaId`], a `subject`, a dense
//! [`Version`] within that subject, a [`SchemaType`], the original text, a
//! fingerprint, and an ordered list of [`SchemaReference`]s.
//!
//! ### Parsers
//!
//! One per [`SchemaType`], producing a [`parser::ParsedSchema`] with a
//! deterministic canonical string and fingerprint.
//!
//! ### Compatibility Checkers
//!
//! One per [`SchemaType`], evaluating a candidate against prior versions
//! under one of seven [`CompatibilityLevel`]s.
//!
//! ### Storage
//!
//! A [`storage::StorageBackend`] trait with an in-memory, a PostgreSQL
//! (feature `postgres`), and a Cassandra (feature `cassandra`) implementation.
//!
//! ### Contexts
//!
//! [`context`] namespaces subjects and IDs behind a `:.context:subject`
//! textual convention.
//!
//! ## Quick Start
//!
//! ```no_run
//! use registry_core::{RegistryEngine, RegistryConfig};
//! use registry_core::storage::memory::MemoryBackend;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> registry_core::error::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let config = RegistryConfig::default();
//! let engine = RegistryEngine::new(backend, config);
//!
//! let record = engine
//!     .register("foo-value", None, r#"{"type":"string"}"#, vec![], &CancellationToken::new())
//!     .await?;
//! assert_eq!(record.version, 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compatibility;
pub mod context;
pub mod engine;
pub mod error;
pub mod import;
pub mod metrics;
pub mod parser;
pub mod record;
pub mod storage;

pub use compatibility::CompatibilityLevel;
pub use engine::{RegistryConfig, RegistryEngine};
pub use error::Error;
pub use import::{ImportEngine, ImportOutcome, ImportRequest};
pub use metrics::{MetricsSink, NoopMetricsSink, Outcome as MetricsOutcome};
pub use record::{Mode, SchemaId, SchemaReference, SchemaRecord, SchemaType, Version};

/// Timestamp in milliseconds since the Unix epoch, observable but never
/// load-bearing for ordering.
pub type Timestamp = i64;

/// A context name, always starting with `.` (default context is `.`).
pub type ContextName = String;

/// A bare or context-qualified subject name as submitted by a caller.
pub type SubjectName = String;
