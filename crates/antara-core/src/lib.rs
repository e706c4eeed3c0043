//! # Antara Core
//!
//! Cognitive memory engine for coding agents: durable session transcripts,
//! hybrid recall, a lightweight self-model, sleep-inspired consolidation,
//! policy-gated tool use, and a deliberation engine for high-stakes
//! decisions.
//!
//! ## Storage model
//!
//! Markdown files under the configured home directory are the source of
//! truth for session transcripts; a SQLite mirror provides fast listing
//! and full-text search and can always be rebuilt from Markdown via
//! `SessionStore::reindex_all`.
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation via `fastembed`.
//! - `vector-search` (default): HNSW-accelerated vector search via `usearch`.
//! - `bundled-sqlite` (default): statically link SQLite via `rusqlite`'s
//!   `bundled` feature rather than requiring a system library.
//! - `encryption`: SQLCipher-backed encryption at rest for the SQLite mirror.
//! - `full`: all of the above.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bridge;
pub mod capability;
pub mod chetana;
pub mod config;
pub mod dharma;
pub mod jobs;
pub mod nidra;
pub mod recall;
pub mod sabha;
pub mod store;
pub mod util;

pub use bridge::{BridgeError, MemoryBridge};
pub use capability::{AutonomousManager, CapabilityTransport, ManagedServerInfo, NullTransport, ProtocolError, ServerRegistry, ServerState};
pub use chetana::{ChetanaController, ChetanaEvent};
pub use config::{ConfigError, DaemonConfig};
pub use dharma::{ApprovalGate, PolicyEngine};
pub use jobs::{JobError, JobQueue};
pub use nidra::{Chitragupta, ChitraguptaError};
pub use recall::{RecallEngine, RecallError, RecallOptions, RecallResult};
pub use sabha::{Sabha, SabhaError, Verdict};
pub use store::{MemoryScope, Session, SessionMeta, SessionStore, StorageError, Role, ToolCall, Turn};

/// Crate version, re-exported for daemon `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
