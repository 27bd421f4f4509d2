//! # ctmark Core
//!
//! Research orchestration on top of [`ctmark_storage`].
//!
//! This crate owns the rules that sit between the HTTP surface and the on-disk research tree:
//! - Transactional research creation: create, ingest, depersonalize, preview, or nothing
//! - Per-research write serialisation ([`ResearchLocks`])
//! - Access checks for markup through the [`ResearchAccess`] collaborator
//! - Runtime configuration resolved once at startup ([`CoreConfig`])
//!
//! **No API concerns**: authentication, routing and multipart parsing belong in `api-rest`.

pub mod access;
pub mod config;
pub mod constants;
pub mod error;
mod locks;
mod service;

pub use access::{InMemoryResearchAccess, ResearchAccess};
pub use config::CoreConfig;
pub use error::{ResearchError, ResearchResult};
pub use locks::{ResearchLockGuard, ResearchLocks};
pub use service::{CreatedResearch, ResearchService};

pub use ctmark_storage::{ResearchId, UploadedFile};
