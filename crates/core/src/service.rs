//! Research service.
//!
//! [`ResearchService`] drives the storage manager on behalf of a caller. It maps absence to
//! [`ResearchError::NotFound`], serialises writers of one research, enforces markup access and
//! makes research creation all-or-nothing.

use crate::access::ResearchAccess;
use crate::config::CoreConfig;
use crate::error::{ResearchError, ResearchResult};
use crate::locks::ResearchLocks;
use ctmark_storage::{CaptureIngestor, DicomCodec, ResearchPaths, ResearchStorage, UploadedFile};
use ctmark_uuid::ResearchId;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of a successful [`ResearchService::create_research`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedResearch {
    pub research_id: ResearchId,
    pub captures_count: usize,
}

pub struct ResearchService {
    storage: Arc<ResearchStorage>,
    access: Arc<dyn ResearchAccess>,
    locks: ResearchLocks,
}

impl ResearchService {
    /// Service over the DICOM storage described by `cfg`.
    pub fn new(cfg: &CoreConfig, access: Arc<dyn ResearchAccess>) -> Self {
        let codec = Arc::new(DicomCodec);
        let storage = ResearchStorage::with_components(
            ResearchPaths::new(cfg.researches_dir(), cfg.path_cache_capacity()),
            Arc::new(CaptureIngestor::new(cfg.upload_chunk_size())),
            codec.clone(),
            codec,
        );
        Self::with_storage(Arc::new(storage), access)
    }

    pub fn with_storage(storage: Arc<ResearchStorage>, access: Arc<dyn ResearchAccess>) -> Self {
        Self {
            storage,
            access,
            locks: ResearchLocks::new(),
        }
    }

    pub fn storage(&self) -> &ResearchStorage {
        &self.storage
    }

    /// Creates a research from uploaded captures.
    ///
    /// The research is created, the uploads ingested, depersonalized and previewed, and
    /// `creator` registered as owner. If no upload is a capture
    /// ([`ResearchError::WrongFilesFormat`]), any step fails or the returned future is dropped
    /// before completion, the new research is removed.
    ///
    /// # Errors
    ///
    /// - [`ResearchError::InvalidInput`] if `files` is empty
    /// - [`ResearchError::WrongFilesFormat`] if nothing was accepted
    /// - [`ResearchError::Storage`] for I/O, archive or codec failures
    pub async fn create_research(
        &self,
        creator: &str,
        files: Vec<UploadedFile>,
    ) -> ResearchResult<CreatedResearch> {
        if files.is_empty() {
            return Err(ResearchError::InvalidInput("no files uploaded".into()));
        }

        let research_id = ResearchId::new();
        let mut rollback = Rollback::new(&self.storage, research_id.clone());

        self.storage.create_empty(Some(research_id.clone())).await?;
        let captures_count = {
            let _guard = self.locks.lock(&research_id).await;
            self.ingest_and_process(&research_id, files).await?
        };

        self.access.register_owner(creator, &research_id).await;
        rollback.disarm();
        tracing::info!(research_id = %research_id, captures_count, creator, "research created");

        Ok(CreatedResearch {
            research_id,
            captures_count,
        })
    }

    /// Ingests more captures into an existing research and reprocesses it.
    ///
    /// Nothing is removed on failure; the research keeps whatever state the failing step left.
    pub async fn load_captures(
        &self,
        id: &ResearchId,
        files: Vec<UploadedFile>,
    ) -> ResearchResult<usize> {
        let _guard = self.locks.lock(id).await;
        self.ingest_and_process(id, files).await
    }

    async fn ingest_and_process(
        &self,
        id: &ResearchId,
        files: Vec<UploadedFile>,
    ) -> ResearchResult<usize> {
        let count = match self.storage.load_captures(id, files).await? {
            None => return Err(not_found(id)),
            Some(0) => return Err(ResearchError::WrongFilesFormat),
            Some(count) => count,
        };

        self.storage.depersonalize(id).await?;
        self.storage.generate_preview(id).await?;
        Ok(count)
    }

    /// Path of capture `slot` (1-based).
    pub fn capture_path(&self, id: &ResearchId, slot: usize) -> ResearchResult<PathBuf> {
        self.storage
            .get_capture_path(id, slot)
            .ok_or_else(|| ResearchError::NotFound(format!("capture {slot} of research {id}")))
    }

    pub fn preview_path(&self, id: &ResearchId) -> ResearchResult<PathBuf> {
        self.storage
            .get_preview_path(id)
            .ok_or_else(|| not_found(id))
    }

    pub async fn captures_count(&self, id: &ResearchId) -> ResearchResult<usize> {
        self.storage
            .get_captures_count(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Path of the markup, for users with access to the research.
    pub async fn markup_path(&self, user: &str, id: &ResearchId) -> ResearchResult<PathBuf> {
        let path = self.storage.get_markup_path(id).ok_or_else(|| not_found(id))?;
        self.check_access(user, id).await?;
        Ok(path)
    }

    /// Replaces the markup, for users with access to the research.
    pub async fn upload_markup(
        &self,
        user: &str,
        id: &ResearchId,
        file: UploadedFile,
    ) -> ResearchResult<()> {
        if !self.storage.is_exists(id) {
            return Err(not_found(id));
        }
        self.check_access(user, id).await?;

        let _guard = self.locks.lock(id).await;
        match self.storage.load_markup(id, file).await? {
            None => Err(not_found(id)),
            Some(false) => Err(ResearchError::WrongFilesFormat),
            Some(true) => {
                tracing::info!(research_id = %id, user, "markup uploaded");
                Ok(())
            }
        }
    }

    /// Lets `marker` access the research. Only the owner may assign markers.
    pub async fn assign_marker(
        &self,
        requester: &str,
        id: &ResearchId,
        marker: &str,
    ) -> ResearchResult<()> {
        if !self.storage.is_exists(id) {
            return Err(not_found(id));
        }
        if self.access.owner(id).await.as_deref() != Some(requester) {
            return Err(ResearchError::AccessDenied);
        }

        self.access.grant(marker, id).await;
        tracing::info!(research_id = %id, marker, "marker assigned");
        Ok(())
    }

    /// Deletes the research and every grant on it.
    pub async fn remove_research(&self, id: &ResearchId) -> ResearchResult<()> {
        if !self.storage.is_exists(id) {
            return Err(not_found(id));
        }

        let _guard = self.locks.lock(id).await;
        self.storage.remove(id).await;
        self.access.forget(id).await;
        Ok(())
    }

    async fn check_access(&self, user: &str, id: &ResearchId) -> ResearchResult<()> {
        if self.access.can_access(user, id).await {
            Ok(())
        } else {
            tracing::debug!(research_id = %id, user, "access denied");
            Err(ResearchError::AccessDenied)
        }
    }
}

impl std::fmt::Debug for ResearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchService")
            .field("storage", &self.storage)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

/// Removes a research under construction unless disarmed.
///
/// Runs on the error path and when the creating future is dropped mid-way, so a cancelled
/// request never leaves undepersonalized captures behind.
struct Rollback<'a> {
    storage: &'a ResearchStorage,
    id: ResearchId,
    armed: bool,
}

impl<'a> Rollback<'a> {
    fn new(storage: &'a ResearchStorage, id: ResearchId) -> Self {
        Self {
            storage,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(research_id = %self.id, "research creation rolled back");
            self.storage.remove_blocking(&self.id);
        }
    }
}

fn not_found(id: &ResearchId) -> ResearchError {
    ResearchError::NotFound(format!("research {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::InMemoryResearchAccess;
    use ctmark_storage::{Depersonalizer, PreviewRenderer, StorageError, StorageResult};
    use std::path::Path;
    use tempfile::TempDir;

    /// Codec stand-in: scrubbing is a no-op, previews copy the capture bytes.
    struct PassThrough {
        fail_depersonalize: bool,
    }

    impl Depersonalizer for PassThrough {
        fn depersonalize(&self, capture: &Path) -> StorageResult<()> {
            if self.fail_depersonalize {
                return Err(StorageError::Codec {
                    path: capture.to_path_buf(),
                    message: "unreadable".into(),
                });
            }
            Ok(())
        }
    }

    impl PreviewRenderer for PassThrough {
        fn render_preview(&self, capture: &Path, target: &Path) -> StorageResult<()> {
            std::fs::copy(capture, target)?;
            Ok(())
        }
    }

    fn service_with(temp: &TempDir, fail_depersonalize: bool) -> ResearchService {
        let codec = Arc::new(PassThrough { fail_depersonalize });
        let storage = ResearchStorage::with_components(
            ResearchPaths::new(temp.path(), 16),
            Arc::new(CaptureIngestor::new(64)),
            codec.clone(),
            codec,
        );
        ResearchService::with_storage(Arc::new(storage), Arc::new(InMemoryResearchAccess::new()))
    }

    fn service(temp: &TempDir) -> ResearchService {
        service_with(temp, false)
    }

    fn captures(names: &[&str]) -> Vec<UploadedFile> {
        names
            .iter()
            .map(|name| {
                UploadedFile::from_bytes(name.to_string(), format!("body of {name}").into_bytes())
            })
            .collect()
    }

    fn research_dirs(temp: &TempDir) -> usize {
        std::fs::read_dir(temp.path())
            .unwrap()
            .flatten()
            .map(|shard| std::fs::read_dir(shard.path()).unwrap().count())
            .sum()
    }

    #[tokio::test]
    async fn test_create_research_ingests_and_previews() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let created = service
            .create_research("alice", captures(&["1.dcm", "2.dcm", "3.dcm", "4.dcm"]))
            .await
            .unwrap();

        assert_eq!(created.captures_count, 4);
        assert_eq!(service.captures_count(&created.research_id).await.unwrap(), 4);
        let preview = service.preview_path(&created.research_id).unwrap();
        assert_eq!(std::fs::read(preview).unwrap(), b"body of 2.dcm");
        assert!(service.markup_path("alice", &created.research_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_research_rolls_back_on_wrong_format() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let err = service
            .create_research("alice", captures(&["scan.png", "notes.txt"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::WrongFilesFormat));
        assert_eq!(research_dirs(&temp), 0);
        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn test_create_research_rolls_back_on_processing_failure() {
        let temp = TempDir::new().unwrap();
        let service = service_with(&temp, true);

        let err = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Storage(StorageError::Codec { .. })));
        assert_eq!(research_dirs(&temp), 0);
    }

    #[tokio::test]
    async fn test_cancelled_create_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        // The second upload never finishes: its writer stays open and silent.
        let (_writer, stalled) = tokio::io::duplex(64);
        let files = vec![
            UploadedFile::from_bytes("1.dcm", b"complete".to_vec()),
            UploadedFile::new("2.dcm", stalled),
        ];

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            service.create_research("alice", files),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(research_dirs(&temp), 0);
        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_outlive_operations() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let mut ids = Vec::new();
        for _ in 0..5 {
            let created = service.create_research("alice", captures(&["1.dcm"])).await.unwrap();
            ids.push(created.research_id);
        }
        assert!(service.locks.is_empty());

        service
            .load_captures(&ids[0], captures(&["a.dcm", "b.dcm"]))
            .await
            .unwrap();
        let markup = UploadedFile::from_bytes("markup.json", b"{}".to_vec());
        service.upload_markup("alice", &ids[1], markup).await.unwrap();

        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn test_create_research_requires_files() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let err = service.create_research("alice", Vec::new()).await.unwrap_err();

        assert!(matches!(err, ResearchError::InvalidInput(_)));
        assert!(!temp.path().read_dir().unwrap().any(|_| true));
    }

    #[tokio::test]
    async fn test_load_captures_keeps_research_on_wrong_format() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let created = service.create_research("alice", captures(&["1.dcm"])).await.unwrap();

        let err = service
            .load_captures(&created.research_id, captures(&["x.txt"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::WrongFilesFormat));
        assert!(service.storage().is_exists(&created.research_id));
    }

    #[tokio::test]
    async fn test_absent_research_is_not_found() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = ResearchId::new();

        assert!(matches!(service.capture_path(&id, 1), Err(ResearchError::NotFound(_))));
        assert!(matches!(service.preview_path(&id), Err(ResearchError::NotFound(_))));
        assert!(matches!(
            service.markup_path("alice", &id).await,
            Err(ResearchError::NotFound(_))
        ));
        assert!(matches!(
            service.load_captures(&id, captures(&["1.dcm"])).await,
            Err(ResearchError::NotFound(_))
        ));
        assert!(matches!(
            service.remove_research(&id).await,
            Err(ResearchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_path_out_of_range() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let created = service
            .create_research("alice", captures(&["1.dcm", "2.dcm"]))
            .await
            .unwrap();

        assert!(service.capture_path(&created.research_id, 2).is_ok());
        assert!(matches!(
            service.capture_path(&created.research_id, 3),
            Err(ResearchError::NotFound(msg)) if msg.contains("capture 3")
        ));
    }

    #[tokio::test]
    async fn test_markup_access_is_checked() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap()
            .research_id;
        let markup = || UploadedFile::from_bytes("markup.json", br#"{"nodules":[]}"#.to_vec());

        assert!(matches!(
            service.upload_markup("bob", &id, markup()).await,
            Err(ResearchError::AccessDenied)
        ));

        service.assign_marker("alice", &id, "bob").await.unwrap();
        service.upload_markup("bob", &id, markup()).await.unwrap();

        let path = service.markup_path("alice", &id).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), br#"{"nodules":[]}"#);
    }

    #[tokio::test]
    async fn test_upload_markup_rejects_wrong_format() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap()
            .research_id;

        let err = service
            .upload_markup("alice", &id, UploadedFile::from_bytes("m.yaml", b"a: 1".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::WrongFilesFormat));
    }

    #[tokio::test]
    async fn test_only_owner_assigns_markers() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap()
            .research_id;
        service.assign_marker("alice", &id, "bob").await.unwrap();

        let err = service.assign_marker("bob", &id, "mallory").await.unwrap_err();

        assert!(matches!(err, ResearchError::AccessDenied));
        assert!(matches!(
            service.markup_path("mallory", &id).await,
            Err(ResearchError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_remove_research_revokes_access() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap()
            .research_id;

        service.remove_research(&id).await.unwrap();

        assert!(!service.storage().is_exists(&id));
        assert!(service.locks.is_empty());
        // Recreating the tree under the same id must not resurrect old grants.
        service.storage().create_empty(Some(id.clone())).await.unwrap();
        assert!(matches!(
            service.markup_path("alice", &id).await,
            Err(ResearchError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_loads_into_one_research_are_serialised() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let id = service
            .create_research("alice", captures(&["1.dcm"]))
            .await
            .unwrap()
            .research_id;

        let (a, b) = tokio::join!(
            service.load_captures(&id, captures(&["a.dcm", "b.dcm"])),
            service.load_captures(&id, captures(&["c.dcm", "d.dcm", "e.dcm"]))
        );

        assert_eq!(a.unwrap(), 2);
        assert_eq!(b.unwrap(), 3);
        // Each load renumbers from slot 1; the later one wins whole slots, never a mix.
        let first = std::fs::read(service.capture_path(&id, 1).unwrap()).unwrap();
        assert!(first == b"body of a.dcm" || first == b"body of c.dcm");
    }
}
