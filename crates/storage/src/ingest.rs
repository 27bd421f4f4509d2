//! Capture ingestion.
//!
//! Two strategies write uploaded captures into a research's `captures/` folder:
//!
//! - **List**: every uploaded file is a candidate capture.
//! - **Archive**: a single uploaded zip whose entries are candidate captures.
//!
//! Both skip candidates that are not capture files and number accepted captures `1..=N` in the
//! order they are encountered (upload order, or archive entry order). Nothing of the original
//! filename survives beyond that slot number.
//!
//! Archive entries are always extracted to `captures/<slot>.dcm`. The entry's internal path is
//! never used to build the target, so crafted names such as `../../evil.dcm` cannot escape the
//! captures folder.

use crate::constants::DEFAULT_UPLOAD_CHUNK_SIZE;
use crate::extensions::{is_archive_format, is_capture_format};
use crate::paths::capture_file_in;
use crate::{StorageResult, UploadedFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use zip::ZipArchive;

/// Writes uploaded captures into a captures folder.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Ingests `files` into `captures_dir` and returns the number of accepted captures.
    ///
    /// Zero accepted captures is not an error at this level.
    async fn ingest(&self, captures_dir: &Path, files: Vec<UploadedFile>) -> StorageResult<usize>;
}

/// How a set of uploaded files is ingested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStrategy {
    List,
    Archive,
}

impl IngestStrategy {
    /// `Archive` iff exactly one file was uploaded and it is an archive, `List` otherwise.
    pub fn select(files: &[UploadedFile]) -> Self {
        match files {
            [single] if is_archive_format(single.filename()) => Self::Archive,
            _ => Self::List,
        }
    }
}

/// Default [`Ingestor`]: selects a strategy per call with [`IngestStrategy::select`].
#[derive(Clone, Debug)]
pub struct CaptureIngestor {
    chunk_size: usize,
    spool_dir: Option<PathBuf>,
}

impl Default for CaptureIngestor {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_CHUNK_SIZE)
    }
}

impl CaptureIngestor {
    /// `chunk_size` bounds each read while an archive upload is spooled to disk.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            spool_dir: None,
        }
    }

    /// Spools archive uploads under `dir` instead of the system temporary directory.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn spool_dir(&self) -> Option<&Path> {
        self.spool_dir.as_deref()
    }
}

#[async_trait]
impl Ingestor for CaptureIngestor {
    async fn ingest(&self, captures_dir: &Path, files: Vec<UploadedFile>) -> StorageResult<usize> {
        let strategy = IngestStrategy::select(&files);
        tracing::debug!(?strategy, files = files.len(), "ingesting captures");

        match strategy {
            IngestStrategy::Archive => match files.into_iter().next() {
                Some(archive) => {
                    let spool = match &self.spool_dir {
                        Some(dir) => NamedTempFile::new_in(dir)?,
                        None => NamedTempFile::new()?,
                    };
                    ingest_archive(captures_dir, archive, spool, self.chunk_size).await
                }
                None => Ok(0),
            },
            IngestStrategy::List => ingest_list(captures_dir, files).await,
        }
    }
}

/// List strategy: stores each capture file in upload order.
pub async fn ingest_list(captures_dir: &Path, files: Vec<UploadedFile>) -> StorageResult<usize> {
    let mut count = 0;

    for mut file in files {
        if !is_capture_format(file.filename()) {
            tracing::debug!(filename = file.filename(), "skipping non-capture upload");
            continue;
        }

        count += 1;
        let content = file.read_all().await?;
        fs::write(capture_file_in(captures_dir, count), content).await?;
    }

    Ok(count)
}

/// Archive strategy: spools the upload into `spool`, then extracts capture entries.
///
/// The spool file is removed on every exit path. On success or error this happens explicitly
/// (a failed removal is logged and never replaces the ingestion result); if the future is
/// dropped mid-transfer, [`NamedTempFile`]'s destructor removes it.
pub async fn ingest_archive(
    captures_dir: &Path,
    mut archive: UploadedFile,
    spool: NamedTempFile,
    chunk_size: usize,
) -> StorageResult<usize> {
    let result = spool_and_extract(captures_dir, &mut archive, &spool, chunk_size).await;

    let spool_path = spool.path().to_path_buf();
    if let Err(e) = spool.close() {
        tracing::warn!(
            path = %spool_path.display(),
            error = %e,
            "failed to remove archive spool file"
        );
    }

    result
}

async fn spool_and_extract(
    captures_dir: &Path,
    archive: &mut UploadedFile,
    spool: &NamedTempFile,
    chunk_size: usize,
) -> StorageResult<usize> {
    let mut writer = fs::File::from_std(spool.reopen()?);
    let mut buffer = vec![0u8; chunk_size];
    let mut spooled = 0usize;
    loop {
        let read = archive.read_chunk(&mut buffer).await?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).await?;
        spooled += read;
    }
    writer.flush().await?;
    drop(writer);
    tracing::debug!(bytes = spooled, filename = archive.filename(), "archive spooled");

    let reader = spool.reopen()?;
    let mut container = tokio::task::spawn_blocking(move || ZipArchive::new(reader)).await??;
    let mut count = 0;

    // One blocking task per entry; a dropped future stops after the entry in flight.
    for index in 0..container.len() {
        let target = capture_file_in(captures_dir, count + 1);
        let (returned, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = extract_entry(&mut container, index, &target);
            (container, extracted)
        })
        .await?;
        container = returned;
        if extracted? {
            count += 1;
        }
    }

    Ok(count)
}

/// Writes entry `index` to `target` if it is a capture file. Returns whether it was written.
fn extract_entry(
    container: &mut ZipArchive<std::fs::File>,
    index: usize,
    target: &Path,
) -> StorageResult<bool> {
    let mut entry = container.by_index(index)?;
    if entry.is_dir() || !is_capture_format(entry.name()) {
        tracing::debug!(entry = entry.name(), "skipping non-capture archive entry");
        return Ok(false);
    }

    let mut out = std::fs::File::create(target)?;
    std::io::copy(&mut entry, &mut out)?;
    Ok(true)
}
