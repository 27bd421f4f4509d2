//! Path resolution for research trees.

use crate::constants::{CAPTURES_FOLDER_NAME, CAPTURE_EXTENSION, MARKUP_FILENAME, PREVIEW_FILENAME};
use ctmark_uuid::ResearchId;
use moka::sync::Cache;
use std::fmt;
use std::path::{Path, PathBuf};

/// Resolves research identifiers to their directories under one storage root.
///
/// Resolved research directories are memoised in a cache with a fixed maximum capacity. The
/// cache only ever holds values derivable from the identifier, so a stale entry cannot point at
/// a different research; [`ResearchPaths::invalidate`] is still called when a research is
/// removed so that removed researches do not occupy capacity.
pub struct ResearchPaths {
    root: PathBuf,
    cache: Cache<ResearchId, PathBuf>,
}

impl ResearchPaths {
    /// Creates a resolver rooted at `root` memoising at most `capacity` research directories.
    pub fn new(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            root: root.into(),
            cache: Cache::new(capacity),
        }
    }

    /// The storage root all researches live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<shard>/<id>`
    pub fn research_dir(&self, id: &ResearchId) -> PathBuf {
        self.cache.get_with(id.clone(), || id.sharded_dir(&self.root))
    }

    /// `<root>/<shard>/<id>/captures`
    pub fn captures_dir(&self, id: &ResearchId) -> PathBuf {
        self.research_dir(id).join(CAPTURES_FOLDER_NAME)
    }

    /// `<root>/<shard>/<id>/captures/<slot>.dcm`
    pub fn capture_file(&self, id: &ResearchId, slot: usize) -> PathBuf {
        capture_file_in(&self.captures_dir(id), slot)
    }

    /// `<root>/<shard>/<id>/markup.json`
    pub fn markup_file(&self, id: &ResearchId) -> PathBuf {
        self.research_dir(id).join(MARKUP_FILENAME)
    }

    /// `<root>/<shard>/<id>/preview.jpg`
    pub fn preview_file(&self, id: &ResearchId) -> PathBuf {
        self.research_dir(id).join(PREVIEW_FILENAME)
    }

    /// Drops the memoised directory of `id`.
    pub fn invalidate(&self, id: &ResearchId) {
        self.cache.invalidate(id);
    }

    /// Returns true if the directory of `id` is currently memoised.
    pub fn is_cached(&self, id: &ResearchId) -> bool {
        self.cache.contains_key(id)
    }
}

impl fmt::Debug for ResearchPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchPaths")
            .field("root", &self.root)
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

/// `<captures_dir>/<slot>.dcm`
pub(crate) fn capture_file_in(captures_dir: &Path, slot: usize) -> PathBuf {
    captures_dir.join(format!("{}.{}", slot, CAPTURE_EXTENSION))
}
