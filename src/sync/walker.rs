//! Tree walking and concurrent hashing
//!
//! Enumerates a local directory, keeps the files accepted by a predicate and
//! hashes them on the blocking pool, at most `workers` at a time. Entries are
//! yielded as soon as their digest is ready, so the output order is hashing
//! completion order, not filesystem order.

use crate::error::{CairnError, CairnResult};
use crate::sync::digest::{hash_file, ContentDigest};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;
use walkdir::WalkDir;

/// Selects which files belong to a mount. Receives the full local path.
pub type FilePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Lazy, completion-ordered sequence of hashed files
pub type FileStream = BoxStream<'static, CairnResult<FileEntry>>;

/// Predicate accepting files whose extension is one of `extensions` (without the dot)
pub fn extension_predicate<S: AsRef<str>>(extensions: &[S]) -> FilePredicate {
    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| e.as_ref().trim_start_matches('.').to_string())
        .collect();
    Arc::new(move |path: &Path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    })
}

/// Predicate accepting every file
pub fn all_files() -> FilePredicate {
    Arc::new(|_: &Path| true)
}

/// A hashed local file and where it lands remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub digest: ContentDigest,
}

/// A file that passed the predicate but has not been hashed yet
#[derive(Debug, Clone)]
struct PendingFile {
    local_path: PathBuf,
    remote_path: String,
}

impl PendingFile {
    fn hash(self) -> CairnResult<FileEntry> {
        let digest = hash_file(&self.local_path)?;
        Ok(FileEntry {
            local_path: self.local_path,
            remote_path: self.remote_path,
            digest,
        })
    }
}

/// Join a remote root and a local relative path with forward slashes
pub fn remote_path(remote_root: &str, relative: &Path) -> String {
    let relative: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}/{}", remote_root.trim_end_matches('/'), relative.join("/"))
}

/// Walks one local tree and hashes the selected files
#[derive(Clone)]
pub struct TreeWalker {
    local_root: PathBuf,
    remote_root: String,
    predicate: FilePredicate,
    workers: usize,
}

impl TreeWalker {
    pub fn new(
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
        predicate: FilePredicate,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            predicate,
            workers: default_workers(),
        }
    }

    /// Set the number of concurrent hashing tasks (minimum 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enumerate the tree and start hashing.
    ///
    /// Enumeration errors surface here; hashing errors surface as stream
    /// items. Dropping the stream aborts any hashing that has not finished.
    pub async fn walk(&self) -> CairnResult<FileStream> {
        let files = self.enumerate().await?;
        debug!(
            "Computing checksums for {} files using {} workers",
            files.len(),
            self.workers
        );

        let pool = HashPool {
            pending: files.into_iter(),
            tasks: JoinSet::new(),
            workers: self.workers,
        };

        Ok(stream::unfold(pool, |mut pool| async move {
            pool.next_entry().await.map(|entry| (entry, pool))
        })
        .boxed())
    }

    async fn enumerate(&self) -> CairnResult<Vec<PendingFile>> {
        let walker = self.clone();
        tokio::task::spawn_blocking(move || walker.enumerate_blocking())
            .await
            .map_err(|e| CairnError::Internal(format!("enumeration task failed: {e}")))?
    }

    fn enumerate_blocking(&self) -> CairnResult<Vec<PendingFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.local_root).sort_by_file_name() {
            let entry = entry.map_err(|e| CairnError::Walk {
                root: self.local_root.clone(),
                message: e.to_string(),
            })?;

            // Symlinks to regular files count; symlinked directories are not descended
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file || !(self.predicate)(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.local_root)
                .unwrap_or(entry.path());
            files.push(PendingFile {
                local_path: entry.path().to_path_buf(),
                remote_path: remote_path(&self.remote_root, relative),
            });
        }

        Ok(files)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Bounded set of in-flight hashing tasks, owned by one walk
struct HashPool {
    pending: std::vec::IntoIter<PendingFile>,
    tasks: JoinSet<CairnResult<FileEntry>>,
    workers: usize,
}

impl HashPool {
    fn fill(&mut self) {
        while self.tasks.len() < self.workers {
            match self.pending.next() {
                Some(file) => {
                    self.tasks.spawn_blocking(move || file.hash());
                }
                None => break,
            }
        }
    }

    async fn next_entry(&mut self) -> Option<CairnResult<FileEntry>> {
        self.fill();
        let joined = self.tasks.join_next().await?;
        Some(match joined {
            Ok(result) => result,
            Err(e) => Err(CairnError::Internal(format!("hashing task failed: {e}"))),
        })
    }
}
