//! Mount synchronization
//!
//! A mount is a predicate-selected subset of a local directory that is
//! mirrored into the remote content store under a remote root. Syncing is two
//! strictly ordered phases:
//!
//! 1. Registration: every `(path, digest)` is streamed to the remote, which
//!    answers each one, in request order, with whether it already holds that
//!    content.
//! 2. Upload: only the files reported missing are read again and streamed.
//!
//! The mount is then marked done and its id cached on the instance.

use crate::build::realize::RealizeCell;
use crate::error::{CairnError, CairnResult};
use crate::remote::{MountCreateRequest, RegisterFileRequest, Remote, UploadFileRequest};
use crate::sync::digest::ContentDigest;
use crate::sync::walker::{extension_predicate, FileEntry, FilePredicate, TreeWalker};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What the last synchronization saw, populated during realization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountIndex {
    pub remote_to_local: BTreeMap<String, PathBuf>,
    pub digests: BTreeMap<PathBuf, ContentDigest>,
    pub stats: SyncStats,
}

impl MountIndex {
    fn insert(&mut self, entry: &FileEntry) {
        self.remote_to_local
            .insert(entry.remote_path.clone(), entry.local_path.clone());
        self.digests
            .insert(entry.local_path.clone(), entry.digest.clone());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Files registered with the remote
    pub files: usize,
    /// Files whose content had to be uploaded
    pub uploaded: usize,
    /// Bytes uploaded
    pub bytes: u64,
}

/// A local directory subset synchronized into the remote store
pub struct Mount {
    local_root: PathBuf,
    remote_root: String,
    predicate: FilePredicate,
    workers: Option<usize>,
    index: Mutex<MountIndex>,
    cell: RealizeCell,
}

impl Mount {
    pub fn new(
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
        predicate: FilePredicate,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            predicate,
            workers: None,
            index: Mutex::new(MountIndex::default()),
            cell: RealizeCell::new(),
        }
    }

    /// All Python files in the current directory, mounted into `/root`
    pub fn python_workdir() -> Self {
        Self::new(".", "/root", extension_predicate(&["py"]))
    }

    /// Limit concurrent hashing (defaults to available parallelism)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Concurrent hashing tasks, if limited
    pub fn workers(&self) -> Option<usize> {
        self.workers
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// The remote mount id, once realized
    pub fn mount_id(&self) -> Option<String> {
        self.cell.id()
    }

    /// Snapshot of the files and digests seen by the last synchronization
    pub fn index(&self) -> MountIndex {
        match self.index.lock() {
            Ok(index) => index.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Synchronize the mount and return its remote id.
    ///
    /// After the first success this returns the cached id without touching
    /// the filesystem or the remote.
    pub async fn realize(&self, remote: &dyn Remote) -> CairnResult<String> {
        self.cell.get_or_realize(|| self.synchronize(remote)).await
    }

    async fn synchronize(&self, remote: &dyn Remote) -> CairnResult<String> {
        let started = Instant::now();
        let mount_id = remote
            .mount_create(MountCreateRequest {
                client_id: remote.client_id().to_string(),
            })
            .await?;
        debug!("Uploading mount {}", mount_id);

        let (mut index, missing) = self.register_files(remote, &mount_id).await?;
        let (uploaded, bytes) = self.upload_files(remote, &mount_id, missing).await?;

        remote.mount_done(&mount_id).await?;

        index.stats = SyncStats {
            files: index.remote_to_local.len(),
            uploaded,
            bytes,
        };
        info!(
            "Uploaded {}/{} files and {} bytes in {:.2}s",
            uploaded,
            index.stats.files,
            bytes,
            started.elapsed().as_secs_f64()
        );

        match self.index.lock() {
            Ok(mut slot) => *slot = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }

        Ok(mount_id)
    }

    /// Registration phase.
    ///
    /// Hashes arrive in completion order and are registered in that order.
    /// `in_flight` remembers the send order so each response is matched to
    /// the request at the same position; a response for any other path is a
    /// contract violation. Returns the entries the remote does not have.
    async fn register_files(
        &self,
        remote: &dyn Remote,
        mount_id: &str,
    ) -> CairnResult<(MountIndex, Vec<FileEntry>)> {
        let mut walker = TreeWalker::new(&self.local_root, &self.remote_root, self.predicate.clone());
        if let Some(workers) = self.workers {
            walker = walker.with_workers(workers);
        }
        let mut files = walker.walk().await?;

        let (tx, rx) = mpsc::unbounded_channel::<RegisterFileRequest>();
        let requests = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|request| (request, rx))
        })
        .boxed();
        let mut responses = remote.mount_register_files(requests).await?;

        // Dropping the sender ends the request stream
        let mut sender = Some(tx);
        let mut in_flight: VecDeque<FileEntry> = VecDeque::new();
        let mut index = MountIndex::default();
        let mut missing = Vec::new();

        loop {
            tokio::select! {
                entry = files.next(), if sender.is_some() => {
                    let Some(entry) = entry else {
                        sender = None;
                        continue;
                    };
                    let entry = entry?;
                    let request = RegisterFileRequest {
                        path: entry.remote_path.clone(),
                        sha256_hex: entry.digest.to_string(),
                        mount_id: mount_id.to_string(),
                    };
                    index.insert(&entry);
                    in_flight.push_back(entry);
                    if let Some(tx) = &sender {
                        tx.send(request).map_err(|_| {
                            CairnError::transport("MountRegisterFile", "request stream closed by remote")
                        })?;
                    }
                }
                response = responses.next() => {
                    let Some(response) = response else {
                        break;
                    };
                    let response = response?;
                    let entry = in_flight.pop_front().ok_or_else(|| {
                        CairnError::RegistrationUnexpected { path: response.path.clone() }
                    })?;
                    if entry.remote_path != response.path {
                        return Err(CairnError::RegistrationMismatch {
                            expected: entry.remote_path,
                            received: response.path,
                        });
                    }
                    if !response.exists {
                        missing.push(entry);
                    }
                }
            }
        }

        if sender.is_some() {
            return Err(CairnError::transport(
                "MountRegisterFile",
                "response stream ended before all files were registered",
            ));
        }
        if !in_flight.is_empty() {
            return Err(CairnError::RegistrationIncomplete {
                pending: in_flight.len(),
            });
        }

        Ok((index, missing))
    }

    /// Upload phase: stream the bytes of every missing file.
    ///
    /// Files are re-read here rather than kept from hashing. Returns the
    /// number of files and bytes sent.
    async fn upload_files(
        &self,
        remote: &dyn Remote,
        mount_id: &str,
        missing: Vec<FileEntry>,
    ) -> CairnResult<(usize, u64)> {
        if missing.is_empty() {
            return Ok((0, 0));
        }

        let count = missing.len();
        let bytes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&bytes);
        let mount_id = mount_id.to_string();

        let uploads = stream::iter(missing)
            .then(move |entry| {
                let mount_id = mount_id.clone();
                let counter = Arc::clone(&counter);
                async move {
                    let data = tokio::fs::read(&entry.local_path).await.map_err(|e| {
                        CairnError::io(
                            format!("reading {} for upload", entry.local_path.display()),
                            e,
                        )
                    })?;
                    debug!(
                        "Uploading file {} to {} ({} bytes, {})",
                        entry.local_path.display(),
                        entry.remote_path,
                        data.len(),
                        entry.digest.short()
                    );
                    counter.fetch_add(data.len() as u64, Ordering::Relaxed);
                    Ok::<_, CairnError>(UploadFileRequest {
                        size: data.len() as u64,
                        sha256_hex: entry.digest.to_string(),
                        data,
                        mount_id,
                    })
                }
            })
            .boxed();

        remote.mount_upload_files(uploads).await?;
        Ok((count, bytes.load(Ordering::Relaxed)))
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("local_root", &self.local_root)
            .field("remote_root", &self.remote_root)
            .field("mount_id", &self.mount_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{Call, MockRemote, ResponseOrder};
    use crate::sync::digest::hash_bytes;
    use crate::sync::walker::all_files;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn project(files: &[(&str, &[u8])]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = temp.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        temp
    }

    #[tokio::test]
    async fn uploads_only_missing_files() {
        let temp = project(&[
            ("app.py", b"print('app')"),
            ("lib/util.py", b"def f(): pass"),
            ("lib/skip.txt", b"not python"),
        ]);
        let present = hash_bytes(b"print('app')");
        let remote = MockRemote::new().with_existing([present.to_string()]);
        let mount = Mount::new(temp.path(), "/root", extension_predicate(&["py"]));

        let mount_id = mount.realize(&remote).await.unwrap();

        let uploads = remote.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, hash_bytes(b"def f(): pass").to_string());
        assert_eq!(uploads[0].1, 13);

        let index = mount.index();
        assert_eq!(index.stats.files, 2);
        assert_eq!(index.stats.uploaded, 1);
        assert_eq!(index.stats.bytes, 13);
        assert_eq!(
            index.remote_to_local.get("/root/lib/util.py"),
            Some(&temp.path().join("lib").join("util.py"))
        );
        assert_eq!(remote.calls().last(), Some(&Call::MountDone(mount_id)));
    }

    #[tokio::test]
    async fn upload_digests_match_registered_digests() {
        let temp = project(&[("a.py", b"a"), ("b.py", b"bb"), ("c.py", b"ccc")]);
        let remote = MockRemote::new();
        let mount = Mount::new(temp.path(), "/root", all_files());

        mount.realize(&remote).await.unwrap();

        let registered: HashSet<String> = remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RegisterFile { sha256_hex, .. } => Some(sha256_hex),
                _ => None,
            })
            .collect();
        let uploaded: HashSet<String> = remote.uploads().into_iter().map(|(d, _)| d).collect();

        assert_eq!(registered.len(), 3);
        assert_eq!(uploaded, registered);
        assert_eq!(remote.uploads().len(), 3);
    }

    #[tokio::test]
    async fn nothing_uploaded_when_everything_exists() {
        let temp = project(&[("a.py", b"a"), ("b.py", b"b")]);
        let remote = MockRemote::new().with_existing([
            hash_bytes(b"a").to_string(),
            hash_bytes(b"b").to_string(),
        ]);
        let mount = Mount::new(temp.path(), "/root", all_files());

        mount.realize(&remote).await.unwrap();

        assert!(remote.uploads().is_empty());
        assert_eq!(remote.count(|c| matches!(c, Call::RegisterFile { .. })), 2);
        assert_eq!(remote.count(|c| matches!(c, Call::MountDone(_))), 1);
    }

    #[tokio::test]
    async fn second_realize_is_a_no_op() {
        let temp = project(&[("a.py", b"a"), ("b.py", b"b")]);
        let remote = MockRemote::new();
        let mount = Mount::new(temp.path(), "/root", all_files());

        let first = mount.realize(&remote).await.unwrap();
        let calls_after_first = remote.calls().len();

        // Changing the tree must not matter: the cached id wins
        std::fs::write(temp.path().join("c.py"), b"c").unwrap();
        let second = mount.realize(&remote).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.calls().len(), calls_after_first);
        assert_eq!(mount.mount_id(), Some(first));
    }

    #[tokio::test]
    async fn concurrent_realize_creates_one_mount() {
        let temp = project(&[("a.py", b"a")]);
        let remote = MockRemote::new();
        let mount = Mount::new(temp.path(), "/root", all_files());

        let (a, b) = tokio::join!(mount.realize(&remote), mount.realize(&remote));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(remote.count(|c| matches!(c, Call::MountCreate)), 1);
    }

    #[tokio::test]
    async fn completion_order_registration_stays_positional() {
        // The first file in enumeration order is large, so the small ones hash first
        let big = vec![7u8; 16 * 1024 * 1024];
        let mut files: Vec<(String, Vec<u8>)> = vec![("a0.bin".to_string(), big.clone())];
        for i in 0..12 {
            files.push((format!("b{i:02}.py"), format!("small {i}").into_bytes()));
        }
        let refs: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_slice()))
            .collect();
        let temp = project(&refs);

        // Even-numbered small files already exist remotely
        let existing: HashSet<String> = (0..12)
            .filter(|i| i % 2 == 0)
            .map(|i| hash_bytes(format!("small {i}").as_bytes()).to_string())
            .collect();
        let remote = MockRemote::new().with_existing(existing.iter().cloned());
        let mount = Mount::new(temp.path(), "/srv", all_files()).with_workers(4);

        mount.realize(&remote).await.unwrap();

        let registered: Vec<(String, String)> = remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RegisterFile { path, sha256_hex } => Some((path, sha256_hex)),
                _ => None,
            })
            .collect();
        let mut enumerated: Vec<String> = files.iter().map(|(p, _)| format!("/srv/{p}")).collect();
        enumerated.sort();

        let registered_paths: Vec<String> = registered.iter().map(|(p, _)| p.clone()).collect();
        assert_ne!(registered_paths, enumerated, "hashing should finish out of order");
        let mut sorted = registered_paths.clone();
        sorted.sort();
        assert_eq!(sorted, enumerated);

        // Each response answered the request at its position
        let expected_uploads: Vec<String> = registered
            .iter()
            .filter(|(_, sha)| !existing.contains(sha))
            .map(|(_, sha)| sha.clone())
            .collect();
        let uploaded: Vec<String> = remote.uploads().into_iter().map(|(sha, _)| sha).collect();
        assert_eq!(uploaded, expected_uploads);
        assert_eq!(uploaded.len(), 7);
        assert!(uploaded.contains(&hash_bytes(&big).to_string()));

        let index = mount.index();
        for (path, sha) in &registered {
            let local = &index.remote_to_local[path];
            assert_eq!(index.digests[local].as_str(), sha);
        }
    }

    #[tokio::test]
    async fn out_of_order_responses_are_rejected() {
        let temp = project(&[("a.py", b"a"), ("b.py", b"b"), ("c.py", b"c")]);
        let remote = MockRemote::new().with_response_order(ResponseOrder::Reversed);
        let mount = Mount::new(temp.path(), "/root", all_files());

        let err = mount.realize(&remote).await.unwrap_err();

        assert!(matches!(err, CairnError::RegistrationMismatch { .. }));
        assert!(remote.uploads().is_empty());
        assert_eq!(remote.count(|c| matches!(c, Call::MountDone(_))), 0);
        assert!(mount.mount_id().is_none());
    }

    #[tokio::test]
    async fn missing_responses_are_rejected() {
        let temp = project(&[("a.py", b"a"), ("b.py", b"b")]);
        let remote = MockRemote::new().with_response_order(ResponseOrder::DropLast);
        let mount = Mount::new(temp.path(), "/root", all_files());

        let err = mount.realize(&remote).await.unwrap_err();

        assert!(matches!(err, CairnError::RegistrationIncomplete { pending: 1 }));
        assert_eq!(remote.count(|c| matches!(c, Call::MountDone(_))), 0);
    }

    #[tokio::test]
    async fn failed_sync_can_be_retried() {
        let temp = project(&[("a.py", b"a")]);
        let mount = Mount::new(temp.path(), "/root", all_files());

        let broken = MockRemote::new().with_response_order(ResponseOrder::DropLast);
        assert!(mount.realize(&broken).await.is_err());

        let remote = MockRemote::new();
        let mount_id = mount.realize(&remote).await.unwrap();
        assert_eq!(mount.mount_id(), Some(mount_id));
        assert_eq!(remote.uploads().len(), 1);
    }

    #[tokio::test]
    async fn missing_root_aborts_before_registration() {
        let temp = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let mount = Mount::new(temp.path().join("absent"), "/root", all_files());

        let err = mount.realize(&remote).await.unwrap_err();

        assert!(matches!(err, CairnError::Walk { .. }));
        assert_eq!(remote.count(|c| matches!(c, Call::RegisterFile { .. })), 0);
        assert_eq!(remote.count(|c| matches!(c, Call::MountDone(_))), 0);
    }

    #[tokio::test]
    async fn empty_mount_still_completes() {
        let temp = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let mount = Mount::new(temp.path(), "/root", all_files());

        let mount_id = mount.realize(&remote).await.unwrap();

        assert_eq!(
            remote.calls(),
            vec![Call::MountCreate, Call::MountDone(mount_id)]
        );
        assert_eq!(mount.index().stats, SyncStats::default());
    }
}
