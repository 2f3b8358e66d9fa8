//! Loopback remote backed by the local filesystem
//!
//! Layout under the store root:
//! - `blobs/<sha256>`: uploaded file contents
//! - `mounts/<id>.json`, `layers/<id>.json`, `images/<id>.json`: records
//!
//! There is no builder behind it. Joining an image resolves its layer chain
//! and reports it as a successful build.

use crate::error::{CairnError, CairnResult};
use crate::remote::*;
use crate::sync::digest::{hash_bytes, is_sha256_hex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// A file registered with a mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFile {
    pub path: String,
    pub sha256_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecord {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files: Vec<MountFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub layer: LayerDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub image: ImageDefinition,
}

type PendingFiles = Arc<Mutex<HashMap<String, Vec<MountFile>>>>;

/// Filesystem store implementing the remote contract
pub struct LocalRemote {
    root: PathBuf,
    client_id: String,
    /// Files registered per mount, written out by `mount_done`
    pending: PendingFiles,
}

impl LocalRemote {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>, client_id: impl Into<String>) -> CairnResult<Self> {
        let root = root.into();
        for dir in ["blobs", "mounts", "layers", "images"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| CairnError::io(format!("creating {}", path.display()), e))?;
        }

        Ok(Self {
            root,
            client_id: client_id.into(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn blob_path(root: &Path, sha256_hex: &str) -> PathBuf {
        root.join("blobs").join(sha256_hex)
    }

    fn record_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join(kind).join(format!("{id}.json"))
    }

    /// Load a mount record
    pub async fn mount(&self, mount_id: &str) -> CairnResult<Option<MountRecord>> {
        read_json(&self.record_path("mounts", mount_id)).await
    }

    /// Load a layer record
    pub async fn layer(&self, layer_id: &str) -> CairnResult<Option<LayerRecord>> {
        read_json(&self.record_path("layers", layer_id)).await
    }

    /// Load an image record
    pub async fn image(&self, image_id: &str) -> CairnResult<Option<ImageRecord>> {
        read_json(&self.record_path("images", image_id)).await
    }

    /// Whether the store holds content with this digest
    pub async fn has_blob(&self, sha256_hex: &str) -> bool {
        is_sha256_hex(sha256_hex) && blob_exists(&self.root, sha256_hex).await
    }

    /// Resolve a layer and all of its bases, bases before dependents.
    ///
    /// Each layer appears once even when several dependents share it.
    async fn flatten(&self, layer_id: &str) -> CairnResult<Vec<LayerRecord>> {
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, bool)> = vec![(layer_id.to_string(), false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                if let Some(record) = self.layer(&id).await? {
                    ordered.push(record);
                }
                continue;
            }
            if !visited.insert(id.clone()) {
                continue;
            }

            let record = self.layer(&id).await?.ok_or_else(|| {
                CairnError::transport("ImageJoin", format!("layer {id} not found"))
            })?;
            stack.push((id, true));
            for base in record.layer.base_layers.iter().rev() {
                if !visited.contains(&base.layer_id) {
                    stack.push((base.layer_id.clone(), false));
                }
            }
        }

        Ok(ordered)
    }

    async fn build_payload(&self, image: &ImageRecord) -> CairnResult<serde_json::Value> {
        let layers = self.flatten(&image.image.layer_id).await?;
        let commands: Vec<&str> = layers
            .iter()
            .flat_map(|l| l.layer.commands.iter().map(String::as_str))
            .collect();
        let tags: Vec<&str> = layers.iter().filter_map(|l| l.layer.tag.as_deref()).collect();

        let mut files = 0;
        for mount_id in &image.image.mount_ids {
            if let Some(mount) = self.mount(mount_id).await? {
                files += mount.files.len();
            }
        }

        Ok(serde_json::json!({
            "image_id": image.id,
            "layers": layers.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(),
            "tags": tags,
            "commands": commands,
            "mounts": image.image.mount_ids,
            "files": files,
        }))
    }
}

async fn blob_exists(root: &Path, sha256_hex: &str) -> bool {
    fs::try_exists(LocalRemote::blob_path(root, sha256_hex))
        .await
        .unwrap_or(false)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> CairnResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| CairnError::io(format!("reading {}", path.display()), e))?;
    Ok(Some(serde_json::from_str(&content)?))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> CairnResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| CairnError::io(format!("writing {}", path.display()), e))
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Check an upload against its declared digest and size
fn verify_upload(upload: &UploadFileRequest) -> Result<(), String> {
    if !is_sha256_hex(&upload.sha256_hex) {
        return Err(format!("invalid digest {:?}", upload.sha256_hex));
    }
    if upload.data.len() as u64 != upload.size {
        return Err(format!(
            "size mismatch for {}: declared {}, received {}",
            upload.sha256_hex,
            upload.size,
            upload.data.len()
        ));
    }
    let actual = hash_bytes(&upload.data);
    if actual.as_str() != upload.sha256_hex {
        return Err(format!(
            "digest mismatch: declared {}, content hashes to {}",
            upload.sha256_hex, actual
        ));
    }
    Ok(())
}

#[async_trait]
impl Remote for LocalRemote {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn mount_create(&self, request: MountCreateRequest) -> CairnResult<String> {
        let record = MountRecord {
            id: new_id("mo"),
            client_id: request.client_id,
            created_at: Utc::now(),
            completed_at: None,
            files: vec![],
        };
        write_json(&self.record_path("mounts", &record.id), &record).await?;
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(record.id.clone(), Vec::new());
        }
        debug!("Created mount {}", record.id);
        Ok(record.id)
    }

    async fn mount_register_files(
        &self,
        requests: BoxStream<'static, RegisterFileRequest>,
    ) -> CairnResult<RegisterResponseStream> {
        let root = self.root.clone();
        let pending = Arc::clone(&self.pending);

        Ok(requests
            .then(move |request| {
                let root = root.clone();
                let pending = Arc::clone(&pending);
                async move {
                    if !is_sha256_hex(&request.sha256_hex) {
                        return Err(CairnError::transport(
                            "MountRegisterFile",
                            format!("invalid digest for {}", request.path),
                        ));
                    }
                    let exists = blob_exists(&root, &request.sha256_hex).await;

                    let mut pending = pending
                        .lock()
                        .map_err(|_| CairnError::Internal("mount registry poisoned".to_string()))?;
                    let files = pending.get_mut(&request.mount_id).ok_or_else(|| {
                        CairnError::transport(
                            "MountRegisterFile",
                            format!("unknown mount {}", request.mount_id),
                        )
                    })?;
                    files.push(MountFile {
                        path: request.path.clone(),
                        sha256_hex: request.sha256_hex,
                    });

                    Ok(RegisterFileResponse {
                        path: request.path,
                        exists,
                    })
                }
            })
            .boxed())
    }

    async fn mount_upload_files(
        &self,
        mut uploads: BoxStream<'static, CairnResult<UploadFileRequest>>,
    ) -> CairnResult<()> {
        while let Some(upload) = uploads.next().await {
            let upload = upload?;
            verify_upload(&upload)
                .map_err(|reason| CairnError::transport("MountUploadFile", reason))?;

            let path = Self::blob_path(&self.root, &upload.sha256_hex);
            if path.exists() {
                continue;
            }

            // Write under a unique name, then rename into place
            let partial = self
                .root
                .join("blobs")
                .join(format!(".{}.{}", upload.sha256_hex, Uuid::new_v4().simple()));
            fs::write(&partial, &upload.data)
                .await
                .map_err(|e| CairnError::io(format!("writing {}", partial.display()), e))?;
            fs::rename(&partial, &path)
                .await
                .map_err(|e| CairnError::io(format!("storing blob {}", upload.sha256_hex), e))?;
            debug!("Stored blob {} ({} bytes)", upload.sha256_hex, upload.size);
        }
        Ok(())
    }

    async fn mount_done(&self, mount_id: &str) -> CairnResult<()> {
        let mut record = self
            .mount(mount_id)
            .await?
            .ok_or_else(|| CairnError::transport("MountDone", format!("unknown mount {mount_id}")))?;

        let files = match self.pending.lock() {
            Ok(mut pending) => pending.remove(mount_id).unwrap_or_default(),
            Err(_) => return Err(CairnError::Internal("mount registry poisoned".to_string())),
        };

        record.files = files;
        record.completed_at = Some(Utc::now());
        write_json(&self.record_path("mounts", mount_id), &record).await?;
        info!("Mount {} complete with {} files", mount_id, record.files.len());
        Ok(())
    }

    async fn layer_create(&self, request: LayerCreateRequest) -> CairnResult<String> {
        for base in &request.layer.base_layers {
            if self.layer(&base.layer_id).await?.is_none() {
                return Err(CairnError::transport(
                    "LayerCreate",
                    format!("base layer {} ({}) not found", base.name, base.layer_id),
                ));
            }
        }

        let record = LayerRecord {
            id: new_id("ly"),
            client_id: request.client_id,
            created_at: Utc::now(),
            layer: request.layer,
        };
        write_json(&self.record_path("layers", &record.id), &record).await?;
        debug!(
            "Created layer {} ({} commands)",
            record.id,
            record.layer.commands.len()
        );
        Ok(record.id)
    }

    async fn image_create(&self, request: ImageCreateRequest) -> CairnResult<String> {
        if self.layer(&request.image.layer_id).await?.is_none() {
            return Err(CairnError::transport(
                "ImageCreate",
                format!("layer {} not found", request.image.layer_id),
            ));
        }
        for mount_id in &request.image.mount_ids {
            let complete = self
                .mount(mount_id)
                .await?
                .is_some_and(|m| m.completed_at.is_some());
            if !complete {
                return Err(CairnError::transport(
                    "ImageCreate",
                    format!("mount {mount_id} is not complete"),
                ));
            }
        }

        let record = ImageRecord {
            id: new_id("im"),
            client_id: request.client_id,
            created_at: Utc::now(),
            image: request.image,
        };
        write_json(&self.record_path("images", &record.id), &record).await?;
        debug!("Created image {}", record.id);
        Ok(record.id)
    }

    async fn image_join(&self, request: ImageJoinRequest) -> CairnResult<ImageJoinResponse> {
        let Some(image) = self.image(&request.image_id).await? else {
            return Ok(ImageJoinResponse {
                result: GenericResult {
                    status: status::FAILURE,
                    exception: format!("image {} not found", request.image_id),
                    payload: None,
                },
            });
        };

        let payload = self.build_payload(&image).await?;
        Ok(ImageJoinResponse {
            result: GenericResult {
                status: status::SUCCESS,
                exception: String::new(),
                payload: Some(payload),
            },
        })
    }
}
