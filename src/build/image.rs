//! Images: one root layer plus mounts, and the join protocol
//!
//! Joining polls the remote until the image build reaches a terminal state.
//! Each poll asks the remote to block up to `blocking_timeout`, so the client
//! loops without sleeping between polls.

use crate::build::layer::LayerNode;
use crate::build::realize::{RealizeCell, RealizeState};
use crate::build::retry::{call_with_retry, JoinPolicy};
use crate::error::{CairnError, CairnResult};
use crate::remote::{status, GenericResult, ImageCreateRequest, ImageDefinition, ImageJoinRequest, Remote};
use crate::sync::mount::Mount;
use futures_util::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one join poll
#[derive(Debug, Clone, PartialEq)]
pub enum BuildResult {
    /// Still building
    Pending,
    Success(serde_json::Value),
    /// Carries the remote diagnostic
    Failure(String),
    /// Status code outside the protocol
    Unknown(i32),
}

impl From<GenericResult> for BuildResult {
    fn from(result: GenericResult) -> Self {
        match result.status {
            status::UNSPECIFIED => Self::Pending,
            status::SUCCESS => Self::Success(result.payload.unwrap_or(serde_json::Value::Null)),
            status::FAILURE => Self::Failure(result.exception),
            other => Self::Unknown(other),
        }
    }
}

/// A root layer and the mounts attached to it
#[derive(Debug)]
pub struct Image {
    layer: Arc<LayerNode>,
    mounts: Vec<Arc<Mount>>,
    cell: RealizeCell,
}

impl Image {
    pub fn new(layer: Arc<LayerNode>, mounts: Vec<Arc<Mount>>) -> Self {
        Self {
            layer,
            mounts,
            cell: RealizeCell::new(),
        }
    }

    pub fn layer(&self) -> &Arc<LayerNode> {
        &self.layer
    }

    pub fn mounts(&self) -> &[Arc<Mount>] {
        &self.mounts
    }

    /// The remote image id, once realized
    pub fn image_id(&self) -> Option<String> {
        self.cell.id()
    }

    pub fn state(&self) -> RealizeState {
        self.cell.state()
    }

    /// Realize the layer graph and every mount, then create the image.
    ///
    /// Mounts are synchronized concurrently; the mount ids keep the order
    /// the mounts were attached in.
    pub async fn realize(&self, remote: &dyn Remote) -> CairnResult<String> {
        self.cell
            .get_or_realize(|| async {
                let layer_id = self.layer.realize(remote).await?;
                let mount_ids =
                    try_join_all(self.mounts.iter().map(|mount| mount.realize(remote))).await?;

                let image_id = remote
                    .image_create(ImageCreateRequest {
                        client_id: remote.client_id().to_string(),
                        image: ImageDefinition {
                            layer_id,
                            mount_ids,
                        },
                    })
                    .await?;
                debug!("Created image {}", image_id);
                Ok(image_id)
            })
            .await
    }

    /// Wait for the remote build of this image to finish.
    ///
    /// Returns the success payload. A failed build surfaces as
    /// `CairnError::BuildFailed` with the remote diagnostic, an unknown status
    /// as `CairnError::UnexpectedStatus`; neither is retried.
    pub async fn join(&self, remote: &dyn Remote, policy: &JoinPolicy) -> CairnResult<serde_json::Value> {
        let image_id = self.image_id().ok_or(CairnError::NotRealized)?;
        let request = ImageJoinRequest {
            image_id: image_id.clone(),
            timeout_secs: policy.blocking_timeout.as_secs_f64(),
        };

        loop {
            debug!("Waiting for image {}", image_id);
            let response = call_with_retry("ImageJoin", &policy.retry, policy.request_timeout, || {
                remote.image_join(request.clone())
            })
            .await?;

            match BuildResult::from(response.result) {
                BuildResult::Pending => continue,
                BuildResult::Success(payload) => return Ok(payload),
                BuildResult::Failure(diagnostic) => return Err(CairnError::BuildFailed(diagnostic)),
                BuildResult::Unknown(code) => return Err(CairnError::UnexpectedStatus(code)),
            }
        }
    }
}
