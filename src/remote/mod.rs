//! Remote service contract
//!
//! The remote side stores content, builds layers and runs images. cairn only
//! drives it through the typed calls below; the transport behind them is up to
//! the implementation:
//! - `local`: a loopback store on the local filesystem

mod factory;
mod local;
#[cfg(test)]
pub(crate) mod mock;

pub use factory::create_remote;
pub use local::LocalRemote;

use crate::error::CairnResult;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Status codes carried by [`GenericResult`]
pub mod status {
    /// No terminal status yet; the build is still running
    pub const UNSPECIFIED: i32 = 0;
    pub const SUCCESS: i32 = 1;
    pub const FAILURE: i32 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountCreateRequest {
    pub client_id: String,
}

/// One file announced to the remote store during mount registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFileRequest {
    /// Path on the remote side (remote root joined with the relative path)
    pub path: String,
    pub sha256_hex: String,
    pub mount_id: String,
}

/// Answer to a [`RegisterFileRequest`], sent back in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFileResponse {
    pub path: String,
    /// Whether the remote store already holds content with this digest
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFileRequest {
    pub data: Vec<u8>,
    pub sha256_hex: String,
    pub size: u64,
    pub mount_id: String,
}

/// A named base layer reference inside a layer definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLayerRef {
    pub name: String,
    pub layer_id: String,
}

/// An inline file made available to build commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub tag: Option<String>,
    pub base_layers: Vec<BaseLayerRef>,
    /// Build steps, executed remotely in this order
    pub commands: Vec<String>,
    pub context_files: Vec<ContextFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCreateRequest {
    pub client_id: String,
    pub layer: LayerDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub layer_id: String,
    pub mount_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCreateRequest {
    pub client_id: String,
    pub image: ImageDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageJoinRequest {
    pub image_id: String,
    /// How long the remote may hold the call open waiting for a state change
    pub timeout_secs: f64,
}

/// Generic build outcome as reported by the remote
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericResult {
    /// One of the [`status`] codes; anything else is a protocol violation
    pub status: i32,
    /// Diagnostic text accompanying a failure
    pub exception: String,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageJoinResponse {
    pub result: GenericResult,
}

/// Response stream of the registration call
pub type RegisterResponseStream = BoxStream<'static, CairnResult<RegisterFileResponse>>;

/// Abstract remote service interface
///
/// Every call is a single round trip except the two mount streams.
/// Implementations report connection and deadline problems as
/// `CairnError::Transport`/`CairnError::Timeout` so callers can tell them
/// apart from answers the remote actually gave.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Client identifier sent along with create requests
    fn client_id(&self) -> &str;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;

    /// Allocate a new mount and return its id
    async fn mount_create(&self, request: MountCreateRequest) -> CairnResult<String>;

    /// Register files with a mount.
    ///
    /// The response stream yields exactly one response per request, in the
    /// order the requests were sent, and ends after the request stream ends.
    async fn mount_register_files(
        &self,
        requests: BoxStream<'static, RegisterFileRequest>,
    ) -> CairnResult<RegisterResponseStream>;

    /// Upload file contents. An `Err` item aborts the call with that error.
    async fn mount_upload_files(
        &self,
        uploads: BoxStream<'static, CairnResult<UploadFileRequest>>,
    ) -> CairnResult<()>;

    /// Mark a mount as complete
    async fn mount_done(&self, mount_id: &str) -> CairnResult<()>;

    /// Submit a layer definition and return the new layer id
    async fn layer_create(&self, request: LayerCreateRequest) -> CairnResult<String>;

    /// Compose a realized layer and mounts into an image and return its id
    async fn image_create(&self, request: ImageCreateRequest) -> CairnResult<String>;

    /// Wait (up to the request's blocking timeout) for the image build status
    async fn image_join(&self, request: ImageJoinRequest) -> CairnResult<ImageJoinResponse>;
}
