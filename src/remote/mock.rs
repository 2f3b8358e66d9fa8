//! In-memory remote for unit tests
//!
//! Records every call, answers registration from a set of known digests and
//! replays scripted join responses.

use crate::error::{CairnError, CairnResult};
use crate::remote::*;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MountCreate,
    RegisterFile { path: String, sha256_hex: String },
    UploadFile { sha256_hex: String, size: u64 },
    MountDone(String),
    LayerCreate(LayerDefinition),
    ImageCreate(ImageDefinition),
    ImageJoin(String),
}

/// One scripted reply to `image_join`
#[derive(Debug, Clone)]
pub enum JoinStep {
    Status(i32),
    Success(serde_json::Value),
    Failure(String),
    TransportError,
    /// Never answers within any reasonable deadline
    Hang,
}

/// How the mock orders registration responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrder {
    /// One response per request, same order (the contract)
    Positional,
    /// Waits for all requests, then answers in reverse order
    Reversed,
    /// Answers everything except the last request
    DropLast,
}

pub struct MockRemote {
    calls: Arc<Mutex<Vec<Call>>>,
    existing: Arc<Mutex<HashSet<String>>>,
    order: ResponseOrder,
    join_script: Mutex<VecDeque<JoinStep>>,
    ids: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            existing: Arc::new(Mutex::new(HashSet::new())),
            order: ResponseOrder::Positional,
            join_script: Mutex::new(VecDeque::new()),
            ids: AtomicUsize::new(0),
        }
    }

    /// Digests the remote store reports as already present
    pub fn with_existing<S: Into<String>>(self, digests: impl IntoIterator<Item = S>) -> Self {
        self.existing
            .lock()
            .unwrap()
            .extend(digests.into_iter().map(Into::into));
        self
    }

    pub fn with_response_order(mut self, order: ResponseOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_join_script(self, steps: impl IntoIterator<Item = JoinStep>) -> Self {
        self.join_script.lock().unwrap().extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn uploads(&self) -> Vec<(String, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadFile { sha256_hex, size } => Some((sha256_hex, size)),
                _ => None,
            })
            .collect()
    }

    pub fn layer_creates(&self) -> Vec<LayerDefinition> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::LayerCreate(def) => Some(def),
                _ => None,
            })
            .collect()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Remote for MockRemote {
    fn client_id(&self) -> &str {
        "cl-mock"
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }

    async fn mount_create(&self, _request: MountCreateRequest) -> CairnResult<String> {
        self.record(Call::MountCreate);
        Ok(self.next_id("mo"))
    }

    async fn mount_register_files(
        &self,
        requests: BoxStream<'static, RegisterFileRequest>,
    ) -> CairnResult<RegisterResponseStream> {
        let calls = Arc::clone(&self.calls);
        let existing = Arc::clone(&self.existing);

        let answer = move |req: RegisterFileRequest| -> CairnResult<RegisterFileResponse> {
            calls.lock().unwrap().push(Call::RegisterFile {
                path: req.path.clone(),
                sha256_hex: req.sha256_hex.clone(),
            });
            let exists = existing.lock().unwrap().contains(&req.sha256_hex);
            Ok(RegisterFileResponse {
                path: req.path,
                exists,
            })
        };

        Ok(match self.order {
            ResponseOrder::Positional => requests.map(answer).boxed(),
            ResponseOrder::Reversed => stream::once(requests.collect::<Vec<_>>())
                .flat_map(move |all| stream::iter(all.into_iter().rev().map(answer.clone())))
                .boxed(),
            ResponseOrder::DropLast => stream::once(requests.collect::<Vec<_>>())
                .flat_map(move |mut all| {
                    all.pop();
                    stream::iter(all.into_iter().map(answer.clone()))
                })
                .boxed(),
        })
    }

    async fn mount_upload_files(
        &self,
        mut uploads: BoxStream<'static, CairnResult<UploadFileRequest>>,
    ) -> CairnResult<()> {
        while let Some(upload) = uploads.next().await {
            let upload = upload?;
            self.record(Call::UploadFile {
                sha256_hex: upload.sha256_hex.clone(),
                size: upload.size,
            });
            self.existing.lock().unwrap().insert(upload.sha256_hex);
        }
        Ok(())
    }

    async fn mount_done(&self, mount_id: &str) -> CairnResult<()> {
        self.record(Call::MountDone(mount_id.to_string()));
        Ok(())
    }

    async fn layer_create(&self, request: LayerCreateRequest) -> CairnResult<String> {
        self.record(Call::LayerCreate(request.layer));
        Ok(self.next_id("ly"))
    }

    async fn image_create(&self, request: ImageCreateRequest) -> CairnResult<String> {
        self.record(Call::ImageCreate(request.image));
        Ok(self.next_id("im"))
    }

    async fn image_join(&self, request: ImageJoinRequest) -> CairnResult<ImageJoinResponse> {
        self.record(Call::ImageJoin(request.image_id));
        let step = self.join_script.lock().unwrap().pop_front();

        let result = match step {
            None => return Err(CairnError::Internal("join script exhausted".to_string())),
            Some(JoinStep::TransportError) => {
                return Err(CairnError::transport("ImageJoin", "connection reset by peer"))
            }
            Some(JoinStep::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                GenericResult::default()
            }
            Some(JoinStep::Status(status)) => GenericResult {
                status,
                ..GenericResult::default()
            },
            Some(JoinStep::Success(payload)) => GenericResult {
                status: status::SUCCESS,
                exception: String::new(),
                payload: Some(payload),
            },
            Some(JoinStep::Failure(exception)) => GenericResult {
                status: status::FAILURE,
                exception,
                payload: None,
            },
        };

        Ok(ImageJoinResponse { result })
    }
}
