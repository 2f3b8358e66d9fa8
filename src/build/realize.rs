//! Once-only realization
//!
//! Mounts, layers and images each turn into a remote id at most once per
//! instance. Concurrent callers share a single realization: the first one
//! runs it, the others wait and reuse its id instead of issuing a duplicate
//! create. Reading the id never waits.

use crate::error::CairnResult;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;

/// Realization state of one graph node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealizeState {
    Unrealized,
    Realizing,
    Realized(String),
}

#[derive(Debug, Default)]
pub struct RealizeCell {
    id: OnceCell<String>,
    realizing: AtomicBool,
}

/// Marks the cell as realizing until dropped, including on cancellation
struct RealizingGuard<'a>(&'a AtomicBool);

impl<'a> RealizingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RealizingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RealizeCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached id, or run `realize` and cache its id on success.
    ///
    /// A failed attempt leaves the cell unrealized so a later call can retry.
    pub async fn get_or_realize<F, Fut>(&self, realize: F) -> CairnResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CairnResult<String>>,
    {
        let realizing = &self.realizing;
        let id = self
            .id
            .get_or_try_init(|| async move {
                let _guard = RealizingGuard::set(realizing);
                realize().await
            })
            .await?;
        Ok(id.clone())
    }

    pub fn state(&self) -> RealizeState {
        match self.id.get() {
            Some(id) => RealizeState::Realized(id.clone()),
            None if self.realizing.load(Ordering::Acquire) => RealizeState::Realizing,
            None => RealizeState::Unrealized,
        }
    }

    /// The realized id, if any
    pub fn id(&self) -> Option<String> {
        self.id.get().cloned()
    }
}
