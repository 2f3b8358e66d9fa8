//! Layered build graph
//!
//! Layers and images turn into remote ids lazily and at most once per
//! instance:
//! - `layer`: layer nodes, realized wave by wave
//! - `image`: image realization and the join protocol
//! - `slim`: python slim image compositions
//! - `manifest`: declarative `cairn.toml` images

pub mod image;
pub mod layer;
pub mod manifest;
pub mod realize;
pub mod retry;
pub mod slim;

pub use image::{BuildResult, Image};
pub use layer::{LayerBuilder, LayerNode};
pub use manifest::ImageManifest;
pub use realize::{RealizeCell, RealizeState};
pub use retry::{call_with_retry, JoinPolicy, RetryPolicy};
pub use slim::SlimImage;
