//! cairn - content-addressed sync and layered image builds
//!
//! Client side of a remote build service: mirrors local files into a remote
//! content store, uploading only what is missing, and composes layered
//! images that the remote side builds.

pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod remote;
pub mod sync;
pub mod ui;

pub use error::{CairnError, CairnResult};
