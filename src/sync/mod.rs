//! Content-addressed file synchronization
//!
//! - `digest`: SHA256 content digests
//! - `walker`: tree enumeration with a bounded hashing pool
//! - `mount`: two-phase register/upload protocol against a remote store

pub mod digest;
pub mod mount;
pub mod walker;

pub use digest::{hash_bytes, hash_file, ContentDigest};
pub use mount::{Mount, MountIndex, SyncStats};
pub use walker::{all_files, extension_predicate, FileEntry, FilePredicate, TreeWalker};
