//! CLI command implementations

pub mod build;
pub mod config;
pub mod hash;
pub mod sync;

pub use build::execute as build;
pub use config::execute as config;
pub use hash::execute as hash;
pub use sync::execute as sync;

use crate::sync::walker::{all_files, extension_predicate, FilePredicate};

/// Predicate for an `--ext` list; an empty list selects every file
pub(crate) fn predicate_for(extensions: &[String]) -> FilePredicate {
    if extensions.is_empty() {
        all_files()
    } else {
        extension_predicate(extensions)
    }
}
