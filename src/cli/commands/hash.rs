//! Hash command - print the digests a mount would register

use super::predicate_for;
use crate::cli::args::HashArgs;
use crate::config::Config;
use crate::error::CairnResult;
use crate::sync::walker::{FileEntry, TreeWalker};
use futures_util::TryStreamExt;
use std::path::{Component, Path};
use tracing::info;

/// Execute the hash command
pub async fn execute(args: HashArgs, config: &Config) -> CairnResult<()> {
    let walker = TreeWalker::new(&args.dir, "/", predicate_for(&args.ext))
        .with_workers(config.sync.workers());

    let mut entries: Vec<FileEntry> = walker.walk().await?.try_collect().await?;
    entries.sort_by(|a, b| a.local_path.cmp(&b.local_path));

    for entry in &entries {
        println!("{}  {}", entry.digest, relative(&args.dir, &entry.local_path));
    }
    info!("Hashed {} files under {}", entries.len(), args.dir.display());

    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
