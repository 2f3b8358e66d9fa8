//! Sync command - synchronize one local directory as a mount

use super::predicate_for;
use crate::cli::args::SyncArgs;
use crate::config::Config;
use crate::error::CairnResult;
use crate::remote::create_remote;
use crate::sync::mount::Mount;
use crate::ui::{self, TaskSpinner, UiContext};
use tracing::debug;

/// Execute the sync command
pub async fn execute(args: SyncArgs, config: &Config) -> CairnResult<()> {
    let ctx = UiContext::detect();
    let remote = create_remote(config).await?;
    let mount = Mount::new(&args.local, args.remote.clone(), predicate_for(&args.ext))
        .with_workers(config.sync.workers());

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!(
        "Syncing {} to {} ({})",
        args.local.display(),
        args.remote,
        remote.backend_name()
    ));

    let mount_id = match mount.realize(remote.as_ref()).await {
        Ok(id) => id,
        Err(e) => {
            spinner.stop_error("Sync failed");
            return Err(e);
        }
    };

    let index = mount.index();
    for (remote_path, local_path) in &index.remote_to_local {
        if let Some(digest) = index.digests.get(local_path) {
            debug!("{} <- {} ({})", remote_path, local_path.display(), digest.short());
        }
    }

    let stats = index.stats;
    spinner.stop(&format!("Mount {} ready", mount_id));
    ui::key_value(&ctx, "files", &stats.files.to_string());
    ui::key_value(&ctx, "uploaded", &stats.uploaded.to_string());
    ui::key_value(&ctx, "bytes", &stats.bytes.to_string());

    println!("{}", mount_id);
    Ok(())
}
