//! Build command - compose, realize and join an image

use crate::build::manifest::{ImageManifest, MANIFEST_FILE};
use crate::build::retry::JoinPolicy;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::CairnResult;
use crate::remote::create_remote;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> CairnResult<()> {
    let ctx = UiContext::detect();

    let mut manifest = load_manifest(args.manifest.as_deref()).await?;
    if let Some(version) = args.python {
        manifest.image.python_version = Some(version);
    }
    let image = manifest
        .into_image(&config.image.python_version, config.sync.workers())
        .compose(&args.packages, &args.commands)
        .into_image();

    let remote = create_remote(config).await?;
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!(
        "Realizing image with {} mount(s)",
        image.mounts().len()
    ));

    let image_id = match image.realize(remote.as_ref()).await {
        Ok(id) => id,
        Err(e) => {
            spinner.stop_error("Image realization failed");
            return Err(e);
        }
    };
    spinner.stop(&format!("Image {} created", image_id));

    ui::section(&ctx, "Mounts");
    for mount in image.mounts() {
        let stats = mount.index().stats;
        ui::step_ok_detail(
            &ctx,
            mount.remote_root(),
            &format!("{} files, {} uploaded", stats.files, stats.uploaded),
        );
    }

    println!("{}", image_id);
    if args.no_join {
        return Ok(());
    }

    let policy = JoinPolicy::from_config(&config.join);
    spinner.start(&format!("Waiting for image {}", image_id));
    let payload = match image.join(remote.as_ref(), &policy).await {
        Ok(payload) => payload,
        Err(e) => {
            spinner.stop_error("Image build failed");
            return Err(e);
        }
    };
    spinner.stop("Image built");

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Load the given manifest, or `./cairn.toml` when present, or an empty one
async fn load_manifest(path: Option<&Path>) -> CairnResult<ImageManifest> {
    if let Some(path) = path {
        return ImageManifest::from_file(path).await;
    }

    let default = Path::new(MANIFEST_FILE);
    if default.exists() {
        debug!("Using manifest {}", default.display());
        return ImageManifest::from_file(default).await;
    }

    Ok(ImageManifest::default())
}
