//! Debian slim Python images
//!
//! Every composition returns a new `SlimImage` on top of a brand-new layer;
//! the receiver is left untouched and the mounts are shared.

use crate::build::image::Image;
use crate::build::layer::LayerNode;
use crate::sync::mount::Mount;
use std::sync::Arc;

/// Tag of the stock slim base layer for a python version
pub fn base_tag(python_version: &str) -> String {
    format!("python-{python_version}-slim-buster-base")
}

/// Tag of the matching builder layer (compilers, headers)
pub fn builder_tag(python_version: &str) -> String {
    format!("python-{python_version}-slim-buster-builder")
}

#[derive(Debug, Clone)]
pub struct SlimImage {
    python_version: String,
    layer: Arc<LayerNode>,
    mounts: Vec<Arc<Mount>>,
}

impl SlimImage {
    /// The stock base layer with the python files of the working directory mounted into `/root`
    pub fn new(python_version: impl Into<String>) -> Self {
        let python_version = python_version.into();
        Self {
            layer: LayerNode::builder().tag(base_tag(&python_version)).build(),
            python_version,
            mounts: vec![Arc::new(Mount::python_workdir())],
        }
    }

    /// Replace the mounts carried by this image and its derivatives
    pub fn with_mounts(mut self, mounts: Vec<Arc<Mount>>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    pub fn layer(&self) -> &Arc<LayerNode> {
        &self.layer
    }

    pub fn mounts(&self) -> &[Arc<Mount>] {
        &self.mounts
    }

    /// Install packages from wheels built in the builder layer.
    ///
    /// Always yields a new layer, even for an empty list.
    pub fn add_python_packages<S: AsRef<str>>(&self, packages: &[S]) -> Self {
        let packages: Vec<&str> = packages.iter().map(AsRef::as_ref).collect();
        let builder = LayerNode::builder()
            .tag(builder_tag(&self.python_version))
            .build();
        let layer = LayerNode::builder()
            .base("base", self.layer.clone())
            .base("builder", builder)
            .commands([
                "FROM builder as builder-vehicle".to_string(),
                format!("RUN pip wheel {} -w /tmp/wheels", packages.join(" ")),
                "FROM base".to_string(),
                "COPY --from=builder-vehicle /tmp/wheels /tmp/wheels".to_string(),
                "RUN pip install /tmp/wheels/*".to_string(),
                "RUN rm -rf /tmp/wheels".to_string(),
            ])
            .build();

        self.derive(layer)
    }

    /// Run shell commands on top of this image, one `RUN` step each
    pub fn run_commands<S: AsRef<str>>(&self, commands: &[S]) -> Self {
        let layer = LayerNode::builder()
            .base("base", self.layer.clone())
            .command("FROM base")
            .commands(commands.iter().map(|c| format!("RUN {}", c.as_ref())))
            .build();

        self.derive(layer)
    }

    /// Add packages, then commands, skipping whichever list is empty
    pub fn compose<P: AsRef<str>, C: AsRef<str>>(&self, packages: &[P], commands: &[C]) -> Self {
        let mut image = self.clone();
        if !packages.is_empty() {
            image = image.add_python_packages(packages);
        }
        if !commands.is_empty() {
            image = image.run_commands(commands);
        }
        image
    }

    /// An image handle for this composition
    pub fn into_image(self) -> Image {
        Image::new(self.layer, self.mounts)
    }

    fn derive(&self, layer: Arc<LayerNode>) -> Self {
        Self {
            python_version: self.python_version.clone(),
            layer,
            mounts: self.mounts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockRemote;

    #[test]
    fn new_uses_base_tag_and_default_mount() {
        let image = SlimImage::new("3.11.9");
        assert_eq!(image.layer().tag(), Some("python-3.11.9-slim-buster-base"));
        assert!(image.layer().base_layers().is_empty());
        assert_eq!(image.mounts().len(), 1);
        assert_eq!(image.mounts()[0].remote_root(), "/root");
    }

    #[test]
    fn add_python_packages_builds_wheels() {
        let base = SlimImage::new("3.10.4");
        let image = base.add_python_packages(&["requests", "numpy"]);

        let layer = image.layer();
        assert!(layer.tag().is_none());
        assert!(Arc::ptr_eq(&layer.base_layers()["base"], base.layer()));
        assert_eq!(
            layer.base_layers()["builder"].tag(),
            Some("python-3.10.4-slim-buster-builder")
        );
        assert_eq!(layer.commands()[1], "RUN pip wheel requests numpy -w /tmp/wheels");
        assert_eq!(layer.commands().len(), 6);
    }

    #[test]
    fn run_commands_prefixes_run() {
        let base = SlimImage::new("3.11.9");
        let image = base.run_commands(&["apt-get update", "apt-get install -y git"]);

        assert_eq!(
            image.layer().commands(),
            &["FROM base", "RUN apt-get update", "RUN apt-get install -y git"]
        );
        // Receiver unchanged
        assert!(base.layer().commands().is_empty());
    }

    #[test]
    fn derived_images_share_mounts() {
        let base = SlimImage::new("3.11.9");
        let derived = base.run_commands(&["true"]).add_python_packages(&["six"]);
        assert!(Arc::ptr_eq(&base.mounts()[0], &derived.mounts()[0]));
    }

    #[test]
    fn empty_compositions_still_build_new_layers() {
        let base = SlimImage::new("3.11.9");
        let none: [&str; 0] = [];

        let ran = base.run_commands(&none);
        assert!(!Arc::ptr_eq(ran.layer(), base.layer()));
        assert!(Arc::ptr_eq(&ran.layer().base_layers()["base"], base.layer()));
        assert_eq!(ran.layer().commands(), &["FROM base"]);

        let installed = base.add_python_packages(&none);
        assert!(!Arc::ptr_eq(installed.layer(), base.layer()));
        assert_eq!(installed.layer().commands().len(), 6);
    }

    #[test]
    fn compose_skips_empty_lists() {
        let base = SlimImage::new("3.11.9");
        let none: [&str; 0] = [];
        assert!(Arc::ptr_eq(base.compose(&none, &none).layer(), base.layer()));

        let image = base.compose(&none, &["make"]);
        assert_eq!(image.layer().commands(), &["FROM base", "RUN make"]);
        assert!(Arc::ptr_eq(&image.layer().base_layers()["base"], base.layer()));
    }

    #[tokio::test]
    async fn composed_chain_realizes_bases_first() {
        let remote = MockRemote::new();
        let image = SlimImage::new("3.11.9")
            .with_mounts(vec![])
            .add_python_packages(&["requests"])
            .run_commands(&["echo done"]);

        image.layer().realize(&remote).await.unwrap();

        let creates = remote.layer_creates();
        assert_eq!(creates.len(), 4);
        assert_eq!(creates.last().unwrap().commands, vec!["FROM base", "RUN echo done"]);
    }
}
