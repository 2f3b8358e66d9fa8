//! Layer nodes and build-graph realization
//!
//! A layer is built from named base layers, an ordered list of build
//! commands and inline context files. Layers form a DAG: one node may be the
//! base of many others. Realization is memoized per node instance, never by
//! content, so two separately constructed identical nodes produce two remote
//! layers.
//!
//! Realizing a node walks its unrealized ancestry without recursion, groups
//! it into waves by depth and submits each wave concurrently. Every node in a
//! wave only depends on nodes from earlier waves.

use crate::build::realize::{RealizeCell, RealizeState};
use crate::error::{CairnError, CairnResult};
use crate::remote::{BaseLayerRef, ContextFile, LayerCreateRequest, LayerDefinition, Remote};
use futures_util::future::try_join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One buildable unit of an image
#[derive(Debug)]
pub struct LayerNode {
    tag: Option<String>,
    base_layers: BTreeMap<String, Arc<LayerNode>>,
    commands: Vec<String>,
    context_files: BTreeMap<String, Vec<u8>>,
    cell: RealizeCell,
}

impl LayerNode {
    pub fn builder() -> LayerBuilder {
        LayerBuilder::default()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn base_layers(&self) -> &BTreeMap<String, Arc<LayerNode>> {
        &self.base_layers
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn context_files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.context_files
    }

    /// The remote layer id, once realized
    pub fn layer_id(&self) -> Option<String> {
        self.cell.id()
    }

    pub fn state(&self) -> RealizeState {
        self.cell.state()
    }

    /// Realize this layer and every unrealized base below it.
    ///
    /// Returns the cached id immediately if this node was realized before.
    pub async fn realize(&self, remote: &dyn Remote) -> CairnResult<String> {
        if let Some(id) = self.layer_id() {
            return Ok(id);
        }

        let waves = self.plan();
        debug!(
            "Realizing {} layers in {} waves",
            waves.iter().map(Vec::len).sum::<usize>(),
            waves.len()
        );

        for wave in waves {
            try_join_all(wave.into_iter().map(|node| node.realize_one(remote))).await?;
        }

        // Cached by the last wave
        self.realize_one(remote).await
    }

    /// Unrealized nodes reachable from `self`, grouped into dependency waves.
    ///
    /// Post-order walk with an explicit stack; nodes are identified by
    /// address so shared bases are planned once.
    fn plan(&self) -> Vec<Vec<&LayerNode>> {
        let mut levels: HashMap<*const LayerNode, usize> = HashMap::new();
        let mut order: Vec<&LayerNode> = Vec::new();
        let mut stack: Vec<(&LayerNode, bool)> = vec![(self, false)];

        while let Some((node, expanded)) = stack.pop() {
            let key = node as *const LayerNode;
            if levels.contains_key(&key) {
                continue;
            }

            if expanded {
                let level = node
                    .base_layers
                    .values()
                    .filter_map(|base| levels.get(&Arc::as_ptr(base)))
                    .map(|level| level + 1)
                    .max()
                    .unwrap_or(0);
                levels.insert(key, level);
                order.push(node);
                continue;
            }

            stack.push((node, true));
            for base in node.base_layers.values() {
                let base: &LayerNode = base;
                if base.layer_id().is_none() && !levels.contains_key(&(base as *const LayerNode)) {
                    stack.push((base, false));
                }
            }
        }

        let depth = levels.values().copied().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<&LayerNode>> = vec![Vec::new(); depth];
        for node in order {
            waves[levels[&(node as *const LayerNode)]].push(node);
        }
        waves
    }

    /// Realize this node alone; all bases must already be realized
    async fn realize_one(&self, remote: &dyn Remote) -> CairnResult<String> {
        self.cell.get_or_realize(|| self.submit(remote)).await
    }

    async fn submit(&self, remote: &dyn Remote) -> CairnResult<String> {
        let layer = self.definition()?;
        let layer_id = remote
            .layer_create(LayerCreateRequest {
                client_id: remote.client_id().to_string(),
                layer,
            })
            .await?;
        debug!(
            "Created layer {} ({})",
            layer_id,
            self.tag.as_deref().unwrap_or("untagged")
        );
        Ok(layer_id)
    }

    /// Wire definition of this node, using the ids of its realized bases
    fn definition(&self) -> CairnResult<LayerDefinition> {
        let base_layers = self
            .base_layers
            .iter()
            .map(|(name, base)| {
                let layer_id = base.layer_id().ok_or_else(|| {
                    CairnError::Internal(format!("base layer {name} is not realized"))
                })?;
                Ok(BaseLayerRef {
                    name: name.clone(),
                    layer_id,
                })
            })
            .collect::<CairnResult<Vec<_>>>()?;

        Ok(LayerDefinition {
            tag: self.tag.clone(),
            base_layers,
            commands: self.commands.clone(),
            context_files: self
                .context_files
                .iter()
                .map(|(filename, data)| ContextFile {
                    filename: filename.clone(),
                    data: data.clone(),
                })
                .collect(),
        })
    }
}

/// Builder for [`LayerNode`]
#[derive(Debug, Default)]
pub struct LayerBuilder {
    tag: Option<String>,
    base_layers: BTreeMap<String, Arc<LayerNode>>,
    commands: Vec<String>,
    context_files: BTreeMap<String, Vec<u8>>,
}

impl LayerBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Add a named base layer; a later base with the same name replaces it
    pub fn base(mut self, name: impl Into<String>, layer: Arc<LayerNode>) -> Self {
        self.base_layers.insert(name.into(), layer);
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn context_file(mut self, filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.context_files.insert(filename.into(), data.into());
        self
    }

    pub fn build(self) -> Arc<LayerNode> {
        Arc::new(LayerNode {
            tag: self.tag,
            base_layers: self.base_layers,
            commands: self.commands,
            context_files: self.context_files,
            cell: RealizeCell::new(),
        })
    }
}
