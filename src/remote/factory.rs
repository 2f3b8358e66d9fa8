//! Remote factory
//!
//! Creates the remote backend selected in the configuration.

use crate::config::{Config, ConfigManager};
use crate::error::{CairnError, CairnResult};
use crate::remote::local::LocalRemote;
use crate::remote::Remote;
use tracing::debug;

/// Create the configured remote backend
///
/// # Returns
/// * `Ok(Box<dyn Remote>)` - A boxed remote implementation
/// * `Err` - If the backend is unknown or cannot be opened
pub async fn create_remote(config: &Config) -> CairnResult<Box<dyn Remote>> {
    let client_id = config
        .remote
        .client_id
        .clone()
        .unwrap_or_else(|| format!("cl-{}", uuid::Uuid::new_v4().simple()));

    match config.remote.backend.as_str() {
        "local" => {
            let store_dir = config
                .remote
                .store_dir
                .clone()
                .unwrap_or_else(ConfigManager::default_store_dir);
            debug!("Opening local remote at {}", store_dir.display());
            Ok(Box::new(LocalRemote::open(store_dir, client_id).await?))
        }
        other => Err(CairnError::UnsupportedRemote(other.to_string())),
    }
}
