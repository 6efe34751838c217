use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors surfaced by plugin init and cleanup. The request-path hooks never
/// return these: a cache failure must degrade to a miss, not a failed
/// request.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Configuration rejected during init.
    #[error("invalid plugin configuration: {0}")]
    Config(#[from] ConfigError),

    /// The cache namespace could not be created. Fatal: the host must
    /// refuse to load the plugin.
    #[error("failed to create cache namespace: {0}")]
    NamespaceCreate(#[source] StoreError),

    /// Namespace creation exceeded its init timeout.
    #[error("cache namespace creation timed out")]
    InitTimeout,

    /// Shutdown cleanup failed.
    #[error("cache cleanup failed: {0}")]
    Cleanup(#[source] StoreError),
}
