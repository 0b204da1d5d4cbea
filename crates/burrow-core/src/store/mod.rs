//! Durable desired state: which tunnel port each target port should have.

mod sqlite;

pub use sqlite::SqliteMappingStore;

use crate::error::Result;
use crate::models::TunnelMapping;
use async_trait::async_trait;

/// Source of truth for desired tunnel mappings.
///
/// The supervisor reads mappings, rewrites `tunnel_port` for an existing
/// target, and deletes targets; creating targets is a provisioning concern.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// All mappings, enabled or not.
    async fn get(&self) -> Result<Vec<TunnelMapping>>;

    /// Set the tunnel port of `target_port`. Returns the number of rows
    /// affected; zero means the target does not exist.
    async fn update(&self, target_port: u16, tunnel_port: u16) -> Result<usize>;

    /// Delete the mapping for `target_port`. Returns whether it existed.
    async fn remove(&self, target_port: u16) -> Result<bool>;
}
