//! Directory gateway traits
//!
//! Capability traits the sync core consumes. Implementations own all protocol
//! plumbing: HTTP clients, LDAP binds, paging, wire encoding.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{NewTargetEntry, SourceGroup, SourceUser, TargetRecord};

/// Read-only gateway to the upstream identity source of truth.
///
/// Calls raise [`crate::GatewayError`] on non-success responses or network
/// failure; no retry is built in.
#[async_trait]
pub trait SourceDirectory: Send + Sync {
    /// Fetch the full normalized user roster.
    async fn list_users(&self) -> GatewayResult<Vec<SourceUser>>;

    /// Fetch all groups.
    async fn list_groups(&self) -> GatewayResult<Vec<SourceGroup>>;

    /// Fetch member identifiers for one group.
    async fn list_group_members(&self, group_id: &str) -> GatewayResult<Vec<String>>;
}

/// Read/write gateway to the downstream target directory.
///
/// Connection lifecycle is explicit: `connect` binds with the configured
/// bind and connect timeouts, and connection-level failures are reported as
/// [`crate::GatewayError`] variants distinct from operation failures so the
/// caller can decide whether to reconnect.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Establish and bind the directory connection.
    async fn connect(&self) -> GatewayResult<()>;

    /// Tear down the directory connection.
    async fn disconnect(&self) -> GatewayResult<()>;

    /// Fetch the full normalized entry roster.
    async fn list_users(&self) -> GatewayResult<Vec<TargetRecord>>;

    /// Create a new user entry.
    async fn create_user(&self, entry: &NewTargetEntry) -> GatewayResult<()>;

    /// Replace a single attribute on an existing user entry.
    async fn update_user_attribute(
        &self,
        identifier: &str,
        attribute: &str,
        value: &str,
    ) -> GatewayResult<()>;

    /// Delete a user entry.
    async fn delete_user(&self, identifier: &str) -> GatewayResult<()>;

    /// List group names present in the directory.
    async fn list_groups(&self) -> GatewayResult<Vec<String>>;

    /// Create a group with the given member identifiers.
    async fn create_group(&self, name: &str, members: &[String]) -> GatewayResult<()>;

    /// Replace the full membership list of an existing group.
    async fn replace_group_members(&self, name: &str, members: &[String]) -> GatewayResult<()>;
}
