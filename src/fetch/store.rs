//! Trait and types for talking to a remote object store.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::error::Result;

/// Content type the store reports for pseudo-directory entries.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// A named bucket of objects as reported by the account listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Container {
    pub name: String,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteObject {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
}

impl RemoteObject {
    pub fn is_directory(&self) -> bool {
        self.content_type == DIRECTORY_CONTENT_TYPE
    }

    /// Segments of an unfinished (multi-part) upload carry `part` in their name.
    pub fn is_partial(&self) -> bool {
        self.name.contains("part")
    }
}

/// Anything that comes back from a paginated listing.
pub trait Listed {
    fn name(&self) -> &str;
}

impl Listed for Container {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Listed for RemoteObject {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Abstraction over an account → container → object store.
///
/// Listing calls return at most `limit` entries whose names sort strictly
/// after `marker`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_containers(&self, marker: Option<&str>, limit: usize) -> Result<Vec<Container>>;

    async fn list_objects(
        &self,
        container: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteObject>>;

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes>;
}
