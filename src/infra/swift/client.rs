//! Swift REST client behind the object-store trait.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use mobility_importer::config::StoreConfig;
use mobility_importer::error::{Error, Result};
use mobility_importer::fetch::{Container, ObjectStore, RemoteObject};

use super::auth::{self, Session};

/// OpenStack Swift object store reached through its REST API.
pub struct SwiftStore {
    client: reqwest::Client,
    session: Session,
}

impl SwiftStore {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = auth::http_client()?;
        let session = auth::authenticate(&client, config).await?;
        info!(storage_url = %session.storage_url, "Authenticated against object store");
        Ok(Self { client, session })
    }

    fn url(&self, container: Option<&str>, object: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.session.storage_url)
            .map_err(|e| Error::Store(format!("invalid storage URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Store("storage URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(container);
            segments.extend(object);
        }
        Ok(url)
    }

    async fn listing<T: DeserializeOwned>(
        &self,
        mut url: Url,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<T>> {
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", "json");
            query.append_pair("limit", &limit.to_string());
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        debug!(%url, "Listing");

        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &self.session.token)
            .send()
            .await
            .map_err(|e| Error::Store(format!("failed to send listing request: {e}")))?;

        match response.status() {
            StatusCode::NO_CONTENT => return Ok(Vec::new()),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Store(format!("listing returned status {status}: {body}")));
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| Error::Store(format!("failed to parse listing: {e}")))
    }
}

#[async_trait]
impl ObjectStore for SwiftStore {
    async fn list_containers(&self, marker: Option<&str>, limit: usize) -> Result<Vec<Container>> {
        self.listing(self.url(None, None)?, marker, limit).await
    }

    async fn list_objects(
        &self,
        container: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteObject>> {
        self.listing(self.url(Some(container), None)?, marker, limit)
            .await
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes> {
        let url = self.url(Some(container), Some(name))?;
        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &self.session.token)
            .send()
            .await
            .map_err(|e| Error::Store(format!("failed to fetch {container}/{name}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Store(format!(
                "fetching {container}/{name} returned status {status}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Store(format!("failed to read {container}/{name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(storage_url: &str) -> SwiftStore {
        SwiftStore {
            client: reqwest::Client::new(),
            session: Session {
                token: "t".to_string(),
                storage_url: storage_url.to_string(),
            },
        }
    }

    #[test]
    fn test_object_url_is_escaped() {
        let store = store("https://objectstore.example/v1/AUTH_abc/");
        let url = store.url(Some("gvb"), Some("Ritten GVB.csv")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://objectstore.example/v1/AUTH_abc/gvb/Ritten%20GVB.csv"
        );
    }

    #[test]
    fn test_account_url() {
        let store = store("https://objectstore.example/v1/AUTH_abc");
        assert_eq!(
            store.url(None, None).unwrap().as_str(),
            "https://objectstore.example/v1/AUTH_abc"
        );
    }

    #[test]
    fn test_listing_payload_parses() {
        let body = r#"[
            {"name": "a.csv", "content_type": "text/csv", "bytes": 10, "hash": "x"},
            {"name": "dir", "content_type": "application/directory", "bytes": 0}
        ]"#;
        let objects: Vec<RemoteObject> = serde_json::from_str(body).unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects[1].is_directory());

        let containers: Vec<Container> =
            serde_json::from_str(r#"[{"name": "gvb", "count": 2, "bytes": 10}]"#).unwrap();
        assert_eq!(containers[0].name, "gvb");
    }
}
