//! S3-compatible object store: buckets stand in for containers.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use bytes::Bytes;
use tracing::{debug, info};

use mobility_importer::config::StoreConfig;
use mobility_importer::error::{Error, Result};
use mobility_importer::fetch::{Container, DIRECTORY_CONTENT_TYPE, ObjectStore, RemoteObject};

pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Builds a client from the `auth.conf` credentials: the username is the
    /// access key, the password the secret key.
    pub fn new(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.clone(),
            None,
            None,
            "auth.conf",
        );
        let builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Some(Region::new(config.region.clone())))
            .force_path_style(true);
        let builder = match &config.s3_endpoint {
            Some(endpoint) => builder.endpoint_url(endpoint),
            None => builder,
        };
        info!(region = %config.region, endpoint = ?config.s3_endpoint, "S3 client configured");
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }
}

/// Keys ending in `/` are folder placeholders.
fn object_from_key(key: &str) -> RemoteObject {
    let content_type = if key.ends_with('/') {
        DIRECTORY_CONTENT_TYPE.to_string()
    } else {
        String::new()
    };
    RemoteObject {
        name: key.to_string(),
        content_type,
    }
}

/// Applies marker/limit paging to a full, sorted bucket list.
fn page_of(mut names: Vec<String>, marker: Option<&str>, limit: usize) -> Vec<Container> {
    names.sort();
    names
        .into_iter()
        .filter(|name| marker.is_none_or(|m| name.as_str() > m))
        .take(limit)
        .map(|name| Container { name })
        .collect()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_containers(&self, marker: Option<&str>, limit: usize) -> Result<Vec<Container>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| Error::Store(format!("ListBuckets failed: {}", DisplayErrorContext(&e))))?;

        let names = resp
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect();
        Ok(page_of(names, marker, limit))
    }

    async fn list_objects(
        &self,
        container: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteObject>> {
        debug!(bucket = container, ?marker, limit, "ListObjectsV2");
        let resp = self
            .client
            .list_objects_v2()
            .bucket(container)
            .max_keys(i32::try_from(limit).unwrap_or(i32::MAX))
            .set_start_after(marker.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "ListObjectsV2 failed for '{container}': {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(resp
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(object_from_key)
            .collect())
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "GetObject failed for '{container}/{name}': {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::Store(format!("reading '{container}/{name}' failed: {e}")))?;
        Ok(body.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_keys_are_directories() {
        assert!(object_from_key("exports/").is_directory());
        assert!(!object_from_key("exports/a.csv").is_directory());
    }

    #[test]
    fn test_bucket_paging() {
        let names = vec!["mora".to_string(), "google".to_string(), "gvb".to_string()];
        let first = page_of(names.clone(), None, 2);
        assert_eq!(
            first.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            ["google", "gvb"]
        );
        let rest = page_of(names, Some("gvb"), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "mora");
    }
}
