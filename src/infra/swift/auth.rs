//! Keystone token exchange and service-catalog lookup.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::time::Duration;

use mobility_importer::config::StoreConfig;

const OBJECT_STORE_SERVICE: &str = "object-store";

/// An authenticated Swift session: token plus the storage URL for the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub storage_url: String,
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

/// Authenticates against Keystone using the version named in `ST_AUTH_VERSION`.
pub async fn authenticate(client: &reqwest::Client, config: &StoreConfig) -> Result<Session> {
    match config.auth_version.trim() {
        "2" | "2.0" => authenticate_v2(client, config).await,
        "3" => authenticate_v3(client, config).await,
        other => Err(anyhow!("Unsupported ST_AUTH_VERSION '{other}'")),
    }
}

async fn authenticate_v2(client: &reqwest::Client, config: &StoreConfig) -> Result<Session> {
    let url = format!("{}/tokens", config.auth_url.trim_end_matches('/'));
    let body = json!({
        "auth": {
            "tenantName": config.tenant_name,
            "passwordCredentials": {
                "username": config.username,
                "password": config.password,
            }
        }
    });

    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| anyhow!("Failed to send token request: {}", e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Token request failed with status {}: {}", status, body));
    }

    let json: Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;
    session_from_v2(&json, &config.region)
}

async fn authenticate_v3(client: &reqwest::Client, config: &StoreConfig) -> Result<Session> {
    let url = format!("{}/auth/tokens", config.auth_url.trim_end_matches('/'));
    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": config.username,
                        "domain": { "id": "default" },
                        "password": config.password,
                    }
                }
            },
            "scope": { "project": { "id": config.project_id } }
        }
    });

    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| anyhow!("Failed to send token request: {}", e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Token request failed with status {}: {}", status, body));
    }

    let token = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .context("Keystone response carries no X-Subject-Token header")?;
    let json: Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;

    let storage_url = storage_url_v3(&json, &config.region)?;
    Ok(Session { token, storage_url })
}

/// Extracts token and public object-store URL from a v2 `access` document.
pub fn session_from_v2(json: &Value, region: &str) -> Result<Session> {
    let access = &json["access"];
    let token = access["token"]["id"]
        .as_str()
        .context("Token response has no access.token.id")?
        .to_string();

    let storage_url = access["serviceCatalog"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|service| service["type"] == OBJECT_STORE_SERVICE)
        .flat_map(|service| service["endpoints"].as_array().into_iter().flatten())
        .find(|endpoint| endpoint["region"] == region)
        .and_then(|endpoint| endpoint["publicURL"].as_str())
        .map(str::to_string)
        .with_context(|| format!("No object-store endpoint for region '{region}'"))?;

    Ok(Session { token, storage_url })
}

/// Finds the public object-store URL in a v3 `token.catalog`.
pub fn storage_url_v3(json: &Value, region: &str) -> Result<String> {
    json["token"]["catalog"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|service| service["type"] == OBJECT_STORE_SERVICE)
        .flat_map(|service| service["endpoints"].as_array().into_iter().flatten())
        .filter(|endpoint| endpoint["interface"] == "public")
        .find(|endpoint| endpoint["region"] == region || endpoint["region_id"] == region)
        .and_then(|endpoint| endpoint["url"].as_str())
        .map(str::to_string)
        .with_context(|| format!("No public object-store endpoint for region '{region}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_catalog_lookup() {
        let json = json!({
            "access": {
                "token": { "id": "tok-123" },
                "serviceCatalog": [
                    { "type": "compute", "endpoints": [
                        { "region": "NL", "publicURL": "https://compute.example" }
                    ]},
                    { "type": "object-store", "endpoints": [
                        { "region": "DE", "publicURL": "https://de.objectstore.example/v1/AUTH_x" },
                        { "region": "NL", "publicURL": "https://nl.objectstore.example/v1/AUTH_x" }
                    ]}
                ]
            }
        });

        let session = session_from_v2(&json, "NL").unwrap();
        assert_eq!(session.token, "tok-123");
        assert_eq!(session.storage_url, "https://nl.objectstore.example/v1/AUTH_x");
    }

    #[test]
    fn test_v2_unknown_region_fails() {
        let json = json!({
            "access": { "token": { "id": "t" }, "serviceCatalog": [] }
        });
        assert!(session_from_v2(&json, "NL").is_err());
    }

    #[test]
    fn test_v3_prefers_public_interface() {
        let json = json!({
            "token": { "catalog": [
                { "type": "object-store", "endpoints": [
                    { "interface": "internal", "region_id": "NL", "url": "http://internal" },
                    { "interface": "public", "region_id": "NL", "url": "https://public/v1/AUTH_x" }
                ]}
            ]}
        });
        assert_eq!(storage_url_v3(&json, "NL").unwrap(), "https://public/v1/AUTH_x");
    }
}
