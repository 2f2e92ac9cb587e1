use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use serde::Deserialize;
use tracing::{debug, info};

/// Content type of the annotated image, also used as the inventory filter.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

const PAGE_SIZE: u32 = 2000;

#[derive(Debug, Deserialize)]
struct ManagedObjectCollection {
    #[serde(rename = "managedObjects")]
    managed_objects: Vec<ManagedObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagedObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Decode a `/inventory/binaries` page into its managed objects.
pub fn parse_listing(body: &[u8]) -> serde_json::Result<Vec<ManagedObject>> {
    let collection: ManagedObjectCollection = serde_json::from_slice(body)?;
    Ok(collection.managed_objects)
}

fn first_named(binaries: Vec<ManagedObject>, name: &str) -> Option<String> {
    binaries
        .into_iter()
        .find(|object| object.name == name)
        .map(|object| object.id)
}

/// Client for the two inventory binary operations the stream needs.
pub struct InventoryClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl InventoryClient {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tomato-stream/0.1")
            .build()
            .map_err(|e| StreamError::NetworkFailure {
                url: config.base_url.clone(),
                source: e,
            })?;

        info!("Inventory client for {} as {}", config.base_url, config.auth_user());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user: config.auth_user(),
            password: config.password.clone(),
        })
    }

    /// Id of the first binary of `content_type` whose name is exactly `name`.
    pub async fn find_binary_id(&self, content_type: &str, name: &str) -> Result<Option<String>> {
        let url = format!("{}/inventory/binaries", self.base_url);
        let network_error = |source| StreamError::NetworkFailure { url: url.clone(), source };

        debug!("Listing binaries of type {} at {}", content_type, url);

        let body = self
            .client
            .get(&url)
            .query(&[("pageSize", PAGE_SIZE.to_string()), ("type", content_type.to_string())])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(network_error)?
            .bytes()
            .await
            .map_err(network_error)?;

        let binaries = parse_listing(&body).map_err(|source| StreamError::InvalidResponse {
            url: url.clone(),
            source,
        })?;

        debug!("Inventory returned {} binaries", binaries.len());

        Ok(first_named(binaries, name))
    }

    /// Overwrite the bytes of binary `id`.
    pub async fn replace_binary(&self, id: &str, content_type: &str, body: Vec<u8>) -> Result<()> {
        let url = format!("{}/inventory/binaries/{}", self.base_url, id);
        let size = body.len();

        self.client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .basic_auth(&self.user, Some(&self.password))
            .body(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| StreamError::NetworkFailure { url: url.clone(), source })?;

        debug!("Replaced binary {} with {} bytes", id, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_keeps_server_order_and_defaults_missing_names() {
        let body = br#"{
            "managedObjects": [
                {"id": "11", "name": "webcam_image_analyzed.jpg", "type": "image/jpeg"},
                {"id": "12"},
                {"id": "13", "name": "webcam_image_analyzed.jpg"}
            ],
            "statistics": {"pageSize": 2000, "currentPage": 1}
        }"#;

        let binaries = parse_listing(body).unwrap();

        assert_eq!(binaries.len(), 3);
        assert_eq!(binaries[1].name, "");
        assert_eq!(first_named(binaries, "webcam_image_analyzed.jpg"), Some("11".to_string()));
    }

    #[test]
    fn name_match_is_exact() {
        let binaries = parse_listing(br#"{"managedObjects":[{"id":"5","name":"Webcam_Image_Analyzed.jpg"}]}"#).unwrap();
        assert_eq!(first_named(binaries, "webcam_image_analyzed.jpg"), None);
    }

    #[test]
    fn malformed_listing_is_an_error() {
        assert!(parse_listing(b"<html>maintenance</html>").is_err());
        assert!(parse_listing(br#"{"objects":[]}"#).is_err());
    }
}
