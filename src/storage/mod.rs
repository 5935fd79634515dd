//! Content-addressed object storage for image and mask artifacts.
//!
//! The store presents two base URLs: the in-cluster endpoint the services
//! and workers use, and the external one handed to browsers. Keys are
//! deterministic (`images/<user>/<task>/<uuid>.png`) and never
//! overwritten; every artifact gets a fresh UUID.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ObjectStoreConfig;
use crate::errors::StorageError;

#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
    internal_base: String,
    external_base: String,
}

impl ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let internal_base = format!("{}://{}", scheme, config.endpoint);

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "static",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(internal_base.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            internal_base,
            external_base: config.external_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();
        if exists {
            return Ok(());
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Created bucket: {}", self.bucket);
                Ok(())
            }
            // Benign race with another worker creating the same bucket.
            Err(e) => {
                warn!("Could not create bucket {}: {}", self.bucket, e);
                Ok(())
            }
        }
    }

    pub async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        debug!("Uploaded object: {}", key);
        Ok(())
    }

    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    StorageError::DownloadFailed {
                        key: key.to_string(),
                        message: service_err.to_string(),
                    }
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes.into_bytes().to_vec())
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::BucketFailed {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Browser-reachable URL for a stored object.
    pub fn external_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.external_base, self.bucket, key)
    }

    /// In-cluster URL for a stored object.
    pub fn internal_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.internal_base, self.bucket, key)
    }

    /// Rewrite an external artifact URL so in-cluster fetchers can resolve
    /// it; URLs already pointing elsewhere pass through untouched.
    pub fn to_internal_url(&self, url: &str) -> String {
        if let Some(rest) = url.strip_prefix(&self.external_base) {
            format!("{}{}", self.internal_base, rest)
        } else {
            url.to_string()
        }
    }

    pub fn image_key(user_id: Uuid, task_id: Uuid, artifact_id: Uuid) -> String {
        format!("images/{user_id}/{task_id}/{artifact_id}.png")
    }

    pub fn mask_key(user_id: Uuid, task_id: Uuid, artifact_id: Uuid) -> String {
        format!("masks/{user_id}/{task_id}/{artifact_id}.png")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ObjectStore {
        ObjectStore::new(&ObjectStoreConfig {
            endpoint: "minio:9000".to_string(),
            external_url: "http://192.168.1.81:9020".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "lumen-images".to_string(),
            use_ssl: false,
        })
    }

    #[test]
    fn test_key_layout() {
        let user = Uuid::nil();
        let task = Uuid::nil();
        let artifact = Uuid::nil();
        assert_eq!(
            ObjectStore::image_key(user, task, artifact),
            format!("images/{user}/{task}/{artifact}.png")
        );
        assert!(ObjectStore::mask_key(user, task, artifact).starts_with("masks/"));
    }

    #[test]
    fn test_external_and_internal_urls_differ() {
        let store = store();
        let key = "images/u/t/a.png";
        assert_eq!(
            store.external_url(key),
            "http://192.168.1.81:9020/lumen-images/images/u/t/a.png"
        );
        assert_eq!(
            store.internal_url(key),
            "http://minio:9000/lumen-images/images/u/t/a.png"
        );
    }

    #[test]
    fn test_to_internal_url_rewrites_only_external_base() {
        let store = store();
        assert_eq!(
            store.to_internal_url("http://192.168.1.81:9020/lumen-images/images/u/t/a.png"),
            "http://minio:9000/lumen-images/images/u/t/a.png"
        );
        // Foreign URLs pass through unchanged.
        assert_eq!(
            store.to_internal_url("https://example.com/pic.png"),
            "https://example.com/pic.png"
        );
    }

    #[test]
    fn test_ssl_flag_switches_scheme() {
        let store = ObjectStore::new(&ObjectStoreConfig {
            endpoint: "minio:9000".to_string(),
            external_url: "https://cdn.example.com".to_string(),
            access_key: "k".to_string(),
            secret_key: "s".to_string(),
            bucket: "b".to_string(),
            use_ssl: true,
        });
        assert!(store.internal_url("x").starts_with("https://minio:9000/"));
    }
}
