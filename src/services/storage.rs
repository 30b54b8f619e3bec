//! S3 storage service for raw leaf images.
//!
//! Supports both AWS S3 and MinIO for development. Image bytes are written
//! here before any handle is acknowledged to the caller.

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use tracing::info;
use uuid::Uuid;

use crate::config::S3Config;
use crate::error::{AppError, AppResult};

/// S3 storage client wrapper.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    /// Create a new S3 storage client from configuration.
    pub async fn new(config: &S3Config) -> AppResult<Self> {
        let credentials =
            Credentials::new(&config.access_key, &config.secret_key, None, None, "leafscan");

        let region = Region::new(config.region.clone());

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .force_path_style(true); // Required for MinIO

        // Use custom endpoint for MinIO in development
        if let Some(ref endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let s3_config = s3_config_builder.build();
        let client = Client::from_conf(s3_config);

        let storage = Self {
            client,
            bucket: config.bucket.clone(),
        };

        // Verify bucket exists or create it
        storage.ensure_bucket_exists().await?;

        info!("S3 storage initialized: bucket={}", config.bucket);

        Ok(storage)
    }

    /// Ensure the bucket exists, creating it if necessary.
    async fn ensure_bucket_exists(&self) -> AppResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("S3 bucket '{}' exists", self.bucket);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    info!("Creating S3 bucket '{}'", self.bucket);
                    self.client
                        .create_bucket()
                        .bucket(&self.bucket)
                        .send()
                        .await
                        .map_err(|e| {
                            AppError::Storage(format!("Failed to create bucket: {}", e))
                        })?;
                    info!("S3 bucket '{}' created", self.bucket);
                    Ok(())
                } else {
                    Err(AppError::Storage(format!(
                        "Failed to access bucket '{}': {}",
                        self.bucket, service_error
                    )))
                }
            }
        }
    }

    /// File extension for a whitelisted image MIME type.
    pub fn extension_for_mime(mime: &str) -> &'static str {
        match mime {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "bin",
        }
    }

    /// Upload an image to S3.
    pub async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<()> {
        let body = aws_sdk_s3::primitives::ByteStream::from(data);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to upload image to S3: {}", e)))?;

        Ok(())
    }

    /// Get an image from S3.
    ///
    /// # Returns
    /// The image bytes and content type.
    pub async fn get(&self, key: &str) -> AppResult<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    AppError::NotFound(format!("Image {}", key))
                } else {
                    AppError::Storage(format!("Failed to get image from S3: {}", service_error))
                }
            })?;

        let content_type = response.content_type().map(String::from);
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read S3 response body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok((data, content_type))
    }

    /// Build the S3 key for a leaf image.
    ///
    /// # Returns
    /// S3 key in format: leaves/{owner_user_id}/{image_id}.{ext}
    pub fn image_key(owner_user_id: Uuid, image_id: Uuid, mime: &str) -> String {
        format!(
            "leaves/{}/{}.{}",
            owner_user_id,
            image_id,
            Self::extension_for_mime(mime)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key() {
        let owner = Uuid::parse_str("7e1deb5e-30e4-4b31-9d2b-a1a2cdbabb32").unwrap();
        let image = Uuid::parse_str("018f4e9a-0000-7000-8000-000000000001").unwrap();
        let key = Storage::image_key(owner, image, "image/png");
        assert_eq!(
            key,
            "leaves/7e1deb5e-30e4-4b31-9d2b-a1a2cdbabb32/018f4e9a-0000-7000-8000-000000000001.png"
        );
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(Storage::extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(Storage::extension_for_mime("image/png"), "png");
        assert_eq!(Storage::extension_for_mime("image/gif"), "gif");
        assert_eq!(Storage::extension_for_mime("image/bmp"), "bmp");
        assert_eq!(Storage::extension_for_mime("application/pdf"), "bin");
    }
}
