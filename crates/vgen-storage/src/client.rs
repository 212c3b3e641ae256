//! S3 client implementation.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    pub region: String,
    /// Base URL objects are publicly served from
    pub public_url: String,
    /// Bucket for narration audio
    pub audio_bucket: String,
    /// Bucket for rendered videos
    pub video_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:9000".to_string(),
            access_key_id: "admin".to_string(),
            secret_access_key: "password123".to_string(),
            region: "us-east-1".to_string(),
            public_url: "http://localhost:9000".to_string(),
            audio_bucket: "video-gen-audio".to_string(),
            video_bucket: "video-gen-videos".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();
        let endpoint_url = std::env::var("S3_ENDPOINT_URL").unwrap_or(defaults.endpoint_url);
        if endpoint_url.trim().is_empty() {
            return Err(StorageError::config_error("S3_ENDPOINT_URL cannot be empty"));
        }

        Ok(Self {
            public_url: std::env::var("S3_PUBLIC_URL")
                .unwrap_or_else(|_| endpoint_url.clone())
                .trim_end_matches('/')
                .to_string(),
            endpoint_url,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").unwrap_or(defaults.access_key_id),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .unwrap_or(defaults.secret_access_key),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            audio_bucket: std::env::var("AUDIO_BUCKET").unwrap_or(defaults.audio_bucket),
            video_bucket: std::env::var("VIDEO_BUCKET").unwrap_or(defaults.video_bucket),
        })
    }
}

/// Object store holding published artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file and return its public URL.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<String>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn check_connectivity(&self) -> StorageResult<()>;

    /// Base URL objects are served from, without a trailing slash.
    fn public_base_url(&self) -> &str;

    /// `<public base>/<bucket>/<key>`.
    fn public_url(&self, bucket: &str, key: &str) -> String {
        let key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/{}", self.public_base_url(), bucket, key)
    }

    /// Reverse of [`ArtifactStore::public_url`]: the bucket and key an URL points at.
    fn locate(&self, url: &str) -> Option<(String, String)> {
        let rest = url
            .strip_prefix(self.public_base_url())?
            .strip_prefix('/')?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        let key = urlencoding::decode(key).ok()?.into_owned();
        Some((bucket.to_string(), key))
    }
}

/// Content type for an artifact, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    config: StorageConfig,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vgen",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(StorageConfig::from_env()?))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Create the audio and video buckets when missing and make them publicly readable.
    ///
    /// A rejected policy is logged and tolerated; some providers manage access elsewhere.
    pub async fn ensure_buckets(&self) -> StorageResult<()> {
        for bucket in [&self.config.audio_bucket, &self.config.video_bucket] {
            self.ensure_bucket(bucket).await?;

            if let Err(e) = self
                .client
                .put_bucket_policy()
                .bucket(bucket.as_str())
                .policy(public_read_policy(bucket))
                .send()
                .await
            {
                warn!(bucket = %bucket, "Failed to set public read policy: {}", e);
            }
        }
        info!("Storage buckets initialized");
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.as_service_error(), Some(err) if err.is_not_found()) => {
                self.client
                    .create_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| StorageError::bucket_setup(bucket, e))?;
                info!(bucket = %bucket, "Created bucket");
                Ok(())
            }
            Err(e) => Err(StorageError::bucket_setup(bucket, e)),
        }
    }
}

/// Anonymous `s3:GetObject` on every object of `bucket`.
fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"AWS": "*"},
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{}/*", bucket)],
        }]
    })
    .to_string()
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for S3Client {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} to {}/{}", path.display(), bucket, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}/{}", path.display(), bucket, key);
        Ok(self.public_url(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        debug!("Deleting {}/{}", bucket, key);

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.video_bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        Ok(())
    }

    fn public_base_url(&self) -> &str {
        self.config.public_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> S3Client {
        S3Client::new(StorageConfig {
            public_url: "https://cdn.example.com/".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_public_url_and_locate() {
        let client = client();
        let url = client.public_url("video-gen-videos", "videos/job 1/HelloWorld.mp4");
        assert_eq!(
            url,
            "https://cdn.example.com/video-gen-videos/videos/job%201/HelloWorld.mp4"
        );

        let (bucket, key) = client.locate(&url).unwrap();
        assert_eq!(bucket, "video-gen-videos");
        assert_eq!(key, "videos/job 1/HelloWorld.mp4");
    }

    #[test]
    fn test_locate_foreign_url() {
        let client = client();
        assert!(client.locate("https://elsewhere.com/b/k.mp4").is_none());
        assert!(client.locate("https://cdn.example.com/bucket-only").is_none());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/b.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("voice.mp3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("videos/a.mp4").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs.mp4").is_err());
        assert!(validate_key("videos/../secret").is_err());
    }

    #[test]
    fn test_public_read_policy() {
        let policy: serde_json::Value =
            serde_json::from_str(&public_read_policy("video-gen-audio")).unwrap();
        assert_eq!(
            policy["Statement"][0]["Resource"][0],
            "arn:aws:s3:::video-gen-audio/*"
        );
    }
}
