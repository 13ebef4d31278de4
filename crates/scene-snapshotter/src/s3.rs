use crate::ObjectStore;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

/// Thin wrapper over a single S3 `PutObject` call -- the only operation this
/// spec's snapshotter needs, unlike the full multipart `Storage` trait the
/// `aws_s3` adapter in the retrieved pack implements.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn from_env(bucket: String) -> Self {
        let config = aws_config::load_from_env().await;
        Self { client: Client::new(&config), bucket }
    }

    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
