//! S3-backed implementation of the object-store port.
//!
//! Every upload carries a `Content-MD5` of the body so the store can detect
//! corruption in transit. Path-style addressing is forced so MinIO-style
//! endpoints work out of the box.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use md5::{Digest, Md5};

use seedgate_config::S3Settings;
use seedgate_core::{Error, ObjectStore, Result};

/// S3 client wrapper implementing [`ObjectStore`].
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from validated settings.
    #[must_use]
    pub fn new(settings: &S3Settings) -> Self {
        let region = if settings.region.is_empty() {
            "us-east-1".to_string()
        } else {
            settings.region.clone()
        };
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "seedgate",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true);
        if !settings.endpoint.is_empty() {
            builder = builder.endpoint_url(&settings.endpoint);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let data = output.body.collect().await.map_err(|err| {
                    Error::transient(format!("s3 get {bucket}/{key}: {err}"))
                })?;
                Ok(Some(data.into_bytes()))
            }
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_no_such_key() => Ok(None),
            Err(err) => Err(Error::transient(format!("s3 get {bucket}/{key}: {err}"))),
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let digest = Md5::digest(&body);
        let content_md5 = BASE64.encode(digest);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(content_md5)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|err| Error::transient(format!("s3 put {bucket}/{key}: {err}")))?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(err) => Err(Error::transient(format!("s3 head {bucket}/{key}: {err}"))),
        }
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(ctx))
                if ctx.err().is_bucket_already_owned_by_you()
                    || ctx.err().is_bucket_already_exists() =>
            {
                Ok(())
            }
            Err(err) => Err(Error::transient(format!("s3 create bucket {bucket}: {err}"))),
        }
    }
}
