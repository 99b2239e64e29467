//! Object-store capability used by the copy pipeline and its S3 implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;
use tracing::debug;

use crate::conf::C_REGION_FALLBACK;
use crate::spec::SpecStoreOptions;

const C_HEADER_BUCKET_REGION: &str = "x-amz-bucket-region";

/// Characters left as-is in the `x-amz-copy-source` header value.
const SET_COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Failure reported by an [`ObjectStore`] operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecListPage {
    /// Keys on this page, in store order.
    pub keys: Vec<String>,
    /// Token for the next page; `None` on the last page.
    pub token_next: Option<String>,
}

/// The two store operations the copy pipeline needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of keys under `prefix`.
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        token_continuation: Option<String>,
    ) -> Result<SpecListPage, StoreError>;

    /// Server-side copy of a single object.
    async fn copy_object(
        &self,
        bucket_src: &str,
        key_src: &str,
        bucket_dst: &str,
        key_dst: &str,
    ) -> Result<(), StoreError>;
}

/// [`ObjectStore`] backed by the AWS SDK S3 client.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for `bucket_probe`'s region.
    ///
    /// Without an explicit region the default provider chain is used first
    /// (falling back to `us-east-1`), then `HeadBucket` reveals the bucket's
    /// actual region and the client is rebuilt for it.
    pub async fn connect(
        spec_store_options: &SpecStoreOptions,
        bucket_probe: &str,
    ) -> Result<Self, StoreError> {
        if let Some(region) = &spec_store_options.region {
            let region_provider = RegionProviderChain::first_try(Region::new(region.clone()));
            let client = build_client(spec_store_options, region_provider).await;
            return Ok(Self::new(client));
        }

        let region_provider = RegionProviderChain::default_provider().or_else(C_REGION_FALLBACK);
        let client = build_client(spec_store_options, region_provider).await;
        let region_bucket = match client.head_bucket().bucket(bucket_probe).send().await {
            Ok(_) => {
                debug!(bucket = bucket_probe, "Bucket reachable with configured region");
                return Ok(Self::new(client));
            }
            Err(err) => err
                .raw_response()
                .and_then(|res| res.headers().get(C_HEADER_BUCKET_REGION))
                .map(str::to_owned)
                .ok_or_else(|| {
                    StoreError::new(format!(
                        "Unable to find bucket's region: {bucket_probe} ({})",
                        DisplayErrorContext(&err)
                    ))
                })?,
        };

        debug!(bucket = bucket_probe, region = %region_bucket, "Source bucket's region");
        let region_provider = RegionProviderChain::first_try(Region::new(region_bucket));
        let client = build_client(spec_store_options, region_provider).await;
        Ok(Self::new(client))
    }
}

async fn build_client(
    spec_store_options: &SpecStoreOptions,
    region_provider: RegionProviderChain,
) -> Client {
    let mut config_loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(endpoint_url) = &spec_store_options.endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint_url);
    }
    let sdk_config = config_loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if spec_store_options.endpoint_url.is_some() {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }
    Client::from_conf(s3_config_builder.build())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        token_continuation: Option<String>,
    ) -> Result<SpecListPage, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token_continuation)
            .send()
            .await
            .map_err(|e| StoreError::new(DisplayErrorContext(&e).to_string()))?;

        Ok(SpecListPage {
            keys: output
                .contents()
                .iter()
                .filter_map(|o| o.key().map(str::to_owned))
                .collect(),
            token_next: output.next_continuation_token().map(str::to_owned),
        })
    }

    async fn copy_object(
        &self,
        bucket_src: &str,
        key_src: &str,
        bucket_dst: &str,
        key_dst: &str,
    ) -> Result<(), StoreError> {
        let c_copy_source = format!(
            "{bucket_src}/{}",
            utf8_percent_encode(key_src, SET_COPY_SOURCE)
        );
        self.client
            .copy_object()
            .copy_source(c_copy_source)
            .bucket(bucket_dst)
            .key(key_dst)
            .send()
            .await
            .map_err(|e| StoreError::new(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
