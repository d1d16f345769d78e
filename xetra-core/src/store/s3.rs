//! S3-compatible object store.
//!
//! The AWS SDK is async-only; the job is not, so each store owns a
//! current-thread runtime and blocks on every call.

use super::{ObjectStore, StoreError};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;

/// Connection settings for one bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint_url: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint_url: String,
    runtime: Runtime,
}

impl S3Store {
    pub fn new(settings: S3Settings) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to start runtime: {e}")))?;

        let credentials = Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "xetra",
        );
        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(settings.endpoint_url.clone())
            .region(Region::new(settings.region))
            .credentials_provider(credentials)
            .behavior_version(BehaviorVersion::latest())
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket: settings.bucket,
            endpoint_url: settings.endpoint_url,
            runtime,
        })
    }
}

impl ObjectStore for S3Store {
    fn describe(&self) -> String {
        format!("{}/{}", self.endpoint_url.trim_end_matches('/'), self.bucket)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.runtime.block_on(async {
            let mut keys = Vec::new();
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| StoreError::Backend(e.to_string()))?;
                keys.extend(
                    page.contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );
            }
            keys.sort();
            Ok(keys)
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    let err = err.into_service_error();
                    if err.is_no_such_key() {
                        StoreError::NotFound {
                            key: key.to_string(),
                        }
                    } else {
                        StoreError::Backend(err.to_string())
                    }
                })?;
            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(data.into_bytes().to_vec())
        })
    }

    fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
    }
}
