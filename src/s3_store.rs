use std::fmt::Debug;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::config::ObjectStoreConfig;
use crate::error::{EngineError, Result};
use crate::object_store::ObjectStore;

/// S3-compatible implementation of the remote blob tier. With a configured
/// bucket every tenant shares it under a `<tenant>/` key prefix; without
/// one, each tenant gets a bucket named after its label.
pub struct S3ObjectStore {
    cfg: ObjectStoreConfig,
    client: aws_sdk_s3::Client,
}

impl Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("endpoint", &self.cfg.endpoint)
            .field("bucket", &self.cfg.bucket)
            .finish()
    }
}

impl S3ObjectStore {
    pub fn new(cfg: ObjectStoreConfig) -> Self {
        let cred = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "tenant-config",
        );

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::v2023_11_09())
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(cred)
            .region(Region::new(cfg.region.clone()))
            .force_path_style(cfg.path_style)
            .build();

        let client = aws_sdk_s3::Client::from_conf(s3_config);
        Self { cfg, client }
    }

    fn bucket_for(&self, tenant: &str) -> String {
        match &self.cfg.bucket {
            Some(shared) => shared.clone(),
            None => tenant.to_owned(),
        }
    }

    fn key_for(&self, uid: &str, version_ts: &str, tenant: &str) -> String {
        match &self.cfg.bucket {
            Some(_) => format!("{tenant}/{uid}/{version_ts}"),
            None => format!("{uid}/{version_ts}"),
        }
    }

    fn unavailable(op: &str, err: impl std::fmt::Display) -> EngineError {
        EngineError::StorageUnavailable(format!("object store {op} failed: {err}"))
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn store_blob(
        &self,
        uid: &str,
        version_ts: &str,
        data: &[u8],
        tenant: &str,
    ) -> Result<String> {
        let key = self.key_for(uid, version_ts, tenant);
        self.client
            .put_object()
            .bucket(self.bucket_for(tenant))
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Self::unavailable("put", e))?;
        Ok(key)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn read_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<Bytes> {
        let key = self.key_for(uid, version_ts, tenant);
        let output = self
            .client
            .get_object()
            .bucket(self.bucket_for(tenant))
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    EngineError::NotFound(format!("object not found: {key}"))
                } else {
                    Self::unavailable("get", service)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| Self::unavailable("get", e))?;
        Ok(body.into_bytes())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(self.bucket_for(tenant))
            .key(self.key_for(uid, version_ts, tenant))
            .send()
            .await
            .map_err(|e| Self::unavailable("delete", e))?;
        Ok(())
    }

    async fn blob_exists(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(self.bucket_for(tenant))
            .key(self.key_for(uid, version_ts, tenant))
            .send()
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::unavailable("head", service))
                }
            }
        }
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn create_tenant_bucket(&self, tenant: &str) -> Result<()> {
        let bucket = self.bucket_for(tenant);
        let res = self.client.create_bucket().bucket(&bucket).send().await;
        match res {
            Ok(_) => {
                tracing::info!(%bucket, "created bucket in the backing store");
                Ok(())
            }
            Err(err) => {
                let service = err.into_service_error();
                if service.is_bucket_already_owned_by_you() || service.is_bucket_already_exists() {
                    Ok(())
                } else {
                    Err(Self::unavailable("create bucket", service))
                }
            }
        }
    }

    async fn tenant_bucket_exists(&self, tenant: &str) -> Result<bool> {
        let res = self
            .client
            .head_bucket()
            .bucket(self.bucket_for(tenant))
            .send()
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::unavailable("head bucket", service))
                }
            }
        }
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn cleanup_tenant_bucket(&self, tenant: &str) -> Result<()> {
        let bucket = self.bucket_for(tenant);
        let prefix = self.cfg.bucket.as_ref().map(|_| format!("{tenant}/"));

        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&bucket);
            if let Some(prefix) = &prefix {
                req = req.prefix(prefix);
            }
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let page = req
                .send()
                .await
                .map_err(|e| Self::unavailable("list", e))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                self.client
                    .delete_object()
                    .bucket(&bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| Self::unavailable("delete", e))?;
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_owned()),
                None => break,
            }
        }

        // Per-tenant buckets are removed outright; a shared bucket only
        // loses the tenant's prefix.
        if self.cfg.bucket.is_none() {
            self.client
                .delete_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::unavailable("delete bucket", e))?;
        }
        Ok(())
    }
}
