use bytes::Bytes;

use crate::error::Result;

/// Remote blob tier. Keys are `<uid>/<version_ts>`, scoped to a tenant
/// either by bucket or by key prefix depending on the implementation's
/// configuration. Implementations do not apply the content codec: remote
/// payloads are protected by transport- or server-side encryption.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug + 'static {
    /// Stores a blob and returns the object key it was written under.
    async fn store_blob(
        &self,
        uid: &str,
        version_ts: &str,
        data: &[u8],
        tenant: &str,
    ) -> Result<String>;

    async fn read_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<Bytes>;

    async fn delete_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<()>;

    async fn blob_exists(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<bool>;

    /// Idempotent: creating an existing bucket or prefix succeeds.
    async fn create_tenant_bucket(&self, tenant: &str) -> Result<()>;

    async fn tenant_bucket_exists(&self, tenant: &str) -> Result<bool>;

    /// Removes every blob belonging to the tenant.
    async fn cleanup_tenant_bucket(&self, tenant: &str) -> Result<()>;
}
