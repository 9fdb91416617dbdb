use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::Codec;
use crate::config::TenantConfig;
use crate::error::{EngineError, Result};
use crate::local_store::LocalStore;
use crate::meta_store::MetaStore;
use crate::object_store::ObjectStore;
use crate::s3_store::S3ObjectStore;
use crate::sqlite_database::SqliteDatabase;

/// Per-tenant handles to the three substrates. Contexts are created by
/// `initialize_tenant` and stay valid for the process lifetime; the manager
/// never invalidates them implicitly.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub meta: Arc<dyn MetaStore>,
    pub local: Arc<LocalStore>,
    pub object: Option<Arc<dyn ObjectStore>>,
}

/// Owns the store handles and the tenant → context map. Additions go
/// through the write lock; lookups take the read side only.
#[derive(Debug)]
pub struct TenantManager {
    config: TenantConfig,
    meta: Arc<dyn MetaStore>,
    local: Arc<LocalStore>,
    object: Option<Arc<dyn ObjectStore>>,
    contexts: RwLock<HashMap<String, Arc<TenantContext>>>,
}

impl TenantManager {
    /// Builds the manager from configuration: metadata database, local blob
    /// root and, when an endpoint is configured, the S3 tier. Codec key
    /// material is validated here, at tenant-open time.
    pub async fn new(config: TenantConfig) -> Result<Self> {
        let meta: Arc<dyn MetaStore> = Arc::new(SqliteDatabase::connect(&config.db).await?);
        let object: Option<Arc<dyn ObjectStore>> = config
            .object
            .clone()
            .map(|cfg| Arc::new(S3ObjectStore::new(cfg)) as Arc<dyn ObjectStore>);
        Self::with_stores(config, meta, object)
    }

    /// Wires the manager against caller-provided stores. This is the seam
    /// the in-memory object store used by tests goes through.
    pub fn with_stores(
        config: TenantConfig,
        meta: Arc<dyn MetaStore>,
        object: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let codec = Codec::from_config(&config.codec)?;
        let local = Arc::new(LocalStore::new(config.local.base_path.clone(), codec));

        Ok(Self {
            config,
            meta,
            local,
            object,
            contexts: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// Idempotent tenant bring-up: metadata schema, local directory, remote
    /// bucket (when a tier is configured), then the context record.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn initialize_tenant(&self, tenant: &str) -> Result<()> {
        if tenant.is_empty() {
            return Err(EngineError::InvalidArgument(
                "tenant label cannot be empty".into(),
            ));
        }
        if self.get_tenant_context(tenant).is_some() {
            return Ok(());
        }

        self.meta.create_tenant_schema(tenant).await?;
        self.local.create_tenant_dir(tenant).await?;
        if let Some(object) = &self.object {
            object.create_tenant_bucket(tenant).await?;
        }

        let context = Arc::new(TenantContext {
            meta: self.meta.clone(),
            local: self.local.clone(),
            object: self.object.clone(),
        });
        let mut contexts = self.contexts.write().expect("tenant map poisoned");
        contexts.entry(tenant.to_owned()).or_insert(context);
        tracing::info!(%tenant, "tenant initialized");
        Ok(())
    }

    /// True iff every substrate knows the tenant: schema row, local
    /// directory and (when configured) the remote bucket.
    pub async fn tenant_exists(&self, tenant: &str) -> Result<bool> {
        if tenant.is_empty() {
            return Err(EngineError::InvalidArgument(
                "tenant label cannot be empty".into(),
            ));
        }
        if !self.meta.tenant_schema_exists(tenant).await? {
            return Ok(false);
        }
        if !self.local.tenant_dir_exists(tenant).await? {
            return Ok(false);
        }
        if let Some(object) = &self.object {
            if !object.tenant_bucket_exists(tenant).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_tenant_context(&self, tenant: &str) -> Option<Arc<TenantContext>> {
        let contexts = self.contexts.read().expect("tenant map poisoned");
        contexts.get(tenant).cloned()
    }

    /// Removes the tenant's blobs from the local tree and the remote tier.
    /// Metadata rows and the context record are left in place; the tenant
    /// can be re-initialized.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cleanup_tenant(&self, tenant: &str) -> Result<()> {
        self.local.cleanup_tenant_dir(tenant).await?;
        if let Some(object) = &self.object {
            object.cleanup_tenant_bucket(tenant).await?;
        }
        Ok(())
    }
}
