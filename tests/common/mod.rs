#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use file_engine::config::{
    CacheConfig, CodecConfig, DatabaseConfig, LocalStoreConfig, TenantConfig,
};
use file_engine::object_store::ObjectStore;
use file_engine::sqlite_database::SqliteDatabase;
use file_engine::{AuthContext, EngineError, FileService, Result, TenantManager};

/// Object store kept entirely in memory, standing in for the S3 tier.
#[derive(Debug, Default)]
pub struct MemObjectStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    buckets: Mutex<HashSet<String>>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant: &str, uid: &str, version_ts: &str) -> String {
        format!("{tenant}/{uid}/{version_ts}")
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemObjectStore {
    async fn store_blob(
        &self,
        uid: &str,
        version_ts: &str,
        data: &[u8],
        tenant: &str,
    ) -> Result<String> {
        let key = Self::key(tenant, uid, version_ts);
        self.blobs
            .lock()
            .unwrap()
            .insert(key.clone(), Bytes::copy_from_slice(data));
        Ok(key)
    }

    async fn read_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<Bytes> {
        let key = Self::key(tenant, uid, version_ts);
        self.blobs
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("object not found: {key}")))
    }

    async fn delete_blob(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .remove(&Self::key(tenant, uid, version_ts));
        Ok(())
    }

    async fn blob_exists(&self, uid: &str, version_ts: &str, tenant: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .contains_key(&Self::key(tenant, uid, version_ts)))
    }

    async fn create_tenant_bucket(&self, tenant: &str) -> Result<()> {
        self.buckets.lock().unwrap().insert(tenant.to_owned());
        Ok(())
    }

    async fn tenant_bucket_exists(&self, tenant: &str) -> Result<bool> {
        Ok(self.buckets.lock().unwrap().contains(tenant))
    }

    async fn cleanup_tenant_bucket(&self, tenant: &str) -> Result<()> {
        let prefix = format!("{tenant}/");
        self.blobs
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        self.buckets.lock().unwrap().remove(tenant);
        Ok(())
    }
}

pub fn base_config(dir: &Path) -> TenantConfig {
    TenantConfig {
        db: DatabaseConfig::default(),
        local: LocalStoreConfig {
            base_path: dir.join("blobs").display().to_string(),
        },
        object: None,
        codec: CodecConfig::default(),
        cache: CacheConfig::default(),
    }
}

pub fn encrypting_config(dir: &Path) -> TenantConfig {
    let mut cfg = base_config(dir);
    cfg.codec = CodecConfig {
        encrypt_data: true,
        compress_data: true,
        encryption_key: Some(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_owned(),
        ),
    };
    cfg
}

/// Installs a subscriber once so `RUST_LOG` surfaces engine spans when a
/// test misbehaves.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Builds a manager and service over in-memory metadata, with the given
/// tenants initialized.
pub async fn engine(
    cfg: TenantConfig,
    object: Option<Arc<dyn ObjectStore>>,
    tenants: &[&str],
) -> anyhow::Result<(Arc<TenantManager>, FileService)> {
    init_tracing();
    let meta = Arc::new(SqliteDatabase::connect(&cfg.db).await?);
    let manager = Arc::new(TenantManager::with_stores(cfg, meta, object)?);
    for tenant in tenants {
        manager.initialize_tenant(tenant).await?;
    }
    let service = FileService::new(manager.clone());
    Ok((manager, service))
}

pub fn auth(user: &str, tenant: &str) -> AuthContext {
    AuthContext::new(user, tenant)
}
