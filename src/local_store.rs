use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::codec::Codec;
use crate::error::{EngineError, Result};

/// Content-addressed blob store on the local filesystem. Blobs live at
/// `<base>/[<tenant>/]<aa>/<bb>/<cc>/<uid>/<version_ts>` where the three
/// two-character levels come from the hyphen-stripped uid; the fan-out per
/// directory stays bounded no matter how many uids a tenant accumulates.
///
/// Writes and deletes serialize on a coarse mutex so directory creation and
/// the tmp-file rename never race; reads proceed in parallel.
#[derive(Debug)]
pub struct LocalStore {
    base: PathBuf,
    codec: Codec,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalStore {
    pub fn new(base: impl Into<PathBuf>, codec: Codec) -> Self {
        Self {
            base: base.into(),
            codec,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Deterministic location of a blob. An empty tenant label selects the
    /// tenant-less layout used by system-internal tests.
    pub fn path_for(&self, uid: &str, version_ts: &str, tenant: &str) -> PathBuf {
        let mut path = self.base.clone();
        if !tenant.is_empty() {
            path.push(tenant);
        }
        for level in desaturate(uid) {
            path.push(level);
        }
        path.push(uid);
        path.push(version_ts);
        path
    }

    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn store_blob(
        &self,
        uid: &str,
        version_ts: &str,
        data: &[u8],
        tenant: &str,
    ) -> Result<String> {
        let encoded = self.codec.encode(data)?;
        let path = self.path_for(uid, version_ts, tenant);
        let parent = path
            .parent()
            .ok_or_else(|| EngineError::Internal(format!("blob path has no parent: {path:?}")))?
            .to_owned();

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&parent).await?;

        // Write-then-rename keeps readers from ever observing a torn blob.
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(path.display().to_string())
    }

    pub async fn read_blob(&self, storage_path: &str) -> Result<Bytes> {
        let raw = match tokio::fs::read(storage_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(format!(
                    "blob not found: {storage_path}"
                )));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Bytes::from(self.codec.decode(&raw)?))
    }

    pub async fn blob_exists(&self, storage_path: &str) -> bool {
        tokio::fs::metadata(storage_path).await.is_ok()
    }

    /// Removes a blob, and its leaf directory when that becomes empty. The
    /// desaturation levels above the leaf are left in place.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_blob(&self, storage_path: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(storage_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = Path::new(storage_path).parent() {
            if dir_is_empty(parent).await {
                // Best-effort; a concurrent writer re-creating the leaf wins.
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    pub async fn create_tenant_dir(&self, tenant: &str) -> Result<()> {
        require_tenant(tenant)?;
        tokio::fs::create_dir_all(self.base.join(tenant)).await?;
        Ok(())
    }

    pub async fn tenant_dir_exists(&self, tenant: &str) -> Result<bool> {
        require_tenant(tenant)?;
        match tokio::fs::metadata(self.base.join(tenant)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Recursively deletes everything under the tenant root. Refuses an
    /// empty tenant label: that would wipe the whole base directory.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn cleanup_tenant_dir(&self, tenant: &str) -> Result<()> {
        require_tenant(tenant)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(self.base.join(tenant)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn require_tenant(tenant: &str) -> Result<()> {
    if tenant.is_empty() {
        return Err(EngineError::InvalidArgument(
            "tenant label cannot be empty".into(),
        ));
    }
    Ok(())
}

/// First three hex pairs of the hyphen-stripped uid. A uid too short to
/// desaturate is used as the single level, verbatim.
fn desaturate(uid: &str) -> Vec<String> {
    let clean: String = uid.chars().filter(|c| *c != '-').collect();
    if clean.len() < 6 {
        return vec![clean];
    }
    vec![
        clean[0..2].to_owned(),
        clean[2..4].to_owned(),
        clean[4..6].to_owned(),
    ]
}

async fn dir_is_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}
