use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::acl::{self, AclEngine};
use crate::cache::CacheManager;
use crate::error::{EngineError, Result};
use crate::ident::{self, VersionClock};
use crate::meta_store::{Entry, EntryKind, PrincipalKind, VersionRef, VersionRow};
use crate::tenant::{TenantContext, TenantManager};

/// Who is asking, and for which tenant.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: String,
    pub roles: Vec<String>,
    pub tenant: String,
}

impl AuthContext {
    pub fn new(user: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            roles: Vec::new(),
            tenant: tenant.into(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Entry snapshot plus the size of the content it currently points at.
#[derive(Debug, Clone)]
pub struct EntryStat {
    pub entry: Entry,
    pub size_bytes: u64,
}

const DEFAULT_FILE_MODE: u32 = 0o644;
const MODE_MASK: u32 = 0o7777;

/// How many times a write re-allocates its version timestamp when the
/// metadata commit reports a collision.
const VERSION_COMMIT_RETRIES: u32 = 3;

/// The filesystem core: orchestrates metadata, local blobs, the remote
/// tier and the cache under ACL checks. One instance serves every tenant
/// the manager knows.
#[derive(Debug)]
pub struct FileService {
    tenants: Arc<TenantManager>,
    acl: AclEngine,
    cache: CacheManager,
    clock: VersionClock,
}

impl FileService {
    pub fn new(tenants: Arc<TenantManager>) -> Self {
        let cache = CacheManager::new(&tenants.config().cache);
        Self {
            tenants,
            acl: AclEngine::new(),
            cache,
            clock: VersionClock::new(),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn set_cache_threshold(&self, threshold: f64) {
        self.cache.set_threshold(threshold);
    }

    pub fn cache_usage_fraction(&self) -> f64 {
        self.cache.usage_fraction()
    }

    // -- directory and entry lifecycle ------------------------------------

    /// Creates a directory under `parent_uid`, or a tenant root when the
    /// parent is `None`. The caller becomes the owner and receives the
    /// default grants.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn mkdir(
        &self,
        auth: &AuthContext,
        parent_uid: Option<&str>,
        name: &str,
        mode: u32,
    ) -> Result<String> {
        self.create_entry(auth, parent_uid, name, EntryKind::Directory, mode & MODE_MASK)
            .await
    }

    /// Creates an empty regular file; content arrives with the first `put`.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn touch(
        &self,
        auth: &AuthContext,
        parent_uid: Option<&str>,
        name: &str,
    ) -> Result<String> {
        self.create_entry(auth, parent_uid, name, EntryKind::Regular, DEFAULT_FILE_MODE)
            .await
    }

    async fn create_entry(
        &self,
        auth: &AuthContext,
        parent_uid: Option<&str>,
        name: &str,
        kind: EntryKind,
        mode: u32,
    ) -> Result<String> {
        validate_name(name)?;
        let ctx = self.context(auth)?;

        if let Some(parent) = parent_uid {
            self.authorize(&ctx, auth, parent, acl::WRITE, "create entries here")
                .await?;
            let parent_entry = self.live_entry(&ctx, auth, parent).await?;
            if parent_entry.kind != EntryKind::Directory {
                return Err(EngineError::InvalidArgument(format!(
                    "parent {parent} is not a directory"
                )));
            }
        }

        if ctx
            .meta
            .find_child(&auth.tenant, parent_uid, name)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyExists(format!(
                "an entry named {name:?} already exists here"
            )));
        }

        let now = ident::now_millis();
        let entry = Entry {
            uid: ident::generate_uid(),
            name: name.to_owned(),
            parent_uid: parent_uid.map(str::to_owned),
            kind,
            owner: auth.user.clone(),
            mode,
            created_at: now,
            modified_at: now,
            current_version: None,
            deleted: false,
        };
        ctx.meta.insert_entry(&auth.tenant, &entry).await?;

        // The entry is usable even if seeding its grants fails; the owner
        // fallback still applies while no rows exist.
        if let Err(err) = self
            .acl
            .apply_default_acls(
                ctx.meta.as_ref(),
                &auth.tenant,
                &entry.uid,
                &auth.user,
                kind == EntryKind::Directory,
            )
            .await
        {
            crate::error::log_degraded("default grant seeding", &err);
        }

        Ok(entry.uid)
    }

    /// Soft-deletes an empty directory. A directory whose only children are
    /// tombstones counts as empty.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn rmdir(&self, auth: &AuthContext, uid: &str) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "remove this directory")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;
        if entry.kind != EntryKind::Directory {
            return Err(EngineError::InvalidArgument(format!(
                "{uid} is not a directory"
            )));
        }
        if ctx.meta.count_live_children(&auth.tenant, uid).await? > 0 {
            return Err(EngineError::Conflict("directory is not empty".into()));
        }
        ctx.meta
            .mark_deleted(&auth.tenant, uid, ident::now_millis())
            .await
    }

    /// Soft-deletes a file or symlink.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn remove(&self, auth: &AuthContext, uid: &str) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "remove this entry")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;
        if entry.kind == EntryKind::Directory {
            return Err(EngineError::InvalidArgument(
                "entry is a directory, use rmdir".into(),
            ));
        }
        ctx.meta
            .mark_deleted(&auth.tenant, uid, ident::now_millis())
            .await
    }

    /// Clears a tombstone. Fails when the name has been taken by a live
    /// sibling in the meantime.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn undelete(&self, auth: &AuthContext, uid: &str) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "undelete this entry")
            .await?;
        let entry = self.entry(&ctx, auth, uid).await?;
        if !entry.deleted {
            return Err(EngineError::InvalidArgument(format!(
                "{uid} is not deleted"
            )));
        }
        if ctx
            .meta
            .find_child(&auth.tenant, entry.parent_uid.as_deref(), &entry.name)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyExists(format!(
                "a live entry named {:?} already exists here",
                entry.name
            )));
        }
        ctx.meta
            .mark_undeleted(&auth.tenant, uid, ident::now_millis())
            .await
    }

    /// Children of a directory, deterministically ordered by name, then by
    /// creation time.
    pub async fn listdir(
        &self,
        auth: &AuthContext,
        uid: &str,
        with_deleted: bool,
    ) -> Result<Vec<Entry>> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "list this directory")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;
        if entry.kind != EntryKind::Directory {
            return Err(EngineError::InvalidArgument(format!(
                "{uid} is not a directory"
            )));
        }
        if with_deleted {
            ctx.meta
                .list_children_including_deleted(&auth.tenant, uid)
                .await
        } else {
            ctx.meta.list_children(&auth.tenant, uid).await
        }
    }

    pub async fn stat(&self, auth: &AuthContext, uid: &str) -> Result<EntryStat> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "stat this entry")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;

        let size_bytes = match &entry.current_version {
            Some(ts) => ctx
                .meta
                .get_version(&auth.tenant, uid, ts)
                .await?
                .map(|v| v.size_bytes)
                .unwrap_or(0),
            None => ctx
                .meta
                .list_versions_desc(&auth.tenant, uid)
                .await?
                .first()
                .map(|v| v.size_bytes)
                .unwrap_or(0),
        };

        Ok(EntryStat {
            entry,
            size_bytes: size_bytes.max(0) as u64,
        })
    }

    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn rename(&self, auth: &AuthContext, uid: &str, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "rename this entry")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;

        if let Some(sibling) = ctx
            .meta
            .find_child(&auth.tenant, entry.parent_uid.as_deref(), new_name)
            .await?
        {
            if sibling.uid != entry.uid {
                return Err(EngineError::AlreadyExists(format!(
                    "an entry named {new_name:?} already exists here"
                )));
            }
        }
        ctx.meta
            .update_entry_name(&auth.tenant, uid, new_name, ident::now_millis())
            .await
    }

    pub async fn move_entry(
        &self,
        _auth: &AuthContext,
        _uid: &str,
        _new_parent_uid: &str,
    ) -> Result<()> {
        Err(EngineError::Internal("move is not implemented".into()))
    }

    pub async fn copy_entry(
        &self,
        _auth: &AuthContext,
        _uid: &str,
        _new_parent_uid: &str,
    ) -> Result<()> {
        Err(EngineError::Internal("copy is not implemented".into()))
    }

    // -- content -----------------------------------------------------------

    /// Writes a new immutable version and makes it current. The blob lands
    /// in the local store first; the metadata commit is the point of truth,
    /// and a blob whose commit failed stays orphaned until purge. The
    /// remote copy is written back asynchronously.
    #[tracing::instrument(level = "debug", skip(self, auth, data), fields(tenant = %auth.tenant, user = %auth.user, size = data.len()))]
    pub async fn put(&self, auth: &AuthContext, uid: &str, data: Bytes) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "write this file")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;
        if entry.kind != EntryKind::Regular {
            return Err(EngineError::InvalidArgument(format!(
                "{uid} is not a regular file"
            )));
        }

        let mut last_conflict = None;
        for _ in 0..VERSION_COMMIT_RETRIES {
            let version_ts = self.clock.next(uid);
            let storage_path = ctx
                .local
                .store_blob(uid, &version_ts, &data, &auth.tenant)
                .await?;
            let now = ident::now_millis();
            let version = VersionRow {
                version_ts: version_ts.clone(),
                size_bytes: data.len() as i64,
                storage_path,
                created_at: now,
            };

            match ctx
                .meta
                .commit_version(&auth.tenant, uid, &version, now)
                .await
            {
                Ok(()) => {
                    self.schedule_write_back(&ctx, &auth.tenant, uid, &version_ts, data.clone());
                    return Ok(());
                }
                Err(EngineError::Conflict(reason)) => {
                    // The blob written above is orphaned; purge reclaims it.
                    tracing::warn!(%uid, %version_ts, %reason, "version commit collided, retrying");
                    last_conflict = Some(EngineError::Conflict(reason));
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| EngineError::Conflict("version allocation failed".into())))
    }

    /// Content of the current version: cache first, then the local store,
    /// then the remote tier with rehydration.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn get(&self, auth: &AuthContext, uid: &str) -> Result<Bytes> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "read this file")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;

        let version_ts = match entry.current_version {
            Some(ts) => ts,
            None => ctx
                .meta
                .list_versions_desc(&auth.tenant, uid)
                .await?
                .into_iter()
                .next()
                .map(|v| v.version_ts)
                .ok_or_else(|| EngineError::NotFound(format!("no content for {uid}")))?,
        };
        self.read_content(&ctx, &auth.tenant, uid, &version_ts).await
    }

    /// Content of an explicit version, with the same tiering as `get`.
    pub async fn get_version(
        &self,
        auth: &AuthContext,
        uid: &str,
        version_ts: &str,
    ) -> Result<Bytes> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "read this file")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        self.read_content(&ctx, &auth.tenant, uid, version_ts).await
    }

    /// Version timestamps, newest first.
    pub async fn list_versions(&self, auth: &AuthContext, uid: &str) -> Result<Vec<String>> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "list versions")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        let versions = ctx.meta.list_versions_desc(&auth.tenant, uid).await?;
        Ok(versions.into_iter().map(|v| v.version_ts).collect())
    }

    /// Points `current_version` back at an existing snapshot.
    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn restore_to_version(
        &self,
        auth: &AuthContext,
        uid: &str,
        version_ts: &str,
    ) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "restore this file")
            .await?;
        let entry = self.live_entry(&ctx, auth, uid).await?;
        if entry.kind != EntryKind::Regular {
            return Err(EngineError::InvalidArgument(format!(
                "{uid} is not a regular file"
            )));
        }
        ctx.meta
            .restore_to_version(&auth.tenant, uid, version_ts, ident::now_millis())
            .await
    }

    // -- metadata ----------------------------------------------------------

    pub async fn set_metadata(
        &self,
        auth: &AuthContext,
        uid: &str,
        version: &VersionRef,
        key: &str,
        value: &str,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument(
                "metadata key cannot be empty".into(),
            ));
        }
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "set metadata")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        self.require_version(&ctx, &auth.tenant, uid, version).await?;
        ctx.meta
            .set_metadata(&auth.tenant, uid, version.as_stored(), key, value)
            .await
    }

    pub async fn get_metadata(
        &self,
        auth: &AuthContext,
        uid: &str,
        version: &VersionRef,
        key: &str,
    ) -> Result<String> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "read metadata")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        ctx.meta
            .get_metadata(&auth.tenant, uid, version.as_stored(), key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("metadata key not found: {key}")))
    }

    pub async fn get_all_metadata(
        &self,
        auth: &AuthContext,
        uid: &str,
        version: &VersionRef,
    ) -> Result<Vec<(String, String)>> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::READ, "read metadata")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        ctx.meta
            .get_all_metadata(&auth.tenant, uid, version.as_stored())
            .await
    }

    pub async fn delete_metadata(
        &self,
        auth: &AuthContext,
        uid: &str,
        version: &VersionRef,
        key: &str,
    ) -> Result<()> {
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "delete metadata")
            .await?;
        self.live_entry(&ctx, auth, uid).await?;
        ctx.meta
            .delete_metadata(&auth.tenant, uid, version.as_stored(), key)
            .await
    }

    // -- permissions -------------------------------------------------------

    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn grant_permission(
        &self,
        auth: &AuthContext,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        mask: u32,
    ) -> Result<()> {
        validate_mask(mask)?;
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "grant permissions")
            .await?;
        self.acl
            .grant(ctx.meta.as_ref(), &auth.tenant, uid, principal, kind, mask)
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, auth), fields(tenant = %auth.tenant, user = %auth.user))]
    pub async fn revoke_permission(
        &self,
        auth: &AuthContext,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        mask: u32,
    ) -> Result<()> {
        validate_mask(mask)?;
        let ctx = self.context(auth)?;
        self.authorize(&ctx, auth, uid, acl::WRITE, "revoke permissions")
            .await?;
        self.acl
            .revoke(ctx.meta.as_ref(), &auth.tenant, uid, principal, kind, mask)
            .await
    }

    pub async fn check_permission(
        &self,
        auth: &AuthContext,
        uid: &str,
        required_mask: u32,
    ) -> Result<bool> {
        let ctx = self.context(auth)?;
        self.acl
            .check(
                ctx.meta.as_ref(),
                &auth.tenant,
                uid,
                &auth.user,
                &auth.roles,
                required_mask,
            )
            .await
    }

    // -- maintenance -------------------------------------------------------

    /// Retains the `keep_count` most recent versions and reclaims the rest,
    /// rows and blobs both. The current version survives even when it is
    /// older than every retained one.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn purge_old_versions(
        &self,
        tenant: &str,
        uid: &str,
        keep_count: usize,
    ) -> Result<()> {
        let ctx = self.tenant_context(tenant)?;
        let entry = ctx
            .meta
            .get_entry(tenant, uid)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("entry not found: {uid}")))?;

        let versions = ctx.meta.list_versions_desc(tenant, uid).await?;
        let mut keep: HashSet<&str> = versions
            .iter()
            .take(keep_count)
            .map(|v| v.version_ts.as_str())
            .collect();
        if let Some(current) = entry.current_version.as_deref() {
            keep.insert(current);
        }

        for version in versions.iter().filter(|v| !keep.contains(v.version_ts.as_str())) {
            // Metadata first: a dangling row is worse than an orphan blob.
            ctx.meta
                .delete_version(tenant, uid, &version.version_ts)
                .await?;
            self.cache.remove(&version.storage_path);
            if let Err(err) = ctx.local.delete_blob(&version.storage_path).await {
                crate::error::log_degraded("local blob reclamation", &err);
            }
            if let Some(object) = &ctx.object {
                if let Err(err) = object.delete_blob(uid, &version.version_ts, tenant).await {
                    crate::error::log_degraded("remote blob reclamation", &err);
                }
            }
        }
        Ok(())
    }

    /// Synchronously copies the current version to the remote tier; the
    /// blocking form of the write-back that `put` schedules.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn backup_to_object_store(&self, tenant: &str, uid: &str) -> Result<()> {
        let ctx = self.tenant_context(tenant)?;
        let Some(object) = &ctx.object else {
            return Err(EngineError::InvalidArgument(
                "no object store configured for this tenant".into(),
            ));
        };

        let entry = ctx
            .meta
            .get_entry(tenant, uid)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("entry not found: {uid}")))?;
        let version_ts = match entry.current_version {
            Some(ts) => ts,
            None => ctx
                .meta
                .list_versions_desc(tenant, uid)
                .await?
                .into_iter()
                .next()
                .map(|v| v.version_ts)
                .ok_or_else(|| EngineError::NotFound(format!("no content for {uid}")))?,
        };

        let storage_path = ctx
            .meta
            .get_version_path(tenant, uid, &version_ts)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("version {version_ts} does not exist for {uid}"))
            })?;
        let bytes = ctx.local.read_blob(&storage_path).await?;
        object.store_blob(uid, &version_ts, &bytes, tenant).await?;
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn context(&self, auth: &AuthContext) -> Result<Arc<TenantContext>> {
        self.tenant_context(&auth.tenant)
    }

    fn tenant_context(&self, tenant: &str) -> Result<Arc<TenantContext>> {
        self.tenants
            .get_tenant_context(tenant)
            .ok_or_else(|| EngineError::NotFound(format!("tenant not initialized: {tenant}")))
    }

    async fn authorize(
        &self,
        ctx: &TenantContext,
        auth: &AuthContext,
        uid: &str,
        mask: u32,
        action: &str,
    ) -> Result<()> {
        let allowed = self
            .acl
            .check(
                ctx.meta.as_ref(),
                &auth.tenant,
                uid,
                &auth.user,
                &auth.roles,
                mask,
            )
            .await?;
        if !allowed {
            return Err(EngineError::PermissionDenied(format!(
                "user {:?} may not {action}",
                auth.user
            )));
        }
        Ok(())
    }

    async fn entry(&self, ctx: &TenantContext, auth: &AuthContext, uid: &str) -> Result<Entry> {
        ctx.meta
            .get_entry(&auth.tenant, uid)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("entry not found: {uid}")))
    }

    /// Entry lookup where tombstones behave as if the entry never existed.
    async fn live_entry(
        &self,
        ctx: &TenantContext,
        auth: &AuthContext,
        uid: &str,
    ) -> Result<Entry> {
        let entry = self.entry(ctx, auth, uid).await?;
        if entry.deleted {
            return Err(EngineError::NotFound(format!("entry not found: {uid}")));
        }
        Ok(entry)
    }

    async fn require_version(
        &self,
        ctx: &TenantContext,
        tenant: &str,
        uid: &str,
        version: &VersionRef,
    ) -> Result<()> {
        if let VersionRef::At(ts) = version {
            if ctx.meta.get_version(tenant, uid, ts).await?.is_none() {
                return Err(EngineError::NotFound(format!(
                    "version {ts} does not exist for {uid}"
                )));
            }
        }
        Ok(())
    }

    /// Tiered content read: cache, local store, then the remote tier. A
    /// remote hit repopulates the local store (through the codec) and the
    /// cache; failing to do so degrades the read, it does not fail it.
    async fn read_content(
        &self,
        ctx: &TenantContext,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Bytes> {
        let storage_path = ctx
            .meta
            .get_version_path(tenant, uid, version_ts)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("version {version_ts} does not exist for {uid}"))
            })?;

        if let Some(bytes) = self.cache.get(&storage_path) {
            return Ok(bytes);
        }

        match ctx.local.read_blob(&storage_path).await {
            Ok(bytes) => {
                self.cache.add(&storage_path, bytes.clone());
                return Ok(bytes);
            }
            Err(EngineError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let Some(object) = &ctx.object else {
            return Err(EngineError::NotFound(format!(
                "content missing for {uid} at {version_ts}"
            )));
        };
        let bytes = object.read_blob(uid, version_ts, tenant).await?;

        match ctx.local.store_blob(uid, version_ts, &bytes, tenant).await {
            Ok(path) => {
                self.cache.add(&path, bytes.clone());
            }
            Err(err) => crate::error::log_degraded("local rehydration", &err),
        }
        Ok(bytes)
    }

    fn schedule_write_back(
        &self,
        ctx: &TenantContext,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        data: Bytes,
    ) {
        let Some(object) = ctx.object.clone() else {
            return;
        };
        let tenant = tenant.to_owned();
        let uid = uid.to_owned();
        let version_ts = version_ts.to_owned();
        tokio::spawn(async move {
            if let Err(err) = object.store_blob(&uid, &version_ts, &data, &tenant).await {
                crate::error::log_degraded("object-store write-back", &err);
            }
        });
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument("name cannot be empty".into()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(EngineError::InvalidArgument(format!(
            "name contains forbidden characters: {name:?}"
        )));
    }
    Ok(())
}

fn validate_mask(mask: u32) -> Result<()> {
    if mask == 0 || mask & !(acl::READ | acl::WRITE | acl::EXECUTE) != 0 {
        return Err(EngineError::InvalidArgument(format!(
            "invalid permission mask: {mask:#o}"
        )));
    }
    Ok(())
}
