use crate::error::{EngineError, Result};

/// What an entry is: a regular file with versioned content, a directory, or
/// a symlink (metadata-only; the target lives in a metadata pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Regular => "regular",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "regular" => Ok(EntryKind::Regular),
            "directory" => Ok(EntryKind::Directory),
            "symlink" => Ok(EntryKind::Symlink),
            other => Err(EngineError::Internal(format!("unknown entry kind: {other}"))),
        }
    }
}

/// One file or directory, addressed by uid. Names are only unique among the
/// live entries of a parent; tombstoned siblings may share the name.
#[derive(Debug, Clone)]
pub struct Entry {
    pub uid: String,
    pub name: String,
    /// `None` only for tenant roots.
    pub parent_uid: Option<String>,
    pub kind: EntryKind,
    pub owner: String,
    /// Unix-style 12-bit mode; consulted only as the default-ACL seed.
    pub mode: u32,
    pub created_at: i64,
    pub modified_at: i64,
    /// Always `None` for directories.
    pub current_version: Option<String>,
    pub deleted: bool,
}

/// One immutable content snapshot of a regular entry.
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub version_ts: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub created_at: i64,
}

/// Stored sentinel for metadata bound to the entry rather than a snapshot.
pub const CURRENT_VERSION_SENTINEL: &str = "current";

/// Which snapshot a metadata operation addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    /// Metadata bound to the entry itself, following it across writes.
    Current,
    /// Metadata frozen with one content snapshot.
    At(String),
}

impl VersionRef {
    pub fn as_stored(&self) -> &str {
        match self {
            VersionRef::Current => CURRENT_VERSION_SENTINEL,
            VersionRef::At(ts) => ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Role,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Role => "role",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(PrincipalKind::User),
            "role" => Ok(PrincipalKind::Role),
            other => Err(EngineError::Internal(format!(
                "unknown principal kind: {other}"
            ))),
        }
    }
}

/// One additive grant. There are no deny rows; absence is denial.
#[derive(Debug, Clone)]
pub struct AclRow {
    pub uid: String,
    pub principal: String,
    pub kind: PrincipalKind,
    pub perm_mask: u32,
}

/// Transactional store of entries, versions, metadata pairs and ACL rows.
/// Every operation is tenant-scoped; implementations must guarantee that
/// `commit_version` and `restore_to_version` are single transactions and
/// that listing order is deterministic (name ascending, creation time
/// ascending as tie-break).
#[async_trait::async_trait]
pub trait MetaStore: Send + Sync + std::fmt::Debug + 'static {
    // -- tenant registry ---------------------------------------------------
    async fn create_tenant_schema(&self, tenant: &str) -> Result<()>;
    async fn tenant_schema_exists(&self, tenant: &str) -> Result<bool>;

    // -- entries -----------------------------------------------------------
    async fn insert_entry(&self, tenant: &str, entry: &Entry) -> Result<()>;
    async fn get_entry(&self, tenant: &str, uid: &str) -> Result<Option<Entry>>;
    /// Live (non-tombstoned) child of `parent` with the given name.
    async fn find_child(
        &self,
        tenant: &str,
        parent_uid: Option<&str>,
        name: &str,
    ) -> Result<Option<Entry>>;
    async fn update_entry_name(
        &self,
        tenant: &str,
        uid: &str,
        new_name: &str,
        modified_at: i64,
    ) -> Result<()>;
    async fn mark_deleted(&self, tenant: &str, uid: &str, modified_at: i64) -> Result<()>;
    async fn mark_undeleted(&self, tenant: &str, uid: &str, modified_at: i64) -> Result<()>;
    async fn list_children(&self, tenant: &str, parent_uid: &str) -> Result<Vec<Entry>>;
    async fn list_children_including_deleted(
        &self,
        tenant: &str,
        parent_uid: &str,
    ) -> Result<Vec<Entry>>;
    async fn count_live_children(&self, tenant: &str, parent_uid: &str) -> Result<i64>;

    // -- versions ----------------------------------------------------------
    async fn insert_version(&self, tenant: &str, uid: &str, version: &VersionRow) -> Result<()>;
    async fn set_current_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: Option<&str>,
        modified_at: i64,
    ) -> Result<()>;
    /// Inserts the version row and points `current_version` at it, bumping
    /// `modified_at`, all in one transaction. A duplicate `version_ts` for
    /// the uid fails with `Conflict`.
    async fn commit_version(
        &self,
        tenant: &str,
        uid: &str,
        version: &VersionRow,
        modified_at: i64,
    ) -> Result<()>;
    /// Points `current_version` at an existing version in one transaction;
    /// fails with `NotFound` when the version row does not exist.
    async fn restore_to_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        modified_at: i64,
    ) -> Result<()>;
    async fn list_versions_desc(&self, tenant: &str, uid: &str) -> Result<Vec<VersionRow>>;
    async fn get_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Option<VersionRow>>;
    async fn get_version_path(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Option<String>>;
    /// Removes the version row and its snapshot-bound metadata pairs.
    async fn delete_version(&self, tenant: &str, uid: &str, version_ts: &str) -> Result<()>;

    // -- metadata pairs ----------------------------------------------------
    async fn set_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;
    async fn get_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
    ) -> Result<Option<String>>;
    async fn get_all_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Vec<(String, String)>>;
    async fn delete_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
    ) -> Result<()>;

    // -- acl rows ----------------------------------------------------------
    async fn insert_acl(&self, tenant: &str, row: &AclRow) -> Result<()>;
    async fn get_acl(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
    ) -> Result<Option<AclRow>>;
    async fn update_acl_mask(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        perm_mask: u32,
    ) -> Result<()>;
    async fn delete_acl(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
    ) -> Result<()>;
    async fn list_acl_for_uid(&self, tenant: &str, uid: &str) -> Result<Vec<AclRow>>;
}
