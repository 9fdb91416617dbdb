use std::fmt::Debug;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{EngineError, Result};
use crate::meta_store::{AclRow, Entry, EntryKind, MetaStore, PrincipalKind, VersionRow};

/// SQLite-backed metadata store. Tenant scoping is per call: every table
/// carries the tenant label as the leading primary-key column.
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish()
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tenants (
        tenant TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS entries (
        tenant TEXT NOT NULL,
        uid TEXT NOT NULL,
        name TEXT NOT NULL,
        parent_uid TEXT,
        kind TEXT NOT NULL,
        owner TEXT NOT NULL,
        mode INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        current_version TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tenant, uid)
    )",
    // Name uniqueness holds among live entries only; tombstones may pile up
    // under the same name.
    "CREATE UNIQUE INDEX IF NOT EXISTS entries_live_name
        ON entries (tenant, COALESCE(parent_uid, ''), name) WHERE deleted = 0",
    "CREATE INDEX IF NOT EXISTS entries_by_parent ON entries (tenant, parent_uid)",
    "CREATE TABLE IF NOT EXISTS versions (
        tenant TEXT NOT NULL,
        uid TEXT NOT NULL,
        version_ts TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        storage_path TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (tenant, uid, version_ts)
    )",
    "CREATE TABLE IF NOT EXISTS metadata (
        tenant TEXT NOT NULL,
        uid TEXT NOT NULL,
        version_ts TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (tenant, uid, version_ts, key)
    )",
    "CREATE TABLE IF NOT EXISTS acls (
        tenant TEXT NOT NULL,
        uid TEXT NOT NULL,
        principal TEXT NOT NULL,
        principal_kind TEXT NOT NULL,
        perm_mask INTEGER NOT NULL,
        PRIMARY KEY (tenant, uid, principal, principal_kind)
    )",
];

impl SqliteDatabase {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let pool = if cfg.db_name == ":memory:" {
            // A pooled in-memory database must stay on one connection or
            // every checkout would see a different empty database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::new().filename(":memory:"))
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&cfg.db_name)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(dbe) if dbe.is_unique_violation())
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<Entry> {
    Ok(Entry {
        uid: row.try_get("uid")?,
        name: row.try_get("name")?,
        parent_uid: row.try_get("parent_uid")?,
        kind: EntryKind::parse(&row.try_get::<String, _>("kind")?)?,
        owner: row.try_get("owner")?,
        mode: row.try_get::<i64, _>("mode")? as u32,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
        current_version: row.try_get("current_version")?,
        deleted: row.try_get("deleted")?,
    })
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> Result<VersionRow> {
    Ok(VersionRow {
        version_ts: row.try_get("version_ts")?,
        size_bytes: row.try_get("size_bytes")?,
        storage_path: row.try_get("storage_path")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_acl(row: &sqlx::sqlite::SqliteRow) -> Result<AclRow> {
    Ok(AclRow {
        uid: row.try_get("uid")?,
        principal: row.try_get("principal")?,
        kind: PrincipalKind::parse(&row.try_get::<String, _>("principal_kind")?)?,
        perm_mask: row.try_get::<i64, _>("perm_mask")? as u32,
    })
}

const ENTRY_COLUMNS: &str =
    "uid, name, parent_uid, kind, owner, mode, created_at, modified_at, current_version, deleted";

#[async_trait::async_trait]
impl MetaStore for SqliteDatabase {
    async fn create_tenant_schema(&self, tenant: &str) -> Result<()> {
        self.create_tables().await?;
        sqlx::query("INSERT INTO tenants (tenant, created_at) VALUES ($1, $2) ON CONFLICT (tenant) DO NOTHING")
            .bind(tenant)
            .bind(crate::ident::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tenant_schema_exists(&self, tenant: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM tenants WHERE tenant = $1")
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    #[tracing::instrument(level = "debug", skip(self, entry), fields(uid = %entry.uid))]
    async fn insert_entry(&self, tenant: &str, entry: &Entry) -> Result<()> {
        let res = sqlx::query(
            "INSERT INTO entries (tenant, uid, name, parent_uid, kind, owner, mode, \
             created_at, modified_at, current_version, deleted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(tenant)
        .bind(&entry.uid)
        .bind(&entry.name)
        .bind(&entry.parent_uid)
        .bind(entry.kind.as_str())
        .bind(&entry.owner)
        .bind(entry.mode as i64)
        .bind(entry.created_at)
        .bind(entry.modified_at)
        .bind(&entry.current_version)
        .bind(entry.deleted)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(EngineError::AlreadyExists(format!(
                "entry named {:?} already exists under this parent",
                entry.name
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_entry(&self, tenant: &str, uid: &str) -> Result<Option<Entry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE tenant = $1 AND uid = $2"
        ))
        .bind(tenant)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn find_child(
        &self,
        tenant: &str,
        parent_uid: Option<&str>,
        name: &str,
    ) -> Result<Option<Entry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE tenant = $1 AND COALESCE(parent_uid, '') = $2 AND name = $3 AND deleted = 0"
        ))
        .bind(tenant)
        .bind(parent_uid.unwrap_or(""))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_entry_name(
        &self,
        tenant: &str,
        uid: &str,
        new_name: &str,
        modified_at: i64,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE entries SET name = $3, modified_at = $4 WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(new_name)
        .bind(modified_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 0 => {
                Err(EngineError::NotFound(format!("entry not found: {uid}")))
            }
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(EngineError::AlreadyExists(format!(
                "entry named {new_name:?} already exists under this parent"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_deleted(&self, tenant: &str, uid: &str, modified_at: i64) -> Result<()> {
        let done = sqlx::query(
            "UPDATE entries SET deleted = 1, modified_at = $3 WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("entry not found: {uid}")));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_undeleted(&self, tenant: &str, uid: &str, modified_at: i64) -> Result<()> {
        let res = sqlx::query(
            "UPDATE entries SET deleted = 0, modified_at = $3 WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(modified_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 0 => {
                Err(EngineError::NotFound(format!("entry not found: {uid}")))
            }
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(EngineError::AlreadyExists(
                "a live entry with the same name already exists".into(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_children(&self, tenant: &str, parent_uid: &str) -> Result<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE tenant = $1 AND parent_uid = $2 AND deleted = 0 \
             ORDER BY name ASC, created_at ASC"
        ))
        .bind(tenant)
        .bind(parent_uid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_children_including_deleted(
        &self,
        tenant: &str,
        parent_uid: &str,
    ) -> Result<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE tenant = $1 AND parent_uid = $2 \
             ORDER BY name ASC, created_at ASC"
        ))
        .bind(tenant)
        .bind(parent_uid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn count_live_children(&self, tenant: &str, parent_uid: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM entries \
             WHERE tenant = $1 AND parent_uid = $2 AND deleted = 0",
        )
        .bind(tenant)
        .bind(parent_uid)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    #[tracing::instrument(level = "debug", skip(self, version), fields(version_ts = %version.version_ts))]
    async fn insert_version(&self, tenant: &str, uid: &str, version: &VersionRow) -> Result<()> {
        let res = sqlx::query(
            "INSERT INTO versions (tenant, uid, version_ts, size_bytes, storage_path, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(tenant)
        .bind(uid)
        .bind(&version.version_ts)
        .bind(version.size_bytes)
        .bind(&version.storage_path)
        .bind(version.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(EngineError::Conflict(format!(
                "version {} already exists for {uid}",
                version.version_ts
            ))),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn set_current_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: Option<&str>,
        modified_at: i64,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE entries SET current_version = $3, modified_at = $4 \
             WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("entry not found: {uid}")));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, version), fields(version_ts = %version.version_ts))]
    async fn commit_version(
        &self,
        tenant: &str,
        uid: &str,
        version: &VersionRow,
        modified_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "INSERT INTO versions (tenant, uid, version_ts, size_bytes, storage_path, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(tenant)
        .bind(uid)
        .bind(&version.version_ts)
        .bind(version.size_bytes)
        .bind(&version.storage_path)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = res {
            return Err(if is_unique_violation(&err) {
                EngineError::Conflict(format!(
                    "version {} already exists for {uid}",
                    version.version_ts
                ))
            } else {
                err.into()
            });
        }

        let done = sqlx::query(
            "UPDATE entries SET current_version = $3, modified_at = $4 \
             WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(&version.version_ts)
        .bind(modified_at)
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("entry not found: {uid}")));
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn restore_to_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        modified_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query(
            "SELECT 1 FROM versions WHERE tenant = $1 AND uid = $2 AND version_ts = $3",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!(
                "version {version_ts} does not exist for {uid}"
            )));
        }

        sqlx::query(
            "UPDATE entries SET current_version = $3, modified_at = $4 \
             WHERE tenant = $1 AND uid = $2",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .bind(modified_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_versions_desc(&self, tenant: &str, uid: &str) -> Result<Vec<VersionRow>> {
        let rows = sqlx::query(
            "SELECT version_ts, size_bytes, storage_path, created_at FROM versions \
             WHERE tenant = $1 AND uid = $2 ORDER BY version_ts DESC",
        )
        .bind(tenant)
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_version).collect()
    }

    async fn get_version(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Option<VersionRow>> {
        let row = sqlx::query(
            "SELECT version_ts, size_bytes, storage_path, created_at FROM versions \
             WHERE tenant = $1 AND uid = $2 AND version_ts = $3",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_version).transpose()
    }

    async fn get_version_path(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT storage_path FROM versions \
             WHERE tenant = $1 AND uid = $2 AND version_ts = $3",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get("storage_path")).transpose()?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_version(&self, tenant: &str, uid: &str, version_ts: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM versions WHERE tenant = $1 AND uid = $2 AND version_ts = $3")
            .bind(tenant)
            .bind(uid)
            .bind(version_ts)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM metadata WHERE tenant = $1 AND uid = $2 AND version_ts = $3")
            .bind(tenant)
            .bind(uid)
            .bind(version_ts)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO metadata (tenant, uid, version_ts, key, value) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (tenant, uid, version_ts, key) DO UPDATE SET value = excluded.value",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM metadata \
             WHERE tenant = $1 AND uid = $2 AND version_ts = $3 AND key = $4",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }

    async fn get_all_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM metadata \
             WHERE tenant = $1 AND uid = $2 AND version_ts = $3 ORDER BY key ASC",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| Ok((r.try_get("key")?, r.try_get("value")?)))
            .collect()
    }

    async fn delete_metadata(
        &self,
        tenant: &str,
        uid: &str,
        version_ts: &str,
        key: &str,
    ) -> Result<()> {
        let done = sqlx::query(
            "DELETE FROM metadata \
             WHERE tenant = $1 AND uid = $2 AND version_ts = $3 AND key = $4",
        )
        .bind(tenant)
        .bind(uid)
        .bind(version_ts)
        .bind(key)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("metadata key not found: {key}")));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, row), fields(uid = %row.uid, principal = %row.principal))]
    async fn insert_acl(&self, tenant: &str, row: &AclRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO acls (tenant, uid, principal, principal_kind, perm_mask) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tenant)
        .bind(&row.uid)
        .bind(&row.principal)
        .bind(row.kind.as_str())
        .bind(row.perm_mask as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_acl(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
    ) -> Result<Option<AclRow>> {
        let row = sqlx::query(
            "SELECT uid, principal, principal_kind, perm_mask FROM acls \
             WHERE tenant = $1 AND uid = $2 AND principal = $3 AND principal_kind = $4",
        )
        .bind(tenant)
        .bind(uid)
        .bind(principal)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_acl).transpose()
    }

    async fn update_acl_mask(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        perm_mask: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE acls SET perm_mask = $5 \
             WHERE tenant = $1 AND uid = $2 AND principal = $3 AND principal_kind = $4",
        )
        .bind(tenant)
        .bind(uid)
        .bind(principal)
        .bind(kind.as_str())
        .bind(perm_mask as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_acl(
        &self,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM acls \
             WHERE tenant = $1 AND uid = $2 AND principal = $3 AND principal_kind = $4",
        )
        .bind(tenant)
        .bind(uid)
        .bind(principal)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_acl_for_uid(&self, tenant: &str, uid: &str) -> Result<Vec<AclRow>> {
        let rows = sqlx::query(
            "SELECT uid, principal, principal_kind, perm_mask FROM acls \
             WHERE tenant = $1 AND uid = $2 ORDER BY principal_kind ASC, principal ASC",
        )
        .bind(tenant)
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_acl).collect()
    }
}
