use crate::error::Result;
use crate::meta_store::{AclRow, MetaStore, PrincipalKind};

pub const READ: u32 = 1;
pub const WRITE: u32 = 2;
pub const EXECUTE: u32 = 4;

/// "Others" read bit of a Unix-style mode, the only mode bit consulted by
/// the fallback check.
const MODE_OTHERS_READ: u32 = 0o004;

/// Evaluates and mutates ACL rows. Grants are additive and there are no
/// deny rows; `grant`/`revoke` never consult the target entry, so callers
/// must authorize them separately.
#[derive(Debug, Default)]
pub struct AclEngine;

impl AclEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether `user` (with `roles`) holds every bit of `required_mask` on
    /// `uid`. A missing entry denies rather than erroring: the answer never
    /// reveals which rows exist.
    pub async fn check(
        &self,
        meta: &dyn MetaStore,
        tenant: &str,
        uid: &str,
        user: &str,
        roles: &[String],
        required_mask: u32,
    ) -> Result<bool> {
        let Some(entry) = meta.get_entry(tenant, uid).await? else {
            return Ok(false);
        };

        // Tenant roots answer to the superuser unconditionally.
        if entry.parent_uid.is_none() && user == "root" {
            return Ok(true);
        }

        let rows = meta.list_acl_for_uid(tenant, uid).await?;
        if rows.is_empty() {
            // No rows at all: fall back to the owner and the mode seed.
            let mut effective = 0;
            if user == entry.owner {
                effective |= READ | WRITE;
            }
            if entry.mode & MODE_OTHERS_READ != 0 {
                effective |= READ;
            }
            return Ok(effective & required_mask == required_mask);
        }

        let mut effective = 0;
        for row in rows {
            let matches = match row.kind {
                PrincipalKind::User => row.principal == user,
                PrincipalKind::Role => roles.iter().any(|r| *r == row.principal),
            };
            if matches {
                effective |= row.perm_mask;
            }
        }
        Ok(effective & required_mask == required_mask)
    }

    /// Seeds the creator's grant on a fresh entry: read and write, plus
    /// execute on directories (traversal).
    pub async fn apply_default_acls(
        &self,
        meta: &dyn MetaStore,
        tenant: &str,
        uid: &str,
        owner: &str,
        is_directory: bool,
    ) -> Result<()> {
        let mut mask = READ | WRITE;
        if is_directory {
            mask |= EXECUTE;
        }
        self.grant(meta, tenant, uid, owner, PrincipalKind::User, mask)
            .await
    }

    /// Idempotent: the mask is OR-merged into an existing row.
    pub async fn grant(
        &self,
        meta: &dyn MetaStore,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        mask: u32,
    ) -> Result<()> {
        match meta.get_acl(tenant, uid, principal, kind).await? {
            Some(existing) => {
                let merged = existing.perm_mask | mask;
                if merged != existing.perm_mask {
                    meta.update_acl_mask(tenant, uid, principal, kind, merged)
                        .await?;
                }
                Ok(())
            }
            None => {
                meta.insert_acl(
                    tenant,
                    &AclRow {
                        uid: uid.to_owned(),
                        principal: principal.to_owned(),
                        kind,
                        perm_mask: mask,
                    },
                )
                .await
            }
        }
    }

    /// Clears the given bits; the row is deleted once its mask reaches zero.
    /// Revoking from an absent row is a no-op.
    pub async fn revoke(
        &self,
        meta: &dyn MetaStore,
        tenant: &str,
        uid: &str,
        principal: &str,
        kind: PrincipalKind,
        mask: u32,
    ) -> Result<()> {
        let Some(existing) = meta.get_acl(tenant, uid, principal, kind).await? else {
            return Ok(());
        };
        let remaining = existing.perm_mask & !mask;
        if remaining == 0 {
            meta.delete_acl(tenant, uid, principal, kind).await
        } else {
            meta.update_acl_mask(tenant, uid, principal, kind, remaining)
                .await
        }
    }
}
