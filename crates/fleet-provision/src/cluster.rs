//! Shared per-tenant cluster storage.
//!
//! ARK servers of one tenant exchange characters and items through a shared
//! directory `<root>/<tenant>`. Writers that touch the directory as a whole
//! (snapshots, restores) hold a lease: a `.lease` record created with
//! create-new semantics and carrying an expiry. An expired lease is reclaimed
//! by the next acquirer.

use crate::archive::{self, ArchiveInfo, ArchiveSource};
use chrono::{DateTime, Utc};
use fleet_core::ids::TenantId;
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEASE_FILE: &str = ".lease";
const SNAPSHOT_DIR: &str = ".snapshots";
/// rwxrwsr-x
const SHARED_DIR_MODE: u32 = 0o2775;
const SNAPSHOT_LEASE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_SNAPSHOT_RETENTION: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLease {
    pub tenant: TenantId,
    pub holder: String,
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ClusterLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct ClusterSyncManager {
    root: PathBuf,
    snapshot_retention: usize,
}

impl ClusterSyncManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    pub fn with_snapshot_retention(mut self, keep: usize) -> Self {
        self.snapshot_retention = keep.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster_dir(&self, tenant: &TenantId) -> Result<PathBuf> {
        validate_tenant(tenant)?;
        Ok(self.root.join(tenant.as_str()))
    }

    fn snapshot_dir(&self, tenant: &TenantId) -> Result<PathBuf> {
        validate_tenant(tenant)?;
        Ok(self.root.join(SNAPSHOT_DIR).join(tenant.as_str()))
    }

    /// Create the tenant's directory if needed and return it.
    pub async fn ensure_cluster_dir(&self, tenant: &TenantId) -> Result<PathBuf> {
        let dir = self.cluster_dir(tenant)?;
        create_shared_dir(&dir).await?;
        Ok(dir)
    }

    pub async fn acquire(
        &self,
        tenant: &TenantId,
        holder: &str,
        ttl: Duration,
    ) -> Result<ClusterLease> {
        let dir = self.ensure_cluster_dir(tenant).await?;
        let path = dir.join(LEASE_FILE);

        // Second pass only after the previous lease was released or reclaimed.
        for _ in 0..2 {
            let now = Utc::now();
            let lease = ClusterLease {
                tenant: tenant.clone(),
                holder: holder.to_string(),
                token: Uuid::new_v4(),
                acquired_at: now,
                expires_at: expiry(now, ttl),
            };

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&serde_json::to_vec(&lease)?).await?;
                    file.sync_all().await?;
                    debug!(tenant = %tenant, holder = %holder, "Cluster lease acquired");
                    return Ok(lease);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let stale = match read_lease_record(&path).await? {
                // Released in the meantime.
                None => continue,
                Some(LeaseRecord::Held(current)) if !current.is_expired(now) => {
                    return Err(Error::LeaseHeld {
                        tenant: tenant.to_string(),
                        holder: current.holder,
                    });
                }
                Some(LeaseRecord::Held(stale)) => {
                    warn!(
                        tenant = %tenant,
                        stale_holder = %stale.holder,
                        expired_at = %stale.expires_at,
                        "Reclaiming expired cluster lease"
                    );
                    LeaseRecord::Held(stale)
                }
                // Possibly a holder that has created the file but not yet
                // written it.
                Some(LeaseRecord::Unreadable { modified }) if !aged_past(modified, ttl) => {
                    return Err(Error::LeaseHeld {
                        tenant: tenant.to_string(),
                        holder: "unknown".to_string(),
                    });
                }
                Some(record) => {
                    warn!(tenant = %tenant, "Reclaiming unreadable cluster lease");
                    record
                }
            };

            // Another acquirer may have reclaimed it in the meantime.
            if read_lease_record(&path).await?.as_ref() == Some(&stale) {
                remove_if_exists(&path).await?;
            }
        }

        // Lost the race to another reclaimer.
        let holder = read_lease(&path)
            .await?
            .map(|l| l.holder)
            .unwrap_or_else(|| "unknown".to_string());
        Err(Error::LeaseHeld {
            tenant: tenant.to_string(),
            holder,
        })
    }

    /// Extend a lease the caller still owns.
    pub async fn renew(&self, lease: &ClusterLease, ttl: Duration) -> Result<ClusterLease> {
        let path = self.cluster_dir(&lease.tenant)?.join(LEASE_FILE);
        match read_lease(&path).await? {
            Some(current) if current.token == lease.token => {
                let renewed = ClusterLease {
                    expires_at: expiry(Utc::now(), ttl),
                    ..current
                };
                let tmp = path.with_extension("renew");
                tokio::fs::write(&tmp, serde_json::to_vec(&renewed)?).await?;
                tokio::fs::rename(&tmp, &path).await?;
                Ok(renewed)
            }
            Some(current) => Err(Error::LeaseHeld {
                tenant: lease.tenant.to_string(),
                holder: current.holder,
            }),
            None => Err(Error::Internal(format!(
                "cluster lease for {} no longer exists",
                lease.tenant
            ))),
        }
    }

    /// Delete the lease if it is still ours. Returns whether it was removed.
    pub async fn release(&self, lease: &ClusterLease) -> Result<bool> {
        let path = self.cluster_dir(&lease.tenant)?.join(LEASE_FILE);
        match read_lease(&path).await? {
            Some(current) if current.token == lease.token => {
                remove_if_exists(&path).await?;
                debug!(tenant = %lease.tenant, holder = %lease.holder, "Cluster lease released");
                Ok(true)
            }
            _ => {
                warn!(
                    tenant = %lease.tenant,
                    holder = %lease.holder,
                    "Cluster lease no longer owned at release"
                );
                Ok(false)
            }
        }
    }

    /// Current lease record, if any.
    pub async fn current_lease(&self, tenant: &TenantId) -> Result<Option<ClusterLease>> {
        read_lease(&self.cluster_dir(tenant)?.join(LEASE_FILE)).await
    }

    /// Archive the tenant directory under the lease and prune old snapshots.
    pub async fn snapshot(&self, tenant: &TenantId, holder: &str) -> Result<ArchiveInfo> {
        let lease = self.acquire(tenant, holder, SNAPSHOT_LEASE_TTL).await?;
        let result = self.snapshot_locked(tenant).await;
        self.release(&lease).await?;
        result
    }

    async fn snapshot_locked(&self, tenant: &TenantId) -> Result<ArchiveInfo> {
        let source = self.cluster_dir(tenant)?;
        let snapshots = self.snapshot_dir(tenant)?;
        create_shared_dir(&snapshots).await?;

        let dest = snapshots.join(archive::archive_name(tenant.as_str(), Utc::now()));
        let prefix = format!("{}-", tenant);
        let keep = self.snapshot_retention;

        let info = tokio::task::spawn_blocking(move || {
            let info = archive::create_archive(
                &dest,
                &[ArchiveSource {
                    name: ".".to_string(),
                    path: source,
                }],
                &[LEASE_FILE],
            )?;
            archive::prune_archives(&snapshots, &prefix, keep)?;
            Ok::<_, Error>(info)
        })
        .await
        .map_err(|e| Error::Internal(format!("snapshot task failed: {}", e)))??;

        info!(tenant = %tenant, path = %info.path.display(), "Cluster snapshot written");
        Ok(info)
    }

    pub async fn list_snapshots(&self, tenant: &TenantId) -> Result<Vec<PathBuf>> {
        let dir = self.snapshot_dir(tenant)?;
        let prefix = format!("{}-", tenant);
        tokio::task::spawn_blocking(move || archive::list_archives(&dir, &prefix))
            .await
            .map_err(|e| Error::Internal(format!("snapshot listing failed: {}", e)))?
    }

    /// Extract `snapshot` over the tenant directory under the lease.
    pub async fn restore(&self, tenant: &TenantId, snapshot: &Path, holder: &str) -> Result<()> {
        let snapshots = self.snapshot_dir(tenant)?;
        if !snapshot.starts_with(&snapshots) {
            return Err(Error::InvalidConfig(format!(
                "snapshot {} does not belong to tenant {}",
                snapshot.display(),
                tenant
            )));
        }

        let lease = self.acquire(tenant, holder, SNAPSHOT_LEASE_TTL).await?;
        let dest = self.cluster_dir(tenant)?;
        let src = snapshot.to_path_buf();
        let result = tokio::task::spawn_blocking(move || archive::extract_archive(&src, &dest))
            .await
            .map_err(|e| Error::Internal(format!("restore task failed: {}", e)))
            .and_then(|r| r);
        self.release(&lease).await?;
        result?;

        info!(tenant = %tenant, snapshot = %snapshot.display(), "Cluster snapshot restored");
        Ok(())
    }
}

fn validate_tenant(tenant: &TenantId) -> Result<()> {
    let s = tenant.as_str();
    if s.is_empty()
        || s.starts_with('.')
        || !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::InvalidConfig(format!("invalid tenant id {:?}", s)));
    }
    Ok(())
}

async fn create_shared_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(SHARED_DIR_MODE)).await?;
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum LeaseRecord {
    Held(ClusterLease),
    /// Empty or partially written.
    Unreadable { modified: SystemTime },
}

async fn read_lease_record(path: &Path) -> Result<Option<LeaseRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(lease) => Ok(Some(LeaseRecord::Held(lease))),
        Err(_) => match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(LeaseRecord::Unreadable {
                modified: meta.modified()?,
            })),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        },
    }
}

async fn read_lease(path: &Path) -> Result<Option<ClusterLease>> {
    Ok(match read_lease_record(path).await? {
        Some(LeaseRecord::Held(lease)) => Some(lease),
        _ => None,
    })
}

fn aged_past(modified: SystemTime, ttl: Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= ttl)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
