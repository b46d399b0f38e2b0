//! Tenant-scoped access: existence check, then the tenant's pool.

use std::time::Duration;

use sqlx::PgPool;
use tokio::time::Instant;

use flexdb_core::config::PaginationConfig;
use flexdb_core::deadline::with_deadline;
use flexdb_core::types::TenantId;
use flexdb_core::FlexResult;
use flexdb_store::records::TenantRecord;
use flexdb_store::{PgTenantManager, Record, Repository};

use crate::error::StoreResultExt;

/// Resolves repositories inside a tenant's database.
///
/// Clone is cheap.
#[derive(Clone)]
pub struct TenantAccess {
    tenants: Repository<TenantRecord>,
    manager: PgTenantManager,
    limits: PaginationConfig,
    provision_timeout: Option<Duration>,
}

impl TenantAccess {
    pub fn new(
        tenants: Repository<TenantRecord>,
        manager: PgTenantManager,
        limits: PaginationConfig,
        provision_timeout: Option<Duration>,
    ) -> Self {
        Self {
            tenants,
            manager,
            limits,
            provision_timeout,
        }
    }

    pub fn manager(&self) -> &PgTenantManager {
        &self.manager
    }

    /// Fails with NotFound unless the tenant exists in the control store.
    pub async fn ensure_tenant(&self, tenant_id: TenantId) -> FlexResult<()> {
        self.tenants.get_by_id(tenant_id).await.during("get_tenant")?;
        Ok(())
    }

    /// Open the tenant's database, provisioning it on first use.
    ///
    /// Waiting for provisioning is bounded by the configured timeout
    /// (DeadlineExceeded); the provisioning run itself carries on and a
    /// later call picks up its pool.
    pub async fn open(&self, tenant_id: TenantId) -> FlexResult<TenantScope> {
        self.ensure_tenant(tenant_id).await?;
        let deadline = self.provision_timeout.map(|timeout| Instant::now() + timeout);
        let pool = with_deadline(deadline, async {
            self.manager
                .acquire(&tenant_id)
                .await
                .during("acquire_tenant_pool")
        })
        .await?;
        Ok(TenantScope {
            pool,
            tenant_id,
            limits: self.limits.clone(),
        })
    }
}

/// An open tenant database.
pub struct TenantScope {
    pool: PgPool,
    tenant_id: TenantId,
    limits: PaginationConfig,
}

impl TenantScope {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn repo<R: Record>(&self) -> Repository<R> {
        Repository::scoped(self.pool.clone(), self.tenant_id, self.limits.clone())
    }
}
