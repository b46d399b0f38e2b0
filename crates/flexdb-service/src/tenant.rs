//! Tenant lifecycle in the control store.

use flexdb_core::types::{
    present_text, CreateTenant, Tenant, TenantId, TenantUserFilter, UpdateTenant,
};
use flexdb_core::{FlexError, FlexResult, Page, PageRequest};
use flexdb_store::records::{NodeTypeRecord, TenantRecord, TenantUserRecord};
use flexdb_store::Repository;

use crate::access::TenantAccess;
use crate::error::{require, StoreResultExt};

#[derive(Clone)]
pub struct TenantService {
    tenants: Repository<TenantRecord>,
    memberships: Repository<TenantUserRecord>,
    access: TenantAccess,
}

impl TenantService {
    pub fn new(
        tenants: Repository<TenantRecord>,
        memberships: Repository<TenantUserRecord>,
        access: TenantAccess,
    ) -> Self {
        Self {
            tenants,
            memberships,
            access,
        }
    }

    /// Register a tenant. Its database is provisioned on first use.
    pub async fn create(&self, input: &CreateTenant) -> FlexResult<Tenant> {
        require(&input.slug, "slug")?;
        require(&input.name, "name")?;

        let tenant = self.tenants.create(input).await.during("create_tenant")?;
        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Created tenant");
        Ok(tenant)
    }

    pub async fn get(&self, id: TenantId) -> FlexResult<Tenant> {
        self.tenants.get_by_id(id).await.during("get_tenant")
    }

    /// The slug cannot change; repeating the current slug is accepted.
    pub async fn update(&self, id: TenantId, input: &UpdateTenant) -> FlexResult<Tenant> {
        if let Some(slug) = present_text(&input.slug) {
            let current = self.get(id).await?;
            if slug != current.slug {
                return Err(FlexError::validation("slug cannot be changed"));
            }
        }
        self.tenants.update(id, input).await.during("update_tenant")
    }

    /// Delete a tenant that has no members and no node types, dropping its
    /// database first.
    pub async fn delete(&self, id: TenantId) -> FlexResult<()> {
        self.get(id).await?;

        let members = self
            .memberships
            .count(&TenantUserFilter {
                tenant_id: Some(id),
                user_id: None,
            })
            .await
            .during("count_tenant_users")?;
        if members > 0 {
            return Err(FlexError::conflict(
                "tenant",
                format!("tenant still has {members} member(s)"),
            ));
        }

        let manager = self.access.manager();
        let provisioned = manager
            .provisioner()
            .is_provisioned(&id)
            .await
            .during("lookup_tenant_database")?;
        if provisioned {
            let scope = self.access.open(id).await?;
            let node_types = scope
                .repo::<NodeTypeRecord>()
                .count(&())
                .await
                .during("count_node_types")?;
            if node_types > 0 {
                return Err(FlexError::conflict(
                    "tenant",
                    format!("tenant still has {node_types} node type(s)"),
                ));
            }
        }

        // Database first: if dropping it fails the tenant row survives and
        // a retry can finish the job.
        manager.drop_database(&id).await.during("drop_tenant_database")?;
        self.tenants.delete(id).await.during("delete_tenant")?;
        tracing::info!(tenant_id = %id, "Deleted tenant");
        Ok(())
    }

    pub async fn list(&self, page: &PageRequest) -> FlexResult<Page<Tenant>> {
        self.tenants.list(&(), page).await.during("list_tenants")
    }
}
