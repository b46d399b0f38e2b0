//! Users and their tenant memberships.

use flexdb_core::types::{
    AddTenantUser, CreateUser, TenantId, TenantUser, TenantUserFilter, UpdateUser, User, UserId,
};
use flexdb_core::{FlexError, FlexResult, Page, PageRequest};
use flexdb_store::records::{TenantUserRecord, UserRecord};
use flexdb_store::Repository;

use crate::access::TenantAccess;
use crate::error::{require, StoreResultExt};

#[derive(Clone)]
pub struct UserService {
    users: Repository<UserRecord>,
    memberships: Repository<TenantUserRecord>,
    access: TenantAccess,
}

impl UserService {
    pub fn new(
        users: Repository<UserRecord>,
        memberships: Repository<TenantUserRecord>,
        access: TenantAccess,
    ) -> Self {
        Self {
            users,
            memberships,
            access,
        }
    }

    pub async fn create(&self, input: &CreateUser) -> FlexResult<User> {
        require(&input.email, "email")?;
        require(&input.display_name, "display_name")?;
        self.users.create(input).await.during("create_user")
    }

    pub async fn get(&self, id: UserId) -> FlexResult<User> {
        self.users.get_by_id(id).await.during("get_user")
    }

    pub async fn update(&self, id: UserId, input: &UpdateUser) -> FlexResult<User> {
        self.users.update(id, input).await.during("update_user")
    }

    /// Refused while the user belongs to any tenant.
    pub async fn delete(&self, id: UserId) -> FlexResult<()> {
        self.get(id).await?;

        let memberships = self
            .memberships
            .count(&TenantUserFilter {
                tenant_id: None,
                user_id: Some(id),
            })
            .await
            .during("count_tenant_users")?;
        if memberships > 0 {
            return Err(FlexError::conflict(
                "user",
                format!("user still belongs to {memberships} tenant(s)"),
            ));
        }

        self.users.delete(id).await.during("delete_user")
    }

    pub async fn list(&self, page: &PageRequest) -> FlexResult<Page<User>> {
        self.users.list(&(), page).await.during("list_users")
    }

    // ── Memberships ───────────────────────────────────────────────

    /// Both sides must exist; a repeated membership is a Conflict.
    pub async fn add_user_to_tenant(&self, input: &AddTenantUser) -> FlexResult<TenantUser> {
        self.access.ensure_tenant(input.tenant_id).await?;
        self.get(input.user_id).await?;

        let membership = self
            .memberships
            .create(input)
            .await
            .during("add_tenant_user")?;
        tracing::info!(
            tenant_id = %membership.tenant_id,
            user_id = %membership.user_id,
            role = %membership.role,
            "Added user to tenant"
        );
        Ok(membership)
    }

    pub async fn remove_user_from_tenant(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> FlexResult<()> {
        let removed = self
            .memberships
            .delete_where(&TenantUserFilter {
                tenant_id: Some(tenant_id),
                user_id: Some(user_id),
            })
            .await
            .during("remove_tenant_user")?;
        if removed == 0 {
            return Err(FlexError::not_found(
                "tenant_user",
                format!("{tenant_id}/{user_id}"),
            ));
        }
        Ok(())
    }

    pub async fn list_tenant_users(
        &self,
        tenant_id: TenantId,
        page: &PageRequest,
    ) -> FlexResult<Page<TenantUser>> {
        self.access.ensure_tenant(tenant_id).await?;
        let filter = TenantUserFilter {
            tenant_id: Some(tenant_id),
            user_id: None,
        };
        self.memberships
            .list(&filter, page)
            .await
            .during("list_tenant_users")
    }

    pub async fn list_user_tenants(
        &self,
        user_id: UserId,
        page: &PageRequest,
    ) -> FlexResult<Page<TenantUser>> {
        self.get(user_id).await?;
        let filter = TenantUserFilter {
            tenant_id: None,
            user_id: Some(user_id),
        };
        self.memberships
            .list(&filter, page)
            .await
            .during("list_user_tenants")
    }
}
