//! The assembled flexdb data service.

use flexdb_core::FlexConfig;
use flexdb_store::records::{TenantRecord, TenantUserRecord, UserRecord};
use flexdb_store::{
    ControlStore, PgTenantManager, PostgresProvisioner, Repository, StoreResult, TenantDbManager,
};

use crate::access::TenantAccess;
use crate::node::NodeService;
use crate::node_type::NodeTypeService;
use crate::relationship::RelationshipService;
use crate::tenant::TenantService;
use crate::user::UserService;

/// Entry point exposing one service per entity.
///
/// Clone is cheap; clones share pools and the tenant cache.
#[derive(Clone)]
pub struct Flexdb {
    control: ControlStore,
    manager: PgTenantManager,
    tenants: TenantService,
    users: UserService,
    node_types: NodeTypeService,
    nodes: NodeService,
    relationships: RelationshipService,
}

impl Flexdb {
    /// Connect to the control store (creating and migrating it if needed).
    pub async fn connect(config: &FlexConfig) -> StoreResult<Self> {
        let control = ControlStore::connect(&config.database).await?;
        Ok(Self::assemble(control, config))
    }

    /// Assemble without contacting the server.
    pub fn connect_lazy(config: &FlexConfig) -> StoreResult<Self> {
        let control = ControlStore::connect_lazy(&config.database)?;
        Ok(Self::assemble(control, config))
    }

    fn assemble(control: ControlStore, config: &FlexConfig) -> Self {
        let limits = config.pagination.clone();
        let pool = control.pool().clone();

        let provisioner = PostgresProvisioner::new(control.clone(), &config.tenancy);
        let manager = TenantDbManager::new(provisioner, config.tenancy.max_open_pools);

        let tenant_repo = Repository::<TenantRecord>::control(pool.clone(), limits.clone());
        let user_repo = Repository::<UserRecord>::control(pool.clone(), limits.clone());
        let membership_repo = Repository::<TenantUserRecord>::control(pool, limits.clone());

        let access = TenantAccess::new(
            tenant_repo.clone(),
            manager.clone(),
            limits,
            config.tenancy.provision_timeout(),
        );

        Self {
            tenants: TenantService::new(tenant_repo, membership_repo.clone(), access.clone()),
            users: UserService::new(user_repo, membership_repo, access.clone()),
            node_types: NodeTypeService::new(access.clone()),
            nodes: NodeService::new(access.clone()),
            relationships: RelationshipService::new(access),
            control,
            manager,
        }
    }

    pub fn tenants(&self) -> &TenantService {
        &self.tenants
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }

    pub fn node_types(&self) -> &NodeTypeService {
        &self.node_types
    }

    pub fn nodes(&self) -> &NodeService {
        &self.nodes
    }

    pub fn relationships(&self) -> &RelationshipService {
        &self.relationships
    }

    pub fn control(&self) -> &ControlStore {
        &self.control
    }

    pub fn tenant_databases(&self) -> &PgTenantManager {
        &self.manager
    }

    /// Close every tenant pool and the control pools.
    pub async fn close(&self) {
        self.manager.close_all().await;
        self.control.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexdb_core::types::{
        CreateNodeType, CreateRelationship, CreateTenant, CreateUser, NodeId, TenantId,
    };
    use flexdb_core::ErrorKind;

    fn offline() -> Flexdb {
        Flexdb::connect_lazy(&FlexConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_tenant_requires_slug_and_name() {
        let db = offline();

        let err = db
            .tenants()
            .create(&CreateTenant {
                slug: String::new(),
                name: "Acme".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("slug is required"));

        let err = db
            .tenants()
            .create(&CreateTenant {
                slug: "acme".into(),
                name: " ".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("name is required"));
    }

    #[tokio::test]
    async fn test_user_requires_email_and_display_name() {
        let db = offline();

        let err = db
            .users()
            .create(&CreateUser {
                email: String::new(),
                display_name: "Ada".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("email is required"));

        let err = db
            .users()
            .create(&CreateUser {
                email: "ada@example.com".into(),
                display_name: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("display_name is required"));
    }

    #[tokio::test]
    async fn test_node_type_requires_name() {
        let err = offline()
            .node_types()
            .create(TenantId::new(), &CreateNodeType::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("name is required"));
    }

    #[tokio::test]
    async fn test_relationship_validation_precedes_storage() {
        let db = offline();
        let node = NodeId::new();

        let err = db
            .relationships()
            .create(
                TenantId::new(),
                &CreateRelationship {
                    source_node_id: node,
                    target_node_id: NodeId::new(),
                    relationship_type: String::new(),
                    data: None,
                    forbid_self_loop: false,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("relationship_type is required"));

        let err = db
            .relationships()
            .create(
                TenantId::new(),
                &CreateRelationship {
                    source_node_id: node,
                    target_node_id: node,
                    relationship_type: "self".into(),
                    data: None,
                    forbid_self_loop: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_offline_starts_with_no_tenant_pools() {
        let db = offline();
        assert_eq!(db.tenant_databases().open_pools().await, 0);
    }
}
