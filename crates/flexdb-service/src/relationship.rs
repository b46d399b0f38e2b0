use flexdb_core::types::{
    CreateRelationship, Relationship, RelationshipFilter, RelationshipId, TenantId,
    UpdateRelationship,
};
use flexdb_core::{FlexError, FlexResult, Page, PageRequest};
use flexdb_store::records::{NodeRecord, RelationshipRecord};

use crate::access::TenantAccess;
use crate::error::{require, StoreResultExt};

#[derive(Clone)]
pub struct RelationshipService {
    access: TenantAccess,
}

impl RelationshipService {
    pub fn new(access: TenantAccess) -> Self {
        Self { access }
    }

    /// Both endpoints must exist in the tenant. Self-loops are accepted
    /// unless the request forbids them.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        input: &CreateRelationship,
    ) -> FlexResult<Relationship> {
        require(&input.relationship_type, "relationship_type")?;
        if input.forbid_self_loop && input.source_node_id == input.target_node_id {
            return Err(FlexError::validation(
                "source_node_id and target_node_id must differ",
            ));
        }

        let scope = self.access.open(tenant_id).await?;
        let nodes = scope.repo::<NodeRecord>();
        for endpoint in [input.source_node_id, input.target_node_id] {
            if !nodes.exists(endpoint).await.during("get_node")? {
                return Err(FlexError::not_found("node", endpoint));
            }
        }

        scope
            .repo::<RelationshipRecord>()
            .create(input)
            .await
            .during("create_relationship")
    }

    pub async fn get(&self, tenant_id: TenantId, id: RelationshipId) -> FlexResult<Relationship> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<RelationshipRecord>()
            .get_by_id(id)
            .await
            .during("get_relationship")
    }

    pub async fn update(
        &self,
        tenant_id: TenantId,
        id: RelationshipId,
        input: &UpdateRelationship,
    ) -> FlexResult<Relationship> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<RelationshipRecord>()
            .update(id, input)
            .await
            .during("update_relationship")
    }

    pub async fn delete(&self, tenant_id: TenantId, id: RelationshipId) -> FlexResult<()> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<RelationshipRecord>()
            .delete(id)
            .await
            .during("delete_relationship")
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &RelationshipFilter,
        page: &PageRequest,
    ) -> FlexResult<Page<Relationship>> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<RelationshipRecord>()
            .list(filter, page)
            .await
            .during("list_relationships")
    }
}
