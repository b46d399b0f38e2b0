use flexdb_core::types::{
    CreateNode, Node, NodeFilter, NodeId, RelationshipFilter, TenantId, UpdateNode,
};
use flexdb_core::{FlexError, FlexResult, Page, PageRequest};
use flexdb_store::records::{NodeRecord, NodeTypeRecord, RelationshipRecord};

use crate::access::TenantAccess;
use crate::error::StoreResultExt;

#[derive(Clone)]
pub struct NodeService {
    access: TenantAccess,
}

impl NodeService {
    pub fn new(access: TenantAccess) -> Self {
        Self { access }
    }

    /// The node type must exist in the same tenant. The check and the
    /// insert are separate round trips; the foreign key catches a type
    /// deleted in between.
    pub async fn create(&self, tenant_id: TenantId, input: &CreateNode) -> FlexResult<Node> {
        let scope = self.access.open(tenant_id).await?;

        let type_exists = scope
            .repo::<NodeTypeRecord>()
            .exists(input.node_type_id)
            .await
            .during("get_node_type")?;
        if !type_exists {
            return Err(FlexError::not_found("node_type", input.node_type_id));
        }

        scope
            .repo::<NodeRecord>()
            .create(input)
            .await
            .during("create_node")
    }

    pub async fn get(&self, tenant_id: TenantId, id: NodeId) -> FlexResult<Node> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeRecord>()
            .get_by_id(id)
            .await
            .during("get_node")
    }

    pub async fn update(&self, tenant_id: TenantId, id: NodeId, input: &UpdateNode) -> FlexResult<Node> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeRecord>()
            .update(id, input)
            .await
            .during("update_node")
    }

    /// Refused while any relationship starts or ends at the node.
    pub async fn delete(&self, tenant_id: TenantId, id: NodeId) -> FlexResult<()> {
        let scope = self.access.open(tenant_id).await?;
        let nodes = scope.repo::<NodeRecord>();

        if !nodes.exists(id).await.during("get_node")? {
            return Err(FlexError::not_found("node", id));
        }

        let relationships = scope.repo::<RelationshipRecord>();
        let outgoing = relationships
            .count(&RelationshipFilter {
                source_node_id: Some(id),
                ..Default::default()
            })
            .await
            .during("count_relationships")?;
        let incoming = relationships
            .count(&RelationshipFilter {
                target_node_id: Some(id),
                ..Default::default()
            })
            .await
            .during("count_relationships")?;
        if outgoing + incoming > 0 {
            return Err(FlexError::conflict(
                "node",
                format!("node still has {outgoing} outgoing and {incoming} incoming relationship(s)"),
            ));
        }

        nodes.delete(id).await.during("delete_node")
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &NodeFilter,
        page: &PageRequest,
    ) -> FlexResult<Page<Node>> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeRecord>()
            .list(filter, page)
            .await
            .during("list_nodes")
    }
}
