use flexdb_core::types::{CreateNodeType, NodeFilter, NodeType, NodeTypeId, TenantId, UpdateNodeType};
use flexdb_core::{FlexError, FlexResult, Page, PageRequest};
use flexdb_store::records::{NodeRecord, NodeTypeRecord};

use crate::access::TenantAccess;
use crate::error::{require, StoreResultExt};

#[derive(Clone)]
pub struct NodeTypeService {
    access: TenantAccess,
}

impl NodeTypeService {
    pub fn new(access: TenantAccess) -> Self {
        Self { access }
    }

    pub async fn create(&self, tenant_id: TenantId, input: &CreateNodeType) -> FlexResult<NodeType> {
        require(&input.name, "name")?;
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeTypeRecord>()
            .create(input)
            .await
            .during("create_node_type")
    }

    pub async fn get(&self, tenant_id: TenantId, id: NodeTypeId) -> FlexResult<NodeType> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeTypeRecord>()
            .get_by_id(id)
            .await
            .during("get_node_type")
    }

    pub async fn update(
        &self,
        tenant_id: TenantId,
        id: NodeTypeId,
        input: &UpdateNodeType,
    ) -> FlexResult<NodeType> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeTypeRecord>()
            .update(id, input)
            .await
            .during("update_node_type")
    }

    /// Refused while nodes of this type exist.
    pub async fn delete(&self, tenant_id: TenantId, id: NodeTypeId) -> FlexResult<()> {
        let scope = self.access.open(tenant_id).await?;
        let node_types = scope.repo::<NodeTypeRecord>();

        if !node_types.exists(id).await.during("get_node_type")? {
            return Err(FlexError::not_found("node_type", id));
        }

        let nodes = scope
            .repo::<NodeRecord>()
            .count(&NodeFilter {
                node_type_id: Some(id),
            })
            .await
            .during("count_nodes")?;
        if nodes > 0 {
            return Err(FlexError::conflict(
                "node_type",
                format!("{nodes} node(s) still use this type"),
            ));
        }

        node_types.delete(id).await.during("delete_node_type")
    }

    pub async fn list(&self, tenant_id: TenantId, page: &PageRequest) -> FlexResult<Page<NodeType>> {
        let scope = self.access.open(tenant_id).await?;
        scope
            .repo::<NodeTypeRecord>()
            .list(&(), page)
            .await
            .during("list_node_types")
    }
}
