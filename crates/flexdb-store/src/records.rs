//! Row mappings for every flexdb entity.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use flexdb_core::types::{
    document_or_empty, present_document, present_text, AddTenantUser, CreateNode,
    CreateNodeType, CreateRelationship, CreateTenant, CreateUser, MembershipId, Node, NodeFilter,
    NodeId, NodeType, NodeTypeId, Relationship, RelationshipFilter, RelationshipId, Tenant,
    TenantId, TenantStatus, TenantUser, TenantUserFilter, UpdateNode, UpdateNodeType,
    UpdateRelationship, UpdateTenant, UpdateUser, User, UserId, DEFAULT_ROLE, MEMBERSHIP_ACTIVE,
};
use flexdb_core::Cursor;

use crate::error::{StoreError, StoreResult};
use crate::repository::{Record, Sql, SqlList};

fn set_text(set: &mut SqlList<'_>, column: &'static str, value: &Option<String>) {
    if let Some(value) = present_text(value) {
        set.push(column)
            .push_unseparated(" = ")
            .push_bind_unseparated(value.to_string());
    }
}

fn set_document(set: &mut SqlList<'_>, column: &'static str, value: &Option<Value>) {
    if let Some(value) = present_document(value) {
        set.push(column)
            .push_unseparated(" = ")
            .push_bind_unseparated(value.clone());
    }
}

fn filter_eq(sql: &mut Sql, column: &'static str, value: Option<Uuid>) {
    if let Some(value) = value {
        sql.push(" AND ").push(column).push(" = ").push_bind(value);
    }
}

// ── Control store ─────────────────────────────────────────────────

#[derive(Debug, FromRow)]
pub struct TenantRecord {
    id: Uuid,
    slug: String,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for TenantRecord {
    type Id = TenantId;
    type Model = Tenant;
    type Draft = CreateTenant;
    type Patch = UpdateTenant;
    type Filter = ();

    const ENTITY: &'static str = "tenant";
    const TABLE: &'static str = "tenants";
    const COLUMNS: &'static str = "id, slug, name, status, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "slug, name, status";
    const TENANT_SCOPED: bool = false;

    fn into_model(self) -> StoreResult<Tenant> {
        let status = self
            .status
            .parse::<TenantStatus>()
            .map_err(|e| StoreError::Corrupt {
                entity: Self::ENTITY,
                message: e.to_string(),
            })?;
        Ok(Tenant {
            id: TenantId(self.id),
            slug: self.slug,
            name: self.name,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &CreateTenant, values: &mut SqlList<'_>) {
        values.push_bind(draft.slug.clone());
        values.push_bind(draft.name.clone());
        values.push_bind(TenantStatus::Active.as_str());
    }

    fn push_patch(patch: &UpdateTenant, set: &mut SqlList<'_>) {
        // Slug is immutable; the service rejects attempts to change it.
        set_text(set, "name", &patch.name);
        if let Some(status) = patch.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
    }

    fn push_filters(_: &(), _: &mut Sql) {}
}

#[derive(Debug, FromRow)]
pub struct UserRecord {
    id: Uuid,
    email: String,
    display_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for UserRecord {
    type Id = UserId;
    type Model = User;
    type Draft = CreateUser;
    type Patch = UpdateUser;
    type Filter = ();

    const ENTITY: &'static str = "user";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "id, email, display_name, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "email, display_name";
    const TENANT_SCOPED: bool = false;

    fn into_model(self) -> StoreResult<User> {
        Ok(User {
            id: UserId(self.id),
            email: self.email,
            display_name: self.display_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &CreateUser, values: &mut SqlList<'_>) {
        values.push_bind(draft.email.clone());
        values.push_bind(draft.display_name.clone());
    }

    fn push_patch(patch: &UpdateUser, set: &mut SqlList<'_>) {
        set_text(set, "email", &patch.email);
        set_text(set, "display_name", &patch.display_name);
    }

    fn push_filters(_: &(), _: &mut Sql) {}
}

#[derive(Debug, FromRow)]
pub struct TenantUserRecord {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for TenantUserRecord {
    type Id = MembershipId;
    type Model = TenantUser;
    type Draft = AddTenantUser;
    /// Memberships are added and removed, never edited.
    type Patch = ();
    type Filter = TenantUserFilter;

    const ENTITY: &'static str = "tenant_user";
    const TABLE: &'static str = "tenant_users";
    const COLUMNS: &'static str = "id, tenant_id, user_id, role, status, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "tenant_id, user_id, role, status";
    const TENANT_SCOPED: bool = false;

    fn into_model(self) -> StoreResult<TenantUser> {
        Ok(TenantUser {
            id: MembershipId(self.id),
            tenant_id: TenantId(self.tenant_id),
            user_id: UserId(self.user_id),
            role: self.role,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &AddTenantUser, values: &mut SqlList<'_>) {
        values.push_bind(Uuid::from(draft.tenant_id));
        values.push_bind(Uuid::from(draft.user_id));
        values.push_bind(present_text(&draft.role).unwrap_or(DEFAULT_ROLE).to_string());
        values.push_bind(MEMBERSHIP_ACTIVE);
    }

    fn push_patch(_: &(), _: &mut SqlList<'_>) {}

    fn push_filters(filter: &TenantUserFilter, sql: &mut Sql) {
        filter_eq(sql, "tenant_id", filter.tenant_id.map(Uuid::from));
        filter_eq(sql, "user_id", filter.user_id.map(Uuid::from));
    }
}

// ── Tenant databases ──────────────────────────────────────────────

#[derive(Debug, FromRow)]
pub struct NodeTypeRecord {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    description: String,
    schema: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for NodeTypeRecord {
    type Id = NodeTypeId;
    type Model = NodeType;
    type Draft = CreateNodeType;
    type Patch = UpdateNodeType;
    type Filter = ();

    const ENTITY: &'static str = "node_type";
    const TABLE: &'static str = "node_types";
    const COLUMNS: &'static str =
        "id, tenant_id, name, description, schema, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "name, description, schema";
    const TENANT_SCOPED: bool = true;

    fn into_model(self) -> StoreResult<NodeType> {
        Ok(NodeType {
            id: NodeTypeId(self.id),
            tenant_id: TenantId(self.tenant_id),
            name: self.name,
            description: self.description,
            schema: self.schema,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &CreateNodeType, values: &mut SqlList<'_>) {
        values.push_bind(draft.name.clone());
        values.push_bind(draft.description.clone());
        values.push_bind(document_or_empty(&draft.schema));
    }

    fn push_patch(patch: &UpdateNodeType, set: &mut SqlList<'_>) {
        set_text(set, "name", &patch.name);
        set_text(set, "description", &patch.description);
        set_document(set, "schema", &patch.schema);
    }

    fn push_filters(_: &(), _: &mut Sql) {}
}

#[derive(Debug, FromRow)]
pub struct NodeRecord {
    id: Uuid,
    tenant_id: Uuid,
    node_type_id: Uuid,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for NodeRecord {
    type Id = NodeId;
    type Model = Node;
    type Draft = CreateNode;
    type Patch = UpdateNode;
    type Filter = NodeFilter;

    const ENTITY: &'static str = "node";
    const TABLE: &'static str = "nodes";
    const COLUMNS: &'static str = "id, tenant_id, node_type_id, data, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "node_type_id, data";
    const TENANT_SCOPED: bool = true;

    fn into_model(self) -> StoreResult<Node> {
        Ok(Node {
            id: NodeId(self.id),
            tenant_id: TenantId(self.tenant_id),
            node_type_id: NodeTypeId(self.node_type_id),
            data: self.data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &CreateNode, values: &mut SqlList<'_>) {
        values.push_bind(Uuid::from(draft.node_type_id));
        values.push_bind(document_or_empty(&draft.data));
    }

    fn push_patch(patch: &UpdateNode, set: &mut SqlList<'_>) {
        set_document(set, "data", &patch.data);
    }

    fn push_filters(filter: &NodeFilter, sql: &mut Sql) {
        filter_eq(sql, "node_type_id", filter.node_type_id.map(Uuid::from));
    }
}

#[derive(Debug, FromRow)]
pub struct RelationshipRecord {
    id: Uuid,
    tenant_id: Uuid,
    source_node_id: Uuid,
    target_node_id: Uuid,
    relationship_type: String,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record for RelationshipRecord {
    type Id = RelationshipId;
    type Model = Relationship;
    type Draft = CreateRelationship;
    type Patch = UpdateRelationship;
    type Filter = RelationshipFilter;

    const ENTITY: &'static str = "relationship";
    const TABLE: &'static str = "relationships";
    const COLUMNS: &'static str = "id, tenant_id, source_node_id, target_node_id, \
                                   relationship_type, data, created_at, updated_at";
    const INSERT_COLUMNS: &'static str = "source_node_id, target_node_id, relationship_type, data";
    const TENANT_SCOPED: bool = true;

    fn into_model(self) -> StoreResult<Relationship> {
        Ok(Relationship {
            id: RelationshipId(self.id),
            tenant_id: TenantId(self.tenant_id),
            source_node_id: NodeId(self.source_node_id),
            target_node_id: NodeId(self.target_node_id),
            relationship_type: self.relationship_type,
            data: self.data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }

    fn push_insert_values(draft: &CreateRelationship, values: &mut SqlList<'_>) {
        values.push_bind(Uuid::from(draft.source_node_id));
        values.push_bind(Uuid::from(draft.target_node_id));
        values.push_bind(draft.relationship_type.clone());
        values.push_bind(document_or_empty(&draft.data));
    }

    fn push_patch(patch: &UpdateRelationship, set: &mut SqlList<'_>) {
        set_text(set, "relationship_type", &patch.relationship_type);
        set_document(set, "data", &patch.data);
    }

    fn push_filters(filter: &RelationshipFilter, sql: &mut Sql) {
        filter_eq(sql, "source_node_id", filter.source_node_id.map(Uuid::from));
        filter_eq(sql, "target_node_id", filter.target_node_id.map(Uuid::from));
        if let Some(kind) = present_text(&filter.relationship_type) {
            sql.push(" AND relationship_type = ")
                .push_bind(kind.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn render_patch<R: Record>(patch: &R::Patch) -> String {
        let mut sql = Sql::new("UPDATE t SET ");
        {
            let mut set = sql.separated(", ");
            R::push_patch(patch, &mut set);
            set.push("updated_at = ").push_bind_unseparated(ts());
        }
        sql.sql().to_string()
    }

    fn render_filters<R: Record>(filter: &R::Filter) -> String {
        let mut sql = Sql::new("SELECT 1 WHERE TRUE");
        R::push_filters(filter, &mut sql);
        sql.sql().to_string()
    }

    #[test]
    fn test_empty_patch_only_touches_updated_at() {
        let sql = render_patch::<NodeTypeRecord>(&UpdateNodeType {
            name: Some(String::new()),
            description: None,
            schema: Some(Value::Null),
        });
        assert_eq!(sql, "UPDATE t SET updated_at = $1");
    }

    #[test]
    fn test_patch_sets_present_fields() {
        let sql = render_patch::<NodeTypeRecord>(&UpdateNodeType {
            name: Some("Task".into()),
            description: None,
            schema: Some(json!({"fields": []})),
        });
        assert_eq!(sql, "UPDATE t SET name = $1, schema = $2, updated_at = $3");
    }

    #[test]
    fn test_tenant_patch_never_writes_slug() {
        let sql = render_patch::<TenantRecord>(&UpdateTenant {
            slug: Some("renamed".into()),
            name: Some("Acme Corp".into()),
            status: Some(TenantStatus::Inactive),
        });
        assert_eq!(sql, "UPDATE t SET name = $1, status = $2, updated_at = $3");
    }

    #[test]
    fn test_filters_only_constrain_present_fields() {
        assert_eq!(
            render_filters::<RelationshipRecord>(&RelationshipFilter::default()),
            "SELECT 1 WHERE TRUE"
        );

        let sql = render_filters::<RelationshipRecord>(&RelationshipFilter {
            source_node_id: Some(NodeId::new()),
            target_node_id: None,
            relationship_type: Some("depends_on".into()),
        });
        assert_eq!(
            sql,
            "SELECT 1 WHERE TRUE AND source_node_id = $1 AND relationship_type = $2"
        );
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let row = TenantRecord {
            id: Uuid::new_v4(),
            slug: "acme".into(),
            name: "Acme".into(),
            status: "archived".into(),
            created_at: ts(),
            updated_at: ts(),
        };
        assert!(matches!(row.into_model(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_cursor_uses_ordering_key() {
        let id = Uuid::new_v4();
        let row = NodeRecord {
            id,
            tenant_id: Uuid::new_v4(),
            node_type_id: Uuid::new_v4(),
            data: json!({}),
            created_at: ts(),
            updated_at: ts(),
        };
        assert_eq!(row.cursor(), Cursor::new(ts(), id));
    }
}
