//! Core domain types for the flexdb data service.
//!
//! Control-store entities (Tenant, User, Membership) and tenant-database
//! entities (NodeType, Node, Relationship), plus the create/update inputs
//! and list filters the repository layer consumes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlexError;

// ── Identifiers ───────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier received from a caller.
            pub fn parse(raw: &str) -> Result<Self, FlexError> {
                raw.parse()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = FlexError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Err(FlexError::validation(concat!($entity, " is required")));
                }
                Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|_| FlexError::validation(format!(concat!("invalid ", $entity, ": {}"), raw)))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Every tenant-scoped entity belongs to a tenant.
    TenantId,
    "tenant_id"
);
define_id!(UserId, "user_id");
define_id!(
    /// Surrogate key of a tenant-user membership row.
    MembershipId,
    "membership_id"
);
define_id!(NodeTypeId, "node_type_id");
define_id!(NodeId, "node_id");
define_id!(RelationshipId, "relationship_id");

// ── Control store entities ────────────────────────────────────────

/// Lifecycle flag on a tenant. Purely informational for the data layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Inactive,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = FlexError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(FlexError::validation(format!(
                "invalid status: {other} (expected active or inactive)"
            ))),
        }
    }
}

/// An isolation boundary owning a dedicated physical database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: TenantId,
    pub slug: String,
    pub name: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's membership in a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantUser {
    pub id: MembershipId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Tenant database entities ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeType {
    pub id: NodeTypeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    /// Opaque document describing the shape of node data.
    pub schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub node_type_id: NodeTypeId,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed, typed edge between two nodes of the same tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: RelationshipId,
    pub tenant_id: TenantId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub relationship_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Inputs ────────────────────────────────────────────────────────
//
// Update inputs use `Option` as the presence marker. `None`, an empty
// string, and a JSON `null` document all mean "leave unchanged"; there is
// no way to clear a field through an update.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTenant {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTenant {
    /// Accepted only when equal to the stored slug.
    pub slug: Option<String>,
    pub name: Option<String>,
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTenantUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Defaults to [`DEFAULT_ROLE`] when absent or empty.
    pub role: Option<String>,
}

pub const DEFAULT_ROLE: &str = "member";
pub const MEMBERSHIP_ACTIVE: &str = "active";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNodeType {
    pub name: String,
    pub description: String,
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeType {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNode {
    pub node_type_id: NodeTypeId,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNode {
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRelationship {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub relationship_type: String,
    pub data: Option<serde_json::Value>,
    /// Reject `source_node_id == target_node_id`.
    #[serde(default)]
    pub forbid_self_loop: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRelationship {
    pub relationship_type: Option<String>,
    pub data: Option<serde_json::Value>,
}

// ── Filters ───────────────────────────────────────────────────────

/// Equality filters for membership listings. `None` = unconstrained.
#[derive(Debug, Clone, Default)]
pub struct TenantUserFilter {
    pub tenant_id: Option<TenantId>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type_id: Option<NodeTypeId>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub source_node_id: Option<NodeId>,
    pub target_node_id: Option<NodeId>,
    pub relationship_type: Option<String>,
}

// ── Presence helpers ──────────────────────────────────────────────

/// The value to write for an optional text field, or `None` if the field
/// should be left unchanged.
pub fn present_text(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// The value to write for an optional document field, or `None` if the
/// field should be left unchanged.
pub fn present_document(value: &Option<serde_json::Value>) -> Option<&serde_json::Value> {
    value.as_ref().filter(|v| !v.is_null())
}

/// Absent documents are stored as an empty object.
pub fn document_or_empty(value: &Option<serde_json::Value>) -> serde_json::Value {
    present_document(value)
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
}
