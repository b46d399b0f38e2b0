//! flexdb-service: entity services for the flexdb multi-tenant data service.
//!
//! Validates requests, checks cross-entity invariants the repository cannot
//! enforce alone, and maps storage failures onto the caller-facing error
//! taxonomy. Transport front ends (gRPC, JSON-RPC, REST) sit on top of
//! [`Flexdb`] and are not part of this crate.

pub mod access;
pub mod app;
pub mod error;
pub mod node;
pub mod node_type;
pub mod relationship;
pub mod tenant;
pub mod user;

pub use app::Flexdb;
pub use node::NodeService;
pub use node_type::NodeTypeService;
pub use relationship::RelationshipService;
pub use tenant::TenantService;
pub use user::UserService;
