//! flexdb-store: PostgreSQL storage for flexdb.
//!
//! This crate owns every database interaction: the control store, the
//! per-tenant database manager, the migration runner and the generic
//! repository. Services never issue SQL themselves.

pub mod client;
pub mod error;
pub mod migrate;
pub mod records;
pub mod repository;
pub mod schema;
pub mod tenant_db;

pub use client::{ControlStore, ServerOptions};
pub use error::{StoreError, StoreResult};
pub use migrate::{Migration, MigrationReport, MigrationSet};
pub use repository::{Record, Repository};
pub use schema::{CONTROL_MIGRATIONS, TENANT_MIGRATIONS};
pub use tenant_db::{PostgresProvisioner, TenantDbManager, TenantPool, TenantProvisioner};

/// Manager over real PostgreSQL tenant databases.
pub type PgTenantManager = TenantDbManager<PostgresProvisioner>;
