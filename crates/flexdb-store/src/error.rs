//! Storage errors and their classification into the caller-facing taxonomy.

use flexdb_core::types::TenantId;
use flexdb_core::FlexError;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const DUPLICATE_DATABASE: &str = "42P04";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("PostgreSQL error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} already exists ({constraint})")]
    UniqueViolation {
        entity: &'static str,
        constraint: String,
    },

    #[error("{entity} references a missing {referenced} {key} ({constraint})")]
    MissingReference {
        entity: &'static str,
        referenced: &'static str,
        key: String,
        constraint: String,
    },

    #[error("{entity} is still referenced ({constraint})")]
    StillReferenced {
        entity: &'static str,
        constraint: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid page_token")]
    InvalidPageToken,

    #[error("Migration {set} v{version} failed: {message}")]
    Migration {
        set: &'static str,
        version: i64,
        message: String,
    },

    #[error("Provisioning database for tenant {tenant_id} failed: {message}")]
    Provision { tenant_id: TenantId, message: String },

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("{entity} requires a tenant scope")]
    Unscoped { entity: &'static str },

    #[error("Corrupt {entity} row: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },
}

impl StoreError {
    /// Classify a failed insert or update against `entity`'s table.
    pub fn from_write(entity: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => return Self::UniqueViolation { entity, constraint },
                Some(FOREIGN_KEY_VIOLATION) => {
                    let key = db_err
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(PgDatabaseError::detail)
                        .and_then(key_from_detail)
                        .unwrap_or_default()
                        .to_string();
                    return Self::MissingReference {
                        entity,
                        referenced: referenced_entity(&constraint),
                        key,
                        constraint,
                    };
                }
                _ => {}
            }
        }
        Self::Database(err)
    }

    /// Classify a failed delete against `entity`'s table.
    pub fn from_delete(entity: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                let constraint = db_err.constraint().unwrap_or_default().to_string();
                return Self::StillReferenced { entity, constraint };
            }
        }
        Self::Database(err)
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Entity behind a foreign key, from PostgreSQL's default
/// `<table>_<column>_fkey` constraint name.
fn referenced_entity(constraint: &str) -> &'static str {
    const TARGETS: &[(&str, &str)] = &[
        ("_node_type_id_fkey", "node_type"),
        ("_source_node_id_fkey", "node"),
        ("_target_node_id_fkey", "node"),
        ("_tenant_id_fkey", "tenant"),
        ("_user_id_fkey", "user"),
    ];
    TARGETS
        .iter()
        .find(|(suffix, _)| constraint.ends_with(suffix))
        .map_or("row", |(_, entity)| entity)
}

/// The key value in `Key (col)=(value) is not present in table "t".`
fn key_from_detail(detail: &str) -> Option<&str> {
    let start = detail.find(")=(")? + 3;
    let len = detail[start..].find(')')?;
    Some(&detail[start..start + len])
}

/// CREATE DATABASE lost a race against a concurrent creator.
pub(crate) fn is_duplicate_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(DUPLICATE_DATABASE) | Some(UNIQUE_VIOLATION)
        ),
        _ => false,
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for FlexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { entity, .. } => {
                FlexError::conflict(entity, format!("{entity} already exists"))
            }
            StoreError::MissingReference {
                referenced, key, ..
            } => FlexError::not_found(referenced, key),
            StoreError::StillReferenced { entity, .. } => {
                FlexError::conflict(entity, format!("{entity} is still referenced"))
            }
            StoreError::NotFound { entity, id } => FlexError::not_found(entity, id),
            StoreError::InvalidPageToken => FlexError::validation("invalid page_token"),
            other => FlexError::Internal(other.to_string()),
        }
    }
}
