//! PostgreSQL connection management and the shared control store.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use flexdb_core::config::DatabaseConfig;

use crate::error::{is_duplicate_database, StoreError, StoreResult};
use crate::migrate::{self, MigrationReport};
use crate::schema::CONTROL_MIGRATIONS;

/// Connection settings shared by the control pool and every tenant pool.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    base: PgConnectOptions,
    acquire_timeout: std::time::Duration,
}

impl ServerOptions {
    pub fn from_config(config: &DatabaseConfig) -> StoreResult<Self> {
        let mut base = PgConnectOptions::from_str(&config.url)?;
        if let Some(timeout) = config.statement_timeout() {
            base = base.options([("statement_timeout", timeout.as_millis().to_string())]);
        }
        Ok(Self {
            base,
            acquire_timeout: config.acquire_timeout(),
        })
    }

    /// Connect options addressing `database` on the configured server.
    pub fn for_database(&self, database: &str) -> PgConnectOptions {
        self.base.clone().database(database)
    }

    /// Open a pool against `database`. Connections are established lazily
    /// except for one probe connection.
    pub async fn open_pool(&self, database: &str, max_connections: u32) -> StoreResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.for_database(database))
            .await?;
        Ok(pool)
    }
}

/// Create `name` through the maintenance pool unless it already exists.
///
/// Returns `true` when this call created the database. Losing a creation
/// race to a concurrent caller counts as "exists".
pub async fn ensure_database(admin: &PgPool, name: &str) -> StoreResult<bool> {
    let quoted = quote_identifier(name)?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(admin)
            .await?;
    if exists {
        return Ok(false);
    }

    match sqlx::raw_sql(&format!("CREATE DATABASE {quoted}"))
        .execute(admin)
        .await
    {
        Ok(_) => {
            tracing::info!(database = name, "Created database");
            Ok(true)
        }
        Err(e) if is_duplicate_database(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Drop `name`, terminating any remaining sessions.
pub async fn drop_database(admin: &PgPool, name: &str) -> StoreResult<()> {
    let quoted = quote_identifier(name)?;
    sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS {quoted} WITH (FORCE)"))
        .execute(admin)
        .await?;
    tracing::info!(database = name, "Dropped database");
    Ok(())
}

/// Quote a database name after checking it is a plain lowercase identifier
/// of at most 63 bytes.
pub fn quote_identifier(name: &str) -> StoreResult<String> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

/// Handle on the control database.
///
/// Clone is cheap (the pools are reference counted).
#[derive(Clone)]
pub struct ControlStore {
    pool: PgPool,
    admin: PgPool,
    server: ServerOptions,
}

impl ControlStore {
    /// Connect to the server, create the control database if needed and
    /// bring it to the latest control schema.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let server = ServerOptions::from_config(config)?;
        let admin = server.open_pool(&config.maintenance_database, 2).await?;

        ensure_database(&admin, &config.control_database).await?;
        let pool = server
            .open_pool(&config.control_database, config.max_connections)
            .await?;

        let store = Self {
            pool,
            admin,
            server,
        };
        let report = store.migrate().await?;
        tracing::info!(
            database = %config.control_database,
            schema_version = report.current_version,
            "Connected to control store"
        );
        Ok(store)
    }

    /// Build pools without touching the server. Nothing is created or
    /// migrated; the first query establishes a connection.
    pub fn connect_lazy(config: &DatabaseConfig) -> StoreResult<Self> {
        let server = ServerOptions::from_config(config)?;
        let lazy = |database: &str, max: u32| {
            PgPoolOptions::new()
                .max_connections(max)
                .acquire_timeout(server.acquire_timeout)
                .connect_lazy_with(server.for_database(database))
        };
        Ok(Self {
            pool: lazy(&config.control_database, config.max_connections),
            admin: lazy(&config.maintenance_database, 2),
            server: server.clone(),
        })
    }

    /// Apply pending control migrations.
    pub async fn migrate(&self) -> StoreResult<MigrationReport> {
        migrate::apply(&self.pool, &CONTROL_MIGRATIONS).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Pool on the maintenance database, used for CREATE/DROP DATABASE.
    pub fn admin(&self) -> &PgPool {
        &self.admin
    }

    pub fn server(&self) -> &ServerOptions {
        &self.server
    }

    pub async fn close(&self) {
        self.pool.close().await;
        self.admin.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(
            quote_identifier("flexdb_tenant_0a1b").unwrap(),
            "\"flexdb_tenant_0a1b\""
        );
        let long = "a".repeat(64);
        for bad in ["", "Tenant", "9lives", "a;drop", "x\"y", long.as_str()] {
            assert!(
                matches!(quote_identifier(bad), Err(StoreError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_statement_timeout_is_optional() {
        let mut config = DatabaseConfig::default();
        assert!(ServerOptions::from_config(&config).is_ok());

        config.statement_timeout_ms = 1500;
        assert!(ServerOptions::from_config(&config).is_ok());

        config.url = "not a url".into();
        assert!(ServerOptions::from_config(&config).is_err());
    }
}
