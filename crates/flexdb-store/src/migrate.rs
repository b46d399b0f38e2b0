//! Forward-only, versioned schema migrations.
//!
//! Applied versions are tracked in `schema_migrations` inside the migrated
//! database. Each migration runs in its own transaction together with its
//! tracking row, under a transaction-scoped advisory lock so concurrent
//! runners against the same database serialise instead of racing.

use chrono::Utc;
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::error::{StoreError, StoreResult};

/// Advisory lock key shared by every migration runner ("flexdb" in ASCII).
const MIGRATION_LOCK_KEY: i64 = 0x0066_6c65_7864_62;

const TRACKING_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    BIGINT PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL
)";

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// An ordered list of migrations for one kind of database.
#[derive(Debug, Clone, Copy)]
pub struct MigrationSet {
    pub name: &'static str,
    pub migrations: &'static [Migration],
}

impl MigrationSet {
    /// Highest version in the set, or 0 when empty.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Versions must be positive and strictly ascending.
    pub fn validate(&self) -> StoreResult<()> {
        let mut previous = 0;
        for migration in self.migrations {
            if migration.version <= previous {
                return Err(StoreError::Migration {
                    set: self.name,
                    version: migration.version,
                    message: format!(
                        "version {} does not follow {previous}",
                        migration.version
                    ),
                });
            }
            previous = migration.version;
        }
        Ok(())
    }
}

/// Outcome of [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub set: &'static str,
    /// Versions applied by this run, ascending. Empty when already current.
    pub applied: Vec<i64>,
    pub current_version: i64,
}

/// Bring the database behind `pool` up to the latest version of `set`.
///
/// A failure aborts the remaining migrations; the failed step leaves no
/// tracking row and is retried by the next run.
pub async fn apply(pool: &PgPool, set: &MigrationSet) -> StoreResult<MigrationReport> {
    set.validate()?;

    let fail = |version: i64| {
        move |e: sqlx::Error| StoreError::Migration {
            set: set.name,
            version,
            message: e.to_string(),
        }
    };

    let mut tx = pool.begin().await.map_err(fail(0))?;
    lock(&mut tx).await.map_err(fail(0))?;
    tx.execute(sqlx::raw_sql(TRACKING_TABLE))
        .await
        .map_err(fail(0))?;
    let start = current_version(&mut tx).await.map_err(fail(0))?;
    tx.commit().await.map_err(fail(0))?;

    let mut current = start;
    let mut applied = Vec::new();
    for migration in set.migrations.iter().filter(|m| m.version > start) {
        let version = migration.version;
        let mut tx = pool.begin().await.map_err(fail(version))?;
        lock(&mut tx).await.map_err(fail(version))?;

        // Another runner may have applied it while we waited on the lock.
        if current_version(&mut tx).await.map_err(fail(version))? >= version {
            current = version;
            continue;
        }

        tx.execute(sqlx::raw_sql(migration.sql))
            .await
            .map_err(fail(version))?;
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES ($1, $2, $3)")
            .bind(version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(fail(version))?;
        tx.commit().await.map_err(fail(version))?;

        tracing::info!(
            set = set.name,
            version,
            name = migration.name,
            "Applied migration"
        );
        applied.push(version);
        current = version;
    }

    Ok(MigrationReport {
        set: set.name,
        applied,
        current_version: current,
    })
}

async fn lock(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn current_version(tx: &mut Transaction<'_, Postgres>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(&mut **tx)
        .await
        .map(|v| v.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CONTROL_MIGRATIONS, TENANT_MIGRATIONS};

    const OUT_OF_ORDER: &[Migration] = &[
        Migration {
            version: 1,
            name: "first",
            sql: "SELECT 1",
        },
        Migration {
            version: 3,
            name: "third",
            sql: "SELECT 1",
        },
        Migration {
            version: 2,
            name: "second",
            sql: "SELECT 1",
        },
    ];

    const DUPLICATE: &[Migration] = &[
        Migration {
            version: 1,
            name: "a",
            sql: "SELECT 1",
        },
        Migration {
            version: 1,
            name: "b",
            sql: "SELECT 1",
        },
    ];

    #[test]
    fn test_embedded_sets_are_ordered() {
        assert!(CONTROL_MIGRATIONS.validate().is_ok());
        assert!(TENANT_MIGRATIONS.validate().is_ok());
        assert!(CONTROL_MIGRATIONS.latest_version() > 0);
        assert!(TENANT_MIGRATIONS.latest_version() > 0);
    }

    #[test]
    fn test_rejects_out_of_order_versions() {
        let set = MigrationSet {
            name: "broken",
            migrations: OUT_OF_ORDER,
        };
        match set.validate() {
            Err(StoreError::Migration { version, .. }) => assert_eq!(version, 2),
            other => panic!("expected migration error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_versions() {
        let set = MigrationSet {
            name: "broken",
            migrations: DUPLICATE,
        };
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_empty_set_is_valid() {
        let set = MigrationSet {
            name: "empty",
            migrations: &[],
        };
        assert!(set.validate().is_ok());
        assert_eq!(set.latest_version(), 0);
    }
}
