//! Per-tenant database pools with lazy, single-flight provisioning.
//!
//! The first request for an unseen tenant creates its database, applies the
//! tenant migrations and opens a pool; concurrent requests for the same
//! tenant wait on that one provisioning run. Provisioning executes in its own
//! task, so a caller that gives up does not abort it for the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};

use flexdb_core::config::TenancyConfig;
use flexdb_core::types::TenantId;

use crate::client::{self, ControlStore, ServerOptions};
use crate::error::{StoreError, StoreResult};
use crate::migrate;
use crate::schema::TENANT_MIGRATIONS;

/// A connection pool the manager can cache and evict.
pub trait TenantPool: Clone + Send + Sync + 'static {
    /// Connections currently checked out.
    fn in_use(&self) -> usize;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

impl TenantPool for PgPool {
    fn in_use(&self) -> usize {
        (self.size() as usize).saturating_sub(self.num_idle())
    }

    fn close(&self) -> impl Future<Output = ()> + Send {
        let pool = self.clone();
        async move { pool.close().await }
    }
}

/// Creates (or opens) the database backing one tenant.
pub trait TenantProvisioner: Send + Sync + 'static {
    type Pool: TenantPool;

    /// Bring the tenant's database into existence at the latest schema and
    /// return a pool on it. Must be idempotent.
    fn provision(&self, tenant_id: TenantId)
        -> impl Future<Output = StoreResult<Self::Pool>> + Send;

    /// Remove the tenant's database, if any.
    fn destroy(&self, tenant_id: TenantId) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Deterministic database name for a tenant.
pub fn database_name(prefix: &str, tenant_id: &TenantId) -> StoreResult<String> {
    let name = format!("{prefix}{}", tenant_id.0.simple());
    client::quote_identifier(&name)?;
    Ok(name)
}

// ── PostgreSQL provisioner ────────────────────────────────────────

/// Every table the tenant migrations create, plus the tracking table.
const TENANT_TABLES: &[&str] = &[
    "schema_migrations",
    "tenant_meta",
    "node_types",
    "nodes",
    "relationships",
];

/// Provisions one PostgreSQL database per tenant on the control server.
pub struct PostgresProvisioner {
    control: ControlStore,
    server: ServerOptions,
    prefix: String,
    max_connections: u32,
    created: AtomicU64,
}

impl PostgresProvisioner {
    pub fn new(control: ControlStore, tenancy: &TenancyConfig) -> Self {
        Self {
            server: control.server().clone(),
            control,
            prefix: tenancy.database_prefix.clone(),
            max_connections: tenancy.max_connections_per_tenant,
            created: AtomicU64::new(0),
        }
    }

    /// Physical databases created by this provisioner since startup.
    pub fn databases_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn database_name(&self, tenant_id: &TenantId) -> StoreResult<String> {
        database_name(&self.prefix, tenant_id)
    }

    /// Whether the tenant's database has been provisioned and registered.
    pub async fn is_provisioned(&self, tenant_id: &TenantId) -> StoreResult<bool> {
        let registered: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tenant_databases WHERE tenant_id = $1)",
        )
        .bind(tenant_id.0)
        .fetch_one(self.control.pool())
        .await?;
        Ok(registered)
    }

    /// An existing database is adopted only when it is registered to this
    /// tenant or holds nothing but tenant tables (a run that died between
    /// CREATE DATABASE and registration). Anything else belongs to someone
    /// else and is left alone.
    async fn verify_adoptable(&self, tenant_id: TenantId, name: &str, pool: &PgPool) -> StoreResult<()> {
        let registered: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tenant_databases WHERE tenant_id = $1 AND database_name = $2)",
        )
        .bind(tenant_id.0)
        .bind(name)
        .fetch_one(self.control.pool())
        .await?;
        if registered {
            return Ok(());
        }

        let foreign: Option<String> = sqlx::query_scalar(
            "SELECT (table_schema || '.' || table_name)::text FROM information_schema.tables \
             WHERE table_schema <> 'information_schema' AND table_schema NOT LIKE 'pg\\_%' \
               AND NOT (table_schema = 'public' AND table_name = ANY($1)) \
             ORDER BY 1 LIMIT 1",
        )
        .bind(TENANT_TABLES)
        .fetch_optional(pool)
        .await?;
        match foreign {
            Some(table) => Err(StoreError::Provision {
                tenant_id,
                message: format!(
                    "database {name} already exists and is not managed by flexdb (found {table})"
                ),
            }),
            None => Ok(()),
        }
    }

    async fn prepare(&self, tenant_id: TenantId, name: &str, pool: &PgPool) -> StoreResult<i64> {
        let report = migrate::apply(pool, &TENANT_MIGRATIONS).await?;

        sqlx::query("INSERT INTO tenant_meta (tenant_id) VALUES ($1) ON CONFLICT (singleton) DO NOTHING")
            .bind(tenant_id.0)
            .execute(pool)
            .await?;
        let owner: uuid::Uuid = sqlx::query_scalar("SELECT tenant_id FROM tenant_meta")
            .fetch_one(pool)
            .await?;
        if owner != tenant_id.0 {
            return Err(StoreError::Provision {
                tenant_id,
                message: format!("database {name} is claimed by tenant {owner}"),
            });
        }

        sqlx::query(
            "INSERT INTO tenant_databases (tenant_id, database_name, schema_version) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (tenant_id) DO UPDATE \
             SET schema_version = EXCLUDED.schema_version, updated_at = now()",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(report.current_version)
        .execute(self.control.pool())
        .await?;

        Ok(report.current_version)
    }
}

impl TenantProvisioner for PostgresProvisioner {
    type Pool = PgPool;

    async fn provision(&self, tenant_id: TenantId) -> StoreResult<PgPool> {
        let name = self.database_name(&tenant_id)?;

        let created = client::ensure_database(self.control.admin(), &name).await?;
        if created {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        let pool = self.server.open_pool(&name, self.max_connections).await?;
        let ready = async {
            if !created {
                self.verify_adoptable(tenant_id, &name, &pool).await?;
            }
            self.prepare(tenant_id, &name, &pool).await
        }
        .await;
        match ready {
            Ok(schema_version) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    database = %name,
                    schema_version,
                    "Tenant database ready"
                );
                Ok(pool)
            }
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn destroy(&self, tenant_id: TenantId) -> StoreResult<()> {
        let name = self.database_name(&tenant_id)?;
        client::drop_database(self.control.admin(), &name).await?;
        sqlx::query("DELETE FROM tenant_databases WHERE tenant_id = $1")
            .bind(tenant_id.0)
            .execute(self.control.pool())
            .await?;
        Ok(())
    }
}

// ── Manager ───────────────────────────────────────────────────────

type Outcome<T> = Option<Result<T, String>>;

struct CacheState<T> {
    /// Unbounded; capacity is enforced by `evict_over` so busy pools can
    /// be skipped.
    pools: LruCache<TenantId, T>,
    inflight: HashMap<TenantId, watch::Receiver<Outcome<T>>>,
}

impl<T: TenantPool> CacheState<T> {
    /// Forget least-recently-used idle pools until the cache fits `max`.
    /// `keep` is never chosen. Pools with checked-out connections are
    /// skipped, so the cache may stay over the bound.
    ///
    /// Forgotten pools are not closed here: a caller may still hold a
    /// clone between round trips, and the pool closes once the last clone
    /// is dropped.
    fn evict_over(&mut self, max: Option<usize>, keep: &TenantId) -> Vec<TenantId> {
        let Some(max) = max else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.pools.len() > max {
            let victim = self
                .pools
                .iter()
                .rev()
                .find(|(id, pool)| *id != keep && pool.in_use() == 0)
                .map(|(id, _)| *id);

            let Some(victim) = victim else {
                tracing::warn!(
                    open = self.pools.len(),
                    max,
                    "Tenant pool cache over capacity; every other pool is busy"
                );
                break;
            };
            self.pools.pop(&victim);
            evicted.push(victim);
        }
        evicted
    }
}

/// Cache of tenant pools keyed by tenant id.
///
/// Clone is cheap; clones share the cache.
pub struct TenantDbManager<P: TenantProvisioner> {
    provisioner: Arc<P>,
    state: Arc<Mutex<CacheState<P::Pool>>>,
    max_open: Option<usize>,
}

impl<P: TenantProvisioner> Clone for TenantDbManager<P> {
    fn clone(&self) -> Self {
        Self {
            provisioner: Arc::clone(&self.provisioner),
            state: Arc::clone(&self.state),
            max_open: self.max_open,
        }
    }
}

impl<P: TenantProvisioner> TenantDbManager<P> {
    pub fn new(provisioner: P, max_open: Option<usize>) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            state: Arc::new(Mutex::new(CacheState {
                pools: LruCache::unbounded(),
                inflight: HashMap::new(),
            })),
            max_open,
        }
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Pool for `tenant_id`, provisioning its database on first use.
    ///
    /// The caller must already have checked that the tenant exists. Dropping
    /// the returned future abandons the wait but not the provisioning run.
    pub async fn acquire(&self, tenant_id: &TenantId) -> StoreResult<P::Pool> {
        let mut rx = {
            let mut state = self.state.lock().await;
            if let Some(pool) = state.pools.get(tenant_id) {
                return Ok(pool.clone());
            }

            // A closed channel means the provisioning task died without
            // reporting; start over.
            let waiting = state
                .inflight
                .get(tenant_id)
                .filter(|rx| rx.has_changed().is_ok())
                .cloned();
            match waiting {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.inflight.insert(*tenant_id, rx.clone());
                    self.spawn_provision(*tenant_id, tx);
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| StoreError::Provision {
                tenant_id: *tenant_id,
                message: "provisioning task ended without a result".into(),
            })?;

        match outcome {
            Some(Ok(pool)) => Ok(pool),
            Some(Err(message)) => Err(StoreError::Provision {
                tenant_id: *tenant_id,
                message,
            }),
            None => Err(StoreError::Provision {
                tenant_id: *tenant_id,
                message: "provisioning produced no result".into(),
            }),
        }
    }

    fn spawn_provision(&self, tenant_id: TenantId, tx: watch::Sender<Outcome<P::Pool>>) {
        let provisioner = Arc::clone(&self.provisioner);
        let state = Arc::clone(&self.state);
        let max_open = self.max_open;

        tokio::spawn(async move {
            tracing::debug!(tenant_id = %tenant_id, "Provisioning tenant database");
            let result = provisioner.provision(tenant_id).await;

            let evicted = {
                let mut state = state.lock().await;
                state.inflight.remove(&tenant_id);
                match &result {
                    Ok(pool) => {
                        state.pools.put(tenant_id, pool.clone());
                        state.evict_over(max_open, &tenant_id)
                    }
                    Err(_) => Vec::new(),
                }
            };
            for id in evicted {
                tracing::info!(tenant_id = %id, "Evicted tenant pool from cache");
            }

            let outcome = match result {
                Ok(pool) => Ok(pool),
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "Tenant provisioning failed");
                    Err(e.to_string())
                }
            };
            // No receivers left is fine: the pool is cached either way.
            let _ = tx.send(Some(outcome));
        });
    }

    /// Forget the cached pool for `tenant_id`. Outstanding clones keep
    /// working; the pool closes when the last one is dropped.
    pub async fn evict(&self, tenant_id: &TenantId) -> bool {
        self.state.lock().await.pools.pop(tenant_id).is_some()
    }

    /// Close the tenant's pool and drop its database.
    pub async fn drop_database(&self, tenant_id: &TenantId) -> StoreResult<()> {
        let removed = self.state.lock().await.pools.pop(tenant_id);
        if let Some(pool) = removed {
            pool.close().await;
        }
        self.provisioner.destroy(*tenant_id).await
    }

    pub async fn open_pools(&self) -> usize {
        self.state.lock().await.pools.len()
    }

    pub async fn is_cached(&self, tenant_id: &TenantId) -> bool {
        self.state.lock().await.pools.contains(tenant_id)
    }

    /// Close every cached pool.
    pub async fn close_all(&self) {
        let mut pools = Vec::new();
        {
            let mut state = self.state.lock().await;
            while let Some((_, pool)) = state.pools.pop_lru() {
                pools.push(pool);
            }
        }
        for pool in pools {
            pool.close().await;
        }
    }
}
