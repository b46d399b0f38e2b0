//! Integration tests for flexdb-store against a live PostgreSQL server.
//!
//! Point `FLEXDB__DATABASE__URL` at a server the test role may create
//! databases on, then run:
//! cargo test --package flexdb-store --test integration -- --ignored
//!
//! Skipped automatically if PostgreSQL is not available.

use std::sync::Arc;

use flexdb_core::config::{DatabaseConfig, PaginationConfig, TenancyConfig};
use flexdb_core::types::{
    CreateNode, CreateNodeType, NodeFilter, NodeTypeId, TenantId, UpdateNodeType,
};
use flexdb_core::{ErrorKind, FlexError, PageRequest};
use flexdb_store::client::{drop_database, ensure_database};
use flexdb_store::records::{NodeRecord, NodeTypeRecord};
use flexdb_store::{
    migrate, ControlStore, Migration, MigrationSet, PostgresProvisioner, Repository, StoreError,
    TenantDbManager, TENANT_MIGRATIONS,
};
use serde_json::json;

fn test_config() -> DatabaseConfig {
    let mut config = DatabaseConfig::default();
    if let Ok(url) = std::env::var("FLEXDB__DATABASE__URL") {
        config.url = url;
    }
    config.control_database = "flexdb_control_test".to_string();
    config
}

async fn connect_or_skip() -> Option<ControlStore> {
    match ControlStore::connect(&test_config()).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Skipping integration test (PostgreSQL not available): {e}");
            None
        }
    }
}

fn tenancy() -> TenancyConfig {
    TenancyConfig {
        database_prefix: "flexdb_it_".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_migrations_are_idempotent() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let name = format!("flexdb_it_mig_{}", TenantId::new().0.simple());
    assert!(ensure_database(control.admin(), &name).await.unwrap());
    // A second ensure is a no-op.
    assert!(!ensure_database(control.admin(), &name).await.unwrap());

    let pool = control.server().open_pool(&name, 2).await.unwrap();
    let first = migrate::apply(&pool, &TENANT_MIGRATIONS).await.unwrap();
    assert_eq!(first.applied.len(), TENANT_MIGRATIONS.migrations.len());
    assert_eq!(first.current_version, TENANT_MIGRATIONS.latest_version());

    let second = migrate::apply(&pool, &TENANT_MIGRATIONS).await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.current_version, first.current_version);

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(recorded, TENANT_MIGRATIONS.migrations.len() as i64);

    pool.close().await;
    drop_database(control.admin(), &name).await.unwrap();
}

static STEPS_BROKEN: MigrationSet = MigrationSet {
    name: "it_steps",
    migrations: &[
        Migration {
            version: 1,
            name: "table_a",
            sql: "CREATE TABLE table_a (id INT PRIMARY KEY)",
        },
        Migration {
            version: 2,
            name: "table_b",
            sql: "CREATE TABLE table_b (id INT PRIMARY KEY); INSERT INTO no_such_table VALUES (1)",
        },
        Migration {
            version: 3,
            name: "table_c",
            sql: "CREATE TABLE table_c (id INT PRIMARY KEY)",
        },
    ],
};

static STEPS_FIXED: MigrationSet = MigrationSet {
    name: "it_steps",
    migrations: &[
        Migration {
            version: 1,
            name: "table_a",
            sql: "CREATE TABLE table_a (id INT PRIMARY KEY)",
        },
        Migration {
            version: 2,
            name: "table_b",
            sql: "CREATE TABLE table_b (id INT PRIMARY KEY)",
        },
        Migration {
            version: 3,
            name: "table_c",
            sql: "CREATE TABLE table_c (id INT PRIMARY KEY)",
        },
    ],
};

async fn table_exists(pool: &sqlx::PgPool, table: &str) -> bool {
    sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_failed_migration_stops_without_recording() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let name = format!("flexdb_it_mig_{}", TenantId::new().0.simple());
    ensure_database(control.admin(), &name).await.unwrap();
    let pool = control.server().open_pool(&name, 2).await.unwrap();

    let err = migrate::apply(&pool, &STEPS_BROKEN).await.unwrap_err();
    assert!(matches!(err, StoreError::Migration { version: 2, .. }));

    let recorded: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(recorded, Some(1));
    assert!(table_exists(&pool, "table_a").await);
    // The failed step rolled back as a whole; the next one never ran.
    assert!(!table_exists(&pool, "table_b").await);
    assert!(!table_exists(&pool, "table_c").await);

    // Once the step is fixed, the next run resumes after version 1.
    let report = migrate::apply(&pool, &STEPS_FIXED).await.unwrap();
    assert_eq!(report.applied, vec![2, 3]);
    assert_eq!(report.current_version, 3);
    assert!(table_exists(&pool, "table_c").await);

    pool.close().await;
    drop_database(control.admin(), &name).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_unmanaged_database_is_not_adopted() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let provisioner = PostgresProvisioner::new(control.clone(), &tenancy());
    let tenant = TenantId::new();
    let name = provisioner.database_name(&tenant).unwrap();

    // Someone else's database happens to carry the tenant's name.
    ensure_database(control.admin(), &name).await.unwrap();
    let foreign = control.server().open_pool(&name, 1).await.unwrap();
    sqlx::query("CREATE TABLE payroll (id INT PRIMARY KEY, amount NUMERIC)")
        .execute(&foreign)
        .await
        .unwrap();

    let manager = TenantDbManager::new(provisioner, None);
    let err = manager.acquire(&tenant).await.unwrap_err();
    assert!(matches!(err, StoreError::Provision { .. }));
    assert!(err.to_string().contains("not managed by flexdb"));
    assert_eq!(FlexError::from(err).kind(), ErrorKind::Internal);

    // Nothing was written into it.
    assert!(table_exists(&foreign, "payroll").await);
    assert!(!table_exists(&foreign, "nodes").await);
    assert!(!table_exists(&foreign, "schema_migrations").await);
    assert!(!manager.is_cached(&tenant).await);
    assert!(!manager.provisioner().is_provisioned(&tenant).await.unwrap());

    foreign.close().await;
    drop_database(control.admin(), &name).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_empty_leftover_database_is_adopted() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let provisioner = PostgresProvisioner::new(control.clone(), &tenancy());
    let tenant = TenantId::new();
    let name = provisioner.database_name(&tenant).unwrap();

    // An earlier run created the database and died before migrating it.
    ensure_database(control.admin(), &name).await.unwrap();

    let manager = TenantDbManager::new(provisioner, None);
    let pool = manager.acquire(&tenant).await.unwrap();
    assert!(table_exists(&pool, "nodes").await);
    assert_eq!(manager.provisioner().databases_created(), 0);

    manager.drop_database(&tenant).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_evicted_pool_keeps_serving_its_holder() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let manager = TenantDbManager::new(PostgresProvisioner::new(control, &tenancy()), Some(1));
    let (a, b) = (TenantId::new(), TenantId::new());

    let pool_a = manager.acquire(&a).await.unwrap();
    sqlx::query("SELECT 1").execute(&pool_a).await.unwrap();

    // Provisioning `b` pushes `a` out of the cache mid-operation.
    manager.acquire(&b).await.unwrap();
    assert!(!manager.is_cached(&a).await);
    sqlx::query("SELECT 1").execute(&pool_a).await.unwrap();

    drop(pool_a);
    manager.drop_database(&a).await.unwrap();
    manager.drop_database(&b).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_concurrent_acquire_creates_one_database() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let manager = Arc::new(TenantDbManager::new(
        PostgresProvisioner::new(control.clone(), &tenancy()),
        None,
    ));
    let tenant = TenantId::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move { manager.acquire(&tenant).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(manager.provisioner().databases_created(), 1);
    assert!(manager.provisioner().is_provisioned(&tenant).await.unwrap());

    // Re-provisioning after eviction reuses the existing database.
    manager.evict(&tenant).await;
    manager.acquire(&tenant).await.unwrap();
    assert_eq!(manager.provisioner().databases_created(), 1);

    manager.drop_database(&tenant).await.unwrap();
    assert!(!manager.provisioner().is_provisioned(&tenant).await.unwrap());
}

#[tokio::test]
#[ignore = "requires live PostgreSQL; run with cargo test --package flexdb-store --test integration -- --ignored"]
async fn test_repository_crud_and_pagination() {
    let Some(control) = connect_or_skip().await else {
        return;
    };
    let manager = TenantDbManager::new(PostgresProvisioner::new(control, &tenancy()), None);
    let tenant = TenantId::new();
    let pool = manager.acquire(&tenant).await.unwrap();
    let limits = PaginationConfig::default();

    let types = Repository::<NodeTypeRecord>::scoped(pool.clone(), tenant, limits.clone());
    let task = types
        .create(&CreateNodeType {
            name: "Task".into(),
            description: "A unit of work".into(),
            schema: None,
        })
        .await
        .unwrap();
    assert_eq!(task.schema, json!({}));
    assert_eq!(task.tenant_id, tenant);

    // Duplicate name within the tenant.
    let dup = types
        .create(&CreateNodeType {
            name: "Task".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(dup, StoreError::UniqueViolation { .. }));

    // Empty update only refreshes updated_at.
    let untouched = types
        .update(
            task.id,
            &UpdateNodeType {
                name: Some(String::new()),
                description: None,
                schema: Some(serde_json::Value::Null),
            },
        )
        .await
        .unwrap();
    assert_eq!(untouched.name, task.name);
    assert_eq!(untouched.description, task.description);
    assert_eq!(untouched.schema, task.schema);
    assert_eq!(untouched.created_at, task.created_at);
    assert!(untouched.updated_at >= task.updated_at);

    let nodes = Repository::<NodeRecord>::scoped(pool.clone(), tenant, limits);
    for i in 0..7 {
        nodes
            .create(&CreateNode {
                node_type_id: task.id,
                data: Some(json!({ "n": i })),
            })
            .await
            .unwrap();
    }

    let filter = NodeFilter {
        node_type_id: Some(task.id),
    };
    let mut seen = Vec::new();
    let mut token = String::new();
    loop {
        let page = nodes.list(&filter, &PageRequest::new(3, token)).await.unwrap();
        assert_eq!(page.total_count, 7);
        assert!(page.items.len() <= 3);
        seen.extend(page.items.iter().map(|n| n.data["n"].as_i64().unwrap()));
        if !page.has_more() {
            break;
        }
        token = page.next_page_token;
    }
    // Every row exactly once.
    seen.sort_unstable();
    assert_eq!(seen, (0..7).collect::<Vec<_>>());

    // Another tenant's scope sees nothing.
    let stranger = Repository::<NodeRecord>::scoped(pool, TenantId::new(), PaginationConfig::default());
    let page = stranger.list(&NodeFilter::default(), &PageRequest::first(10)).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, 0);

    let bad = nodes.list(&filter, &PageRequest::new(3, "not-a-token")).await.unwrap_err();
    assert!(matches!(bad, StoreError::InvalidPageToken));

    // A node type deleted after the service's existence check.
    let gone = NodeTypeId::new();
    let err = nodes
        .create(&CreateNode {
            node_type_id: gone,
            data: None,
        })
        .await
        .unwrap_err();
    match &err {
        StoreError::MissingReference { referenced, key, .. } => {
            assert_eq!(*referenced, "node_type");
            assert_eq!(key, &gone.to_string());
        }
        other => panic!("expected MissingReference, got {other:?}"),
    }
    assert_eq!(FlexError::from(err).kind(), ErrorKind::NotFound);

    // Deleting a type that still has nodes trips the foreign key.
    let err = types.delete(task.id).await.unwrap_err();
    assert!(matches!(err, StoreError::StillReferenced { .. }));
    assert_eq!(FlexError::from(err).kind(), ErrorKind::Conflict);

    manager.drop_database(&tenant).await.unwrap();
}
