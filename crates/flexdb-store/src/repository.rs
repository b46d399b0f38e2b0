//! Generic CRUD and cursor-paginated listing over one entity table.
//!
//! Each entity describes its table through [`Record`]; [`Repository`] turns
//! that description into single-statement SQL. Tenant-scoped records are
//! additionally constrained to the repository's tenant on every statement.

use std::fmt::Display;
use std::marker::PhantomData;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use flexdb_core::config::PaginationConfig;
use flexdb_core::types::TenantId;
use flexdb_core::{Cursor, Page, PageRequest};

use crate::error::{StoreError, StoreResult};

/// Query builder with owned bind values.
pub type Sql = QueryBuilder<'static, Postgres>;

/// Comma-separated fragment of a [`Sql`] statement.
pub type SqlList<'qb> = Separated<'qb, 'static, Postgres, &'static str>;

/// Table mapping for one entity.
pub trait Record: for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static {
    type Id: Copy + Display + Into<Uuid> + From<Uuid> + Send + Sync;
    type Model: Send;
    type Draft: Sync;
    type Patch: Sync;
    type Filter: Sync;

    /// Name used in error messages ("node_type").
    const ENTITY: &'static str;
    const TABLE: &'static str;
    /// Select list matching the `FromRow` impl.
    const COLUMNS: &'static str;
    /// Columns written by [`Record::push_insert_values`], in order.
    const INSERT_COLUMNS: &'static str;
    /// Whether the table carries a `tenant_id` bound to the repository scope.
    const TENANT_SCOPED: bool;

    fn into_model(self) -> StoreResult<Self::Model>;

    fn cursor(&self) -> Cursor;

    fn push_insert_values(draft: &Self::Draft, values: &mut SqlList<'_>);

    /// Push `column = value` assignments for present fields only.
    fn push_patch(patch: &Self::Patch, set: &mut SqlList<'_>);

    /// Push ` AND column = value` for each present filter.
    fn push_filters(filter: &Self::Filter, sql: &mut Sql);
}

/// Timestamps are truncated to the database's microsecond precision so
/// that cursors round-trip exactly.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Repository over the table of `R`.
pub struct Repository<R: Record> {
    pool: PgPool,
    scope: Option<TenantId>,
    limits: PaginationConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for Repository<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            scope: self.scope,
            limits: self.limits.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Repository<R> {
    /// Repository over a control-store table.
    pub fn control(pool: PgPool, limits: PaginationConfig) -> Self {
        Self {
            pool,
            scope: None,
            limits,
            _record: PhantomData,
        }
    }

    /// Repository bound to one tenant's database.
    pub fn scoped(pool: PgPool, tenant_id: TenantId, limits: PaginationConfig) -> Self {
        Self {
            pool,
            scope: Some(tenant_id),
            limits,
            _record: PhantomData,
        }
    }

    pub fn scope(&self) -> Option<TenantId> {
        self.scope
    }

    fn tenant(&self) -> StoreResult<Option<TenantId>> {
        match (R::TENANT_SCOPED, self.scope) {
            (true, None) => Err(StoreError::Unscoped { entity: R::ENTITY }),
            (true, scope) => Ok(scope),
            (false, _) => Ok(None),
        }
    }

    fn push_scope(sql: &mut Sql, tenant: Option<TenantId>) {
        if let Some(tenant) = tenant {
            sql.push(" AND tenant_id = ").push_bind(Uuid::from(tenant));
        }
    }

    /// Insert a new row with a generated id and timestamps.
    pub async fn create(&self, draft: &R::Draft) -> StoreResult<R::Model> {
        let tenant = self.tenant()?;
        let created_at = now();

        let mut sql = Sql::new(format!("INSERT INTO {} (id, ", R::TABLE));
        if tenant.is_some() {
            sql.push("tenant_id, ");
        }
        sql.push(R::INSERT_COLUMNS);
        sql.push(", created_at, updated_at) VALUES (");
        {
            let mut values = sql.separated(", ");
            values.push_bind(Uuid::new_v4());
            if let Some(tenant) = tenant {
                values.push_bind(Uuid::from(tenant));
            }
            R::push_insert_values(draft, &mut values);
            values.push_bind(created_at);
            values.push_bind(created_at);
        }
        sql.push(") RETURNING ").push(R::COLUMNS);

        let row = sql
            .build_query_as::<R>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(R::ENTITY, e))?;
        row.into_model()
    }

    pub async fn get_by_id(&self, id: R::Id) -> StoreResult<R::Model> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("SELECT {} FROM {} WHERE id = ", R::COLUMNS, R::TABLE));
        sql.push_bind(Into::<Uuid>::into(id));
        Self::push_scope(&mut sql, tenant);

        let row = sql.build_query_as::<R>().fetch_optional(&self.pool).await?;
        match row {
            Some(row) => row.into_model(),
            None => Err(StoreError::not_found(R::ENTITY, id)),
        }
    }

    pub async fn exists(&self, id: R::Id) -> StoreResult<bool> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = ", R::TABLE));
        sql.push_bind(Into::<Uuid>::into(id));
        Self::push_scope(&mut sql, tenant);
        sql.push(")");

        Ok(sql.build_query_scalar::<bool>().fetch_one(&self.pool).await?)
    }

    /// Partial update in one statement. Absent fields keep their value;
    /// `updated_at` is always refreshed.
    pub async fn update(&self, id: R::Id, patch: &R::Patch) -> StoreResult<R::Model> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("UPDATE {} SET ", R::TABLE));
        {
            let mut set = sql.separated(", ");
            R::push_patch(patch, &mut set);
            set.push("updated_at = ").push_bind_unseparated(now());
        }
        sql.push(" WHERE id = ").push_bind(Into::<Uuid>::into(id));
        Self::push_scope(&mut sql, tenant);
        sql.push(" RETURNING ").push(R::COLUMNS);

        let row = sql
            .build_query_as::<R>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(R::ENTITY, e))?;
        match row {
            Some(row) => row.into_model(),
            None => Err(StoreError::not_found(R::ENTITY, id)),
        }
    }

    /// Hard delete. Dependents are not cascaded.
    pub async fn delete(&self, id: R::Id) -> StoreResult<()> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("DELETE FROM {} WHERE id = ", R::TABLE));
        sql.push_bind(Into::<Uuid>::into(id));
        Self::push_scope(&mut sql, tenant);

        let result = sql
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_delete(R::ENTITY, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(R::ENTITY, id));
        }
        Ok(())
    }

    /// Delete every row matching `filter`; returns the number removed.
    pub async fn delete_where(&self, filter: &R::Filter) -> StoreResult<u64> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("DELETE FROM {} WHERE TRUE", R::TABLE));
        Self::push_scope(&mut sql, tenant);
        R::push_filters(filter, &mut sql);

        let result = sql
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_delete(R::ENTITY, e))?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, filter: &R::Filter) -> StoreResult<i64> {
        let tenant = self.tenant()?;

        let mut sql = Sql::new(format!("SELECT COUNT(*) FROM {} WHERE TRUE", R::TABLE));
        Self::push_scope(&mut sql, tenant);
        R::push_filters(filter, &mut sql);

        Ok(sql.build_query_scalar::<i64>().fetch_one(&self.pool).await?)
    }

    /// One page of rows ordered by `(created_at, id)`.
    ///
    /// `total_count` comes from a separate count under the same filters and
    /// may disagree with the page under concurrent writes.
    pub async fn list(&self, filter: &R::Filter, page: &PageRequest) -> StoreResult<Page<R::Model>> {
        let tenant = self.tenant()?;
        let after = page.cursor().map_err(|_| StoreError::InvalidPageToken)?;
        let limit = page.limit(&self.limits);

        let mut sql = Sql::new(format!("SELECT {} FROM {} WHERE TRUE", R::COLUMNS, R::TABLE));
        Self::push_scope(&mut sql, tenant);
        R::push_filters(filter, &mut sql);
        if let Some(after) = after {
            sql.push(" AND (created_at, id) > (")
                .push_bind(after.created_at)
                .push(", ")
                .push_bind(after.id)
                .push(")");
        }
        sql.push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(limit + 1);

        let mut rows = sql.build_query_as::<R>().fetch_all(&self.pool).await?;

        let next_page_token = if rows.len() as i64 > limit {
            rows.truncate(limit as usize);
            rows.last().map(|r| r.cursor().encode()).unwrap_or_default()
        } else {
            String::new()
        };

        let total_count = self.count(filter).await?;
        let items = rows
            .into_iter()
            .map(R::into_model)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page {
            items,
            next_page_token,
            total_count,
        })
    }
}
