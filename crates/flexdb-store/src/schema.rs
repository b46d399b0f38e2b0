//! Embedded migration sets for the control database and tenant databases.
//!
//! Foreign keys deliberately omit `ON DELETE CASCADE`: services refuse to
//! delete rows that still have dependents, and the constraints back that up.

use crate::migrate::{Migration, MigrationSet};

pub const CONTROL_MIGRATIONS: MigrationSet = MigrationSet {
    name: "control",
    migrations: &[
        Migration {
            version: 1,
            name: "tenants_and_users",
            sql: r#"
CREATE TABLE tenants (
    id         UUID PRIMARY KEY,
    slug       TEXT NOT NULL CHECK (slug <> ''),
    name       TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT tenants_slug_key UNIQUE (slug)
);
CREATE INDEX tenants_page_idx ON tenants (created_at, id);

CREATE TABLE users (
    id           UUID PRIMARY KEY,
    email        TEXT NOT NULL CHECK (email <> ''),
    display_name TEXT NOT NULL DEFAULT '',
    created_at   TIMESTAMPTZ NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL,
    CONSTRAINT users_email_key UNIQUE (email)
);
CREATE INDEX users_page_idx ON users (created_at, id);
"#,
        },
        Migration {
            version: 2,
            name: "tenant_users",
            sql: r#"
CREATE TABLE tenant_users (
    id         UUID PRIMARY KEY,
    tenant_id  UUID NOT NULL REFERENCES tenants (id),
    user_id    UUID NOT NULL REFERENCES users (id),
    role       TEXT NOT NULL DEFAULT 'member',
    status     TEXT NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT tenant_users_membership_key UNIQUE (tenant_id, user_id)
);
CREATE INDEX tenant_users_page_idx ON tenant_users (created_at, id);
CREATE INDEX tenant_users_user_idx ON tenant_users (user_id);
"#,
        },
        Migration {
            version: 3,
            name: "tenant_databases",
            sql: r#"
CREATE TABLE tenant_databases (
    tenant_id      UUID PRIMARY KEY,
    database_name  TEXT NOT NULL UNIQUE,
    schema_version BIGINT NOT NULL,
    provisioned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
        },
    ],
};

pub const TENANT_MIGRATIONS: MigrationSet = MigrationSet {
    name: "tenant",
    migrations: &[
        Migration {
            version: 1,
            name: "tenant_meta_and_node_types",
            sql: r#"
CREATE TABLE tenant_meta (
    singleton  BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
    tenant_id  UUID NOT NULL,
    claimed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE node_types (
    id          UUID PRIMARY KEY,
    tenant_id   UUID NOT NULL,
    name        TEXT NOT NULL CHECK (name <> ''),
    description TEXT NOT NULL DEFAULT '',
    schema      JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL,
    CONSTRAINT node_types_name_key UNIQUE (tenant_id, name)
);
CREATE INDEX node_types_page_idx ON node_types (created_at, id);
"#,
        },
        Migration {
            version: 2,
            name: "nodes",
            sql: r#"
CREATE TABLE nodes (
    id           UUID PRIMARY KEY,
    tenant_id    UUID NOT NULL,
    node_type_id UUID NOT NULL REFERENCES node_types (id),
    data         JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at   TIMESTAMPTZ NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX nodes_page_idx ON nodes (created_at, id);
CREATE INDEX nodes_type_idx ON nodes (node_type_id);
"#,
        },
        Migration {
            version: 3,
            name: "relationships",
            sql: r#"
CREATE TABLE relationships (
    id                UUID PRIMARY KEY,
    tenant_id         UUID NOT NULL,
    source_node_id    UUID NOT NULL REFERENCES nodes (id),
    target_node_id    UUID NOT NULL REFERENCES nodes (id),
    relationship_type TEXT NOT NULL CHECK (relationship_type <> ''),
    data              JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at        TIMESTAMPTZ NOT NULL,
    updated_at        TIMESTAMPTZ NOT NULL
);
CREATE INDEX relationships_page_idx ON relationships (created_at, id);
CREATE INDEX relationships_source_idx ON relationships (source_node_id);
CREATE INDEX relationships_target_idx ON relationships (target_node_id);
"#,
        },
    ],
};
