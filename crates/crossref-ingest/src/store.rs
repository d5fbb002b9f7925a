//! PostgreSQL store: connection factory, schema and bulk writes
//!
//! Tables are created at runtime rather than through migrations because a run
//! starts by dropping them.

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use crate::model::{Extracted, NewDocument, RawEdge};

/// Rows per INSERT; keeps bind parameters far below PostgreSQL's 65535
pub const INSERT_CHUNK_ROWS: usize = 10_000;

const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS resolved_edge",
    "DROP TABLE IF EXISTS raw_edge",
    "DROP TABLE IF EXISTS document",
];

const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS document (
        id BIGSERIAL PRIMARY KEY,
        natural_key TEXT NOT NULL,
        title TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS document_natural_key_idx ON document (natural_key)",
    "CREATE INDEX IF NOT EXISTS document_title_idx ON document (title)",
    RAW_EDGE_DDL,
    r#"
    CREATE TABLE IF NOT EXISTS resolved_edge (
        source_id BIGINT NOT NULL REFERENCES document (id),
        target_id BIGINT NOT NULL REFERENCES document (id),
        PRIMARY KEY (source_id, target_id)
    )
    "#,
];

pub(crate) const RAW_EDGE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS raw_edge (
        id BIGSERIAL PRIMARY KEY,
        source_key TEXT NOT NULL,
        target_key TEXT NOT NULL
    )
    "#;

/// Opens dedicated connections; one per worker plus one for lifecycle steps
#[derive(Debug, Clone)]
pub struct Database {
    options: PgConnectOptions,
}

impl Database {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_url(url: &str) -> Result<Self, sqlx::Error> {
        Ok(Self::new(url.parse()?))
    }

    /// Open a fresh connection owned by the caller
    pub async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        debug!(
            host = self.options.get_host(),
            database = self.options.get_database().unwrap_or_default(),
            "Opening database connection"
        );
        PgConnection::connect_with(&self.options).await
    }
}

/// Drop all tables, dependents first
pub async fn reset_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    for statement in DROP_STATEMENTS {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    info!("Schema dropped");
    Ok(())
}

pub async fn create_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    for statement in CREATE_STATEMENTS {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    info!("Schema created");
    Ok(())
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub documents: i64,
    pub raw_edges: i64,
    pub resolved_edges: i64,
}

pub async fn table_counts(conn: &mut PgConnection) -> Result<TableCounts, sqlx::Error> {
    let (documents, raw_edges, resolved_edges): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM document),
            (SELECT COUNT(*) FROM raw_edge),
            (SELECT COUNT(*) FROM resolved_edge)
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(TableCounts {
        documents,
        raw_edges,
        resolved_edges,
    })
}

/// Insert one batch's documents and raw edges atomically
pub async fn write_batch(conn: &mut PgConnection, batch: &Extracted) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;

    for chunk in batch.documents.chunks(INSERT_CHUNK_ROWS) {
        insert_documents(&mut tx, chunk).await?;
    }

    for chunk in batch.raw_edges.chunks(INSERT_CHUNK_ROWS) {
        insert_raw_edges(&mut tx, chunk).await?;
    }

    tx.commit().await?;

    debug!(
        documents = batch.documents.len(),
        raw_edges = batch.raw_edges.len(),
        "Batch committed"
    );
    Ok(())
}

async fn insert_documents(
    tx: &mut Transaction<'_, Postgres>,
    documents: &[NewDocument],
) -> Result<(), sqlx::Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO document (natural_key, title) ");

    query_builder.push_values(documents, |mut b, document| {
        b.push_bind(&document.natural_key).push_bind(&document.title);
    });

    query_builder.build().execute(&mut **tx).await?;
    Ok(())
}

async fn insert_raw_edges(
    tx: &mut Transaction<'_, Postgres>,
    edges: &[RawEdge],
) -> Result<(), sqlx::Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO raw_edge (source_key, target_key) ");

    query_builder.push_values(edges, |mut b, edge| {
        b.push_bind(&edge.source_key).push_bind(&edge.target_key);
    });

    query_builder.build().execute(&mut **tx).await?;
    Ok(())
}
