//! Citation edge resolution
//!
//! Runs once after every worker has committed. Raw edges are joined against
//! the document table on both endpoints, so edges pointing at documents that
//! never arrived simply drop out. The raw table is then retired.

use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::info;

use crate::store::RAW_EDGE_DDL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Raw edges consumed, duplicates and dangling ones included
    pub raw_edges: u64,
    /// New rows in `resolved_edge`
    pub resolved_edges: u64,
}

pub async fn resolve(conn: &mut PgConnection) -> Result<ResolutionReport, sqlx::Error> {
    let mut tx = conn.begin().await?;

    let (raw_edges,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_edge")
        .fetch_one(&mut *tx)
        .await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO resolved_edge (source_id, target_id)
        SELECT DISTINCT src.id, dst.id
        FROM raw_edge
        JOIN document src ON src.natural_key = raw_edge.source_key
        JOIN document dst ON dst.natural_key = raw_edge.target_key
        ON CONFLICT DO NOTHING
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("DROP TABLE raw_edge").execute(&mut *tx).await?;
    sqlx::query(RAW_EDGE_DDL).execute(&mut *tx).await?;

    tx.commit().await?;

    let report = ResolutionReport {
        raw_edges: raw_edges as u64,
        resolved_edges: inserted.rows_affected(),
    };

    info!(
        raw_edges = report.raw_edges,
        resolved_edges = report.resolved_edges,
        dropped = report.raw_edges.saturating_sub(report.resolved_edges),
        "References resolved"
    );

    Ok(report)
}
