//! Fixtures shared by the integration tests

#![allow(dead_code)]

use crossref_ingest::config::PipelineConfig;
use crossref_ingest::source::{LocalSource, Source};
use crossref_ingest::store::Database;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn database(pool: &PgPool) -> Database {
    Database::new((*pool.connect_options()).clone())
}

pub fn pipeline() -> PipelineConfig {
    PipelineConfig {
        workers: 2,
        channel_capacity: 2,
    }
}

pub fn local_source(dir: &Path) -> Source {
    Source::Local(LocalSource::new(dir.to_path_buf(), "gz".to_string()))
}

/// One Crossref item citing `references`
pub fn item(doi: &str, title: Option<&str>, references: &[&str]) -> Value {
    let mut item = json!({
        "DOI": doi,
        "reference": references.iter().map(|r| json!({"DOI": r})).collect::<Vec<_>>(),
    });
    if let Some(title) = title {
        item["title"] = json!([title]);
    }
    item
}

pub fn write_batch(dir: &Path, name: &str, items: Vec<Value>) -> PathBuf {
    write_raw(dir, name, json!({ "status": "ok", "items": items }).to_string().as_bytes())
}

/// Gzip arbitrary bytes into `dir/name`
pub fn write_raw(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
}

pub async fn resolved_pairs(pool: &PgPool) -> Vec<(String, String)> {
    sqlx::query_as(
        r#"
        SELECT src.natural_key, dst.natural_key
        FROM resolved_edge
        JOIN document src ON src.id = resolved_edge.source_id
        JOIN document dst ON dst.id = resolved_edge.target_id
        ORDER BY 1, 2
        "#,
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

pub fn pair(source: &str, target: &str) -> (String, String) {
    (source.to_string(), target.to_string())
}
