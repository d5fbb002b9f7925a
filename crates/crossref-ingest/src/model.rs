//! Bibliographic records and the batch file format
//!
//! A batch file is gzip-compressed JSON:
//!
//! ```json
//! {"items": [{"DOI": "10.1/a", "title": ["A"], "reference": [{"DOI": "10.1/b"}, {"unstructured": "..."}]}]}
//! ```
//!
//! Anything else in the file is ignored.

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use tracing::debug;

use crate::error::DecodeError;

/// A stored document row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub natural_key: String,
    pub title: Option<String>,
}

/// A document waiting to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub natural_key: String,
    pub title: Option<String>,
}

/// An unresolved citation between two natural keys
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RawEdge {
    pub source_key: String,
    pub target_key: String,
}

/// A citation between two stored documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::FromRow)]
pub struct ResolvedEdge {
    pub source_id: i64,
    pub target_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Batch {
    pub items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
pub struct Item {
    #[serde(rename = "DOI")]
    pub doi: String,

    #[serde(default)]
    pub title: Option<Vec<String>>,

    #[serde(default)]
    pub reference: Option<Vec<Reference>>,
}

#[derive(Debug, Deserialize)]
pub struct Reference {
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
}

/// Everything one batch contributes to the store
#[derive(Debug, Default)]
pub struct Extracted {
    pub documents: Vec<NewDocument>,
    pub raw_edges: Vec<RawEdge>,
}

impl Batch {
    /// Gunzip and parse a batch file's bytes
    pub fn decode(compressed: &[u8]) -> Result<Self, DecodeError> {
        let mut json = Vec::new();
        GzDecoder::new(compressed).read_to_end(&mut json)?;
        debug!("Decompressed {} -> {} bytes", compressed.len(), json.len());
        Ok(serde_json::from_slice(&json)?)
    }

    /// One document per item, one raw edge per reference carrying a DOI
    pub fn extract(self) -> Extracted {
        let mut extracted = Extracted {
            documents: Vec::with_capacity(self.items.len()),
            raw_edges: Vec::new(),
        };

        for item in self.items {
            for reference in item.reference.into_iter().flatten() {
                if let Some(target_key) = reference.doi {
                    extracted.raw_edges.push(RawEdge {
                        source_key: item.doi.clone(),
                        target_key,
                    });
                }
            }

            extracted.documents.push(NewDocument {
                title: item.title.and_then(|titles| titles.into_iter().next()),
                natural_key: item.doi,
            });
        }

        extracted
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_extract_documents_and_edges() {
        let json = br#"{
            "status": "ok",
            "items": [
                {"DOI": "10.1/a", "title": ["First", "Subtitle"],
                 "reference": [{"DOI": "10.1/b"}, {"unstructured": "no doi"}, {"DOI": "10.1/zzz"}]},
                {"DOI": "10.1/b"},
                {"DOI": "10.1/c", "title": [], "reference": []}
            ]
        }"#;

        let extracted = Batch::decode(&gzip(json)).unwrap().extract();

        assert_eq!(
            extracted.documents,
            vec![
                NewDocument { natural_key: "10.1/a".into(), title: Some("First".into()) },
                NewDocument { natural_key: "10.1/b".into(), title: None },
                NewDocument { natural_key: "10.1/c".into(), title: None },
            ]
        );
        assert_eq!(
            extracted.raw_edges,
            vec![
                RawEdge { source_key: "10.1/a".into(), target_key: "10.1/b".into() },
                RawEdge { source_key: "10.1/a".into(), target_key: "10.1/zzz".into() },
            ]
        );
    }

    #[test]
    fn test_highly_compressed_batch_decodes() {
        // whitespace padding compresses far beyond 8:1
        let padding = " ".repeat(1 << 20);
        let json = format!(r#"{{"items": [{}{{"DOI": "10.1/pad"}}]}}"#, padding);
        let compressed = gzip(json.as_bytes());
        assert!(compressed.len() * 100 < json.len());

        let extracted = Batch::decode(&compressed).unwrap().extract();
        assert_eq!(extracted.documents[0].natural_key, "10.1/pad");
    }

    #[test]
    fn test_null_title_and_reference_lists() {
        let json = br#"{"items": [{"DOI": "10.1/x", "title": null, "reference": null}]}"#;
        let extracted = Batch::decode(&gzip(json)).unwrap().extract();
        assert_eq!(extracted.documents.len(), 1);
        assert!(extracted.raw_edges.is_empty());
    }

    #[test]
    fn test_item_without_doi_is_rejected() {
        let json = br#"{"items": [{"title": ["orphan"]}]}"#;
        assert!(matches!(Batch::decode(&gzip(json)), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_plain_json_is_not_gzip() {
        let json = br#"{"items": []}"#;
        assert!(matches!(Batch::decode(json), Err(DecodeError::Gzip(_))));
    }
}
