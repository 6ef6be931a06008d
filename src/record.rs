//! Record types flowing through the pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One citation as produced by the extractor.
///
/// `id` stays textual here; the loader coerces it to an integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub journal: String,
    pub pubdate: String,
    pub publication_types: Vec<String>,
    pub authors: Vec<String>,
    pub doi: String,
}

/// A record that survived filtering, stamped with its baseline release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredRecord {
    pub id: i64,
    pub title: String,
    pub abstract_text: String,
    pub journal: String,
    pub pubdate: String,
    pub publication_types: Vec<String>,
    pub authors: Vec<String>,
    pub doi: String,
    pub version: String,
}

impl FilteredRecord {
    /// Stamp a raw record with `version` using an already coerced id.
    pub fn from_raw(raw: RawRecord, id: i64, version: &str) -> Self {
        Self {
            id,
            title: raw.title,
            abstract_text: raw.abstract_text,
            journal: raw.journal,
            pubdate: raw.pubdate,
            publication_types: raw.publication_types,
            authors: raw.authors,
            doi: raw.doi,
            version: version.to_string(),
        }
    }
}

/// Derive the version tag of a batch file from its path.
///
/// The tag is the base name up to the first `.`, so
/// `/data/pubmed24n0001.xml.gz` yields `pubmed24n0001`.
pub fn version_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}
