//! Baseline loading: extract, filter, stamp.
//!
//! [`BaselineLoader::load`] runs one batch file through the keyword and
//! impact filters and returns a [`BaselineBatch`]. Records must pass both
//! filters. Within a batch, a repeated id replaces the earlier entry in
//! place; ordering across batches is left to the store.

use crate::error::{PubmedkitError, Result};
use crate::extractor::RecordExtractor;
use crate::impact::ImpactFilter;
use crate::keyword::KeywordFilter;
use crate::record::{version_from_path, FilteredRecord, RawRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Column order for tabular output
pub const TABLE_COLUMNS: &[&str] = &[
    "id",
    "title",
    "abstract",
    "journal",
    "pubdate",
    "publication_types",
    "authors",
    "doi",
    "version",
];

/// Separator used when flattening list columns
const LIST_SEPARATOR: &str = "; ";

/// Per-file counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Records read from the file
    pub scanned: usize,
    /// Records that passed both filters
    pub kept: usize,
    pub dropped_keyword: usize,
    pub dropped_impact: usize,
    /// Kept records that replaced an earlier entry with the same id
    pub duplicates: usize,
}

/// Flat row of the tabular view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub id: i64,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub journal: String,
    pub pubdate: String,
    pub publication_types: String,
    pub authors: String,
    pub doi: String,
    pub version: String,
}

impl From<&FilteredRecord> for TableRow {
    fn from(r: &FilteredRecord) -> Self {
        Self {
            id: r.id,
            title: r.title.clone(),
            abstract_text: r.abstract_text.clone(),
            journal: r.journal.clone(),
            pubdate: r.pubdate.clone(),
            publication_types: r.publication_types.join(LIST_SEPARATOR),
            authors: r.authors.join(LIST_SEPARATOR),
            doi: r.doi.clone(),
            version: r.version.clone(),
        }
    }
}

/// Presentation of a result set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputShape {
    /// Records in first-seen order
    #[default]
    List,
    /// Id-keyed mapping
    Mapping,
    /// Flat rows
    Table,
}

impl FromStr for OutputShape {
    type Err = PubmedkitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "list" => Ok(OutputShape::List),
            "mapping" | "dict" => Ok(OutputShape::Mapping),
            "table" | "pd" => Ok(OutputShape::Table),
            other => Err(PubmedkitError::Config(format!(
                "invalid output shape {:?}: expected list, mapping or table",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputShape::List => "list",
            OutputShape::Mapping => "mapping",
            OutputShape::Table => "table",
        })
    }
}

/// Filtered records of one batch file
#[derive(Debug, Clone, Default)]
pub struct BaselineBatch {
    version: String,
    records: Vec<FilteredRecord>,
    index: HashMap<i64, usize>,
    stats: LoadStats,
}

impl BaselineBatch {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    /// Add a record; an id already present is overwritten in its original slot.
    pub fn push(&mut self, record: FilteredRecord) {
        match self.index.get(&record.id) {
            Some(&slot) => {
                self.records[slot] = record;
                self.stats.duplicates += 1;
            }
            None => {
                self.index.insert(record.id, self.records.len());
                self.records.push(record);
                self.stats.kept += 1;
            }
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&FilteredRecord> {
        self.index.get(&id).map(|&slot| &self.records[slot])
    }

    /// Records as a sequence
    pub fn as_list(&self) -> &[FilteredRecord] {
        &self.records
    }

    /// Records keyed by id
    pub fn as_mapping(&self) -> HashMap<i64, &FilteredRecord> {
        self.records.iter().map(|r| (r.id, r)).collect()
    }

    /// Records as flat rows, columns per [`TABLE_COLUMNS`]
    pub fn as_table(&self) -> Vec<TableRow> {
        self.records.iter().map(TableRow::from).collect()
    }

    pub fn into_records(self) -> Vec<FilteredRecord> {
        self.records
    }

    /// Write the tabular view as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        write_csv(writer, &self.records)
    }
}

/// Write records as CSV rows, columns per [`TABLE_COLUMNS`].
pub fn write_csv<W: Write>(writer: W, records: &[FilteredRecord]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    if records.is_empty() {
        wtr.write_record(TABLE_COLUMNS)?;
    }
    for record in records {
        wtr.serialize(TableRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Runs one batch file through both filters
#[derive(Debug, Clone, Default)]
pub struct BaselineLoader {
    keyword: KeywordFilter,
    impact: ImpactFilter,
}

impl BaselineLoader {
    pub fn new(keyword: KeywordFilter, impact: ImpactFilter) -> Self {
        Self { keyword, impact }
    }

    /// A loader that keeps every record
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn keyword_filter(&self) -> &KeywordFilter {
        &self.keyword
    }

    pub fn impact_filter(&self) -> &ImpactFilter {
        &self.impact
    }

    /// Load and filter one batch file.
    ///
    /// Extraction failures propagate; a partially read file yields no batch.
    pub fn load(&self, path: &Path) -> Result<BaselineBatch> {
        let version = version_from_path(path);
        let mut batch = BaselineBatch::new(version.clone());

        for raw in RecordExtractor::open(path)? {
            let raw = raw?;
            batch.stats.scanned += 1;

            if !self.keyword.keep(&raw) {
                batch.stats.dropped_keyword += 1;
                continue;
            }
            if !self.impact.keep(&raw.journal) {
                batch.stats.dropped_impact += 1;
                debug!(id = %raw.id, journal = %raw.journal, "Dropped on impact");
                continue;
            }

            let id = coerce_id(&raw, path)?;
            batch.push(FilteredRecord::from_raw(raw, id, &version));
        }

        let stats = batch.stats;
        info!(
            file = %path.display(),
            version = %version,
            scanned = stats.scanned,
            kept = stats.kept,
            duplicates = stats.duplicates,
            dropped_keyword = stats.dropped_keyword,
            dropped_impact = stats.dropped_impact,
            "Loaded baseline file"
        );

        Ok(batch)
    }
}

fn coerce_id(raw: &RawRecord, path: &Path) -> Result<i64> {
    raw.id.trim().parse::<i64>().map_err(|_| {
        PubmedkitError::Extraction(format!(
            "{}: record id {:?} is not an integer",
            path.display(),
            raw.id
        ))
    })
}
