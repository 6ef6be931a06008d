//! Journal impact-factor lookup and threshold filter.
//!
//! The table maps a normalized journal name (trimmed, lower-cased) to a
//! score. It is loaded once, up front, and handed to [`ImpactFilter`]
//! behind an `Arc` so worker tasks can share it read-only.

use crate::error::{PubmedkitError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Normalize a journal name for lookup
pub fn normalize_journal(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check whether a score passes a minimum threshold. Missing scores fail.
pub fn passes_threshold(score: Option<f64>, threshold: f64) -> bool {
    score.map(|s| s >= threshold).unwrap_or(false)
}

/// Parse a score cell such as `"12.3"` or `"<0.1"`.
pub fn parse_score(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('<').unwrap_or(raw).trim();
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalized journal name -> impact score
#[derive(Debug, Clone, Default)]
pub struct ImpactFactorTable {
    scores: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    journal: String,
    score: String,
}

impl ImpactFactorTable {
    /// Build a table from `(name, score)` pairs.
    ///
    /// Names are normalized; negative or non-finite scores are skipped and
    /// duplicate names keep the higher score.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut table = Self::default();
        for (name, score) in entries {
            table.insert(name.as_ref(), score);
        }
        table
    }

    fn insert(&mut self, name: &str, score: f64) {
        let key = normalize_journal(name);
        if key.is_empty() {
            return;
        }
        if !score.is_finite() || score < 0.0 {
            warn!(journal = %key, score, "Skipping invalid impact score");
            return;
        }
        self.scores
            .entry(key)
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    /// Load a table from a JSON object or a CSV file with `journal,score` columns.
    pub fn load(path: &Path) -> Result<Self> {
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        let table = if is_csv {
            Self::load_csv(path)?
        } else {
            Self::load_json(path)?
        };

        info!(path = %path.display(), journals = table.len(), "Loaded impact factor table");
        Ok(table)
    }

    fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        let mut table = Self::default();
        for (name, value) in raw {
            let score = match &value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => parse_score(s),
                _ => None,
            };
            match score {
                Some(score) => table.insert(&name, score),
                None => warn!(journal = %name, value = %value, "Skipping non-numeric impact score"),
            }
        }
        Ok(table)
    }

    fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let mut table = Self::default();
        for row in reader.deserialize::<ScoreRow>() {
            let row = row?;
            match parse_score(&row.score) {
                Some(score) => table.insert(&row.journal, score),
                None => warn!(journal = %row.journal, value = %row.score, "Skipping non-numeric impact score"),
            }
        }
        Ok(table)
    }

    /// Score for a raw (un-normalized) journal name
    pub fn score(&self, journal: &str) -> Option<f64> {
        self.scores.get(&normalize_journal(journal)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.scores.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Keep/drop decision on journal impact
#[derive(Debug, Clone, Default)]
pub struct ImpactFilter {
    table: Option<Arc<ImpactFactorTable>>,
    threshold: f64,
}

impl ImpactFilter {
    /// Build a filter with an injected table.
    ///
    /// A threshold of zero or less disables the filter and the table is ignored.
    pub fn new(table: Arc<ImpactFactorTable>, threshold: f64) -> Self {
        if threshold <= 0.0 {
            return Self::disabled();
        }
        Self {
            table: Some(table),
            threshold,
        }
    }

    /// Build from an optional table, failing when filtering is requested
    /// without one.
    pub fn from_parts(table: Option<Arc<ImpactFactorTable>>, threshold: f64) -> Result<Self> {
        if threshold <= 0.0 {
            return Ok(Self::disabled());
        }
        if threshold.is_nan() {
            return Err(PubmedkitError::Config("impact threshold is NaN".to_string()));
        }
        let table = table.ok_or_else(|| {
            PubmedkitError::Config(format!(
                "impact threshold {} requested but no impact factor table was supplied",
                threshold
            ))
        })?;
        Ok(Self::new(table, threshold))
    }

    /// A filter that keeps every record
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.table.is_some()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Keep a record from `journal`? Unknown journals are dropped.
    pub fn keep(&self, journal: &str) -> bool {
        let Some(table) = &self.table else {
            return true;
        };
        let score = table.score(journal);
        if score.is_none() {
            debug!(journal = journal, "Journal not in impact table");
        }
        passes_threshold(score, self.threshold)
    }
}
