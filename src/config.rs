//! Pipeline configuration.
//!
//! Settings come from an optional JSON file and are overridden by CLI flags.
//! [`PipelineConfig::build_loader`] turns them into a ready [`BaselineLoader`].

use crate::error::{PubmedkitError, Result};
use crate::impact::{ImpactFactorTable, ImpactFilter};
use crate::keyword::{KeywordFilter, KeywordTarget};
use crate::loader::BaselineLoader;
use crate::store::StoreWriter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Filter and runtime settings for a pipeline run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub keywords: Vec<String>,
    /// "title", "abstract" or "either"
    pub keyword_target: String,
    /// Minimum impact score; zero or less disables the filter
    pub impact_threshold: f64,
    pub impact_table: Option<PathBuf>,
    /// Concurrent files; 1 runs sequentially
    pub workers: usize,
    pub file_timeout_secs: Option<u64>,
    pub database: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            keyword_target: KeywordTarget::default().to_string(),
            impact_threshold: 0.0,
            impact_table: None,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            file_timeout_secs: None,
            database: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| PubmedkitError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }

    /// Validate settings and assemble the loader.
    ///
    /// The impact table is only read when `impact_threshold > 0`, from
    /// `impact_table` if set and otherwise from the `journal_table` of
    /// `database`. It is a [`PubmedkitError::Config`] to request impact
    /// filtering with neither source available.
    pub fn build_loader(&self) -> Result<BaselineLoader> {
        let keyword = KeywordFilter::from_config(&self.keywords, &self.keyword_target)?;

        let table = if self.impact_threshold > 0.0 {
            Some(Arc::new(self.load_impact_table()?))
        } else {
            None
        };
        let impact = ImpactFilter::from_parts(table, self.impact_threshold)?;

        info!(
            keywords = keyword.keywords().len(),
            target = %keyword.target(),
            impact_threshold = impact.threshold(),
            "Filters configured"
        );
        Ok(BaselineLoader::new(keyword, impact))
    }

    fn load_impact_table(&self) -> Result<ImpactFactorTable> {
        if let Some(path) = &self.impact_table {
            return ImpactFactorTable::load(path);
        }

        let Some(db) = &self.database else {
            return Err(PubmedkitError::Config(format!(
                "impact threshold {} requires an impact table or a database with imported journals",
                self.impact_threshold
            )));
        };

        let table = StoreWriter::open(db)?.load_journals()?;
        if table.is_empty() {
            return Err(PubmedkitError::Config(format!(
                "{} has no journal impact factors; run import-journals first",
                db.display()
            )));
        }
        info!(path = %db.display(), journals = table.len(), "Using stored journal table");
        Ok(table)
    }
}
