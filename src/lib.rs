//! # pubmedkit
//!
//! PubMed baseline filtering and loading pipeline.
//!
//! ## Modules
//!
//! - [`extractor`] - Streaming record extraction from baseline/update files
//! - [`medline`] - MEDLINE tagged-text reader
//! - [`keyword`] - Keyword relevance filter
//! - [`impact`] - Journal impact-factor table and threshold filter
//! - [`loader`] - Per-file extract → filter → stamp
//! - [`dispatch`] - Bounded parallel fan-out over many files
//! - [`store`] - SQLite upsert keyed by PMID, newest version wins
//! - [`pipeline`] - Dispatcher wired to the store
//! - [`esearch`] - NCBI esearch pass-through
//! - [`config`] - Pipeline configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubmedkit::{BaselineLoader, ImpactFactorTable, ImpactFilter, KeywordFilter, KeywordTarget};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> pubmedkit::Result<()> {
//!     let table = Arc::new(ImpactFactorTable::load(Path::new("impact_factors.json"))?);
//!     let loader = BaselineLoader::new(
//!         KeywordFilter::new(&["promoter", "enhancer"], KeywordTarget::Either),
//!         ImpactFilter::new(table, 6.0),
//!     );
//!     let batch = loader.load(Path::new("pubmed24n0001.xml.gz"))?;
//!     println!("{} records kept from {}", batch.len(), batch.version());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod esearch;
pub mod extractor;
pub mod impact;
pub mod keyword;
pub mod loader;
pub mod medline;
pub mod pipeline;
pub mod record;
pub mod store;

pub use dispatch::{DispatchReport, FileOutcome, ParallelDispatcher};
pub use error::{PubmedkitError, Result};
pub use impact::{ImpactFactorTable, ImpactFilter};
pub use keyword::{KeywordFilter, KeywordTarget};
pub use loader::{BaselineBatch, BaselineLoader, OutputShape};
pub use record::{FilteredRecord, RawRecord};
pub use store::{StoreWriter, WriteReport};
