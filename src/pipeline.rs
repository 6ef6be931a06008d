//! End-to-end runs: batch files in, upserted rows out.

use crate::dispatch::{load_sequential, FileOutcome, ParallelDispatcher};
use crate::error::Result;
use crate::extractor::SourceFormat;
use crate::loader::BaselineLoader;
use crate::store::{StoreWriter, WriteReport};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a full load run
#[derive(Debug, Default, Serialize)]
pub struct PipelineSummary {
    pub files: usize,
    pub loaded_files: usize,
    /// Files that could not be extracted, with the reason
    pub failed_files: Vec<(PathBuf, String)>,
    /// Filtered records handed to the store
    pub records: usize,
    pub written: WriteReport,
    /// Batches the store rejected, with the reason
    pub store_failures: Vec<(PathBuf, String)>,
}

impl PipelineSummary {
    fn absorb(&mut self, outcome: FileOutcome, store: &mut StoreWriter) {
        let batch = match outcome.result {
            Ok(batch) => batch,
            Err(e) => {
                self.failed_files.push((outcome.path, e.to_string()));
                return;
            }
        };
        self.loaded_files += 1;

        if batch.is_empty() {
            return;
        }
        self.records += batch.len();

        match store.write(batch.as_list()) {
            Ok(report) => self.written.merge(report),
            Err(e) => {
                warn!(file = %outcome.path.display(), error = %e, "Batch not stored");
                self.store_failures.push((outcome.path, e.to_string()));
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_files.is_empty() && self.store_failures.is_empty()
    }
}

/// Load `paths` in parallel and upsert each batch as soon as it arrives.
pub async fn load_into_store(
    loader: Arc<BaselineLoader>,
    dispatcher: &ParallelDispatcher,
    paths: Vec<PathBuf>,
    store: &mut StoreWriter,
) -> PipelineSummary {
    let mut summary = PipelineSummary {
        files: paths.len(),
        ..Default::default()
    };

    let mut outcomes = Box::pin(dispatcher.stream(loader, paths));
    while let Some(outcome) = outcomes.next().await {
        summary.absorb(outcome, store);
    }

    log_summary(&summary);
    summary
}

/// Load `paths` one by one, in order, upserting after each file.
pub fn load_into_store_sequential(
    loader: &BaselineLoader,
    paths: &[PathBuf],
    store: &mut StoreWriter,
) -> PipelineSummary {
    let mut summary = PipelineSummary {
        files: paths.len(),
        ..Default::default()
    };

    for path in paths {
        let report = load_sequential(loader, std::slice::from_ref(path));
        for outcome in report.into_outcomes() {
            summary.absorb(outcome, store);
        }
    }

    log_summary(&summary);
    summary
}

fn log_summary(summary: &PipelineSummary) {
    info!(
        files = summary.files,
        loaded = summary.loaded_files,
        failed = summary.failed_files.len(),
        records = summary.records,
        written = summary.written.written,
        unchanged = summary.written.unchanged,
        store_failures = summary.store_failures.len(),
        "Pipeline complete"
    );
}

/// Expand inputs: files are kept, directories are scanned (non-recursively)
/// for `*.xml`, `*.xml.gz` and MEDLINE text files. Output is sorted.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in std::fs::read_dir(input)? {
                let path = entry?.path();
                if path.is_file() && is_batch_file(&path) {
                    files.push(path);
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn is_batch_file(path: &Path) -> bool {
    SourceFormat::from_path(path).is_some()
}
