//! Fan-out of batch files across a bounded worker pool.
//!
//! Each file is loaded on a blocking worker thread; at most `workers` run at
//! once, counting threads whose file already timed out, and outcomes are
//! yielded in completion order, not input order. One
//! failing file never aborts the run: its error is logged and recorded in
//! the [`DispatchReport`].

use crate::error::{PubmedkitError, Result};
use crate::loader::{BaselineBatch, BaselineLoader};
use crate::record::FilteredRecord;
use futures::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Result of loading one batch file
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<BaselineBatch>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-file outcomes of a dispatch run
#[derive(Debug, Default)]
pub struct DispatchReport {
    outcomes: Vec<FileOutcome>,
}

impl DispatchReport {
    pub fn new(outcomes: Vec<FileOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<FileOutcome> {
        self.outcomes
    }

    /// Union of the records of every successful file
    pub fn records(&self) -> impl Iterator<Item = &FilteredRecord> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flat_map(|batch| batch.as_list().iter())
    }

    pub fn into_records(self) -> Vec<FilteredRecord> {
        self.outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .flat_map(BaselineBatch::into_records)
            .collect()
    }

    pub fn failures(&self) -> Vec<(&Path, &PubmedkitError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.path.as_path(), e)))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn total_records(&self) -> usize {
        self.records().count()
    }
}

/// Bounded pool that runs [`BaselineLoader`] once per file
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    workers: usize,
    file_timeout: Option<Duration>,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(workers)
    }
}

impl ParallelDispatcher {
    /// Create a dispatcher with `workers` concurrent files (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            file_timeout: None,
        }
    }

    /// Abandon any single file that takes longer than `limit` once started.
    ///
    /// The worker thread itself cannot be interrupted and finishes in the
    /// background; its result is discarded and it keeps its worker slot
    /// until it returns.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.file_timeout = Some(limit);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatch every path and yield outcomes as files complete.
    pub fn stream(
        &self,
        loader: Arc<BaselineLoader>,
        paths: Vec<PathBuf>,
    ) -> impl Stream<Item = FileOutcome> + Send + 'static {
        let timeout = self.file_timeout;
        let slots = Arc::new(Semaphore::new(self.workers));

        stream::iter(paths)
            .map(move |path| {
                let loader = Arc::clone(&loader);
                let slots = Arc::clone(&slots);
                async move {
                    let result = load_file(loader, slots, path.clone(), timeout).await;
                    if let Err(e) = &result {
                        warn!(file = %path.display(), error = %e, "Skipping batch file");
                    }
                    FileOutcome { path, result }
                }
            })
            .buffer_unordered(self.workers)
    }

    /// Dispatch every path and collect all outcomes.
    pub async fn run(&self, loader: Arc<BaselineLoader>, paths: Vec<PathBuf>) -> DispatchReport {
        let total = paths.len();
        info!(files = total, workers = self.workers, "Starting parallel load");

        let outcomes: Vec<FileOutcome> = self.stream(loader, paths).collect().await;
        let report = DispatchReport::new(outcomes);

        info!(
            files = total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            records = report.total_records(),
            "Parallel load complete"
        );
        report
    }
}

/// Load files one at a time, in input order, with the same per-file isolation.
pub fn load_sequential(loader: &BaselineLoader, paths: &[PathBuf]) -> DispatchReport {
    let outcomes = paths
        .iter()
        .map(|path| {
            let result = loader.load(path);
            if let Err(e) = &result {
                warn!(file = %path.display(), error = %e, "Skipping batch file");
            }
            FileOutcome {
                path: path.clone(),
                result,
            }
        })
        .collect();
    DispatchReport::new(outcomes)
}

async fn load_file(
    loader: Arc<BaselineLoader>,
    slots: Arc<Semaphore>,
    path: PathBuf,
    timeout: Option<Duration>,
) -> Result<BaselineBatch> {
    let permit = slots
        .acquire_owned()
        .await
        .map_err(|e| PubmedkitError::Worker(format!("{}: {}", path.display(), e)))?;

    let task_path = path.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        loader.load(&task_path)
    });

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, handle)
            .await
            .map_err(|_| PubmedkitError::Timeout {
                path: path.clone(),
                limit,
            })?,
        None => handle.await,
    };

    joined.map_err(|e| PubmedkitError::Worker(format!("{}: {}", path.display(), e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::tests::{article_set, article_xml, write_gz};

    fn fixture_files(dir: &Path) -> Vec<PathBuf> {
        let good_a = dir.join("pubmed24n0001.xml.gz");
        write_gz(
            &good_a,
            &article_set(&[article_xml("1", "A", "x", "Nature"), article_xml("2", "B", "x", "Nature")]),
        );

        let corrupt = dir.join("pubmed24n0002.xml.gz");
        std::fs::write(&corrupt, b"\x1f\x8bnot really gzip").unwrap();

        let good_b = dir.join("pubmed24n0003.xml.gz");
        write_gz(&good_b, &article_set(&[article_xml("3", "C", "x", "Cell")]));

        vec![good_a, corrupt, good_b]
    }

    fn sorted_ids<'a>(records: impl Iterator<Item = &'a FilteredRecord>) -> Vec<i64> {
        let mut ids: Vec<i64> = records.map(|r| r.id).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_corrupt_file_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixture_files(dir.path());

        let report = ParallelDispatcher::new(2)
            .run(Arc::new(BaselineLoader::unfiltered()), paths)
            .await;

        assert_eq!(report.outcomes().len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(sorted_ids(report.records()), vec![1, 2, 3]);

        let failures = report.failures();
        assert!(failures[0].0.ends_with("pubmed24n0002.xml.gz"));
        assert!(matches!(failures[0].1, PubmedkitError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = fixture_files(dir.path());
        paths.push(dir.path().join("pubmed24n0404.xml.gz"));

        let report = ParallelDispatcher::new(4)
            .run(Arc::new(BaselineLoader::unfiltered()), paths)
            .await;

        assert_eq!(report.failed(), 2);
        assert_eq!(report.into_records().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixture_files(dir.path());
        let loader = Arc::new(BaselineLoader::unfiltered());

        let sequential = load_sequential(&loader, &paths);
        let outcomes: Vec<FileOutcome> = ParallelDispatcher::new(3)
            .with_timeout(Duration::from_secs(30))
            .stream(Arc::clone(&loader), paths)
            .collect()
            .await;
        let parallel = DispatchReport::new(outcomes);

        assert_eq!(sorted_ids(sequential.records()), sorted_ids(parallel.records()));
        assert_eq!(sequential.failed(), parallel.failed());
    }

    /// A named pipe whose reader blocks in `open` until a writer shows up.
    #[cfg(unix)]
    fn make_fifo(path: &Path) {
        let status = std::process::Command::new("mkfifo").arg(path).status().unwrap();
        assert!(status.success());
    }

    /// Open and close the write end so a blocked reader sees EOF.
    #[cfg(unix)]
    fn release_fifo(path: &Path) {
        drop(std::fs::OpenOptions::new().write(true).open(path).unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_file_times_out_others_complete() {
        let dir = tempfile::tempdir().unwrap();
        let hung = dir.path().join("pubmed24n0009.xml");
        make_fifo(&hung);
        let mut paths = fixture_files(dir.path());
        paths.insert(0, hung.clone());

        let report = ParallelDispatcher::new(2)
            .with_timeout(Duration::from_millis(200))
            .run(Arc::new(BaselineLoader::unfiltered()), paths)
            .await;
        release_fifo(&hung);

        assert_eq!(report.outcomes().len(), 4);
        assert_eq!(sorted_ids(report.records()), vec![1, 2, 3]);

        let timed_out: Vec<_> = report
            .failures()
            .into_iter()
            .filter(|(_, e)| matches!(e, PubmedkitError::Timeout { .. }))
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].0, hung.as_path());
        match timed_out[0].1 {
            PubmedkitError::Timeout { limit, .. } => assert_eq!(*limit, Duration::from_millis(200)),
            other => panic!("unexpected error {other}"),
        }
        assert!(timed_out[0].1.to_string().contains("200ms"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_file_keeps_its_worker_slot() {
        let dir = tempfile::tempdir().unwrap();
        let hung = dir.path().join("pubmed24n0010.xml");
        make_fifo(&hung);
        let next = dir.path().join("pubmed24n0011.xml.gz");
        write_gz(&next, &article_set(&[article_xml("11", "K", "x", "Cell")]));

        let dispatcher = ParallelDispatcher::new(1).with_timeout(Duration::from_millis(100));
        let loader = Arc::new(BaselineLoader::unfiltered());
        let paths = vec![hung.clone(), next.clone()];
        let run = tokio::spawn(async move { dispatcher.run(loader, paths).await });

        // The only slot is still held by the thread stuck on the pipe.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!run.is_finished());

        release_fifo(&hung);
        let report = run.await.unwrap();

        let hung_outcome = report.outcomes().iter().find(|o| o.path == hung).unwrap();
        assert!(matches!(hung_outcome.result, Err(PubmedkitError::Timeout { .. })));
        let next_outcome = report.outcomes().iter().find(|o| o.path == next).unwrap();
        assert_eq!(next_outcome.result.as_ref().map(|b| b.len()).ok(), Some(1));
    }

    #[test]
    fn test_sequential_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixture_files(dir.path());

        let report = load_sequential(&BaselineLoader::unfiltered(), &paths);
        let order: Vec<&Path> = report.outcomes().iter().map(|o| o.path.as_path()).collect();
        assert_eq!(order, paths.iter().map(PathBuf::as_path).collect::<Vec<_>>());
    }

    #[test]
    fn test_workers_at_least_one() {
        assert_eq!(ParallelDispatcher::new(0).workers(), 1);
    }
}
