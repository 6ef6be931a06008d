//! pubmedkit - PubMed baseline filtering and loading pipeline
//!
//! ## Usage
//!
//! ### Filter baseline files into SQLite
//! ```bash
//! pubmedkit load ./updatefiles --database crm.db \
//!     --keywords promoter,enhancer,silencer --impact-threshold 6 --impact-table if.json
//! ```
//!
//! ### Filter without a database
//! ```bash
//! pubmedkit filter ./updatefiles --keywords promoter --shape table --output hits.csv
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use pubmedkit::config::PipelineConfig;
use pubmedkit::dispatch::{load_sequential, DispatchReport, ParallelDispatcher};
use pubmedkit::esearch::{self, SearchOptions};
use pubmedkit::loader::{self, OutputShape};
use pubmedkit::pipeline::{self, PipelineSummary};
use pubmedkit::{FilteredRecord, ImpactFactorTable, StoreWriter};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// PubMed baseline filtering and loading pipeline
#[derive(Parser)]
#[command(name = "pubmedkit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter batch files and upsert the survivors into a SQLite database
    Load {
        /// Batch files or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// SQLite database file
        #[arg(long)]
        database: Option<PathBuf>,

        /// Process files one at a time in input order
        #[arg(long)]
        sequential: bool,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Filter batch files and export the survivors
    Filter {
        /// Batch files or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file (.json for list/mapping, .csv for table)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output shape: list, mapping or table
        #[arg(long, default_value = "list")]
        shape: String,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Store an impact factor table in the database
    ImportJournals {
        /// JSON or CSV impact factor table
        #[arg(long)]
        table: PathBuf,

        /// SQLite database file
        #[arg(long)]
        database: PathBuf,
    },

    /// Look up PMIDs for a PubMed query
    Search {
        /// PubMed query string
        query: String,

        /// Contact email sent to NCBI
        #[arg(long, default_value = "your_email@example.com")]
        email: String,

        /// Maximum ids to return
        #[arg(long, default_value = "9999")]
        retmax: u32,

        /// NCBI API key
        #[arg(long, env = "NCBI_API_KEY")]
        api_key: Option<String>,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// JSON pipeline config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated keywords (empty disables keyword filtering)
    #[arg(long, value_delimiter = ',')]
    keywords: Option<Vec<String>>,

    /// Field scanned for keywords: title, abstract or either
    #[arg(long)]
    keyword_target: Option<String>,

    /// Minimum journal impact factor (0 disables)
    #[arg(long)]
    impact_threshold: Option<f64>,

    /// Impact factor table (JSON or CSV); without it the database's
    /// imported journal table is used
    #[arg(long)]
    impact_table: Option<PathBuf>,

    /// Concurrent files
    #[arg(long)]
    workers: Option<usize>,

    /// Abandon any single file after this many seconds
    #[arg(long)]
    file_timeout: Option<u64>,
}

impl FilterArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(keywords) = self.keywords {
            config.keywords = keywords;
        }
        if let Some(target) = self.keyword_target {
            config.keyword_target = target;
        }
        if let Some(threshold) = self.impact_threshold {
            config.impact_threshold = threshold;
        }
        if let Some(table) = self.impact_table {
            config.impact_table = Some(table);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.file_timeout {
            config.file_timeout_secs = Some(secs);
        }
        Ok(config)
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match cli.command {
        Commands::Load {
            inputs,
            database,
            sequential,
            filters,
        } => run_load(inputs, database, sequential, filters).await,
        Commands::Filter {
            inputs,
            output,
            shape,
            filters,
        } => run_filter(inputs, output, shape, filters).await,
        Commands::ImportJournals { table, database } => run_import_journals(&table, &database),
        Commands::Search {
            query,
            email,
            retmax,
            api_key,
        } => run_search(query, email, retmax, api_key).await,
    }
}

// ============================================================================
// Load Pipeline
// ============================================================================

async fn run_load(
    inputs: Vec<PathBuf>,
    database: Option<PathBuf>,
    sequential: bool,
    filters: FilterArgs,
) -> Result<()> {
    let mut config = filters.into_config()?;
    if database.is_some() {
        config.database = database;
    }
    let db_path = config
        .database
        .clone()
        .context("No database given (use --database or the config file)")?;

    let loader = Arc::new(config.build_loader()?);
    let paths = pipeline::collect_inputs(&inputs).context("Failed to list input files")?;
    if paths.is_empty() {
        println!("No batch files found.");
        return Ok(());
    }

    let mut store = StoreWriter::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    println!("Loading {} files into {}", paths.len(), db_path.display());

    let summary = if sequential || config.workers <= 1 {
        pipeline::load_into_store_sequential(&loader, &paths, &mut store)
    } else {
        let dispatcher = build_dispatcher(&config);
        pipeline::load_into_store(loader, &dispatcher, paths, &mut store).await
    };

    print_summary(&summary);
    Ok(())
}

fn build_dispatcher(config: &PipelineConfig) -> ParallelDispatcher {
    let dispatcher = ParallelDispatcher::new(config.workers);
    match config.file_timeout() {
        Some(limit) => dispatcher.with_timeout(limit),
        None => dispatcher,
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!("\n--- Summary ---");
    println!("Files:     {} ({} loaded)", summary.files, summary.loaded_files);
    println!("Records:   {}", summary.records);
    println!(
        "Store:     {} written, {} unchanged",
        summary.written.written, summary.written.unchanged
    );

    for (path, reason) in &summary.failed_files {
        println!("Error in file: {}\n  {}", path.display(), reason);
    }
    for (path, reason) in &summary.store_failures {
        println!("Not stored: {}\n  {}", path.display(), reason);
    }

    if summary.is_clean() {
        println!("\n✓ Load complete.");
    }
}

// ============================================================================
// Filter Export
// ============================================================================

async fn run_filter(
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    shape: String,
    filters: FilterArgs,
) -> Result<()> {
    let shape: OutputShape = shape.parse()?;
    let config = filters.into_config()?;
    let loader = Arc::new(config.build_loader()?);
    let paths = pipeline::collect_inputs(&inputs).context("Failed to list input files")?;

    let report = if config.workers <= 1 {
        load_sequential(&loader, &paths)
    } else {
        let dispatcher = build_dispatcher(&config);
        let outcomes = dispatcher.stream(loader, paths).collect().await;
        DispatchReport::new(outcomes)
    };

    for (path, e) in report.failures() {
        println!("Error in file: {}\n  {}", path.display(), e);
    }

    let records = report.into_records();
    println!("Kept {} records.", records.len());

    let output = match output {
        Some(path) => path,
        None => default_output_path(shape)?,
    };
    save_records(&output, &records, shape)?;
    Ok(())
}

fn default_output_path(shape: OutputShape) -> Result<PathBuf> {
    let dir = PathBuf::from("./output");
    std::fs::create_dir_all(&dir).context("Failed to create output directory")?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let ext = match shape {
        OutputShape::Table => "csv",
        OutputShape::List | OutputShape::Mapping => "json",
    };
    Ok(dir.join(format!("{}_filtered_{}.{}", timestamp, shape, ext)))
}

/// Save records in the requested shape
fn save_records(path: &Path, records: &[FilteredRecord], shape: OutputShape) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);

    match shape {
        OutputShape::List => serde_json::to_writer_pretty(&mut writer, records)?,
        OutputShape::Mapping => {
            // Across files, keep the entry with the greatest version per id.
            let mut by_id: BTreeMap<i64, &FilteredRecord> = BTreeMap::new();
            for record in records {
                by_id
                    .entry(record.id)
                    .and_modify(|cur| {
                        if record.version > cur.version {
                            *cur = record;
                        }
                    })
                    .or_insert(record);
            }
            serde_json::to_writer_pretty(&mut writer, &by_id)?
        }
        OutputShape::Table => loader::write_csv(&mut writer, records).context("Failed to write CSV")?,
    }
    writer.flush().context("Failed to flush output")?;

    println!("Saved: {}", path.display());
    Ok(())
}

// ============================================================================
// Journals & Search
// ============================================================================

fn run_import_journals(table: &Path, database: &Path) -> Result<()> {
    let table = ImpactFactorTable::load(table).context("Failed to load impact table")?;
    let mut store = StoreWriter::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let count = store.write_journals(&table)?;
    info!(journals = count, "Imported journal table");
    println!("Stored {} journals in {}", count, database.display());
    Ok(())
}

async fn run_search(query: String, email: String, retmax: u32, api_key: Option<String>) -> Result<()> {
    let options = SearchOptions {
        email,
        retmax,
        api_key,
        ..Default::default()
    };
    let ids = esearch::query_pmids(&query, &options).await?;
    for id in &ids {
        println!("{}", id);
    }
    eprintln!("Found {} PMIDs.", ids.len());
    Ok(())
}
