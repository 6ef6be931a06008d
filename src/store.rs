//! SQLite persistence with version-aware upsert.
//!
//! One row per record id. An incoming record replaces a stored row only when
//! its version tag is strictly greater (SQLite text comparison, i.e.
//! byte-wise lexical order). Each `write` call is one transaction.

use crate::error::{PubmedkitError, Result};
use crate::impact::ImpactFactorTable;
use crate::record::FilteredRecord;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pubmed_table (
    pmid              INTEGER PRIMARY KEY,
    title             TEXT NOT NULL,
    abstract          TEXT NOT NULL,
    journal           TEXT NOT NULL,
    pubdate           TEXT NOT NULL,
    publication_types TEXT NOT NULL,
    authors           TEXT NOT NULL,
    doi               TEXT NOT NULL,
    version           TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS journal_table (
    journal       TEXT PRIMARY KEY,
    impact_factor REAL NOT NULL
);
";

const UPSERT: &str = "
INSERT INTO pubmed_table
    (pmid, title, abstract, journal, pubdate, publication_types, authors, doi, version)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(pmid) DO UPDATE SET
    title = excluded.title,
    abstract = excluded.abstract,
    journal = excluded.journal,
    pubdate = excluded.pubdate,
    publication_types = excluded.publication_types,
    authors = excluded.authors,
    doi = excluded.doi,
    version = excluded.version
WHERE pubmed_table.version < excluded.version
";

/// Counts from one `write` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Rows inserted or replaced
    pub written: usize,
    /// Records skipped because the stored version was not older
    pub unchanged: usize,
}

impl WriteReport {
    pub fn merge(&mut self, other: WriteReport) {
        self.written += other.written;
        self.unchanged += other.unchanged;
    }
}

/// Writer over a SQLite database holding `pubmed_table`
pub struct StoreWriter {
    conn: Connection,
}

impl StoreWriter {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let writer = Self::init(conn)?;
        info!(path = %path.display(), "Opened store");
        Ok(writer)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Upsert `records` in one transaction.
    ///
    /// Empty input is a [`PubmedkitError::Validation`]. On a database
    /// failure nothing from this call is committed; the error is logged and
    /// returned so batch callers can decide to carry on.
    pub fn write(&mut self, records: &[FilteredRecord]) -> Result<WriteReport> {
        if records.is_empty() {
            return Err(PubmedkitError::Validation(
                "write requires at least one record".to_string(),
            ));
        }

        match self.write_tx(records) {
            Ok(report) => {
                debug!(
                    records = records.len(),
                    written = report.written,
                    unchanged = report.unchanged,
                    "Store write committed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(records = records.len(), error = %e, "Store write rolled back");
                Err(e)
            }
        }
    }

    fn write_tx(&mut self, records: &[FilteredRecord]) -> Result<WriteReport> {
        let tx = self.conn.transaction()?;
        let mut report = WriteReport::default();
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for r in records {
                let changed = stmt.execute(params![
                    r.id,
                    r.title,
                    r.abstract_text,
                    r.journal,
                    r.pubdate,
                    serde_json::to_string(&r.publication_types)?,
                    serde_json::to_string(&r.authors)?,
                    r.doi,
                    r.version,
                ])?;
                if changed > 0 {
                    report.written += 1;
                } else {
                    report.unchanged += 1;
                }
            }
        }
        tx.commit()?;
        Ok(report)
    }

    /// Fetch a stored record by id.
    pub fn get(&self, id: i64) -> Result<Option<FilteredRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT pmid, title, abstract, journal, pubdate, publication_types, authors, doi, version
                 FROM pubmed_table WHERE pmid = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, title, abstract_text, journal, pubdate, types, authors, doi, version)) = row else {
            return Ok(None);
        };

        Ok(Some(FilteredRecord {
            id,
            title,
            abstract_text,
            journal,
            pubdate,
            publication_types: serde_json::from_str(&types)?,
            authors: serde_json::from_str(&authors)?,
            doi,
            version,
        }))
    }

    /// Number of stored records
    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM pubmed_table", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Replace the stored journal impact table.
    pub fn write_journals(&mut self, table: &ImpactFactorTable) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM journal_table", [])?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO journal_table (journal, impact_factor) VALUES (?1, ?2)")?;
            for (journal, score) in table.iter() {
                stmt.execute(params![journal, score])?;
            }
        }
        tx.commit()?;
        info!(journals = table.len(), "Stored journal impact table");
        Ok(table.len())
    }

    /// Load the journal impact table previously stored with [`write_journals`](Self::write_journals).
    pub fn load_journals(&self) -> Result<ImpactFactorTable> {
        let mut stmt = self
            .conn
            .prepare("SELECT journal, impact_factor FROM journal_table")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ImpactFactorTable::from_entries(rows))
    }
}
