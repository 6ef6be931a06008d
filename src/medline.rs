//! MEDLINE tagged-text reader.
//!
//! Handles the `PMID- ` / `TI  - ` export format PubMed offers for saved
//! searches. Records are separated by blank lines; continuation lines are
//! indented by six spaces.

use crate::error::{PubmedkitError, Result};
use crate::record::RawRecord;
use std::io::{BufRead, Lines};

const MISSING: &str = "N/A";
const MISSING_ABSTRACT: &str = "No abstract available";

/// Iterator over MEDLINE records in a text stream
pub struct MedlineRecords<R: BufRead> {
    lines: Lines<R>,
    source: String,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> MedlineRecords<R> {
    pub fn new(inner: R, source: String) -> Self {
        Self {
            lines: inner.lines(),
            source,
            line_no: 0,
            done: false,
        }
    }

    fn error(&mut self, msg: String) -> Option<Result<RawRecord>> {
        self.done = true;
        Some(Err(PubmedkitError::Extraction(format!(
            "{} line {}: {}",
            self.source, self.line_no, msg
        ))))
    }
}

impl<R: BufRead> Iterator for MedlineRecords<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut fields: Vec<(String, String)> = Vec::new();

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return self.error(e.to_string()),
                None => {
                    self.done = true;
                    break;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                if fields.is_empty() {
                    continue;
                }
                break;
            }

            if let Some(rest) = line.strip_prefix("      ") {
                match fields.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(rest.trim());
                    }
                    None => return self.error("continuation line before any tag".to_string()),
                }
                continue;
            }

            match split_tag(&line) {
                Some((tag, value)) => fields.push((tag.to_string(), value.to_string())),
                None => return self.error(format!("unrecognised line {:?}", truncate(&line, 40))),
            }
        }

        if fields.is_empty() {
            return None;
        }

        match build_record(fields) {
            Some(record) => Some(Ok(record)),
            None => self.error("record without PMID".to_string()),
        }
    }
}

/// Split `"TI  - Some title"` into `("TI", "Some title")`.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let (tag, value) = line.split_once('-')?;
    if tag.len() != 4 || !tag.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    Some((tag.trim(), value.strip_prefix(' ').unwrap_or(value).trim_end()))
}

fn build_record(fields: Vec<(String, String)>) -> Option<RawRecord> {
    let mut record = RawRecord::default();
    let mut title = None;
    let mut abstract_text = None;
    let mut journal = None;
    let mut pubdate = None;

    for (tag, value) in fields {
        match tag.as_str() {
            "PMID" => record.id = value,
            "TI" => title = Some(value),
            "AB" => abstract_text = Some(value),
            "JT" => journal = Some(value),
            "DP" => pubdate = Some(value),
            "PT" => record.publication_types.push(value),
            "AU" => record.authors.push(value),
            "AID" | "LID" => {
                if record.doi.is_empty() {
                    if let Some(doi) = value.strip_suffix("[doi]") {
                        record.doi = doi.trim().to_string();
                    }
                }
            }
            _ => {}
        }
    }

    if record.id.is_empty() {
        return None;
    }

    record.title = title.unwrap_or_else(|| MISSING.to_string());
    record.abstract_text = abstract_text.unwrap_or_else(|| MISSING_ABSTRACT.to_string());
    record.journal = journal.unwrap_or_else(|| MISSING.to_string());
    record.pubdate = pubdate.unwrap_or_else(|| MISSING.to_string());
    Some(record)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
PMID- 31000001
OWN - NLM
TI  - Enhancer activity in the Arabidopsis
      root meristem.
AB  - We mapped promoter and enhancer elements.
JT  - The Plant cell
DP  - 2019 Apr
PT  - Journal Article
PT  - Review
AU  - Smith J
AU  - Doe A
LID - 10.1105/tpc.19.00001 [doi]

PMID- 31000002
TI  - Untitled note
";

    #[test]
    fn test_parse_medline_records() {
        let records: Vec<RawRecord> = MedlineRecords::new(SAMPLE.as_bytes(), "mem".into())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.id, "31000001");
        assert_eq!(first.title, "Enhancer activity in the Arabidopsis root meristem.");
        assert_eq!(first.journal, "The Plant cell");
        assert_eq!(first.pubdate, "2019 Apr");
        assert_eq!(first.publication_types, vec!["Journal Article", "Review"]);
        assert_eq!(first.authors, vec!["Smith J", "Doe A"]);
        assert_eq!(first.doi, "10.1105/tpc.19.00001");

        let second = &records[1];
        assert_eq!(second.abstract_text, MISSING_ABSTRACT);
        assert_eq!(second.journal, MISSING);
        assert!(second.authors.is_empty());
    }

    #[test]
    fn test_record_without_pmid_is_error() {
        let text = "TI  - Orphan title\n";
        let result: Result<Vec<RawRecord>> = MedlineRecords::new(text.as_bytes(), "mem".into()).collect();
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_garbage_is_error() {
        let text = "<html>not medline</html>\n";
        let result: Result<Vec<RawRecord>> = MedlineRecords::new(text.as_bytes(), "mem".into()).collect();
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag("TI  - A - B"), Some(("TI", "A - B")));
        assert_eq!(split_tag("PMID- 1"), Some(("PMID", "1")));
        assert_eq!(split_tag("no tag here"), None);
    }
}
