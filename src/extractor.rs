//! Batch file record extraction.
//!
//! Streams `PubmedArticle` entries out of baseline/update files, plain or
//! gzipped, without holding the whole document in memory. MEDLINE text
//! exports are routed to [`crate::medline`].

use crate::error::{PubmedkitError, Result};
use crate::medline::MedlineRecords;
use crate::record::RawRecord;
use flate2::read::MultiGzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Lazy sequence of records from one batch file.
pub type Records = Box<dyn Iterator<Item = Result<RawRecord>> + Send>;

/// On-disk layout of a batch file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// PubMed/MEDLINE XML article set
    Xml,
    /// MEDLINE tagged text export
    Medline,
}

const MEDLINE_EXTENSIONS: &[&str] = &[".txt", ".nbib", ".medline"];

impl SourceFormat {
    /// Recognise a batch file by name, ignoring a trailing `.gz`.
    ///
    /// Returns `None` for names that are neither XML nor MEDLINE text.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".xml") {
            Some(SourceFormat::Xml)
        } else if MEDLINE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            Some(SourceFormat::Medline)
        } else {
            None
        }
    }

    /// Like [`from_path`](Self::from_path), treating unknown names as XML.
    pub fn detect(path: &Path) -> Self {
        Self::from_path(path).unwrap_or(SourceFormat::Xml)
    }
}

/// Opens batch files and yields their raw records.
pub struct RecordExtractor;

impl RecordExtractor {
    /// Open `path` and return a lazy record sequence.
    ///
    /// Fails with [`PubmedkitError::Extraction`] when the file cannot be
    /// opened. Parse failures surface as `Err` items while iterating.
    pub fn open(path: &Path) -> Result<Records> {
        let file = File::open(path)
            .map_err(|e| PubmedkitError::Extraction(format!("{}: {}", path.display(), e)))?;

        let gzipped = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let reader: Box<dyn BufRead + Send> = if gzipped {
            Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file))))
        } else {
            Box::new(BufReader::new(file))
        };

        let source = path.display().to_string();
        let format = SourceFormat::detect(path);
        debug!(file = %source, ?format, gzipped, "Opening batch file");

        Ok(match format {
            SourceFormat::Xml => Box::new(ArticleSetReader::new(reader, source)),
            SourceFormat::Medline => Box::new(MedlineRecords::new(reader, source)),
        })
    }

    /// Read every record of `path`, stopping at the first error.
    pub fn read_all(path: &Path) -> Result<Vec<RawRecord>> {
        Self::open(path)?.collect()
    }
}

/// Streaming reader over a `PubmedArticleSet` document.
pub struct ArticleSetReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    state: ArticleState,
    source: String,
    done: bool,
}

impl<R: BufRead> ArticleSetReader<R> {
    pub fn new(inner: R, source: String) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
            state: ArticleState::default(),
            source,
            done: false,
        }
    }
}

fn failure(source: &str, msg: String) -> Option<Result<RawRecord>> {
    Some(Err(PubmedkitError::Extraction(format!("{}: {}", source, msg))))
}

impl<R: BufRead> Iterator for ArticleSetReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    let msg = format!("XML error at byte {}: {}", self.reader.buffer_position(), e);
                    self.done = true;
                    return failure(&self.source, msg);
                }
            };

            let finished = match event {
                Event::Start(e) => {
                    self.state.open(&e);
                    None
                }
                Event::End(e) => self.state.close(e.name().as_ref()),
                Event::Text(e) => match e.unescape() {
                    Ok(text) => {
                        self.state.text(&text);
                        None
                    }
                    Err(e) => {
                        self.done = true;
                        return failure(&self.source, format!("bad text content: {}", e));
                    }
                },
                Event::CData(e) => {
                    self.state.text(&String::from_utf8_lossy(&e));
                    None
                }
                Event::Eof => {
                    self.done = true;
                    if let Some(open) = self.state.stack.last() {
                        return failure(&self.source, format!("unexpected end of file inside <{}>", open));
                    }
                    if !self.state.seen_root {
                        return failure(&self.source, "no PubmedArticleSet root element".to_string());
                    }
                    return None;
                }
                _ => None,
            };

            self.buf.clear();

            if let Some(record) = finished {
                return Some(Ok(record));
            }
        }
    }
}

/// Element-path bookkeeping for the article currently being read.
#[derive(Default)]
struct ArticleState {
    stack: Vec<String>,
    seen_root: bool,
    article: Option<ArticleDraft>,
}

impl ArticleState {
    fn open(&mut self, e: &BytesStart) {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

        match name.as_str() {
            "PubmedArticleSet" => self.seen_root = true,
            "PubmedArticle" => self.article = Some(ArticleDraft::default()),
            _ => {
                if let Some(draft) = self.article.as_mut() {
                    if draft.field.is_none() {
                        if let Some(field) = Field::classify(&name, &self.stack, e) {
                            draft.field = Some((field, self.stack.len()));
                            draft.text.clear();
                        }
                    }
                    if name == "Author" && ends_with(&self.stack, &["AuthorList"]) {
                        draft.start_author();
                    }
                }
            }
        }

        self.stack.push(name);
    }

    fn close(&mut self, name: &[u8]) -> Option<RawRecord> {
        self.stack.pop();

        if name == b"PubmedArticle" {
            return self.article.take().map(ArticleDraft::build);
        }

        let depth = self.stack.len();
        let draft = self.article.as_mut()?;

        if let Some((field, at)) = draft.field {
            if at == depth {
                draft.field = None;
                draft.commit(field);
            }
        }

        if name == b"Author" && ends_with(&self.stack, &["AuthorList"]) {
            draft.finish_author();
        }

        None
    }

    fn text(&mut self, text: &str) {
        if let Some(draft) = self.article.as_mut() {
            if draft.field.is_some() {
                draft.text.push_str(text);
            }
        }
    }
}

/// Elements whose text we keep
#[derive(Debug, Clone, Copy)]
enum Field {
    Pmid,
    Title,
    Abstract,
    Journal,
    Year,
    MedlineDate,
    PublicationType,
    LastName,
    ForeName,
    CollectiveName,
    ArticleIdDoi,
    ELocationDoi,
}

impl Field {
    fn classify(name: &str, path: &[String], e: &BytesStart) -> Option<Self> {
        let field = match name {
            "PMID" if ends_with(path, &["MedlineCitation"]) => Field::Pmid,
            "ArticleTitle" => Field::Title,
            "AbstractText" if ends_with(path, &["Abstract"]) => Field::Abstract,
            "Title" if ends_with(path, &["Journal"]) => Field::Journal,
            "Year" if ends_with(path, &["PubDate"]) => Field::Year,
            "MedlineDate" if ends_with(path, &["PubDate"]) => Field::MedlineDate,
            "PublicationType" if ends_with(path, &["PublicationTypeList"]) => Field::PublicationType,
            "LastName" if ends_with(path, &["Author"]) => Field::LastName,
            "ForeName" if ends_with(path, &["Author"]) => Field::ForeName,
            "CollectiveName" if ends_with(path, &["Author"]) => Field::CollectiveName,
            "ArticleId"
                if ends_with(path, &["PubmedData", "ArticleIdList"]) && attr_is(e, "IdType", "doi") =>
            {
                Field::ArticleIdDoi
            }
            "ELocationID" if attr_is(e, "EIdType", "doi") => Field::ELocationDoi,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Default)]
struct ArticleDraft {
    record: RawRecord,
    field: Option<(Field, usize)>,
    text: String,
    abstract_parts: Vec<String>,
    year: String,
    medline_date: String,
    fore_name: String,
    last_name: String,
    collective_name: String,
    article_id_doi: String,
    elocation_doi: String,
}

impl ArticleDraft {
    fn commit(&mut self, field: Field) {
        let value = collapse_whitespace(&self.text);
        self.text.clear();

        match field {
            Field::Pmid => self.record.id = value,
            Field::Title => self.record.title = value,
            Field::Abstract => {
                if !value.is_empty() {
                    self.abstract_parts.push(value);
                }
            }
            Field::Journal => self.record.journal = value,
            Field::Year => self.year = value,
            Field::MedlineDate => self.medline_date = value,
            Field::PublicationType => {
                if !value.is_empty() {
                    self.record.publication_types.push(value);
                }
            }
            Field::LastName => self.last_name = value,
            Field::ForeName => self.fore_name = value,
            Field::CollectiveName => self.collective_name = value,
            Field::ArticleIdDoi => {
                if self.article_id_doi.is_empty() {
                    self.article_id_doi = value;
                }
            }
            Field::ELocationDoi => {
                if self.elocation_doi.is_empty() {
                    self.elocation_doi = value;
                }
            }
        }
    }

    fn start_author(&mut self) {
        self.fore_name.clear();
        self.last_name.clear();
        self.collective_name.clear();
    }

    fn finish_author(&mut self) {
        let name = if !self.collective_name.is_empty() {
            self.collective_name.clone()
        } else {
            format!("{} {}", self.fore_name, self.last_name).trim().to_string()
        };
        if !name.is_empty() {
            self.record.authors.push(name);
        }
    }

    fn build(self) -> RawRecord {
        let mut record = self.record;
        record.abstract_text = self.abstract_parts.join("\n");
        record.pubdate = if !self.year.is_empty() {
            self.year
        } else {
            first_year(&self.medline_date).unwrap_or(self.medline_date)
        };
        record.doi = if !self.article_id_doi.is_empty() {
            self.article_id_doi
        } else {
            self.elocation_doi
        };
        record
    }
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn attr_is(e: &BytesStart, key: &str, expected: &str) -> bool {
    matches!(
        e.try_get_attribute(key),
        Ok(Some(attr)) if attr.value.as_ref().eq_ignore_ascii_case(expected.as_bytes())
    )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First run of four ASCII digits, e.g. `"1998 Dec-1999 Jan"` -> `"1998"`.
fn first_year(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|i| text[i..i + 4].to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn article_xml(pmid: &str, title: &str, abstract_text: &str, journal: &str) -> String {
        format!(
            r#"<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">{pmid}</PMID>
    <Article PubModel="Print">
      <Journal>
        <JournalIssue CitedMedium="Print">
          <PubDate><Year>2020</Year><Month>Jan</Month></PubDate>
        </JournalIssue>
        <Title>{journal}</Title>
      </Journal>
      <ArticleTitle>{title}</ArticleTitle>
      <ELocationID EIdType="doi" ValidYN="Y">10.1000/eloc.{pmid}</ELocationID>
      <Abstract><AbstractText>{abstract_text}</AbstractText></Abstract>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y"><LastName>Smith</LastName><ForeName>John</ForeName></Author>
        <Author ValidYN="Y"><CollectiveName>Plant Genome Consortium</CollectiveName></Author>
      </AuthorList>
      <PublicationTypeList>
        <PublicationType UI="D016428">Journal Article</PublicationType>
      </PublicationTypeList>
    </Article>
    <CommentsCorrectionsList>
      <CommentsCorrections RefType="ErratumIn"><PMID Version="1">99999999</PMID></CommentsCorrections>
    </CommentsCorrectionsList>
  </MedlineCitation>
  <PubmedData>
    <ArticleIdList>
      <ArticleId IdType="pubmed">{pmid}</ArticleId>
      <ArticleId IdType="doi">10.1000/art.{pmid}</ArticleId>
    </ArticleIdList>
  </PubmedData>
</PubmedArticle>"#
        )
    }

    pub(crate) fn article_set(articles: &[String]) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<PubmedArticleSet>\n{}\n</PubmedArticleSet>\n",
            articles.join("\n")
        )
    }

    pub(crate) fn write_gz(path: &Path, content: &str) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_parse_single_article() {
        let xml = article_set(&[article_xml("12345", "A title", "Some abstract", "Nature")]);
        let records: Vec<RawRecord> = ArticleSetReader::new(xml.as_bytes(), "mem".into())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "12345");
        assert_eq!(r.title, "A title");
        assert_eq!(r.abstract_text, "Some abstract");
        assert_eq!(r.journal, "Nature");
        assert_eq!(r.pubdate, "2020");
        assert_eq!(r.publication_types, vec!["Journal Article"]);
        assert_eq!(r.authors, vec!["John Smith", "Plant Genome Consortium"]);
        assert_eq!(r.doi, "10.1000/art.12345");
    }

    #[test]
    fn test_inline_markup_and_sections() {
        let xml = article_set(&[r#"<PubmedArticle><MedlineCitation><PMID>7</PMID><Article>
            <Journal><JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue><Title>Cell</Title></Journal>
            <ArticleTitle>The <i>FLC</i>   promoter</ArticleTitle>
            <Abstract>
              <AbstractText Label="BACKGROUND">First &amp; foremost.</AbstractText>
              <AbstractText Label="RESULTS">Second<sup>2</sup> part.</AbstractText>
            </Abstract>
            <ELocationID EIdType="pii">S0001</ELocationID>
            <ELocationID EIdType="doi">10.1/x</ELocationID>
            </Article></MedlineCitation></PubmedArticle>"#
            .to_string()]);
        let records = ArticleSetReader::new(xml.as_bytes(), "mem".into())
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let r = &records[0];
        assert_eq!(r.title, "The FLC promoter");
        assert_eq!(r.abstract_text, "First & foremost.\nSecond2 part.");
        assert_eq!(r.pubdate, "1998");
        assert_eq!(r.doi, "10.1/x");
        assert!(r.authors.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_extraction_error() {
        let xml = "<PubmedArticleSet><PubmedArticle><MedlineCitation></PubmedArticle>";
        let result: Result<Vec<RawRecord>> =
            ArticleSetReader::new(xml.as_bytes(), "mem".into()).collect();
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_missing_root_is_extraction_error() {
        let result: Result<Vec<RawRecord>> =
            ArticleSetReader::new("just some text".as_bytes(), "mem".into()).collect();
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_open_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pubmed24n0001.xml.gz");
        write_gz(
            &path,
            &article_set(&[
                article_xml("1", "One", "Abs one", "Nature"),
                article_xml("2", "Two", "Abs two", "Cell"),
            ]),
        );

        let records = RecordExtractor::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].journal, "Cell");
    }

    #[test]
    fn test_open_multi_member_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pubmed24n0003.xml.gz");
        let xml = article_set(&[
            article_xml("7", "Seven", "Abs", "Nature"),
            article_xml("8", "Eight", "Abs", "Cell"),
        ]);
        let (head, tail) = xml.split_at(xml.len() / 2);

        let mut bytes = Vec::new();
        for part in [head, tail] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(part.as_bytes()).unwrap();
            bytes.extend(encoder.finish().unwrap());
        }
        std::fs::write(&path, bytes).unwrap();

        let records = RecordExtractor::read_all(&path).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "8"]);
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let result = RecordExtractor::open(Path::new("/nonexistent/pubmed24n0001.xml.gz"));
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_corrupt_gzip_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pubmed24n0002.xml.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let result = RecordExtractor::read_all(&path);
        assert!(matches!(result, Err(PubmedkitError::Extraction(_))));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(SourceFormat::detect(Path::new("a.xml.gz")), SourceFormat::Xml);
        assert_eq!(SourceFormat::detect(Path::new("a.xml")), SourceFormat::Xml);
        assert_eq!(SourceFormat::detect(Path::new("pubmed_query.txt")), SourceFormat::Medline);
        assert_eq!(SourceFormat::detect(Path::new("export.nbib.gz")), SourceFormat::Medline);
        assert_eq!(SourceFormat::detect(Path::new("pubmed24n0001")), SourceFormat::Xml);
        assert_eq!(SourceFormat::from_path(Path::new("pubmed24n0001")), None);
        assert_eq!(SourceFormat::from_path(Path::new("notes.csv.gz")), None);
    }

    #[test]
    fn test_first_year() {
        assert_eq!(first_year("1998 Dec-1999 Jan"), Some("1998".to_string()));
        assert_eq!(first_year("Spring"), None);
    }
}
