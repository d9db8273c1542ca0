//! Streaming XML parser producing bounded tabular chunks
//!
//! The parser reads an export incrementally through `quick-xml`'s async
//! reader. Every configured row element (`Record`, `Workout`,
//! `WorkoutStatistics` by default) becomes one [`Row`] built from its
//! attributes, wherever it appears in the tree. Consecutive rows of the same
//! element are grouped into a [`TabularChunk`] of at most `chunk_size` rows;
//! a change of element name flushes the current chunk, so document order is
//! kept within and across chunks.
//!
//! Any XML error is fatal for the document. After an error or the end of
//! input the parser yields `None`.

use futures::Stream;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::debug;

use super::config::{IngestSettings, DEFAULT_ROW_ELEMENTS};
use super::models::{Row, Scalar, TabularChunk};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML syntax error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Invalid attribute on <{element}> at byte {position}: {message}")]
    Attribute {
        element: String,
        position: u64,
        message: String,
    },

    #[error("Malformed document at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("Unexpected end of document with {open} element(s) still open")]
    Truncated { open: usize },

    #[error("Document has no root element")]
    NoRoot,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parser settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    pub chunk_size: usize,
    pub row_elements: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            row_elements: DEFAULT_ROW_ELEMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ParserConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn is_row_element(&self, name: &str) -> bool {
        self.row_elements.iter().any(|e| e == name)
    }
}

impl From<&IngestSettings> for ParserConfig {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            row_elements: settings.row_elements.clone(),
        }
    }
}

/// What one XML event means for chunking
enum Step {
    Open(Option<(String, Row)>),
    Empty(Option<(String, Row)>),
    Close,
    Text,
    Eof,
    Skip,
}

pub struct ChunkedXmlParser<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    config: ParserConfig,
    current: Option<(String, Vec<Row>)>,
    ready: VecDeque<TabularChunk>,
    depth: usize,
    seen_root: bool,
    finished: bool,
}

impl ChunkedXmlParser<BufReader<tokio::fs::File>> {
    /// Open a file for parsing
    pub async fn from_path(path: &Path, config: ParserConfig) -> Result<Self, ParseError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file), config))
    }
}

impl<R: AsyncBufRead + Unpin> ChunkedXmlParser<R> {
    pub fn new(reader: R, config: ParserConfig) -> Self {
        let mut reader = Reader::from_reader(reader);
        let reader_config = reader.config_mut();
        reader_config.trim_text(true);
        reader_config.check_end_names = true;

        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            config: ParserConfig {
                chunk_size: config.chunk_size.max(1),
                ..config
            },
            current: None,
            ready: VecDeque::new(),
            depth: 0,
            seen_root: false,
            finished: false,
        }
    }

    /// Next chunk in document order, `None` once the document is exhausted
    pub async fn next_chunk(&mut self) -> Result<Option<TabularChunk>, ParseError> {
        if let Some(chunk) = self.ready.pop_front() {
            return Ok(Some(chunk));
        }
        if self.finished {
            return Ok(None);
        }

        match self.advance().await {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.finished = true;
                self.current = None;
                self.ready.clear();
                Err(e)
            },
        }
    }

    /// Consume the parser as a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<TabularChunk, ParseError>> {
        futures::stream::unfold(self, |mut parser| async move {
            match parser.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), parser)),
                Ok(None) => None,
                Err(e) => Some((Err(e), parser)),
            }
        })
    }

    async fn advance(&mut self) -> Result<Option<TabularChunk>, ParseError> {
        loop {
            match self.read_step().await? {
                Step::Open(row) => {
                    self.enter()?;
                    self.depth += 1;
                    if let Some((element, row)) = row {
                        self.accept(element, row);
                    }
                },
                Step::Empty(row) => {
                    self.enter()?;
                    if let Some((element, row)) = row {
                        self.accept(element, row);
                    }
                },
                Step::Close => {
                    if self.depth == 0 {
                        return Err(self.malformed("closing tag without an open element"));
                    }
                    self.depth -= 1;
                },
                Step::Text => {
                    if self.depth == 0 {
                        return Err(self.malformed("text outside the root element"));
                    }
                },
                Step::Eof => {
                    if self.depth > 0 {
                        return Err(ParseError::Truncated { open: self.depth });
                    }
                    if !self.seen_root {
                        return Err(ParseError::NoRoot);
                    }
                    self.finished = true;
                    if let Some(chunk) = self.take_current() {
                        self.ready.push_back(chunk);
                    }
                    debug!(position = self.position(), "Reached end of document");
                },
                Step::Skip => {},
            }

            if let Some(chunk) = self.ready.pop_front() {
                return Ok(Some(chunk));
            }
            if self.finished {
                return Ok(None);
            }
        }
    }

    async fn read_step(&mut self) -> Result<Step, ParseError> {
        self.buf.clear();
        let position = self.position();

        let event = self
            .reader
            .read_event_into_async(&mut self.buf)
            .await
            .map_err(|source| ParseError::Xml { position, source })?;

        let step = match event {
            Event::Start(e) => Step::Open(row_from(&e, &self.config, position)?),
            Event::Empty(e) => Step::Empty(row_from(&e, &self.config, position)?),
            Event::End(_) => Step::Close,
            Event::Text(_) | Event::CData(_) => Step::Text,
            Event::Eof => Step::Eof,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => Step::Skip,
        };

        Ok(step)
    }

    /// Track entry into a new element at the current depth
    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth == 0 {
            if self.seen_root {
                return Err(self.malformed("multiple root elements"));
            }
            self.seen_root = true;
        }
        Ok(())
    }

    fn accept(&mut self, element: String, row: Row) {
        match &mut self.current {
            Some((name, rows)) if *name == element => rows.push(row),
            _ => {
                if let Some(chunk) = self.take_current() {
                    self.ready.push_back(chunk);
                }
                self.current = Some((element, vec![row]));
            },
        }

        let full = self
            .current
            .as_ref()
            .map(|(_, rows)| rows.len() >= self.config.chunk_size)
            .unwrap_or(false);
        if full {
            if let Some(chunk) = self.take_current() {
                self.ready.push_back(chunk);
            }
        }
    }

    fn take_current(&mut self) -> Option<TabularChunk> {
        self.current
            .take()
            .map(|(element, rows)| TabularChunk::new(element, rows))
    }

    fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn malformed(&self, message: &str) -> ParseError {
        ParseError::Malformed {
            position: self.position(),
            message: message.to_string(),
        }
    }
}

/// Build a row from a start tag if it is a row element
fn row_from(
    start: &BytesStart<'_>,
    config: &ParserConfig,
    position: u64,
) -> Result<Option<(String, Row)>, ParseError> {
    let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    if !config.is_row_element(&element) {
        // Attributes of other elements are still validated.
        for attr in start.attributes() {
            attr.map_err(|e| attribute_error(&element, position, e))?;
        }
        return Ok(None);
    }

    let mut row = Row::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| attribute_error(&element, position, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| attribute_error(&element, position, e))?;
        row.insert(key, Scalar::infer(&value));
    }

    Ok(Some((element, row)))
}

fn attribute_error(element: &str, position: u64, err: impl std::fmt::Display) -> ParseError {
    ParseError::Attribute {
        element: element.to_string(),
        position,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE HealthData [
<!ELEMENT HealthData (ExportDate,Me,(Record|Workout)*)>
]>
<HealthData locale="en_US">
 <!-- personal export -->
 <ExportDate value="2024-01-02 08:00:00 +0100"/>
 <Me HKCharacteristicTypeIdentifierBiologicalSex="HKBiologicalSexFemale"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" unit="count/min" value="72" startDate="2024-01-01 10:00:00 +0100" endDate="2024-01-01 10:00:00 +0100" creationDate="2024-01-01 10:00:01 +0100"/>
 <Record type="HKQuantityTypeIdentifierBodyMass" sourceName="Scale" unit="kg" value="70.5" startDate="2024-01-01 11:00:00 +0100" endDate="2024-01-01 11:00:00 +0100" creationDate="2024-01-01 11:00:01 +0100">
  <MetadataEntry key="HKWasUserEntered" value="1"/>
 </Record>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone &amp; Co" unit="count" value="1200" startDate="2024-01-01 12:00:00 +0100" endDate="2024-01-01 12:30:00 +0100" creationDate="2024-01-01 12:30:01 +0100"/>
 <Workout workoutActivityType="HKWorkoutActivityTypeRunning" duration="30.5" durationUnit="min" sourceName="Watch" startDate="2024-01-01 07:00:00 +0100" endDate="2024-01-01 07:30:30 +0100" creationDate="2024-01-01 07:31:00 +0100">
  <WorkoutStatistics type="HKQuantityTypeIdentifierHeartRate" startDate="2024-01-01 07:00:00 +0100" endDate="2024-01-01 07:30:30 +0100" average="150" minimum="120" maximum="175" unit="count/min"/>
 </Workout>
</HealthData>
"#;

    fn parser(xml: &str, chunk_size: usize) -> ChunkedXmlParser<&[u8]> {
        ChunkedXmlParser::new(
            xml.as_bytes(),
            ParserConfig::default().with_chunk_size(chunk_size),
        )
    }

    async fn collect(xml: &str, chunk_size: usize) -> Result<Vec<TabularChunk>, ParseError> {
        let mut parser = parser(xml, chunk_size);
        let mut chunks = Vec::new();
        while let Some(chunk) = parser.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_groups_rows_by_element() {
        let chunks = collect(EXPORT, 1000).await.unwrap();

        let shape: Vec<(&str, usize)> = chunks.iter().map(|c| (c.element(), c.len())).collect();
        assert_eq!(
            shape,
            vec![("Record", 3), ("Workout", 1), ("WorkoutStatistics", 1)]
        );

        let records = &chunks[0];
        assert_eq!(records.rows()[0].get("value"), Some(&Scalar::Integer(72)));
        assert_eq!(records.rows()[1].get("value"), Some(&Scalar::Float(70.5)));
        assert_eq!(
            records.rows()[2].get("sourceName"),
            Some(&Scalar::Text("Phone & Co".to_string()))
        );
        // MetadataEntry is not a row element; its `value` must not leak in.
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_flushes_at_chunk_size() {
        let chunks = collect(EXPORT, 2).await.unwrap();

        let shape: Vec<(&str, usize)> = chunks.iter().map(|c| (c.element(), c.len())).collect();
        assert_eq!(
            shape,
            vec![
                ("Record", 2),
                ("Record", 1),
                ("Workout", 1),
                ("WorkoutStatistics", 1)
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_size_one() {
        let chunks = collect(EXPORT, 1).await.unwrap();
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[tokio::test]
    async fn test_document_without_rows() {
        let chunks = collect("<HealthData><Me/></HealthData>", 10).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_stream_matches_next_chunk() {
        let chunks: Vec<_> = parser(EXPORT, 2).into_stream().collect().await;
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_mismatched_tags() {
        let result = collect("<HealthData><Record value=\"1\"></HealthData>", 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncated_document() {
        let result = collect("<HealthData><Record value=\"1\"/>", 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bad_escape() {
        let result = collect("<HealthData><Record value=\"&bogus;\"/></HealthData>", 10).await;
        assert!(matches!(result, Err(ParseError::Attribute { .. })));
    }

    #[tokio::test]
    async fn test_invalid_attribute() {
        let result = collect("<HealthData><Record value=1/></HealthData>", 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_root_element() {
        let result = collect("<?xml version=\"1.0\"?>\n<!-- nothing -->\n", 10).await;
        assert!(matches!(result, Err(ParseError::NoRoot)));
    }

    #[tokio::test]
    async fn test_yields_none_after_error() {
        let mut parser = parser("<HealthData><Record value=\"1\"></Other>", 10);
        let mut saw_error = false;
        for _ in 0..4 {
            match parser.next_chunk().await {
                Err(_) => saw_error = true,
                Ok(None) => break,
                Ok(Some(_)) => {},
            }
        }
        assert!(saw_error);
        assert!(parser.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        tokio::fs::write(&path, EXPORT).await.unwrap();

        let mut parser = ChunkedXmlParser::from_path(&path, ParserConfig::default())
            .await
            .unwrap();
        let first = parser.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.element(), "Record");
        assert_eq!(first.columns()[0], "type");
    }
}
