use crate::corpus::Corpus;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const ID_COLUMN: usize = 0;
const ELAPSED_COLUMN: usize = 2;

#[derive(Error, Debug)]
pub enum TimingError {
    /// The corpus entry has no row in the timestamp ledger.
    #[error("No timestamp recorded for corpus entry {0:?}")]
    TimestampNotFound(String),

    #[error("Timestamp ledger I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TimingError {
    fn from(err: std::io::Error) -> Self {
        TimingError::Io(err.to_string())
    }
}

/// Elapsed campaign time of a corpus entry, kept exactly as the ledger spells it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedTime(String);

impl ElapsedTime {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the ledger cell, if it is one.
    pub fn as_secs_f64(&self) -> Option<f64> {
        self.0.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl fmt::Display for ElapsedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from corpus entry id to discovery time, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct TimestampLedger {
    rows: HashMap<String, ElapsedTime>,
}

impl TimestampLedger {
    pub fn load(path: &Path, delimiter: char) -> Result<Self, TimingError> {
        let file = File::open(path).map_err(|e| {
            TimingError::Io(format!("Failed to open timestamp ledger {:?}: {}", path, e))
        })?;
        Self::parse(BufReader::new(file), delimiter)
    }

    /// Column 0 holds the entry id, column 2 the elapsed time. Fields may be
    /// quoted, so full AFL names like `"id:000001,src:000000,op:havoc"` survive a
    /// comma delimiter. Short rows are skipped; the first row for an id wins.
    pub fn parse<R: BufRead>(mut reader: R, delimiter: char) -> Result<Self, TimingError> {
        let mut rows = HashMap::new();
        let mut buf = Vec::new();
        let mut row_no = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            row_no += 1;
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            let columns = split_record(line, delimiter);
            if columns.len() <= ELAPSED_COLUMN {
                debug!(row = row_no, "ledger row has fewer than three columns");
                continue;
            }
            rows.entry(columns[ID_COLUMN].trim().to_string())
                .or_insert_with(|| ElapsedTime::new(columns[ELAPSED_COLUMN].trim()));
        }
        Ok(Self { rows })
    }

    pub fn from_rows<I, K, V>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|(k, v)| (k.into(), ElapsedTime::new(v)))
                .collect(),
        }
    }

    /// Looks up an entry's elapsed time.
    ///
    /// AFL queue names carry provenance after the first comma
    /// (`id:000012,src:000003,op:havoc`), so the bare `id:000012` key is tried
    /// when the full name is absent.
    pub fn elapsed_of(&self, entry_id: &str) -> Result<ElapsedTime, TimingError> {
        if let Some(t) = self.rows.get(entry_id) {
            return Ok(t.clone());
        }
        if let Some((short_id, _)) = entry_id.split_once(',') {
            if short_id.starts_with("id:") {
                if let Some(t) = self.rows.get(short_id) {
                    return Ok(t.clone());
                }
            }
        }
        Err(TimingError::TimestampNotFound(entry_id.to_string()))
    }

    /// Warns about adjacent corpus entries whose timestamps go backwards, which
    /// means file name order does not match discovery order. Returns the number
    /// of inversions found.
    pub fn check_ordering(&self, corpus: &Corpus) -> usize {
        let mut inversions = 0;
        let mut previous: Option<(&str, f64)> = None;
        for entry in corpus.entries() {
            let Some(secs) = self
                .elapsed_of(&entry.id)
                .ok()
                .and_then(|t| t.as_secs_f64())
            else {
                continue;
            };
            if let Some((prev_id, prev_secs)) = previous {
                if secs < prev_secs {
                    warn!(
                        earlier = prev_id,
                        later = %entry.id,
                        "corpus order disagrees with discovery timestamps"
                    );
                    inversions += 1;
                }
            }
            previous = Some((entry.id.as_str(), secs));
        }
        inversions
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Splits one delimited record, honouring double-quoted fields with `""` escapes.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else if c == '"' && field.trim().is_empty() {
            field.clear();
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusEntry;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn corpus_of(ids: &[&str]) -> Corpus {
        Corpus::from_entries(
            ids.iter()
                .map(|id| CorpusEntry {
                    id: id.to_string(),
                    path: PathBuf::from(id),
                })
                .collect(),
        )
    }

    #[test]
    fn reads_id_and_third_column() {
        let ledger = TimestampLedger::parse(
            Cursor::new("000000,1700000000,0\n000001,1700000042,42\n000002,1700000100,100.5\n"),
            ',',
        )
        .unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.elapsed_of("000001").unwrap().as_str(), "42");
        assert_eq!(ledger.elapsed_of("000002").unwrap().as_secs_f64(), Some(100.5));
    }

    #[test]
    fn skips_short_rows_and_keeps_first_duplicate() {
        let ledger =
            TimestampLedger::parse(Cursor::new("a,1\n\nb,0,7\nb,0,9\r\n"), ',').unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.elapsed_of("a").is_err());
        assert_eq!(ledger.elapsed_of("b").unwrap().as_str(), "7");
    }

    #[test]
    fn missing_id_is_timestamp_not_found() {
        let ledger = TimestampLedger::from_rows([("known", "1")]);
        match ledger.elapsed_of("unknown") {
            Err(TimingError::TimestampNotFound(id)) => assert_eq!(id, "unknown"),
            other => panic!("Expected TimestampNotFound, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_bare_afl_id() {
        let ledger = TimestampLedger::from_rows([("id:000007", "310")]);
        assert_eq!(
            ledger.elapsed_of("id:000007,src:000001,op:havoc").unwrap().as_str(),
            "310"
        );
        assert!(ledger.elapsed_of("queue7,src:000001").is_err());
    }

    #[test]
    fn quoted_afl_names_keep_their_commas() {
        let ledger = TimestampLedger::parse(
            Cursor::new(
                "\"id:000001,src:000000,op:havoc\",1700000042,42\n\
                 \"say \"\"hi\"\"\",0,\"7\"\n",
            ),
            ',',
        )
        .unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.elapsed_of("id:000001,src:000000,op:havoc").unwrap().as_str(),
            "42"
        );
        assert_eq!(ledger.elapsed_of("say \"hi\"").unwrap().as_str(), "7");
    }

    #[test]
    fn invalid_utf8_row_does_not_fail_the_ledger() {
        let input: &[u8] = b"\xff\xfe,0,1\nid:000002,0,9\n";
        let ledger = TimestampLedger::parse(Cursor::new(input), ',').unwrap();
        assert_eq!(ledger.elapsed_of("id:000002").unwrap().as_str(), "9");
    }

    #[test]
    fn custom_delimiter() {
        let ledger = TimestampLedger::parse(Cursor::new("x;0;12\n"), ';').unwrap();
        assert_eq!(ledger.elapsed_of("x").unwrap().to_string(), "12");
    }

    #[test]
    fn check_ordering_counts_inversions() {
        let ledger = TimestampLedger::from_rows([("a", "1"), ("b", "5"), ("c", "3"), ("d", "n/a")]);
        assert_eq!(ledger.check_ordering(&corpus_of(&["a", "b", "c", "d"])), 1);

        let sorted = TimestampLedger::from_rows([("a", "1"), ("b", "2")]);
        assert_eq!(sorted.check_ordering(&corpus_of(&["a", "b", "missing"])), 0);
    }
}
