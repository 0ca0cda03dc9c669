use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors raised while reading a target list.
#[derive(Error, Debug)]
pub enum TargetError {
    /// A line that does not have the `path:line` shape.
    #[error("Malformed target line {line_no}: {content:?} ({reason})")]
    MalformedTargetLine {
        line_no: usize,
        content: String,
        reason: &'static str,
    },

    #[error("Target list I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TargetError {
    fn from(err: std::io::Error) -> Self {
        TargetError::Io(err.to_string())
    }
}

/// A source location of interest, `source_file` relative to the configured source root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetLocation {
    pub source_file: PathBuf,
    pub line: u32,
}

impl TargetLocation {
    pub fn new(source_file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            source_file: source_file.into(),
            line,
        }
    }
}

impl fmt::Display for TargetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_file.display(), self.line)
    }
}

/// Parses a single `<relativeSourcePath>:<lineNumber>` entry.
///
/// The line number is taken after the last `:` so paths containing colons still parse.
/// `line_no` is only used for error reporting.
pub fn parse_target_line(raw: &str, line_no: usize) -> Result<TargetLocation, TargetError> {
    let trimmed = raw.trim_end_matches(['\n', '\r']).trim();
    let malformed = |reason| TargetError::MalformedTargetLine {
        line_no,
        content: trimmed.to_string(),
        reason,
    };

    let (path, line) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| malformed("missing ':line' suffix"))?;
    if path.is_empty() {
        return Err(malformed("empty source path"));
    }
    let line: u32 = line
        .trim()
        .parse()
        .map_err(|_| malformed("line number is not an unsigned integer"))?;
    if line == 0 {
        return Err(malformed("line numbers start at 1"));
    }
    Ok(TargetLocation::new(path, line))
}

fn decode_line(raw: &[u8], line_no: usize) -> Result<&str, TargetError> {
    std::str::from_utf8(raw).map_err(|_| TargetError::MalformedTargetLine {
        line_no,
        content: String::from_utf8_lossy(raw).trim_end().to_string(),
        reason: "not valid UTF-8",
    })
}

/// The ordered list of valid targets read from a target file.
#[derive(Debug, Clone, Default)]
pub struct TargetList {
    targets: Vec<TargetLocation>,
    skipped: usize,
}

impl TargetList {
    pub fn load(path: &Path) -> Result<Self, TargetError> {
        let file = File::open(path).map_err(|e| {
            TargetError::Io(format!("Failed to open target list {:?}: {}", path, e))
        })?;
        Self::parse(BufReader::new(file))
    }

    /// Reads targets in input order. Blank lines are ignored; malformed lines,
    /// including ones that are not valid UTF-8, are logged and skipped, never fatal.
    pub fn parse<R: BufRead>(mut reader: R) -> Result<Self, TargetError> {
        let mut list = TargetList::default();
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            match decode_line(&buf, line_no) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => list.push_line(line, line_no),
                Err(e) => list.skip(e),
            }
        }
        Ok(list)
    }

    fn push_line(&mut self, line: &str, line_no: usize) {
        match parse_target_line(line, line_no) {
            Ok(target) => self.targets.push(target),
            Err(e) => self.skip(e),
        }
    }

    fn skip(&mut self, err: TargetError) {
        warn!(error = %err, "skipping target line");
        self.skipped += 1;
    }

    pub fn targets(&self) -> &[TargetLocation] {
        &self.targets
    }

    /// Number of malformed lines that were dropped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_path_and_line() {
        let target = parse_target_line("src/foo.c:42\n", 1).unwrap();
        assert_eq!(target.source_file, PathBuf::from("src/foo.c"));
        assert_eq!(target.line, 42);
        assert_eq!(target.to_string(), "src/foo.c:42");
    }

    #[test]
    fn line_number_is_taken_after_last_colon() {
        let target = parse_target_line("weird:dir/bar.c:7\r\n", 3).unwrap();
        assert_eq!(target.source_file, PathBuf::from("weird:dir/bar.c"));
        assert_eq!(target.line, 7);
    }

    #[test]
    fn rejects_missing_line_suffix() {
        match parse_target_line("src/foo.c", 5) {
            Err(TargetError::MalformedTargetLine { line_no, .. }) => assert_eq!(line_no, 5),
            other => panic!("Expected MalformedTargetLine, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_line_numbers_and_empty_paths() {
        assert!(parse_target_line("foo.c:abc", 1).is_err());
        assert!(parse_target_line("foo.c:0", 1).is_err());
        assert!(parse_target_line("foo.c:-3", 1).is_err());
        assert!(parse_target_line(":12", 1).is_err());
    }

    #[test]
    fn list_skips_malformed_lines_and_keeps_order() {
        let input = "b.c:2\nnot-a-target\n\na.c:1\nc.c:x\nd.c:9";
        let list = TargetList::parse(Cursor::new(input)).unwrap();
        let rendered: Vec<String> = list.targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, vec!["b.c:2", "a.c:1", "d.c:9"]);
        assert_eq!(list.skipped(), 2);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn invalid_utf8_line_is_skipped_not_fatal() {
        let input: &[u8] = b"a.c:1\n\xff\xfe.c:2\nb.c:3\n";
        let list = TargetList::parse(Cursor::new(input)).unwrap();
        let rendered: Vec<String> = list.targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, vec!["a.c:1", "b.c:3"]);
        assert_eq!(list.skipped(), 1);
    }

    #[test]
    fn non_utf8_line_reports_its_position() {
        match decode_line(b"\xffoo.c:4", 7) {
            Err(TargetError::MalformedTargetLine { line_no, reason, .. }) => {
                assert_eq!(line_no, 7);
                assert_eq!(reason, "not valid UTF-8");
            }
            other => panic!("Expected MalformedTargetLine, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_missing_file_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        match TargetList::load(&dir.path().join("targets.txt")) {
            Err(TargetError::Io(msg)) => assert!(msg.contains("targets.txt")),
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
