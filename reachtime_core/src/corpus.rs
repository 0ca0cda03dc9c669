use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Defines errors that can arise while reading a fuzzing corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The corpus directory does not exist or is not a directory.
    #[error("Corpus path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// An entry file name is not valid UTF-8 and cannot serve as an identifier.
    #[error("Corpus entry {0:?} has a non UTF-8 file name")]
    InvalidEntryName(PathBuf),

    /// An I/O error occurred while listing the corpus directory.
    #[error("Corpus I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

/// One fuzz-generated input, identified by its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    /// Stable identifier; its lexicographic order is the discovery order.
    pub id: String,
    /// Location of the input on disk.
    pub path: PathBuf,
}

/// An ordered, frozen fuzzing corpus.
///
/// Ordering is an explicit contract: entries are totally ordered by their `id`
/// (byte-wise lexicographic), which fuzzers such as AFL make coincide with
/// discovery order by numbering queue files. The order never changes once the
/// corpus is built, so prefix `k` always denotes the same set of inputs.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    /// Builds a corpus from arbitrary entries, sorting them into id order.
    pub fn from_entries(mut entries: Vec<CorpusEntry>) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Self { entries }
    }

    /// Reads every regular file directly inside `dir`.
    ///
    /// Subdirectories are not traversed and dotfiles (e.g. AFL's `.state`
    /// bookkeeping) are ignored.
    pub fn load_from_dir(dir: &Path) -> Result<Self, CorpusError> {
        if !dir.is_dir() {
            return Err(CorpusError::NotADirectory(dir.to_path_buf()));
        }

        let mut entries = Vec::new();
        for entry_result in fs::read_dir(dir).map_err(|e| {
            CorpusError::Io(format!("Failed to read corpus directory {:?}: {}", dir, e))
        })? {
            let entry = entry_result.map_err(|e| {
                CorpusError::Io(format!("Error reading entry in {:?}: {}", dir, e))
            })?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let id = entry
                .file_name()
                .into_string()
                .map_err(|_| CorpusError::InvalidEntryName(path.clone()))?;
            if id.starts_with('.') {
                debug!(?path, "ignoring hidden corpus file");
                continue;
            }
            entries.push(CorpusEntry { id, path });
        }

        let corpus = Self::from_entries(entries);
        debug!(entries = corpus.len(), ?dir, "corpus loaded");
        Ok(corpus)
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    /// The first `count` entries in corpus order, or `None` if `count` exceeds the corpus.
    pub fn prefix(&self, count: usize) -> Option<&[CorpusEntry]> {
        self.entries.get(..count)
    }

    pub fn get(&self, index: usize) -> Option<&CorpusEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
