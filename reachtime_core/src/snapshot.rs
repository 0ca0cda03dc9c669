use crate::corpus::{Corpus, CorpusEntry};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Name of the queue directory inside a snapshot, matching the AFL output layout
/// coverage tools expect to find under `-d`.
pub const SNAPSHOT_QUEUE_DIR: &str = "queue";

const SNAPSHOT_PREFIX: &str = "reachtime-";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to create scratch directory: {0}")]
    ScratchDir(String),

    #[error("Prefix of {requested} entries requested from a corpus of {available}")]
    PrefixOutOfRange { requested: usize, available: usize },

    #[error("Failed to stage corpus entry {id:?}: {reason}")]
    Copy { id: String, reason: String },
}

/// A materialised subset of the corpus living in its own scratch directory.
///
/// The directory and everything the oracle wrote into it are removed when the
/// snapshot is dropped.
#[derive(Debug)]
pub struct Snapshot {
    dir: TempDir,
    staged: usize,
}

impl Snapshot {
    /// Root of the snapshot, the directory handed to the coverage oracle.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.dir.path().join(SNAPSHOT_QUEUE_DIR)
    }

    /// Number of entries copied into the snapshot.
    pub fn staged(&self) -> usize {
        self.staged
    }
}

/// Creates isolated snapshots of the corpus for coverage computation.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    scratch_root: Option<PathBuf>,
}

impl SnapshotBuilder {
    /// `scratch_root` selects where snapshots are created; `None` uses the system temp dir.
    pub fn new(scratch_root: Option<PathBuf>) -> Self {
        Self { scratch_root }
    }

    /// Stages the first `count` entries of `corpus`.
    pub fn stage(&self, corpus: &Corpus, count: usize) -> Result<Snapshot, SnapshotError> {
        let prefix = corpus
            .prefix(count)
            .ok_or(SnapshotError::PrefixOutOfRange {
                requested: count,
                available: corpus.len(),
            })?;
        self.stage_subset(prefix)
    }

    /// Stages an arbitrary subset of entries, keeping their corpus names.
    pub fn stage_subset<'c>(
        &self,
        entries: impl IntoIterator<Item = &'c CorpusEntry>,
    ) -> Result<Snapshot, SnapshotError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SNAPSHOT_PREFIX);
        let dir = match &self.scratch_root {
            Some(root) => {
                fs::create_dir_all(root).map_err(|e| {
                    SnapshotError::ScratchDir(format!("{:?}: {}", root, e))
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| SnapshotError::ScratchDir(e.to_string()))?;

        let mut snapshot = Snapshot { dir, staged: 0 };
        let queue = snapshot.queue_dir();
        fs::create_dir(&queue).map_err(|e| {
            SnapshotError::ScratchDir(format!("Failed to create {:?}: {}", queue, e))
        })?;

        for entry in entries {
            fs::copy(&entry.path, queue.join(&entry.id)).map_err(|e| SnapshotError::Copy {
                id: entry.id.clone(),
                reason: e.to_string(),
            })?;
            snapshot.staged += 1;
        }

        debug!(staged = snapshot.staged, dir = ?snapshot.path(), "snapshot staged");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn corpus_with(dir: &Path, names: &[&str]) -> Corpus {
        for name in names {
            fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
        Corpus::load_from_dir(dir).unwrap()
    }

    fn staged_names(snapshot: &Snapshot) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(snapshot.queue_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn stages_exactly_the_requested_prefix() {
        let queue = tempdir().unwrap();
        let corpus = corpus_with(queue.path(), &["e0", "e1", "e2", "e3"]);
        let builder = SnapshotBuilder::default();

        let snapshot = builder.stage(&corpus, 3).unwrap();
        assert_eq!(snapshot.staged(), 3);
        assert_eq!(staged_names(&snapshot), vec!["e0", "e1", "e2"]);
        assert_eq!(fs::read(snapshot.queue_dir().join("e1")).unwrap(), b"e1");
    }

    #[test]
    fn empty_prefix_creates_empty_queue() {
        let queue = tempdir().unwrap();
        let corpus = corpus_with(queue.path(), &["e0"]);
        let snapshot = SnapshotBuilder::default().stage(&corpus, 0).unwrap();
        assert!(snapshot.queue_dir().is_dir());
        assert!(staged_names(&snapshot).is_empty());
    }

    #[test]
    fn rejects_prefix_longer_than_corpus() {
        let queue = tempdir().unwrap();
        let corpus = corpus_with(queue.path(), &["e0", "e1"]);
        match SnapshotBuilder::default().stage(&corpus, 3) {
            Err(SnapshotError::PrefixOutOfRange {
                requested,
                available,
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("Expected PrefixOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn snapshots_are_disjoint_and_removed_on_drop() {
        let queue = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let corpus = corpus_with(queue.path(), &["e0", "e1"]);
        let builder = SnapshotBuilder::new(Some(scratch.path().join("work")));

        let first = builder.stage(&corpus, 1).unwrap();
        let second = builder.stage(&corpus, 2).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(scratch.path().join("work")));

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn stage_subset_copies_selected_entries() {
        let queue = tempdir().unwrap();
        let corpus = corpus_with(queue.path(), &["e0", "e1", "e2"]);
        let picked = [corpus.get(0).unwrap(), corpus.get(2).unwrap()];
        let snapshot = SnapshotBuilder::default().stage_subset(picked).unwrap();
        assert_eq!(snapshot.staged(), 2);
        assert_eq!(staged_names(&snapshot), vec!["e0", "e2"]);
    }

    #[test]
    fn missing_source_file_is_a_copy_error() {
        let corpus = Corpus::from_entries(vec![CorpusEntry {
            id: "gone".into(),
            path: PathBuf::from("/definitely/not/here/gone"),
        }]);
        match SnapshotBuilder::default().stage(&corpus, 1) {
            Err(SnapshotError::Copy { id, .. }) => assert_eq!(id, "gone"),
            other => panic!("Expected Copy error, got {other:?}"),
        }
    }
}
