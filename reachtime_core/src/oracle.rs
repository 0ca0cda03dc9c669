use crate::target::TargetLocation;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of asking the oracle whether a line was exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Reached,
    NotReached,
}

impl Verdict {
    pub fn is_reached(self) -> bool {
        matches!(self, Verdict::Reached)
    }
}

/// Failures of the external coverage tool. These are never folded into
/// `Verdict::NotReached`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The tool could not be spawned, crashed, or exited with an unexpected code.
    #[error("Coverage tool invocation failed: {0}")]
    ToolInvocation(String),

    /// The tool did not finish within the watchdog limit and was killed.
    #[error("Coverage tool timed out after {0:?}")]
    Timeout(Duration),
}

/// A coverage oracle answers reachability questions about the inputs staged in a
/// snapshot directory.
///
/// Implementations may write artifacts below `snapshot_dir` but must never touch
/// the corpus itself. Both calls must be idempotent for an unchanged snapshot.
pub trait CoverageOracle: Send + Sync {
    /// Computes aggregate coverage over every input staged in `snapshot_dir`.
    fn compute(&self, snapshot_dir: &Path) -> Result<(), OracleError>;

    /// Reports whether `target` was exercised by the most recent `compute` on `snapshot_dir`.
    fn query(&self, snapshot_dir: &Path, target: &TargetLocation) -> Result<Verdict, OracleError>;

    /// Computes coverage and queries a single target.
    fn probe(&self, snapshot_dir: &Path, target: &TargetLocation) -> Result<Verdict, OracleError> {
        self.compute(snapshot_dir)?;
        self.query(snapshot_dir, target)
    }
}

/// Settings for [`AflCovOracle`].
#[derive(Debug, Clone)]
pub struct AflCovOracleConfig {
    /// Program and leading arguments used to invoke afl-cov.
    pub afl_cov: Vec<String>,
    /// Command replaying one input, `AFL_FILE` is appended as the input placeholder.
    pub coverage_command: String,
    /// Root that target source paths are relative to.
    pub source_root: PathBuf,
    /// Watchdog applied to every invocation.
    pub timeout: Duration,
    /// Exit codes of a line search that mean "not covered". Anything else non-zero is a tool failure.
    pub not_reached_exit_codes: Vec<i32>,
}

/// Drives an afl-cov compatible command line tool.
#[derive(Debug, Clone)]
pub struct AflCovOracle {
    config: AflCovOracleConfig,
}

impl AflCovOracle {
    pub fn new(config: AflCovOracleConfig) -> Result<Self, OracleError> {
        if config.afl_cov.is_empty() {
            return Err(OracleError::ToolInvocation(
                "afl-cov command line is empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.afl_cov[0]);
        cmd.args(&self.config.afl_cov[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd
    }

    fn compute_command(&self, snapshot_dir: &Path) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("--coverage-include-lines")
            .arg("--coverage-at-exit")
            .arg("--disable-lcov-web")
            .arg("-e")
            .arg(format!("{} AFL_FILE", self.config.coverage_command))
            .arg("-c")
            .arg(&self.config.source_root)
            .arg("-d")
            .arg(snapshot_dir);
        cmd
    }

    fn query_command(&self, snapshot_dir: &Path, target: &TargetLocation) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("--src-file")
            .arg(self.config.source_root.join(&target.source_file))
            .arg("--line-search")
            .arg(target.line.to_string())
            .arg("-d")
            .arg(snapshot_dir);
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<ExitStatus, OracleError> {
        let child = cmd.spawn().map_err(|e| {
            OracleError::ToolInvocation(format!(
                "Failed to spawn command '{:?}': {}",
                self.config.afl_cov, e
            ))
        })?;
        wait_with_timeout(child, self.config.timeout)
    }
}

impl CoverageOracle for AflCovOracle {
    fn compute(&self, snapshot_dir: &Path) -> Result<(), OracleError> {
        let status = self.run(self.compute_command(snapshot_dir))?;
        if status.success() {
            Ok(())
        } else {
            Err(OracleError::ToolInvocation(format!(
                "coverage computation {}",
                describe_failure(&status)
            )))
        }
    }

    fn query(&self, snapshot_dir: &Path, target: &TargetLocation) -> Result<Verdict, OracleError> {
        let status = self.run(self.query_command(snapshot_dir, target))?;
        let verdict = classify_line_search(&status, &self.config.not_reached_exit_codes)?;
        debug!(%target, ?verdict, "line search");
        Ok(verdict)
    }
}

/// Maps a line-search exit status onto a verdict. Signals and unexpected exit
/// codes are tool failures.
fn classify_line_search(status: &ExitStatus, not_reached: &[i32]) -> Result<Verdict, OracleError> {
    if status.success() {
        return Ok(Verdict::Reached);
    }
    match status.code() {
        Some(code) if not_reached.contains(&code) => Ok(Verdict::NotReached),
        _ => Err(OracleError::ToolInvocation(format!(
            "line search {}",
            describe_failure(status)
        ))),
    }
}

fn describe_failure(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "exited abnormally".to_string()
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ExitStatus, OracleError> {
    let start_time = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start_time.elapsed() > timeout {
                    warn!(?timeout, "coverage tool timed out, killing");
                    if let Err(e) = child.kill() {
                        return Err(OracleError::ToolInvocation(format!(
                            "Failed to kill timed-out process: {e}"
                        )));
                    }
                    let _ = child.wait();
                    return Err(OracleError::Timeout(timeout));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                return Err(OracleError::ToolInvocation(format!(
                    "Error waiting for child: {e}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::snapshot::SnapshotBuilder;
    use std::fs;
    use tempfile::tempdir;

    fn fake_afl_cov() -> Vec<String> {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let script = manifest_dir.join("../test_targets/fake_afl_cov.sh");
        if !script.exists() {
            panic!("Test target missing: {script:?}");
        }
        vec!["sh".to_string(), script.to_str().unwrap().to_string()]
    }

    fn oracle_with(afl_cov: Vec<String>, timeout: Duration) -> AflCovOracle {
        AflCovOracle::new(AflCovOracleConfig {
            afl_cov,
            coverage_command: "./target_bin".to_string(),
            source_root: PathBuf::from("/src/project"),
            timeout,
            not_reached_exit_codes: vec![1],
        })
        .unwrap()
    }

    /// Queue files list the lines they cover, one `file:line` per line.
    fn corpus_covering(dir: &Path, entries: &[(&str, &str)]) -> Corpus {
        for (name, lines) in entries {
            fs::write(dir.join(name), lines).unwrap();
        }
        Corpus::load_from_dir(dir).unwrap()
    }

    #[test]
    fn rejects_empty_command_line() {
        let result = AflCovOracle::new(AflCovOracleConfig {
            afl_cov: vec![],
            coverage_command: String::new(),
            source_root: PathBuf::new(),
            timeout: Duration::from_secs(1),
            not_reached_exit_codes: vec![1],
        });
        assert!(matches!(result, Err(OracleError::ToolInvocation(_))));
    }

    #[test]
    fn fake_tool_reports_reached_and_not_reached() {
        let queue = tempdir().unwrap();
        let corpus = corpus_covering(queue.path(), &[("e0", "foo.c:1\n"), ("e1", "foo.c:42\n")]);
        let oracle = oracle_with(fake_afl_cov(), Duration::from_secs(10));
        let snapshot = SnapshotBuilder::default().stage(&corpus, 2).unwrap();

        oracle.compute(snapshot.path()).unwrap();
        assert_eq!(
            oracle.query(snapshot.path(), &TargetLocation::new("foo.c", 42)),
            Ok(Verdict::Reached)
        );
        assert_eq!(
            oracle.query(snapshot.path(), &TargetLocation::new("foo.c", 43)),
            Ok(Verdict::NotReached)
        );
    }

    #[test]
    fn query_without_compute_is_a_tool_error() {
        let queue = tempdir().unwrap();
        let corpus = corpus_covering(queue.path(), &[("e0", "foo.c:1\n")]);
        let oracle = oracle_with(fake_afl_cov(), Duration::from_secs(10));
        let snapshot = SnapshotBuilder::default().stage(&corpus, 1).unwrap();

        match oracle.query(snapshot.path(), &TargetLocation::new("foo.c", 1)) {
            Err(OracleError::ToolInvocation(msg)) => assert!(msg.contains("code 2"), "{msg}"),
            other => panic!("Expected ToolInvocation, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_a_tool_error_not_a_negative() {
        let oracle = oracle_with(
            vec!["./this_coverage_tool_does_not_exist_12345".to_string()],
            Duration::from_secs(1),
        );
        let dir = tempdir().unwrap();
        match oracle.probe(dir.path(), &TargetLocation::new("foo.c", 1)) {
            Err(OracleError::ToolInvocation(msg)) => {
                assert!(msg.contains("Failed to spawn command"), "{msg}")
            }
            other => panic!("Expected ToolInvocation, got {other:?}"),
        }
    }

    #[test]
    fn hanging_tool_is_killed_by_watchdog() {
        let oracle = oracle_with(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let dir = tempdir().unwrap();
        let start = Instant::now();
        assert_eq!(
            oracle.compute(dir.path()),
            Err(OracleError::Timeout(Duration::from_millis(100)))
        );
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn unexpected_exit_codes_are_tool_failures() {
        let oracle = oracle_with(
            vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            Duration::from_secs(5),
        );
        let dir = tempdir().unwrap();
        assert!(matches!(
            oracle.query(dir.path(), &TargetLocation::new("foo.c", 1)),
            Err(OracleError::ToolInvocation(_))
        ));

        let negative = oracle_with(
            vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()],
            Duration::from_secs(5),
        );
        assert_eq!(
            negative.query(dir.path(), &TargetLocation::new("foo.c", 1)),
            Ok(Verdict::NotReached)
        );
    }
}
