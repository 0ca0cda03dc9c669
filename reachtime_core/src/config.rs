use crate::oracle::AflCovOracleConfig;
use crate::report::{ReportFormat, WriteMode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    /// Fuzzer output directory; the other paths default to files inside it.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub queue_dir: Option<PathBuf>,
    pub targets_file: Option<PathBuf>,
    pub timestamps_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    #[serde(default = "default_timestamp_delimiter")]
    pub timestamp_delimiter: char,
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timestamp_delimiter() -> char {
    ','
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            queue_dir: None,
            targets_file: None,
            timestamps_file: None,
            report_file: None,
            timestamp_delimiter: default_timestamp_delimiter(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OracleSettings {
    #[serde(default = "default_afl_cov")]
    pub afl_cov: Vec<String>,
    #[serde(default)]
    pub coverage_command: String,
    #[serde(default)]
    pub source_root: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_not_reached_exit_codes")]
    pub not_reached_exit_codes: Vec<i32>,
}

pub fn default_afl_cov() -> Vec<String> {
    vec!["./afl-cov".to_string()]
}

pub fn default_timeout_ms() -> u64 {
    600_000
}

fn default_not_reached_exit_codes() -> Vec<i32> {
    vec![1]
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            afl_cov: default_afl_cov(),
            coverage_command: String::new(),
            source_root: PathBuf::new(),
            timeout_ms: default_timeout_ms(),
            not_reached_exit_codes: default_not_reached_exit_codes(),
        }
    }
}

impl OracleSettings {
    pub fn to_oracle_config(&self) -> AflCovOracleConfig {
        AflCovOracleConfig {
            afl_cov: self.afl_cov.clone(),
            coverage_command: self.coverage_command.clone(),
            source_root: self.source_root.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            not_reached_exit_codes: self.not_reached_exit_codes.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub verify: bool,
    /// Wall-clock budget for the whole search; unfinished targets are reported as aborted.
    pub deadline_secs: Option<u64>,
    /// Where snapshots are created. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

pub fn default_threads() -> usize {
    1
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            verify: false,
            deadline_secs: None,
            scratch_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReachConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

impl ReachConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: ReachConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
