//! End-to-end run over one fuzzing campaign: load inputs, search, write the report.

use crate::config::ReachConfig;
use crate::corpus::{Corpus, CorpusError};
use crate::oracle::CoverageOracle;
use crate::report::{ReportError, ReportWriter};
use crate::search::{
    CancelToken, ReachabilitySearch, SearchError, SearchOptions, SearchResult, TargetReport,
};
use crate::snapshot::SnapshotBuilder;
use crate::target::{TargetError, TargetList};
use crate::timing::{TimestampLedger, TimingError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const QUEUE_DIR: &str = "queue";
pub const TARGETS_FILE: &str = "targets.txt";
pub const TIMESTAMPS_FILE: &str = "timestamps_delta.csv";
pub const REPORT_FILE: &str = "target_times.csv";

/// Resource-level failures that stop the whole run.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Targets(#[from] TargetError),
    #[error(transparent)]
    Ledger(#[from] TimingError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// File locations of a campaign, following the AFL output directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignLayout {
    pub queue_dir: PathBuf,
    pub targets_file: PathBuf,
    pub timestamps_file: PathBuf,
    pub report_file: PathBuf,
}

impl CampaignLayout {
    pub fn from_config(config: &ReachConfig) -> Self {
        let c = &config.campaign;
        let out = &c.output_dir;
        Self {
            queue_dir: c.queue_dir.clone().unwrap_or_else(|| out.join(QUEUE_DIR)),
            targets_file: c
                .targets_file
                .clone()
                .unwrap_or_else(|| out.join(TARGETS_FILE)),
            timestamps_file: c
                .timestamps_file
                .clone()
                .unwrap_or_else(|| out.join(TIMESTAMPS_FILE)),
            report_file: c
                .report_file
                .clone()
                .unwrap_or_else(|| out.join(REPORT_FILE)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    pub targets: usize,
    pub skipped_lines: usize,
    pub found: usize,
    pub not_found: usize,
    pub inconclusive: usize,
    pub aborted: usize,
}

impl CampaignSummary {
    fn tally(reports: &[TargetReport], skipped_lines: usize) -> Self {
        let mut summary = CampaignSummary {
            targets: reports.len(),
            skipped_lines,
            ..Default::default()
        };
        for report in reports {
            match report.result {
                SearchResult::Found { .. } => summary.found += 1,
                SearchResult::NotFound => summary.not_found += 1,
                SearchResult::Inconclusive { .. } => summary.inconclusive += 1,
                SearchResult::Aborted => summary.aborted += 1,
            }
        }
        summary
    }
}

pub struct Campaign {
    config: ReachConfig,
    layout: CampaignLayout,
}

impl Campaign {
    pub fn new(config: ReachConfig) -> Self {
        let layout = CampaignLayout::from_config(&config);
        Self { config, layout }
    }

    pub fn layout(&self) -> &CampaignLayout {
        &self.layout
    }

    pub fn run<O: CoverageOracle>(&self, oracle: &O) -> Result<CampaignSummary, CampaignError> {
        let corpus = Corpus::load_from_dir(&self.layout.queue_dir)?;
        if corpus.is_empty() {
            warn!(queue = ?self.layout.queue_dir, "corpus is empty, every target will be reported as not found");
        }
        let targets = TargetList::load(&self.layout.targets_file)?;
        let ledger = self.load_ledger()?;
        ledger.check_ordering(&corpus);

        info!(
            entries = corpus.len(),
            targets = targets.len(),
            skipped = targets.skipped(),
            "starting reachability search"
        );

        let cancel = CancelToken::new();
        if let Some(secs) = self.config.search.deadline_secs {
            cancel.cancel_after(Duration::from_secs(secs));
        }
        let search = ReachabilitySearch::new(
            &corpus,
            oracle,
            SnapshotBuilder::new(self.config.search.scratch_dir.clone()),
            cancel,
            SearchOptions {
                threads: self.config.search.threads,
                verify: self.config.search.verify,
            },
        );
        let reports = search.run(targets.targets(), &ledger)?;

        ReportWriter::new(
            self.layout.report_file.clone(),
            self.config.report.format,
            self.config.report.mode,
        )
        .write(&reports)?;

        let summary = CampaignSummary::tally(&reports, targets.skipped());
        info!(?summary, "campaign finished");
        Ok(summary)
    }

    /// A missing ledger degrades every time to unknown; an unreadable one is fatal.
    fn load_ledger(&self) -> Result<TimestampLedger, CampaignError> {
        let path = &self.layout.timestamps_file;
        if !path.exists() {
            warn!(?path, "timestamp ledger not found, discovery times will be unknown");
            return Ok(TimestampLedger::default());
        }
        let ledger = TimestampLedger::load(path, self.config.campaign.timestamp_delimiter)?;
        if ledger.is_empty() {
            warn!(?path, "timestamp ledger has no usable rows, discovery times will be unknown");
        } else {
            info!(?path, rows = ledger.len(), "timestamp ledger loaded");
        }
        Ok(ledger)
    }
}
