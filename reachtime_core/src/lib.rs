pub mod campaign;
pub mod config;
pub mod corpus;
pub mod oracle;
pub mod report;
pub mod search;
pub mod snapshot;
pub mod target;
pub mod timing;

pub use campaign::{Campaign, CampaignError, CampaignLayout, CampaignSummary};
pub use config::ReachConfig;
pub use corpus::{Corpus, CorpusEntry, CorpusError};
pub use oracle::{AflCovOracle, AflCovOracleConfig, CoverageOracle, OracleError, Verdict};
pub use report::{ReportError, ReportFormat, ReportWriter, WriteMode};
pub use search::{
    CancelToken, ReachabilitySearch, SearchError, SearchOptions, SearchResult, TargetReport,
};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotError};
pub use target::{TargetError, TargetList, TargetLocation};
pub use timing::{ElapsedTime, TimestampLedger, TimingError};
