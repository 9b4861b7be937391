//! Pipeline stages, in run order.

pub mod apply;
pub mod download;
pub mod query;
pub mod reboot;
pub mod refresh;

pub use apply::ApplyStage;
pub use download::{DownloadFailure, DownloadReport, DownloadStage};
pub use query::UpdateQuery;
pub use refresh::{MetadataRefresher, RefreshSummary};
