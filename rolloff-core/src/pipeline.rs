//! One refresh: orchestrate, verify, persist.

use std::sync::Arc;

use async_trait::async_trait;

use crate::orchestrator::{Orchestrator, RunStatus, RunSummary};
use crate::scheduler::RefreshJob;
use crate::snapshot::IntegrityError;
use crate::store::{SnapshotStore, StoreError};

#[derive(thiserror::Error, Debug)]
/// Reasons a refresh did not replace the current snapshot.
pub enum PipelineError {
    /// No extractor produced data; the previous snapshot stays current.
    #[error("all {failed} extractors failed, keeping previous snapshot")]
    AllExtractorsFailed {
        /// Number of extractors that ran.
        failed: usize,
    },
    /// The merged snapshot broke an invariant.
    #[error("snapshot failed integrity check: {0}")]
    Integrity(#[from] IntegrityError),
    /// The store rejected the snapshot.
    #[error("failed to persist snapshot: {0}")]
    Store(#[from] StoreError),
}

/// Orchestrator bound to the store it refreshes.
pub struct Pipeline {
    orchestrator: Orchestrator,
    store: Arc<dyn SnapshotStore>,
}

impl Pipeline {
    /// Create a pipeline writing into `store`.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    /// Run every extractor once and save the merged snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when nothing was scraped, the snapshot is
    /// inconsistent, or it cannot be saved. The stored snapshot is untouched then.
    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let report = self.orchestrator.run().await;
        let mut summary = report.summary();

        if summary.status == RunStatus::Failed {
            return Err(PipelineError::AllExtractorsFailed {
                failed: report.outcomes.len(),
            });
        }

        report.snapshot.check_integrity()?;
        summary.saved_at = Some(self.store.save(report.snapshot).await?);

        tracing::info!(status = ?summary.status, prices = summary.prices, "refresh stored");
        Ok(summary)
    }
}

#[async_trait]
impl RefreshJob for Pipeline {
    async fn refresh(&self) -> Result<RunSummary, PipelineError> {
        self.run_once().await
    }
}
