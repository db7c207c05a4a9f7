//! Runs every registered extractor under a concurrency bound and a retry policy.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::model::{RawExtraction, VendorId, VendorMeta};
use crate::normalize::{Normalizer, ValidationIssue};
use crate::plugin::VendorRegistry;
use crate::ports::{ExtractError, Extractor, ExtractorSession};
use crate::retry::{retry_with_backoff, RetryDisposition, RetryPolicy};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How many extractors may run at the same time.
pub enum ConcurrencyPolicy {
    /// One extractor after another, in registry order.
    Sequential,
    /// Up to the given number of extractors at once. A bound of zero behaves as one.
    Bounded(usize),
}

impl ConcurrencyPolicy {
    /// Limits of zero or one select [`ConcurrencyPolicy::Sequential`].
    #[must_use]
    pub fn from_limit(limit: usize) -> Self {
        if limit <= 1 {
            Self::Sequential
        } else {
            Self::Bounded(limit)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Result of one extractor within a run.
pub enum ExtractorStatus {
    /// All operations returned data.
    Succeeded,
    /// Retries were exhausted, a fatal error occurred, or the task panicked.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Per-extractor entry of a [`RunReport`].
pub struct ExtractorOutcome {
    /// Vendor the extractor scrapes.
    pub vendor: VendorId,
    /// Whether its data made it into the snapshot.
    pub status: ExtractorStatus,
    /// Calls made across `open` and the four operations, retries included.
    pub attempts: usize,
    /// Final error message for failed extractors.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Aggregate result of a run.
pub enum RunStatus {
    /// Every extractor succeeded.
    Complete,
    /// Some extractors failed, at least one succeeded.
    Partial,
    /// No extractor succeeded.
    Failed,
}

#[derive(Debug, Clone)]
/// Everything one orchestrator run produced.
pub struct RunReport {
    /// Merged contributions of the successful extractors.
    pub snapshot: Snapshot,
    /// One entry per extractor, in merge order.
    pub outcomes: Vec<ExtractorOutcome>,
    /// Records excluded by the normalizer.
    pub issues: Vec<ValidationIssue>,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the last extractor finished.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Classify the run by its extractor outcomes.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let succeeded = self
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == ExtractorStatus::Succeeded)
            .count();

        if succeeded == 0 {
            RunStatus::Failed
        } else if succeeded == self.outcomes.len() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }

    /// Serializable summary without the snapshot itself.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            companies: self.snapshot.companies.len(),
            service_areas: self.snapshot.service_areas.len(),
            dumpster_sizes: self.snapshot.dumpster_sizes.len(),
            prices: self.snapshot.prices.len(),
            rejected_records: self.issues.len(),
            outcomes: self.outcomes.clone(),
            saved_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Compact description of a run, kept by the scheduler and served on `/status`.
pub struct RunSummary {
    /// Aggregate status.
    pub status: RunStatus,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the last extractor finished.
    pub finished_at: DateTime<Utc>,
    /// Companies in the produced snapshot.
    pub companies: usize,
    /// Service areas in the produced snapshot.
    pub service_areas: usize,
    /// Sizes in the produced snapshot.
    pub dumpster_sizes: usize,
    /// Prices in the produced snapshot.
    pub prices: usize,
    /// Records excluded by validation.
    pub rejected_records: usize,
    /// Per-extractor results.
    pub outcomes: Vec<ExtractorOutcome>,
    /// Timestamp the store stamped on the snapshot, if it was saved.
    pub saved_at: Option<DateTime<Utc>>,
}

/// What one extractor produced before normalization.
struct Harvest {
    vendor: VendorMeta,
    attempts: usize,
    result: Result<RawExtraction, ExtractError>,
}

impl Harvest {
    fn aborted(vendor: VendorMeta, reason: &str) -> Self {
        Self {
            vendor,
            attempts: 0,
            result: Err(ExtractError::Internal(reason.to_owned())),
        }
    }
}

/// Fans out over the registered extractors and merges their contributions.
pub struct Orchestrator {
    extractors: Vec<Arc<dyn Extractor>>,
    normalizer: Normalizer,
    concurrency: ConcurrencyPolicy,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Orchestrator over every extractor in `registry`.
    #[must_use]
    pub fn new(
        registry: &VendorRegistry,
        normalizer: Normalizer,
        concurrency: ConcurrencyPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            extractors: registry.extractors(),
            normalizer,
            concurrency,
            retry,
        }
    }

    /// Run all extractors once. Individual failures are recorded, never raised.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        tracing::info!(
            extractors = self.extractors.len(),
            concurrency = ?self.concurrency,
            "starting extraction run"
        );

        let mut report = RunReport {
            snapshot: Snapshot::default(),
            outcomes: Vec::with_capacity(self.extractors.len()),
            issues: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        match self.concurrency {
            ConcurrencyPolicy::Sequential => self.run_sequential(&mut report).await,
            ConcurrencyPolicy::Bounded(limit) => self.run_bounded(limit, &mut report).await,
        }

        report.finished_at = Utc::now();
        tracing::info!(
            status = ?report.status(),
            companies = report.snapshot.companies.len(),
            prices = report.snapshot.prices.len(),
            rejected = report.issues.len(),
            "extraction run finished"
        );
        report
    }

    async fn run_sequential(&self, report: &mut RunReport) {
        for extractor in &self.extractors {
            let harvested = AssertUnwindSafe(harvest(extractor.as_ref(), self.retry))
                .catch_unwind()
                .await
                .unwrap_or_else(|_panic| {
                    Harvest::aborted(extractor.vendor().clone(), "extractor panicked")
                });
            self.merge(report, harvested);
        }
    }

    async fn run_bounded(&self, limit: usize, report: &mut RunReport) {
        let permits = Arc::new(Semaphore::new(limit.max(1)));
        let retry = self.retry;

        let mut workers = JoinSet::new();
        let mut vendors = HashMap::with_capacity(self.extractors.len());
        for extractor in &self.extractors {
            let extractor = Arc::clone(extractor);
            let permits = Arc::clone(&permits);
            let vendor = extractor.vendor().clone();

            let handle = workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Harvest::aborted(extractor.vendor().clone(), "worker pool closed");
                };
                harvest(extractor.as_ref(), retry).await
            });
            vendors.insert(handle.id(), vendor);
        }

        while let Some(joined) = workers.join_next_with_id().await {
            let harvested = match joined {
                Ok((_id, harvested)) => harvested,
                Err(error) => {
                    let reason = if error.is_panic() {
                        "extractor panicked"
                    } else {
                        "extractor task cancelled"
                    };
                    let Some(vendor) = vendors.remove(&error.id()) else {
                        tracing::error!(error = %error, "worker of unknown vendor ended abnormally");
                        continue;
                    };
                    Harvest::aborted(vendor, reason)
                }
            };
            self.merge(report, harvested);
        }
    }

    fn merge(&self, report: &mut RunReport, harvest: Harvest) {
        let Harvest {
            vendor,
            attempts,
            result,
        } = harvest;

        match result {
            Ok(raw) => {
                let mut contribution = self.normalizer.normalize(&vendor, raw);
                report.issues.append(&mut contribution.issues);
                report.snapshot.absorb(contribution);
                tracing::info!(vendor = %vendor.id, attempts, "extractor succeeded");
                report.outcomes.push(ExtractorOutcome {
                    vendor: vendor.id,
                    status: ExtractorStatus::Succeeded,
                    attempts,
                    error: None,
                });
            }
            Err(error) => {
                tracing::error!(vendor = %vendor.id, attempts, error = %error, "extractor failed");
                report.outcomes.push(ExtractorOutcome {
                    vendor: vendor.id,
                    status: ExtractorStatus::Failed,
                    attempts,
                    error: Some(error.to_string()),
                });
            }
        }
    }
}

async fn harvest(extractor: &dyn Extractor, retry: RetryPolicy) -> Harvest {
    let vendor = extractor.vendor().clone();
    let mut attempts = 0;

    let opened = retried(&vendor.id, "open", retry, &mut attempts, || extractor.open()).await;
    let session = match opened {
        Ok(session) => session,
        Err(error) => {
            return Harvest {
                vendor,
                attempts,
                result: Err(error),
            };
        }
    };

    let collected = AssertUnwindSafe(collect(session.as_ref(), &vendor.id, retry, &mut attempts))
        .catch_unwind()
        .await;
    session.close().await;

    let result = collected
        .unwrap_or_else(|_panic| Err(ExtractError::Internal("extractor panicked".to_owned())));
    Harvest {
        vendor,
        attempts,
        result,
    }
}

async fn collect(
    session: &dyn ExtractorSession,
    vendor: &VendorId,
    retry: RetryPolicy,
    attempts: &mut usize,
) -> Result<RawExtraction, ExtractError> {
    let company = retried(vendor, "company_info", retry, attempts, || {
        session.company_info()
    })
    .await?;
    let service_areas = retried(vendor, "service_areas", retry, attempts, || {
        session.service_areas()
    })
    .await?;
    let dumpster_sizes = retried(vendor, "dumpster_sizes", retry, attempts, || {
        session.dumpster_sizes()
    })
    .await?;
    let pricing = retried(vendor, "prices", retry, attempts, || session.prices()).await?;

    Ok(RawExtraction {
        company,
        service_areas,
        dumpster_sizes,
        pricing,
    })
}

async fn retried<T, F, Fut>(
    vendor: &VendorId,
    operation: &'static str,
    policy: RetryPolicy,
    attempts: &mut usize,
    mut call: F,
) -> Result<T, ExtractError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExtractError>>,
{
    let outcome = retry_with_backoff(
        policy,
        |_attempt| call(),
        |error: &ExtractError| {
            if error.is_transient() {
                RetryDisposition::Retry
            } else {
                RetryDisposition::Abort
            }
        },
        |attempt, delay, error| {
            tracing::warn!(
                vendor = %vendor,
                operation,
                attempt,
                ?delay,
                error = %error,
                "extractor operation failed, backing off"
            );
        },
    )
    .await;

    match outcome {
        Ok((value, used)) => {
            *attempts += used;
            Ok(value)
        }
        Err(failure) => {
            *attempts += failure.attempts;
            Err(failure.error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ExtractorStatus) -> ExtractorOutcome {
        ExtractorOutcome {
            vendor: VendorId("vendor".to_owned()),
            status,
            attempts: 5,
            error: None,
        }
    }

    fn report(outcomes: Vec<ExtractorOutcome>) -> RunReport {
        let now = Utc::now();
        RunReport {
            snapshot: Snapshot::default(),
            outcomes,
            issues: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn limits_up_to_one_run_sequentially() {
        assert_eq!(ConcurrencyPolicy::from_limit(0), ConcurrencyPolicy::Sequential);
        assert_eq!(ConcurrencyPolicy::from_limit(1), ConcurrencyPolicy::Sequential);
        assert_eq!(ConcurrencyPolicy::from_limit(4), ConcurrencyPolicy::Bounded(4));
    }

    #[test]
    fn status_reflects_outcomes() {
        let complete = report(vec![outcome(ExtractorStatus::Succeeded)]);
        let partial = report(vec![
            outcome(ExtractorStatus::Succeeded),
            outcome(ExtractorStatus::Failed),
        ]);
        let failed = report(vec![outcome(ExtractorStatus::Failed)]);

        assert_eq!(complete.status(), RunStatus::Complete);
        assert_eq!(partial.status(), RunStatus::Partial);
        assert_eq!(failed.status(), RunStatus::Failed);
        assert_eq!(report(Vec::new()).status(), RunStatus::Failed);
    }

    #[test]
    fn summary_counts_snapshot_entities() {
        let summary = report(vec![outcome(ExtractorStatus::Succeeded)]).summary();
        assert_eq!(summary.status, RunStatus::Complete);
        assert_eq!(summary.prices, 0);
        assert_eq!(summary.saved_at, None);
        assert_eq!(summary.outcomes.len(), 1);
    }
}
