//! Traits describing vendor extractors and the errors they may raise.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;

use crate::model::{RawCompany, RawDumpsterSize, RawPricing, RawServiceArea, VendorMeta};

#[derive(thiserror::Error, Debug)]
/// Errors that escape an extractor. Expected scrape failures never do; they become defaults.
pub enum ExtractError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// The request did not finish in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// The vendor answered with a non-success status.
    #[error("Unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// A network session could not be established.
    #[error("Session error: {0}")]
    Session(String),
    /// Internal extractor error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExtractError::Network(_) | ExtractError::Timeout(_) | ExtractError::Status { .. }
        )
    }
}

#[async_trait]
/// Vendor-specific data source. Shared between runs; each run opens its own session.
pub trait Extractor: Send + Sync {
    /// Metadata describing the vendor handled by this extractor.
    fn vendor(&self) -> &VendorMeta;

    /// Acquire a network session for one run.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] when no session can be established.
    async fn open(&self) -> Result<Box<dyn ExtractorSession>, ExtractError>;
}

#[async_trait]
/// One open session against a vendor website.
///
/// Every operation is idempotent and may be retried independently. On fetch or
/// parse failure an operation returns the vendor's fallback records instead of
/// an error.
pub trait ExtractorSession: Send + Sync {
    /// Company details.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] only for unexpected faults.
    async fn company_info(&self) -> Result<RawCompany, ExtractError>;

    /// Cities served.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] only for unexpected faults.
    async fn service_areas(&self) -> Result<Vec<RawServiceArea>, ExtractError>;

    /// Container sizes offered.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] only for unexpected faults.
    async fn dumpster_sizes(&self) -> Result<Vec<RawDumpsterSize>, ExtractError>;

    /// Prices, either scoped or as a base schedule.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] only for unexpected faults.
    async fn prices(&self) -> Result<RawPricing, ExtractError>;

    /// Release the session. Called once, after the last operation, on every path.
    async fn close(&self);
}

#[derive(Debug, Clone)]
/// Settings shared by all provider crates when building their extractors.
pub struct ProviderSettings {
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Directory holding `<vendor-id>.json` default table overrides.
    pub defaults_dir: Option<PathBuf>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: String::from(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
            ),
            defaults_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_faults_are_transient() {
        assert!(ExtractError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            ExtractError::Status {
                status: 503,
                url: "https://example.test".to_owned()
            }
            .is_transient()
        );
        assert!(!ExtractError::Session("tls".to_owned()).is_transient());
        assert!(!ExtractError::Internal("bug".to_owned()).is_transient());
    }
}
