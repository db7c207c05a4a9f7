//! High-level service facade combining the store, the scheduler, and the vendor registry.

use std::sync::Arc;

use crate::model::{CityListing, CityRef, Company, DumpsterSize, Price, ServiceArea, VendorMeta};
use crate::plugin::VendorRegistry;
use crate::scheduler::{Scheduler, SchedulerError, SchedulerStatus, TriggerOutcome};
use crate::store::{SnapshotStore, StoreError};

/// Public entry point for reading pricing data and requesting refreshes.
pub struct RolloffService {
    store: Arc<dyn SnapshotStore>,
    scheduler: Arc<Scheduler>,
    registry: Arc<VendorRegistry>,
}

impl RolloffService {
    /// Create a new service over the provided collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        scheduler: Arc<Scheduler>,
        registry: Arc<VendorRegistry>,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
        }
    }

    /// Vendors that are scraped on every refresh.
    #[must_use]
    pub fn vendors(&self) -> Vec<VendorMeta> {
        self.registry.vendors()
    }

    /// All companies in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn companies(&self) -> Result<Vec<Company>, StoreError> {
        self.store.list_companies().await
    }

    /// All service areas in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn service_areas(&self) -> Result<Vec<ServiceArea>, StoreError> {
        self.store.list_service_areas().await
    }

    /// All dumpster sizes in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn dumpster_sizes(&self) -> Result<Vec<DumpsterSize>, StoreError> {
        self.store.list_sizes().await
    }

    /// All prices in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn prices(&self) -> Result<Vec<Price>, StoreError> {
        self.store.list_prices().await
    }

    /// Everything known about a city, or `None` when no service area matches.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn city(
        &self,
        city: &str,
        state: Option<&str>,
    ) -> Result<Option<CityListing>, StoreError> {
        let listing = self.store.query_by_city(city, state).await?;
        Ok((!listing.is_empty()).then_some(listing))
    }

    /// Distinct cities with service.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be read.
    pub async fn cities(&self) -> Result<Vec<CityRef>, StoreError> {
        self.store.list_cities().await
    }

    /// Queue a refresh on the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] when the scheduler is stopped.
    pub fn request_refresh(&self) -> Result<TriggerOutcome, SchedulerError> {
        self.scheduler.trigger()
    }

    /// Scheduler state and the result of the last run.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }
}
