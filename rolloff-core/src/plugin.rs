//! Registry for all vendor plugins and their extractors.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{VendorId, VendorMeta};
use crate::ports::Extractor;

/// Extractor implementing a provider for a single vendor.
pub struct VendorPlugin {
    /// Static metadata describing the vendor.
    pub meta: VendorMeta,
    /// Implementation for scraping the vendor website.
    pub extractor: Arc<dyn Extractor>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// Errors raised while assembling a registry.
pub enum RegistryError {
    /// Two plugins claim the same vendor id.
    #[error("Vendor {0} registered twice")]
    DuplicateVendor(VendorId),
}

/// Ordered set of plugins; registration order is the sequential run order.
pub struct VendorRegistry {
    plugins: Vec<VendorPlugin>,
}

impl VendorRegistry {
    /// Build a registry from the provided plugin list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateVendor`] when a vendor id appears twice.
    pub fn new(plugins: Vec<VendorPlugin>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(&plugin.meta.id) {
                return Err(RegistryError::DuplicateVendor(plugin.meta.id.clone()));
            }
        }
        Ok(Self { plugins })
    }

    /// Return metadata for all registered vendors.
    #[must_use]
    pub fn vendors(&self) -> Vec<VendorMeta> {
        self.plugins
            .iter()
            .map(|plugin| plugin.meta.clone())
            .collect()
    }

    /// Extractors in registration order.
    #[must_use]
    pub fn extractors(&self) -> Vec<Arc<dyn Extractor>> {
        self.plugins
            .iter()
            .map(|plugin| Arc::clone(&plugin.extractor))
            .collect()
    }

    /// Number of registered vendors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True when no vendor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
