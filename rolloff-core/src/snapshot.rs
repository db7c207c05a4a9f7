//! The snapshot aggregate, its integrity rules, and the join queries served from it.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CityListing, CityRef, Company, DumpsterSize, Price, ServiceArea};
use crate::normalize::Contribution;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// All entities produced by one pipeline run.
pub struct Snapshot {
    /// Companies, one per successful vendor.
    #[serde(default)]
    pub companies: Vec<Company>,
    /// Service areas of every company.
    #[serde(default)]
    pub service_areas: Vec<ServiceArea>,
    /// Dumpster sizes of every company.
    #[serde(default)]
    pub dumpster_sizes: Vec<DumpsterSize>,
    /// Prices linking company, size, and area.
    #[serde(default)]
    pub prices: Vec<Price>,
    /// Set by the store when the snapshot is saved.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// First broken invariant found in a snapshot.
pub enum IntegrityError {
    /// Two entities of one type share an id.
    #[error("duplicate {entity} id {id}")]
    DuplicateId {
        /// Entity type name.
        entity: &'static str,
        /// The repeated id.
        id: String,
    },
    /// A foreign key does not resolve inside the snapshot.
    #[error("{entity} {id} references missing {target} {target_id}")]
    DanglingReference {
        /// Referencing entity type.
        entity: &'static str,
        /// Referencing entity id.
        id: String,
        /// Referenced entity type.
        target: &'static str,
        /// Unresolved id.
        target_id: String,
    },
    /// A size of zero yards.
    #[error("dumpster size {id} has no capacity")]
    EmptySize {
        /// Offending size id.
        id: String,
    },
    /// A negative or non-finite base price.
    #[error("price {id} has invalid base price {value}")]
    InvalidPrice {
        /// Offending price id.
        id: String,
        /// The rejected value.
        value: f64,
    },
}

impl Snapshot {
    /// True when all four collections are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
            && self.service_areas.is_empty()
            && self.dumpster_sizes.is_empty()
            && self.prices.is_empty()
    }

    /// Append one vendor's normalized entities.
    pub fn absorb(&mut self, contribution: Contribution) {
        self.companies.push(contribution.company);
        self.service_areas.extend(contribution.service_areas);
        self.dumpster_sizes.extend(contribution.dumpster_sizes);
        self.prices.extend(contribution.prices);
    }

    /// Verify id uniqueness, foreign keys, and value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`IntegrityError`] encountered.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let companies = unique_ids("company", self.companies.iter().map(|company| &company.id))?;
        let areas = unique_ids("service area", self.service_areas.iter().map(|area| &area.id))?;
        let sizes = unique_ids("dumpster size", self.dumpster_sizes.iter().map(|size| &size.id))?;
        unique_ids("price", self.prices.iter().map(|price| &price.id))?;

        for size in &self.dumpster_sizes {
            if size.size_yards == 0 {
                return Err(IntegrityError::EmptySize {
                    id: size.id.to_string(),
                });
            }
            if !companies.contains(&size.company_id) {
                return Err(dangling("dumpster size", &size.id, "company", &size.company_id));
            }
        }

        for price in &self.prices {
            if !price.base_price.is_finite() || price.base_price < 0.0 {
                return Err(IntegrityError::InvalidPrice {
                    id: price.id.to_string(),
                    value: price.base_price,
                });
            }
            if !companies.contains(&price.company_id) {
                return Err(dangling("price", &price.id, "company", &price.company_id));
            }
            if !sizes.contains(&price.size_id) {
                return Err(dangling("price", &price.id, "dumpster size", &price.size_id));
            }
            if !areas.contains(&price.service_area_id) {
                return Err(dangling(
                    "price",
                    &price.id,
                    "service area",
                    &price.service_area_id,
                ));
            }
        }

        Ok(())
    }

    /// Areas matching the city (and state, if given) plus everything their prices reference.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    #[must_use]
    pub fn city_listing(&self, city: &str, state: Option<&str>) -> CityListing {
        let city = fold(city);
        let state = state.map(fold).filter(|code| !code.is_empty());

        let service_areas: Vec<ServiceArea> = self
            .service_areas
            .iter()
            .filter(|area| fold(&area.city) == city)
            .filter(|area| state.as_ref().is_none_or(|code| fold(&area.state) == *code))
            .cloned()
            .collect();

        if service_areas.is_empty() {
            return CityListing::default();
        }

        let area_ids: HashSet<_> = service_areas.iter().map(|area| &area.id).collect();
        let prices: Vec<Price> = self
            .prices
            .iter()
            .filter(|price| area_ids.contains(&price.service_area_id))
            .cloned()
            .collect();

        let company_ids: HashSet<_> = prices.iter().map(|price| &price.company_id).collect();
        let size_ids: HashSet<_> = prices.iter().map(|price| &price.size_id).collect();

        CityListing {
            companies: self
                .companies
                .iter()
                .filter(|company| company_ids.contains(&company.id))
                .cloned()
                .collect(),
            dumpster_sizes: self
                .dumpster_sizes
                .iter()
                .filter(|size| size_ids.contains(&size.id))
                .cloned()
                .collect(),
            service_areas,
            prices,
        }
    }

    /// Distinct city/state pairs in first-seen order.
    #[must_use]
    pub fn cities(&self) -> Vec<CityRef> {
        let mut seen = HashSet::new();
        self.service_areas
            .iter()
            .map(|area| CityRef {
                city: area.city.clone(),
                state: area.state.clone(),
            })
            .filter(|city| seen.insert(city.clone()))
            .collect()
    }
}

/// Trimmed, Unicode-lowercased form used for city and state matching.
fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

fn unique_ids<'a, T, I>(entity: &'static str, ids: I) -> Result<HashSet<&'a T>, IntegrityError>
where
    T: Eq + Hash + ToString + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(IntegrityError::DuplicateId {
                entity,
                id: id.to_string(),
            });
        }
    }
    Ok(seen)
}

fn dangling<A: ToString, B: ToString>(
    entity: &'static str,
    id: &A,
    target: &'static str,
    target_id: &B,
) -> IntegrityError {
    IntegrityError::DanglingReference {
        entity,
        id: id.to_string(),
        target,
        target_id: target_id.to_string(),
    }
}
