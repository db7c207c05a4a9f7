//! Turns raw extractor output into linked, validated entities.

use std::collections::{HashMap, HashSet};

use crate::model::{
    Company, CompanyId, DumpsterSize, Price, PriceId, PriceSchedule, RawCompany,
    RawDumpsterSize, RawExtraction, RawPrice, RawPricing, RawServiceArea, ServiceArea,
    ServiceAreaId, SizeId, VendorId, VendorMeta,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Why a raw record was excluded.
pub enum ValidationError {
    /// City or state is blank.
    #[error("service area is missing a city or state")]
    BlankLocation,
    /// The same city/state was listed twice.
    #[error("duplicate service area {city}, {state}")]
    DuplicateArea {
        /// City name.
        city: String,
        /// State code.
        state: String,
    },
    /// Size is zero, negative, or too large to represent.
    #[error("invalid dumpster size {0} yards")]
    InvalidSize(i64),
    /// The same size was listed twice.
    #[error("duplicate dumpster size {0} yards")]
    DuplicateSize(i64),
    /// Base price is not finite or outside the sane range.
    #[error("base price {price} outside {min}..={max}")]
    PriceOutOfRange {
        /// Rejected price.
        price: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// A scoped price names an area the vendor does not serve.
    #[error("price references unknown service area {city}, {state}")]
    UnknownArea {
        /// City name.
        city: String,
        /// State code.
        state: String,
    },
    /// A scoped price names a size the vendor does not offer.
    #[error("price references unknown dumpster size {0} yards")]
    UnknownSize(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Kind of record a validation issue refers to.
pub enum RecordKind {
    /// A service area.
    ServiceArea,
    /// A dumpster size.
    DumpsterSize,
    /// A price.
    Price,
}

#[derive(Debug, Clone, PartialEq)]
/// A rejected record.
pub struct ValidationIssue {
    /// Vendor that produced the record.
    pub vendor: VendorId,
    /// Record type.
    pub record: RecordKind,
    /// Rejection reason.
    pub reason: ValidationError,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Inclusive range of acceptable base prices.
pub struct PriceBounds {
    min: f64,
    max: f64,
}

impl PriceBounds {
    /// Bounds clamped so that `0 <= min <= max`.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        let min = min.max(0.0);
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Whether `price` is finite and inside the bounds.
    #[must_use]
    pub fn contains(&self, price: f64) -> bool {
        price.is_finite() && (self.min..=self.max).contains(&price)
    }
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self::new(50.0, 1000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Normalized entities produced by one vendor.
pub struct Contribution {
    /// The vendor's company.
    pub company: Company,
    /// Valid, distinct service areas.
    pub service_areas: Vec<ServiceArea>,
    /// Valid, distinct sizes owned by `company`.
    pub dumpster_sizes: Vec<DumpsterSize>,
    /// Prices referencing only the entities above.
    pub prices: Vec<Price>,
    /// Records excluded during normalization.
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Default)]
/// Converts raw extractor output into a [`Contribution`].
pub struct Normalizer {
    bounds: PriceBounds,
}

impl Normalizer {
    /// Normalizer rejecting base prices outside `bounds`.
    #[must_use]
    pub fn new(bounds: PriceBounds) -> Self {
        Self { bounds }
    }

    /// Normalize one vendor's raw records.
    #[must_use]
    pub fn normalize(&self, vendor: &VendorMeta, raw: RawExtraction) -> Contribution {
        let mut batch = Batch {
            vendor: vendor.id.clone(),
            issues: Vec::new(),
        };

        let company = company(vendor, raw.company);
        let service_areas = batch.service_areas(raw.service_areas);
        let dumpster_sizes = batch.dumpster_sizes(&company.id, raw.dumpster_sizes);

        let prices = match raw.pricing {
            RawPricing::Scoped(prices) => {
                batch.scoped_prices(&company.id, &service_areas, &dumpster_sizes, prices, self.bounds)
            }
            RawPricing::Schedule(schedule) => batch.schedule_prices(
                &company.id,
                &service_areas,
                &dumpster_sizes,
                &schedule,
                self.bounds,
            ),
        };

        tracing::debug!(
            vendor = %vendor.id,
            areas = service_areas.len(),
            sizes = dumpster_sizes.len(),
            prices = prices.len(),
            rejected = batch.issues.len(),
            "normalized vendor output"
        );

        Contribution {
            company,
            service_areas,
            dumpster_sizes,
            prices,
            issues: batch.issues,
        }
    }
}

/// Round to whole cents.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn company(vendor: &VendorMeta, raw: RawCompany) -> Company {
    Company {
        id: raw.id.map_or_else(CompanyId::generate, CompanyId),
        name: non_blank(raw.name).unwrap_or_else(|| vendor.name.clone()),
        website: non_blank(raw.website).unwrap_or_else(|| vendor.website.clone()),
        logo_url: raw.logo_url.and_then(non_blank),
        description: raw.description.and_then(non_blank),
        phone: raw.phone.and_then(non_blank),
    }
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == text.len() {
        Some(text)
    } else {
        Some(trimmed.to_owned())
    }
}

fn location_key(city: &str, state: &str) -> (String, String) {
    (city.trim().to_lowercase(), state.trim().to_lowercase())
}

struct Batch {
    vendor: VendorId,
    issues: Vec<ValidationIssue>,
}

impl Batch {
    fn reject(&mut self, record: RecordKind, reason: ValidationError) {
        tracing::warn!(vendor = %self.vendor, ?record, %reason, "rejected scraped record");
        self.issues.push(ValidationIssue {
            vendor: self.vendor.clone(),
            record,
            reason,
        });
    }

    fn service_areas(&mut self, raw: Vec<RawServiceArea>) -> Vec<ServiceArea> {
        let mut seen = HashSet::new();
        let mut areas = Vec::with_capacity(raw.len());

        for area in raw {
            let (Some(city), Some(state)) = (non_blank(area.city), non_blank(area.state)) else {
                self.reject(RecordKind::ServiceArea, ValidationError::BlankLocation);
                continue;
            };
            if !seen.insert(location_key(&city, &state)) {
                self.reject(
                    RecordKind::ServiceArea,
                    ValidationError::DuplicateArea { city, state },
                );
                continue;
            }
            areas.push(ServiceArea {
                id: area.id.map_or_else(ServiceAreaId::generate, ServiceAreaId),
                city,
                state,
                zip_code: area.zip_code.and_then(non_blank),
                county: area.county.and_then(non_blank),
            });
        }

        areas
    }

    fn dumpster_sizes(
        &mut self,
        company_id: &CompanyId,
        raw: Vec<RawDumpsterSize>,
    ) -> Vec<DumpsterSize> {
        let mut seen = HashSet::new();
        let mut sizes = Vec::with_capacity(raw.len());

        for size in raw {
            let Some(yards) = u32::try_from(size.size_yards).ok().filter(|yards| *yards > 0) else {
                self.reject(
                    RecordKind::DumpsterSize,
                    ValidationError::InvalidSize(size.size_yards),
                );
                continue;
            };
            if !seen.insert(yards) {
                self.reject(
                    RecordKind::DumpsterSize,
                    ValidationError::DuplicateSize(size.size_yards),
                );
                continue;
            }
            sizes.push(DumpsterSize {
                id: size.id.map_or_else(SizeId::generate, SizeId),
                company_id: company_id.clone(),
                size_yards: yards,
                description: size.description.and_then(non_blank),
                weight_limit_lbs: size.weight_limit_lbs,
                suitable_for: size.suitable_for,
            });
        }

        sizes
    }

    fn checked_price(&mut self, price: f64, bounds: PriceBounds) -> Option<f64> {
        if bounds.contains(price) {
            return Some(price);
        }
        self.reject(
            RecordKind::Price,
            ValidationError::PriceOutOfRange {
                price,
                min: bounds.min,
                max: bounds.max,
            },
        );
        None
    }

    fn scoped_prices(
        &mut self,
        company_id: &CompanyId,
        areas: &[ServiceArea],
        sizes: &[DumpsterSize],
        raw: Vec<RawPrice>,
        bounds: PriceBounds,
    ) -> Vec<Price> {
        let area_index: HashMap<_, _> = areas
            .iter()
            .map(|area| (location_key(&area.city, &area.state), &area.id))
            .collect();
        let size_index: HashMap<_, _> = sizes
            .iter()
            .map(|size| (i64::from(size.size_yards), &size.id))
            .collect();

        let mut prices = Vec::with_capacity(raw.len());
        for price in raw {
            let Some(area_id) = area_index.get(&location_key(&price.city, &price.state)) else {
                self.reject(
                    RecordKind::Price,
                    ValidationError::UnknownArea {
                        city: price.city,
                        state: price.state,
                    },
                );
                continue;
            };
            let Some(size_id) = size_index.get(&price.size_yards) else {
                self.reject(RecordKind::Price, ValidationError::UnknownSize(price.size_yards));
                continue;
            };
            let Some(base_price) = self.checked_price(price.base_price, bounds) else {
                continue;
            };

            prices.push(Price {
                id: price.id.map_or_else(PriceId::generate, PriceId),
                company_id: company_id.clone(),
                size_id: (*size_id).clone(),
                service_area_id: (*area_id).clone(),
                base_price: round_cents(base_price),
                additional_day_price: price.additional_day_price.map(round_cents),
                weight_overage_price: price.weight_overage_price,
                rental_period_days: price.rental_period_days,
            });
        }

        prices
    }

    fn schedule_prices(
        &mut self,
        company_id: &CompanyId,
        areas: &[ServiceArea],
        sizes: &[DumpsterSize],
        schedule: &PriceSchedule,
        bounds: PriceBounds,
    ) -> Vec<Price> {
        let mut prices = Vec::with_capacity(areas.len() * sizes.len());

        for area in areas {
            let factor = schedule.state_factors.factor(&area.state);
            for size in sizes {
                let adjusted = round_cents(schedule.base_for(size.size_yards) * factor);
                let Some(base_price) = self.checked_price(adjusted, bounds) else {
                    continue;
                };

                prices.push(Price {
                    id: PriceId::generate(),
                    company_id: company_id.clone(),
                    size_id: size.id.clone(),
                    service_area_id: area.id.clone(),
                    base_price,
                    additional_day_price: schedule
                        .additional_day_rate
                        .map(|rate| round_cents(base_price * rate)),
                    weight_overage_price: schedule.weight_overage_price,
                    rental_period_days: schedule.rental_period_days,
                });
            }
        }

        prices
    }
}
