//! Domain data structures for vendors, service areas, dumpster sizes, and prices.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Built-in vendors shipped with the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendors {
    /// Budget Dumpster, nationwide.
    BudgetDumpster,
    /// Liberty Dumpsters, Colorado front range.
    LibertyDumpsters,
    /// Waste Management residential rentals.
    WasteManagement,
}

impl fmt::Display for Vendors {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            Vendors::BudgetDumpster => "budget-dumpster",
            Vendors::LibertyDumpsters => "liberty-dumpsters",
            Vendors::WasteManagement => "waste-management",
        };
        write!(formatter, "{slug}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier for a vendor known to rolloff.
pub struct VendorId(pub String);

impl From<Vendors> for VendorId {
    fn from(vendor: Vendors) -> Self {
        VendorId(vendor.to_string())
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Static metadata describing a vendor and where it lives on the web.
pub struct VendorMeta {
    /// Unique identifier.
    pub id: VendorId,
    /// Display name used for the company record.
    pub name: String,
    /// Base URL of the vendor website.
    pub website: String,
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`Company`].
    CompanyId
);
entity_id!(
    /// Identifier of a [`ServiceArea`].
    ServiceAreaId
);
entity_id!(
    /// Identifier of a [`DumpsterSize`].
    SizeId
);
entity_id!(
    /// Identifier of a [`Price`].
    PriceId
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A dumpster rental company, one per vendor per run.
pub struct Company {
    /// Unique identifier.
    pub id: CompanyId,
    /// Company name.
    pub name: String,
    /// Company website.
    pub website: String,
    /// Absolute logo URL if one was found.
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Short marketing description.
    #[serde(default)]
    pub description: Option<String>,
    /// Contact phone number.
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// City served by a vendor.
pub struct ServiceArea {
    /// Unique identifier.
    pub id: ServiceAreaId,
    /// City name.
    pub city: String,
    /// Two letter state code.
    pub state: String,
    /// ZIP code, when known.
    #[serde(default)]
    pub zip_code: Option<String>,
    /// County, when known.
    #[serde(default)]
    pub county: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Container size offered by a company.
pub struct DumpsterSize {
    /// Unique identifier.
    pub id: SizeId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Capacity in cubic yards, always positive.
    pub size_yards: u32,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Included weight in pounds.
    #[serde(default)]
    pub weight_limit_lbs: Option<u32>,
    /// Ordered project tags, e.g. "Garage cleanouts".
    #[serde(default)]
    pub suitable_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Price of one size in one service area.
pub struct Price {
    /// Unique identifier.
    pub id: PriceId,
    /// Company offering the price.
    pub company_id: CompanyId,
    /// Size the price applies to.
    pub size_id: SizeId,
    /// Area the price applies to.
    pub service_area_id: ServiceAreaId,
    /// Base rental price in USD, never negative.
    pub base_price: f64,
    /// Charge per extra rental day.
    #[serde(default)]
    pub additional_day_price: Option<f64>,
    /// Charge per ton over the weight limit.
    #[serde(default)]
    pub weight_overage_price: Option<f64>,
    /// Days included in the base price.
    #[serde(default)]
    pub rental_period_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A city/state pair with data in the snapshot.
pub struct CityRef {
    /// City name as stored.
    pub city: String,
    /// State code as stored.
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Everything known about one city: its areas plus the prices referencing them.
pub struct CityListing {
    /// Matching service areas.
    pub service_areas: Vec<ServiceArea>,
    /// Companies referenced by the matching prices.
    pub companies: Vec<Company>,
    /// Sizes referenced by the matching prices.
    pub dumpster_sizes: Vec<DumpsterSize>,
    /// Prices for the matching areas.
    pub prices: Vec<Price>,
}

impl CityListing {
    /// True when no service area matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.service_areas.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Company record as scraped, before normalization.
pub struct RawCompany {
    /// Pre-assigned id, kept if present.
    #[serde(default)]
    pub id: Option<String>,
    /// Company name; the vendor name is used when blank.
    #[serde(default)]
    pub name: String,
    /// Website; the vendor URL is used when blank.
    #[serde(default)]
    pub website: String,
    /// Logo URL.
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Description text.
    #[serde(default)]
    pub description: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Service area as scraped.
pub struct RawServiceArea {
    /// Pre-assigned id, kept if present.
    #[serde(default)]
    pub id: Option<String>,
    /// City name.
    pub city: String,
    /// State code.
    pub state: String,
    /// ZIP code.
    #[serde(default)]
    pub zip_code: Option<String>,
    /// County.
    #[serde(default)]
    pub county: Option<String>,
}

impl RawServiceArea {
    /// Area with only city and state set.
    #[must_use]
    pub fn new<C: Into<String>, S: Into<String>>(city: C, state: S) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Dumpster size as scraped. The size is signed so bad values survive until validation.
pub struct RawDumpsterSize {
    /// Pre-assigned id, kept if present.
    #[serde(default)]
    pub id: Option<String>,
    /// Capacity in cubic yards.
    pub size_yards: i64,
    /// Description text.
    #[serde(default)]
    pub description: Option<String>,
    /// Weight limit in pounds.
    #[serde(default)]
    pub weight_limit_lbs: Option<u32>,
    /// Project tags.
    #[serde(default)]
    pub suitable_for: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Price already scoped to one area and size, keyed by natural attributes.
pub struct RawPrice {
    /// Pre-assigned id, kept if present.
    #[serde(default)]
    pub id: Option<String>,
    /// City of the area the price applies to.
    pub city: String,
    /// State of the area the price applies to.
    pub state: String,
    /// Size the price applies to.
    pub size_yards: i64,
    /// Base price.
    pub base_price: f64,
    /// Extra day charge.
    #[serde(default)]
    pub additional_day_price: Option<f64>,
    /// Overage charge per ton.
    #[serde(default)]
    pub weight_overage_price: Option<f64>,
    /// Included rental days.
    #[serde(default)]
    pub rental_period_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Per-state price multipliers.
pub struct StateFactors {
    /// Multiplier for states missing from the table.
    #[serde(default = "StateFactors::neutral")]
    pub default: f64,
    /// Multiplier keyed by upper-case state code.
    #[serde(default)]
    pub factors: BTreeMap<String, f64>,
}

impl Default for StateFactors {
    fn default() -> Self {
        Self {
            default: Self::neutral(),
            factors: BTreeMap::new(),
        }
    }
}

impl StateFactors {
    fn neutral() -> f64 {
        1.0
    }

    /// Multiplier for the given state, case-insensitive.
    #[must_use]
    pub fn factor(&self, state: &str) -> f64 {
        self.factors
            .get(&state.trim().to_uppercase())
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Published base schedule from which per-area prices are derived.
pub struct PriceSchedule {
    /// Flat part of the base price.
    pub base_fee: f64,
    /// Price added per cubic yard.
    pub per_yard: f64,
    /// State multipliers applied to the base price.
    #[serde(default)]
    pub state_factors: StateFactors,
    /// Extra day charge as a fraction of the adjusted price.
    #[serde(default)]
    pub additional_day_rate: Option<f64>,
    /// Overage charge per ton.
    #[serde(default)]
    pub weight_overage_price: Option<f64>,
    /// Included rental days.
    #[serde(default)]
    pub rental_period_days: Option<u32>,
}

impl PriceSchedule {
    /// Unadjusted base price for a size.
    #[must_use]
    pub fn base_for(&self, size_yards: u32) -> f64 {
        self.base_fee + self.per_yard * f64::from(size_yards)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
/// Pricing as returned by an extractor.
pub enum RawPricing {
    /// Prices already scoped to area and size.
    Scoped(Vec<RawPrice>),
    /// A base schedule, expanded over every area and size.
    Schedule(PriceSchedule),
}

#[derive(Debug, Clone, PartialEq)]
/// Output of all four operations of one extractor session.
pub struct RawExtraction {
    /// Company record.
    pub company: RawCompany,
    /// Service areas.
    pub service_areas: Vec<RawServiceArea>,
    /// Dumpster sizes.
    pub dumpster_sizes: Vec<RawDumpsterSize>,
    /// Pricing.
    pub pricing: RawPricing,
}
