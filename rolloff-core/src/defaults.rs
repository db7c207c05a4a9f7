//! Vendor fallback tables: the records an extractor returns when scraping fails.
//!
//! Each provider crate embeds a JSON table and may have it replaced by a file named
//! `<vendor-id>.json` in an overrides directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{
    PriceSchedule, RawCompany, RawDumpsterSize, RawServiceArea, VendorId, VendorMeta,
};

#[derive(thiserror::Error, Debug)]
/// Errors raised while loading a vendor table.
pub enum DefaultsError {
    /// The override file exists but could not be read.
    #[error("failed to read vendor defaults {path}: {source}")]
    Io {
        /// Override file path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The table is not valid JSON for [`VendorDefaults`].
    #[error("invalid vendor defaults for {vendor}: {source}")]
    Parse {
        /// Vendor the table belongs to.
        vendor: VendorId,
        /// Underlying error.
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Company fields used when the home page yields nothing.
pub struct CompanyDefaults {
    /// Description text.
    pub description: String,
    /// Phone number.
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A default service area.
pub struct AreaDefault {
    /// City name.
    pub city: String,
    /// State code.
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A default container size.
pub struct SizeDefault {
    /// Capacity in cubic yards.
    pub size_yards: u32,
    /// Description text.
    pub description: String,
    /// Weight limit in pounds.
    pub weight_limit_lbs: u32,
    /// Project tags.
    pub suitable_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Tags given to scraped sizes up to `max_yards`; a tier without a bound catches the rest.
pub struct SizeTier {
    /// Largest size in the tier, inclusive.
    #[serde(default)]
    pub max_yards: Option<u32>,
    /// Tags applied to sizes in the tier.
    pub suitable_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Complete per-vendor configuration table.
pub struct VendorDefaults {
    /// Company fallback fields.
    pub company: CompanyDefaults,
    /// Areas returned when the locations page yields none.
    pub service_areas: Vec<AreaDefault>,
    /// Maximum number of location links considered on the locations page.
    pub area_limit: usize,
    /// Sizes returned when the sizes page yields none.
    pub dumpster_sizes: Vec<SizeDefault>,
    /// Tag tiers for scraped sizes, smallest first.
    pub size_tiers: Vec<SizeTier>,
    /// Estimated weight allowance per cubic yard for scraped sizes.
    pub weight_per_yard_lbs: u32,
    /// Base price schedule.
    pub pricing: PriceSchedule,
}

impl VendorDefaults {
    /// Parse a table from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`DefaultsError::Parse`] when the text is not a valid table.
    pub fn from_json(vendor: &VendorId, text: &str) -> Result<Self, DefaultsError> {
        serde_json::from_str(text).map_err(|source| DefaultsError::Parse {
            vendor: vendor.clone(),
            source,
        })
    }

    /// Load the override for `vendor` from `dir` if one exists, else parse `embedded`.
    ///
    /// # Errors
    ///
    /// Returns a [`DefaultsError`] when the chosen table cannot be read or parsed.
    pub fn resolve(
        vendor: &VendorId,
        embedded: &str,
        dir: Option<&Path>,
    ) -> Result<Self, DefaultsError> {
        let Some(path) = dir
            .map(|dir| dir.join(format!("{vendor}.json")))
            .filter(|path| path.is_file())
        else {
            return Self::from_json(vendor, embedded);
        };

        let text = fs::read_to_string(&path).map_err(|source| DefaultsError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(vendor = %vendor, path = %path.display(), "using vendor defaults override");
        Self::from_json(vendor, &text)
    }

    /// Company record built only from vendor metadata and this table.
    #[must_use]
    pub fn fallback_company(&self, meta: &VendorMeta) -> RawCompany {
        RawCompany {
            id: None,
            name: meta.name.clone(),
            website: meta.website.clone(),
            logo_url: None,
            description: Some(self.company.description.clone()),
            phone: Some(self.company.phone.clone()),
        }
    }

    /// Company record from scraped fields, falling back to this table where a field is missing.
    #[must_use]
    pub fn scraped_company(
        &self,
        meta: &VendorMeta,
        description: Option<String>,
        phone: Option<String>,
        logo_url: Option<String>,
    ) -> RawCompany {
        RawCompany {
            logo_url,
            description: description.or_else(|| Some(self.company.description.clone())),
            phone: phone.or_else(|| Some(self.company.phone.clone())),
            ..self.fallback_company(meta)
        }
    }

    /// Size record for a scraped `N yard` mention, tagged and weighted from this table.
    #[must_use]
    pub fn scraped_size(&self, size_yards: i64, description: Option<String>) -> RawDumpsterSize {
        let yards = u32::try_from(size_yards).unwrap_or(0);
        RawDumpsterSize {
            id: None,
            size_yards,
            description: Some(description.unwrap_or_else(|| {
                format!("{size_yards} yard dumpster for various waste disposal needs")
            })),
            weight_limit_lbs: Some(self.weight_limit_for(yards)),
            suitable_for: self.tags_for(yards),
        }
    }

    /// Default service areas.
    #[must_use]
    pub fn fallback_areas(&self) -> Vec<RawServiceArea> {
        self.service_areas
            .iter()
            .map(|area| RawServiceArea::new(area.city.clone(), area.state.clone()))
            .collect()
    }

    /// Default sizes.
    #[must_use]
    pub fn fallback_sizes(&self) -> Vec<RawDumpsterSize> {
        self.dumpster_sizes
            .iter()
            .map(|size| RawDumpsterSize {
                id: None,
                size_yards: i64::from(size.size_yards),
                description: Some(size.description.clone()),
                weight_limit_lbs: Some(size.weight_limit_lbs),
                suitable_for: size.suitable_for.clone(),
            })
            .collect()
    }

    /// Tags of the first tier containing `size_yards`.
    #[must_use]
    pub fn tags_for(&self, size_yards: u32) -> Vec<String> {
        self.size_tiers
            .iter()
            .find(|tier| tier.max_yards.is_none_or(|max| size_yards <= max))
            .map(|tier| tier.suitable_for.clone())
            .unwrap_or_default()
    }

    /// Estimated weight limit for a scraped size.
    #[must_use]
    pub fn weight_limit_for(&self, size_yards: u32) -> u32 {
        size_yards.saturating_mul(self.weight_per_yard_lbs)
    }
}
