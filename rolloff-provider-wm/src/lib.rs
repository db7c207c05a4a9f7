//! Provider implementation for Waste Management residential dumpster rentals.
//!
//! WM publishes sizes as short cards, so a size's description is the text of the
//! card heading itself rather than a following paragraph.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use url::Url;

use rolloff_core::{
    defaults::{DefaultsError, VendorDefaults},
    extract::{self, PageFetcher},
    model::{RawCompany, RawDumpsterSize, RawPricing, RawServiceArea, VendorMeta, Vendors},
    plugin::VendorPlugin,
    ports::{ExtractError, Extractor, ExtractorSession, ProviderSettings},
};

const BASE_URL: &str = "https://www.wm.com";
const HOME_PAGE: &str = "/us/en/home.html";
const LOCATIONS_PAGE: &str = "/us/en/residential/locations.html";
const SIZES_PAGE: &str = "/us/en/residential/dumpsters.html";
const DEFAULTS: &str = include_str!("../defaults.json");

static ABOUT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)about").expect("about pattern is valid"));
static LOCATION_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("location").expect("location pattern is valid"));

/// Extractor for Waste Management.
pub struct WmExtractor {
    meta: VendorMeta,
    settings: ProviderSettings,
    defaults: Arc<VendorDefaults>,
}

impl WmExtractor {
    /// Create the extractor, loading its defaults table.
    ///
    /// # Errors
    ///
    /// Returns a [`DefaultsError`] if the override table cannot be read or parsed.
    pub fn new(settings: &ProviderSettings) -> Result<Self, DefaultsError> {
        let meta = vendor_meta();
        let defaults =
            VendorDefaults::resolve(&meta.id, DEFAULTS, settings.defaults_dir.as_deref())?;
        Ok(Self {
            meta,
            settings: settings.clone(),
            defaults: Arc::new(defaults),
        })
    }
}

#[async_trait]
impl Extractor for WmExtractor {
    fn vendor(&self) -> &VendorMeta {
        &self.meta
    }

    async fn open(&self) -> Result<Box<dyn ExtractorSession>, ExtractError> {
        Ok(Box::new(WmSession {
            fetcher: PageFetcher::new(&self.settings)?,
            meta: self.meta.clone(),
            defaults: Arc::clone(&self.defaults),
        }))
    }
}

struct WmSession {
    fetcher: PageFetcher,
    meta: VendorMeta,
    defaults: Arc<VendorDefaults>,
}

impl WmSession {
    async fn page(&self, path: &str) -> Option<String> {
        self.fetcher.fetch_lenient(&format!("{BASE_URL}{path}")).await
    }
}

#[async_trait]
impl ExtractorSession for WmSession {
    async fn company_info(&self) -> Result<RawCompany, ExtractError> {
        let Some(body) = self.page(HOME_PAGE).await else {
            return Ok(self.defaults.fallback_company(&self.meta));
        };
        Ok(parse_company(&body, &self.meta, &self.defaults))
    }

    async fn service_areas(&self) -> Result<Vec<RawServiceArea>, ExtractError> {
        let areas = self
            .page(LOCATIONS_PAGE)
            .await
            .map(|body| parse_areas(&body, self.defaults.area_limit))
            .unwrap_or_default();

        if areas.is_empty() {
            tracing::debug!(vendor = %self.meta.id, "no locations found, using defaults");
            return Ok(self.defaults.fallback_areas());
        }
        Ok(areas)
    }

    async fn dumpster_sizes(&self) -> Result<Vec<RawDumpsterSize>, ExtractError> {
        let sizes = self
            .page(SIZES_PAGE)
            .await
            .map(|body| parse_sizes(&body, &self.defaults))
            .unwrap_or_default();

        if sizes.is_empty() {
            tracing::debug!(vendor = %self.meta.id, "no sizes found, using defaults");
            return Ok(self.defaults.fallback_sizes());
        }
        Ok(sizes)
    }

    async fn prices(&self) -> Result<RawPricing, ExtractError> {
        Ok(RawPricing::Schedule(self.defaults.pricing.clone()))
    }

    async fn close(&self) {
        tracing::debug!(vendor = %self.meta.id, "session closed");
    }
}

/// Build the plugin bundle for the Waste Management provider.
///
/// # Errors
///
/// Returns a [`DefaultsError`] if the vendor defaults cannot be loaded.
pub fn plugin(settings: &ProviderSettings) -> Result<VendorPlugin, DefaultsError> {
    let extractor = WmExtractor::new(settings)?;
    Ok(VendorPlugin {
        meta: extractor.meta.clone(),
        extractor: Arc::new(extractor),
    })
}

fn vendor_meta() -> VendorMeta {
    VendorMeta {
        id: Vendors::WasteManagement.into(),
        name: String::from("Waste Management"),
        website: String::from(BASE_URL),
    }
}

fn parse_company(body: &str, meta: &VendorMeta, defaults: &VendorDefaults) -> RawCompany {
    let doc = Html::parse_document(body);
    let logo = Url::parse(&meta.website)
        .ok()
        .and_then(|base| extract::find_logo(&doc, &base));

    defaults.scraped_company(
        meta,
        extract::find_description(&doc, &ABOUT_CLASS),
        extract::find_phone(&doc),
        logo,
    )
}

fn parse_areas(body: &str, limit: usize) -> Vec<RawServiceArea> {
    let doc = Html::parse_document(body);
    extract::location_texts(&doc, &LOCATION_HREF, limit)
        .iter()
        .filter_map(|text| extract::split_city_state(text))
        .map(|(city, state)| RawServiceArea::new(city, state))
        .collect()
}

fn parse_sizes(body: &str, defaults: &VendorDefaults) -> Vec<RawDumpsterSize> {
    let doc = Html::parse_document(body);
    extract::yard_mentions(&doc)
        .into_iter()
        .map(|mention| defaults.scraped_size(mention.size_yards, mention.parent_text))
        .collect()
}
