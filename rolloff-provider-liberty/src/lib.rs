//! Provider implementation for Liberty Dumpsters, a Colorado hauler.

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

const BASE_URL: &str = "https://www.libertydumpsters.com";
const DEFAULTS: &str = include_str!("../defaults.json");

static ABOUT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)about|company").expect("about pattern is valid"));
static LOCATION_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)locations|cities|areas").expect("location pattern is valid")
});

/// Extractor for Liberty Dumpsters.
pub struct LibertyExtractor {
    meta: VendorMeta,
    settings: ProviderSettings,
    defaults: Arc<VendorDefaults>,
}

impl LibertyExtractor {
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
impl Extractor for LibertyExtractor {
    fn vendor(&self) -> &VendorMeta {
        &self.meta
    }

    async fn open(&self) -> Result<Box<dyn ExtractorSession>, ExtractError> {
        Ok(Box::new(LibertySession {
            fetcher: PageFetcher::new(&self.settings)?,
            meta: self.meta.clone(),
            defaults: Arc::clone(&self.defaults),
        }))
    }
}

struct LibertySession {
    fetcher: PageFetcher,
    meta: VendorMeta,
    defaults: Arc<VendorDefaults>,
}

#[async_trait]
impl ExtractorSession for LibertySession {
    async fn company_info(&self) -> Result<RawCompany, ExtractError> {
        Ok(match self.fetcher.fetch_lenient(BASE_URL).await {
            Some(body) => parse_company(&body, &self.meta, &self.defaults),
            None => self.defaults.fallback_company(&self.meta),
        })
    }

    async fn service_areas(&self) -> Result<Vec<RawServiceArea>, ExtractError> {
        let scraped = match self
            .fetcher
            .fetch_lenient(&format!("{BASE_URL}/service-areas"))
            .await
        {
            Some(body) => parse_areas(&body, self.defaults.area_limit),
            None => Vec::new(),
        };

        Ok(if scraped.is_empty() {
            self.defaults.fallback_areas()
        } else {
            scraped
        })
    }

    async fn dumpster_sizes(&self) -> Result<Vec<RawDumpsterSize>, ExtractError> {
        let scraped = match self
            .fetcher
            .fetch_lenient(&format!("{BASE_URL}/dumpster-sizes"))
            .await
        {
            Some(body) => parse_sizes(&body, &self.defaults),
            None => Vec::new(),
        };

        Ok(if scraped.is_empty() {
            self.defaults.fallback_sizes()
        } else {
            scraped
        })
    }

    async fn prices(&self) -> Result<RawPricing, ExtractError> {
        Ok(RawPricing::Schedule(self.defaults.pricing.clone()))
    }

    async fn close(&self) {
        tracing::debug!(vendor = %self.meta.id, "session closed");
    }
}

/// Build the plugin bundle for the Liberty Dumpsters provider.
///
/// # Errors
///
/// Returns a [`DefaultsError`] if the vendor defaults cannot be loaded.
pub fn plugin(settings: &ProviderSettings) -> Result<VendorPlugin, DefaultsError> {
    let extractor = LibertyExtractor::new(settings)?;
    Ok(VendorPlugin {
        meta: extractor.meta.clone(),
        extractor: Arc::new(extractor),
    })
}

fn vendor_meta() -> VendorMeta {
    VendorMeta {
        id: Vendors::LibertyDumpsters.into(),
        name: String::from("Liberty Dumpsters"),
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
        .map(|mention| defaults.scraped_size(mention.size_yards, mention.next_paragraph))
        .collect()
}
