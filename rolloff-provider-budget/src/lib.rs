//! Provider implementation for Budget Dumpster, scraping budgetdumpster.com.

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

const BASE_URL: &str = "https://www.budgetdumpster.com";
const DEFAULTS: &str = include_str!("../defaults.json");

static ABOUT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)about|company").expect("about pattern is valid"));
// Location pages live under /dumpster-rental/<state>/<city>.
static LOCATION_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("/.*dumpster-rental|dumpster-rental.*/").expect("location pattern is valid")
});
static LINK_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)dumpster rental").expect("suffix pattern is valid"));

/// Extractor for Budget Dumpster.
pub struct BudgetExtractor {
    meta: VendorMeta,
    settings: ProviderSettings,
    defaults: Arc<VendorDefaults>,
}

impl BudgetExtractor {
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
impl Extractor for BudgetExtractor {
    fn vendor(&self) -> &VendorMeta {
        &self.meta
    }

    async fn open(&self) -> Result<Box<dyn ExtractorSession>, ExtractError> {
        Ok(Box::new(BudgetSession {
            fetcher: PageFetcher::new(&self.settings)?,
            meta: self.meta.clone(),
            defaults: Arc::clone(&self.defaults),
        }))
    }
}

struct BudgetSession {
    fetcher: PageFetcher,
    meta: VendorMeta,
    defaults: Arc<VendorDefaults>,
}

#[async_trait]
impl ExtractorSession for BudgetSession {
    async fn company_info(&self) -> Result<RawCompany, ExtractError> {
        let company = match self.fetcher.fetch_lenient(BASE_URL).await {
            Some(body) => parse_company(&body, &self.meta, &self.defaults),
            None => self.defaults.fallback_company(&self.meta),
        };
        Ok(company)
    }

    async fn service_areas(&self) -> Result<Vec<RawServiceArea>, ExtractError> {
        let areas = self
            .fetcher
            .fetch_lenient(&format!("{BASE_URL}/dumpster-rental"))
            .await
            .map(|body| parse_areas(&body, self.defaults.area_limit))
            .unwrap_or_default();

        if areas.is_empty() {
            return Ok(self.defaults.fallback_areas());
        }
        Ok(areas)
    }

    async fn dumpster_sizes(&self) -> Result<Vec<RawDumpsterSize>, ExtractError> {
        let sizes = self
            .fetcher
            .fetch_lenient(&format!("{BASE_URL}/resources/dumpster-sizes"))
            .await
            .map(|body| parse_sizes(&body, &self.defaults))
            .unwrap_or_default();

        if sizes.is_empty() {
            return Ok(self.defaults.fallback_sizes());
        }
        Ok(sizes)
    }

    async fn prices(&self) -> Result<RawPricing, ExtractError> {
        // Prices are quoted per ZIP code only; publish the base schedule instead.
        Ok(RawPricing::Schedule(self.defaults.pricing.clone()))
    }

    async fn close(&self) {
        tracing::debug!(vendor = %self.meta.id, "session closed");
    }
}

/// Build the plugin bundle for the Budget Dumpster provider.
///
/// # Errors
///
/// Returns a [`DefaultsError`] if the vendor defaults cannot be loaded.
pub fn plugin(settings: &ProviderSettings) -> Result<VendorPlugin, DefaultsError> {
    let extractor = BudgetExtractor::new(settings)?;
    Ok(VendorPlugin {
        meta: extractor.meta.clone(),
        extractor: Arc::new(extractor),
    })
}

fn vendor_meta() -> VendorMeta {
    VendorMeta {
        id: Vendors::BudgetDumpster.into(),
        name: String::from("Budget Dumpster"),
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
        .into_iter()
        .filter_map(|text| {
            let text = LINK_SUFFIX.replace_all(&text.to_lowercase(), "").into_owned();
            let (city, state) = extract::split_city_state(&text)?;
            Some(RawServiceArea::new(title_case(&city), state.to_uppercase()))
        })
        .collect()
}

fn parse_sizes(body: &str, defaults: &VendorDefaults) -> Vec<RawDumpsterSize> {
    let doc = Html::parse_document(body);
    extract::yard_mentions(&doc)
        .into_iter()
        .map(|mention| defaults.scraped_size(mention.size_yards, mention.next_paragraph))
        .collect()
}

/// Upper-case the first letter of every word, lower-case the rest.
fn title_case(text: &str) -> String {
    let mut previous_is_letter = false;
    text.chars()
        .map(|character| {
            let cased: String = if previous_is_letter {
                character.to_lowercase().collect()
            } else {
                character.to_uppercase().collect()
            };
            previous_is_letter = character.is_alphabetic();
            cased
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> VendorDefaults {
        VendorDefaults::from_json(&vendor_meta().id, DEFAULTS).expect("embedded table parses")
    }

    #[test]
    fn embedded_table_matches_published_schedule() {
        let table = defaults();
        assert_eq!(table.service_areas.len(), 20);
        assert_eq!(table.dumpster_sizes.len(), 5);
        assert!((table.pricing.base_for(10) - 300.0).abs() < f64::EPSILON);
        assert!((table.pricing.state_factors.factor("ca") - 1.25).abs() < f64::EPSILON);
        assert!((table.pricing.state_factors.factor("OH") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn location_links_are_cleaned_up() {
        let body = r#"
            <ul>
              <li><a href="/dumpster-rental/mo/st-louis/">ST. LOUIS, mo Dumpster Rental</a></li>
              <li><a href="/dumpster-rental/">All locations</a></li>
              <li><a href="/about/">About, Us</a></li>
              <li><a href="/dumpster-rental/tx/san-antonio/">san antonio, tx</a></li>
            </ul>"#;

        let areas = parse_areas(body, 30);
        let pairs: Vec<(&str, &str)> = areas
            .iter()
            .map(|area| (area.city.as_str(), area.state.as_str()))
            .collect();
        assert_eq!(pairs, vec![("St. Louis", "MO"), ("San Antonio", "TX")]);
    }

    #[test]
    fn area_limit_counts_links() {
        let body = r#"
            <a href="/dumpster-rental/ga/atlanta/">Atlanta, GA</a>
            <a href="/dumpster-rental/oh/cleveland/">Cleveland, OH</a>"#;
        assert_eq!(parse_areas(body, 1).len(), 1);
    }

    #[test]
    fn sizes_take_the_following_paragraph() {
        let body = "
            <h3>15 Yard Dumpster</h3>
            <p>Holds about 4.5 pickup truck loads.</p>";
        let sizes = parse_sizes(body, &defaults());
        let size = sizes.first().expect("one size");

        assert_eq!(size.size_yards, 15);
        assert_eq!(size.description.as_deref(), Some("Holds about 4.5 pickup truck loads."));
        assert_eq!(size.weight_limit_lbs, Some(3750));
        assert_eq!(size.suitable_for.first().map(String::as_str), Some("Home renovations"));
    }

    #[test]
    fn company_falls_back_to_table_fields() {
        let company = parse_company("<html><body></body></html>", &vendor_meta(), &defaults());
        assert_eq!(company.name, "Budget Dumpster");
        assert_eq!(company.phone.as_deref(), Some("1-866-284-6164"));
        assert_eq!(company.logo_url, None);
    }

    #[test]
    fn title_case_handles_punctuation() {
        assert_eq!(title_case("st. louis"), "St. Louis");
        assert_eq!(title_case("SALT LAKE CITY"), "Salt Lake City");
    }

    #[tokio::test]
    async fn sessions_publish_the_base_schedule() {
        let bundle = plugin(&ProviderSettings::default()).expect("plugin");
        let session = bundle.extractor.open().await.expect("session");

        let pricing = session.prices().await.expect("pricing");
        assert!(matches!(
            pricing,
            RawPricing::Schedule(schedule) if (schedule.base_fee - 180.0).abs() < f64::EPSILON
        ));
        session.close().await;
    }
}
