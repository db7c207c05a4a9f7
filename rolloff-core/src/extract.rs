//! Page fetching and the HTML heuristics shared by the vendor providers.
//!
//! Parsing helpers take an already parsed [`Html`] document. `Html` is not `Send`,
//! so providers parse and extract in a synchronous function after the fetch.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::ports::{ExtractError, ProviderSettings};

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{3}[-.\s]?\d{3}[-.\s]?\d{4}").expect("phone pattern is valid")
});
static YARDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*yard").expect("yard pattern is valid"));
static LOGO_ALT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)logo").expect("logo pattern is valid"));

static DIV: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[class]").expect("div selector is valid"));
static IMG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[alt][src]").expect("img selector is valid"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

#[derive(Debug, Clone)]
/// HTTP client for one extractor session.
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
}

impl PageFetcher {
    /// Build a client with the configured user agent and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Session`] when the HTTP client cannot be created.
    pub fn new(settings: &ProviderSettings) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .build()
            .map_err(|error| ExtractError::Session(error.to_string()))?;
        Ok(Self {
            client,
            timeout: settings.request_timeout,
        })
    }

    /// GET `url` and return the body of a successful response.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Timeout`], [`ExtractError::Network`], or
    /// [`ExtractError::Status`] for non-2xx answers.
    pub async fn fetch(&self, url: &str) -> Result<String, ExtractError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Status {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        response.text().await.map_err(|error| self.classify(error))
    }

    /// Like [`PageFetcher::fetch`], but logs the failure and returns `None` so the
    /// caller can fall back to its defaults.
    pub async fn fetch_lenient(&self, url: &str) -> Option<String> {
        match self.fetch(url).await {
            Ok(body) => Some(body),
            Err(error) => {
                tracing::warn!(url, error = %error, "page fetch failed, using defaults");
                None
            }
        }
    }

    fn classify(&self, error: reqwest::Error) -> ExtractError {
        if error.is_timeout() {
            ExtractError::Timeout(self.timeout)
        } else {
            ExtractError::Network(error)
        }
    }
}

/// A `N yard` occurrence found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YardMention {
    /// Size in cubic yards as written on the page.
    pub size_yards: i64,
    /// Text of the element containing the mention.
    pub parent_text: Option<String>,
    /// Text of the first paragraph following the containing element.
    pub next_paragraph: Option<String>,
}

/// First phone number appearing in the page text.
#[must_use]
pub fn find_phone(doc: &Html) -> Option<String> {
    doc.root_element()
        .text()
        .find_map(|text| PHONE.find(text))
        .map(|found| found.as_str().to_owned())
}

/// Text of the first `div` whose class attribute matches `class_pattern`.
#[must_use]
pub fn find_description(doc: &Html, class_pattern: &Regex) -> Option<String> {
    doc.select(&DIV)
        .find(|div| {
            div.value()
                .attr("class")
                .is_some_and(|class| class_pattern.is_match(class))
        })
        .and_then(element_text)
}

/// Source of the first image whose alt text mentions a logo, resolved against `base`.
#[must_use]
pub fn find_logo(doc: &Html, base: &Url) -> Option<String> {
    doc.select(&IMG)
        .find(|img| img.value().attr("alt").is_some_and(|alt| LOGO_ALT.is_match(alt)))
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| base.join(src.trim()).ok())
        .map(String::from)
}

/// Trimmed texts of the first `limit` anchors whose href matches `href_pattern`.
#[must_use]
pub fn location_texts(doc: &Html, href_pattern: &Regex, limit: usize) -> Vec<String> {
    doc.select(&ANCHOR)
        .filter(|anchor| {
            anchor
                .value()
                .attr("href")
                .is_some_and(|href| href_pattern.is_match(href))
        })
        .take(limit)
        .map(|anchor| collapse(&anchor.text().collect::<String>()))
        .collect()
}

/// Split `City, ST` at the first comma. Returns `None` without a comma.
#[must_use]
pub fn split_city_state(text: &str) -> Option<(String, String)> {
    text.split_once(',')
        .map(|(city, state)| (city.trim().to_owned(), state.trim().to_owned()))
}

/// Text nodes containing `N yard`, in document order, with their surrounding text.
///
/// Only the first mention of each size is kept.
#[must_use]
pub fn yard_mentions(doc: &Html) -> Vec<YardMention> {
    let nodes: Vec<_> = doc.root_element().descendants().collect();
    let positions: HashMap<_, _> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (node.id(), index))
        .collect();
    let mut seen = HashSet::new();

    nodes
        .iter()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let size_yards = YARDS
                .captures(text)
                .and_then(|captures| captures.get(1))
                .and_then(|digits| digits.as_str().parse::<i64>().ok())?;

            let parent = node.parent().and_then(ElementRef::wrap);
            if parent.is_some_and(|element| matches!(element.value().name(), "script" | "style")) {
                return None;
            }
            if !seen.insert(size_yards) {
                return None;
            }

            let next_paragraph = parent
                .and_then(|element| positions.get(&element.id()))
                .and_then(|&start| {
                    nodes
                        .iter()
                        .skip(start + 1)
                        .filter_map(|candidate| ElementRef::wrap(*candidate))
                        .find(|candidate| candidate.value().name() == "p")
                })
                .and_then(element_text);

            Some(YardMention {
                size_yards,
                parent_text: parent.and_then(element_text),
                next_paragraph,
            })
        })
        .collect()
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = collapse(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
