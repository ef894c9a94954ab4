use anyhow::{anyhow, Result};
use pywatch_domain::{resolve_reference, Fingerprint, Observation};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::context::WatchContext;

/// Fetches the watched page and reduces it to an [`Observation`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeDetector;

impl ChangeDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    /// Returns [`super::errors::WatchError::Network`] when the page cannot be
    /// fetched or answers with a non-2xx status.
    pub fn poll(&self, ctx: &WatchContext<'_>) -> Result<Observation> {
        let page_url = &ctx.config().source().page_url;
        let response = ctx.effects().http().get(page_url, ctx.http_timeout())?;
        let observation = parse_page(&response.url, &response.body)?;
        debug!(
            url = %response.url,
            fingerprint = %observation.fingerprint,
            reference = observation.reference.as_ref().map(|r| r.as_str()),
            "polled page"
        );
        Ok(observation)
    }
}

/// Pull the title text and the first linked location out of `html`.
///
/// A missing title yields an empty fingerprint. Only anchors that carry an
/// `href` attribute count as links.
///
/// # Errors
/// Only fails if the built-in selectors do not parse.
pub fn parse_page(page_url: &Url, html: &str) -> Result<Observation> {
    let title_selector = selector("title")?;
    let anchor_selector = selector("a[href]")?;
    let document = Html::parse_document(html);

    let fingerprint = document
        .select(&title_selector)
        .next()
        .map(|title| Fingerprint::new(&title.text().collect::<String>()))
        .unwrap_or_default();
    let reference = document
        .select(&anchor_selector)
        .next()
        .and_then(|anchor| anchor.value().attr("href"))
        .and_then(|href| resolve_reference(page_url, href));
    Ok(Observation::new(fingerprint, reference))
}

fn selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|err| anyhow!("invalid selector {raw:?}: {err:?}"))
}
