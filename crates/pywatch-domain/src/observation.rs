use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Trimmed `<title>` text of the watched page; empty when the page has none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Absolute location of the payload advertised by the watched page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadReference(Url);

impl PayloadReference {
    /// Parse an already absolute reference.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("invalid payload url {raw:?}"))?;
        Ok(Self(url))
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PayloadReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Resolve an anchor `href` against the URL of the page it was found on.
///
/// Absolute values come back unchanged; relative ones are joined onto `base`.
/// Empty or unparsable values yield `None`, the same as a page without links.
#[must_use]
pub fn resolve_reference(base: &Url, href: &str) -> Option<PayloadReference> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(PayloadReference)
}

/// What one poll of the watched page produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub fingerprint: Fingerprint,
    pub reference: Option<PayloadReference>,
}

impl Observation {
    #[must_use]
    pub fn new(fingerprint: Fingerprint, reference: Option<PayloadReference>) -> Self {
        Self {
            fingerprint,
            reference,
        }
    }
}

/// An update fires only when the fingerprint moved away from the last
/// committed one and the page also advertised a payload.
#[must_use]
pub fn should_update(last: Option<&Fingerprint>, observation: &Observation) -> bool {
    observation.reference.is_some() && last != Some(&observation.fingerprint)
}
