use anyhow::Result;
use pywatch_domain::{DependencyManifest, PayloadReference};
use tracing::{debug, info};

use super::context::WatchContext;

/// Downloads the payload source and the dependency manifest. Nothing is
/// cached between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadFetcher;

impl PayloadFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    /// Returns [`super::errors::WatchError::Network`] on transport failure or
    /// a non-2xx status.
    pub fn fetch(&self, ctx: &WatchContext<'_>, reference: &PayloadReference) -> Result<String> {
        let response = ctx
            .effects()
            .http()
            .get(reference.url(), ctx.http_timeout())?;
        info!(url = %reference, bytes = response.body.len(), "fetched payload");
        Ok(response.body)
    }

    /// # Errors
    /// Returns [`super::errors::WatchError::Network`] on transport failure or
    /// a non-2xx status.
    pub fn fetch_manifest(&self, ctx: &WatchContext<'_>) -> Result<DependencyManifest> {
        let url = &ctx.config().source().manifest_url;
        let response = ctx.effects().http().get(url, ctx.http_timeout())?;
        let manifest = DependencyManifest::parse(&response.body);
        debug!(%url, count = manifest.len(), "fetched dependency manifest");
        Ok(manifest)
    }
}
