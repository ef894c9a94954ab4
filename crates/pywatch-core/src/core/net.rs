use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use url::Url;

use super::errors::WatchError;

const USER_AGENT: &str = concat!("pywatch/", env!("CARGO_PKG_VERSION"));

/// Body of a successful GET together with the URL it was finally served
/// from (after redirects).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub body: String,
}

/// Client shared by every request of a [`super::effects::SystemEffects`].
/// Timeouts are set per request.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")
}

/// One bounded GET. Transport failures, timeouts and non-2xx statuses all
/// surface as [`WatchError::Network`].
pub fn get_text(client: &Client, url: &Url, timeout: Duration) -> Result<HttpResponse> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .map_err(|err| WatchError::network(url, describe_transport_error(&err, timeout)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(WatchError::network(url, format!("HTTP {status}")).into());
    }
    let final_url = response.url().clone();
    let body = response
        .text()
        .map_err(|err| WatchError::network(url, describe_transport_error(&err, timeout)))?;
    tracing::trace!(%url, bytes = body.len(), "fetched");
    Ok(HttpResponse {
        url: final_url,
        body,
    })
}

fn describe_transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        return format!("timed out after {timeout:?}");
    }
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
