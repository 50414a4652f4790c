use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// Sends the request and decodes a JSON body, turning non-2xx statuses into errors.
pub fn send_json<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T> {
    let response = send(request, url)?;
    response
        .json::<T>()
        .with_context(|| format!("failed to decode response from {url}"))
}

fn send(request: RequestBuilder, url: &str) -> Result<Response> {
    let response = request
        .send()
        .with_context(|| format!("failed request to {url}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let message = response.text().unwrap_or_default();
        bail!("request to {url} failed with status {status}: {message}");
    }

    Ok(response)
}
