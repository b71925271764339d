//! Byte-level retrieval of feed indexes and archives.

mod basic;
mod client;
mod source;

pub use basic::{BasicClient, DEFAULT_TIMEOUT};
pub use client::HttpClient;
pub use source::{HttpSource, Source};

use bytes::Bytes;

use crate::error::PipelineError;

/// GETs `url` and returns the response body.
///
/// # Errors
///
/// Transport failures and non-success statuses are both reported as
/// [`PipelineError::Network`]. Nothing is retried here.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, PipelineError> {
    let parsed: reqwest::Url = url.parse().map_err(|e| PipelineError::network(url, e))?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| PipelineError::network(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(PipelineError::network(url, format!("HTTP status {status}")));
    }

    resp.bytes().await.map_err(|e| PipelineError::network(url, e))
}
