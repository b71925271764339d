use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, warn};

use super::{BasicClient, HttpClient, fetch_bytes};
use crate::error::PipelineError;

/// Anything that can hand back the bytes stored at a location.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Bytes, PipelineError>;
}

/// Fetches `http(s)://` locations over HTTP and reads anything else from
/// the local filesystem, so mirrored feeds work offline.
pub struct HttpSource<C = BasicClient> {
    client: C,
}

impl<C: HttpClient> HttpSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[async_trait]
impl<C: HttpClient> Source for HttpSource<C> {
    #[tracing::instrument(skip(self), fields(source = %location))]
    async fn fetch(&self, location: &str) -> Result<Bytes, PipelineError> {
        let started = Instant::now();
        let bytes = if is_remote(location) {
            fetch_bytes(&self.client, location).await?
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            Bytes::from(tokio::fs::read(path).await?)
        };

        let elapsed = started.elapsed();
        if elapsed.as_secs() > 15 {
            warn!(elapsed_secs = elapsed.as_secs(), "Fetch was slow");
        }
        debug!(bytes = bytes.len(), elapsed_ms = elapsed.as_millis() as u64, "Fetched");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.mbta.com/archive/archived_feeds.txt"));
        assert!(is_remote("http://example.com/a.zip"));
        assert!(!is_remote("/tmp/a.zip"));
        assert!(!is_remote("file:///tmp/a.zip"));
    }

    #[tokio::test]
    async fn test_reads_local_files() {
        let path = temp_path("cr_feed_metrics_source_local.txt");
        fs::write(&path, b"archive_url,feed_start_date\n").unwrap();

        let source = HttpSource::new(BasicClient::new().unwrap());
        let bytes = source.fetch(&path).await.unwrap();
        assert_eq!(&bytes[..], b"archive_url,feed_start_date\n");

        let with_scheme = source.fetch(&format!("file://{path}")).await.unwrap();
        assert_eq!(bytes, with_scheme);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_local_file_is_an_error() {
        let source = HttpSource::new(BasicClient::new().unwrap());
        let err = source
            .fetch(&temp_path("cr_feed_metrics_definitely_missing.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.is_recoverable());
    }
}
