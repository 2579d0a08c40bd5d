//! HTTP clients for the replication feed and the dump server

use crate::config::HttpConfig;
use crate::error::{SyncError, SyncResult};
use futures::StreamExt;
use reqwest::{header::HeaderMap, Client, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

pub mod dump;

pub use dump::{DumpClient, DumpMetadata};

pub const STATE_FILE: &str = "state.txt";
pub const DIFF_FILE_EXTENSION: &str = "osc.gz";

/// Split a sequence number into the feed's three directory levels.
///
/// `1234567` becomes `["001", "234", "567"]`.
pub fn diff_path_components(sequence: u64) -> [String; 3] {
    [
        format!("{:03}", sequence / 1_000_000),
        format!("{:03}", (sequence % 1_000_000) / 1_000),
        format!("{:03}", sequence % 1_000),
    ]
}

/// Path of a diff relative to the feed root, e.g. `001/234/567.osc.gz`
pub fn diff_path(sequence: u64) -> String {
    let [top, bottom, state] = diff_path_components(sequence);
    format!("{}/{}/{}.{}", top, bottom, state, DIFF_FILE_EXTENSION)
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn build_client(config: &HttpConfig) -> SyncResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|err| SyncError::config(format!("failed to build HTTP client: {}", err)))
}

/// Classify a transport error the same way for every upstream
pub(crate) fn map_request_error(url: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() || err.is_connect() {
        SyncError::HttpUpstreamUnavailable {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else if let Some(status) = err.status() {
        SyncError::HttpUpstreamResponse {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        SyncError::HttpDispatch {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) async fn send_get(
    client: &Client,
    url: &str,
    headers: HeaderMap,
) -> SyncResult<Response> {
    let response = client
        .get(url)
        .headers(headers)
        .send()
        .await
        .map_err(|err| map_request_error(url, err))?;

    if !response.status().is_success() {
        return Err(SyncError::HttpUpstreamResponse {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    Ok(response)
}

/// Stream a response body to `destination`, creating parent directories
pub(crate) async fn stream_to_file(
    url: &str,
    response: Response,
    destination: &Path,
) -> SyncResult<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| map_request_error(url, err))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;

    Ok(written)
}

/// Client for an OSM replication feed (minutely, hourly, daily...)
#[derive(Clone)]
pub struct ReplicationClient {
    client: Client,
}

impl ReplicationClient {
    pub fn new(config: &HttpConfig) -> SyncResult<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }

    /// Fetch the feed's own `state.txt`
    #[instrument(skip(self))]
    pub async fn get_state(&self, replication_url: &str) -> SyncResult<String> {
        let url = join_url(replication_url, STATE_FILE);
        debug!(%url, "Fetching replication state");

        let response = send_get(&self.client, &url, HeaderMap::new()).await?;
        response.text().await.map_err(|err| map_request_error(&url, err))
    }

    /// Download the diff for `sequence` into `destination`
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    pub async fn download_diff(
        &self,
        replication_url: &str,
        sequence: u64,
        destination: &Path,
    ) -> SyncResult<()> {
        let url = join_url(replication_url, &diff_path(sequence));
        info!(%url, sequence, "Downloading replication diff");

        let response = send_get(&self.client, &url, HeaderMap::new()).await?;
        let bytes = stream_to_file(&url, response, destination).await?;

        debug!(sequence, bytes, "Replication diff written to disk");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_path_components() {
        assert_eq!(diff_path_components(1_234_567), ["001", "234", "567"]);
        assert_eq!(diff_path_components(0), ["000", "000", "000"]);
        assert_eq!(diff_path_components(5_999_001), ["005", "999", "001"]);
    }

    #[test]
    fn test_diff_path_components_reconstruct_sequence() {
        for sequence in [0u64, 7, 999, 1_000, 54_321, 1_000_000, 6_123_456, 1_234_567_890] {
            let [top, bottom, state] = diff_path_components(sequence);
            for part in [&top, &bottom, &state] {
                assert!(part.len() >= 3);
            }
            let top: u64 = top.parse().unwrap_or(u64::MAX);
            let bottom: u64 = bottom.parse().unwrap_or(u64::MAX);
            let state: u64 = state.parse().unwrap_or(u64::MAX);
            assert_eq!(top * 1_000_000 + bottom * 1_000 + state, sequence);
        }
    }

    #[test]
    fn test_diff_path() {
        assert_eq!(diff_path(1_234_567), "001/234/567.osc.gz");
    }

    #[test]
    fn test_join_url_trims_slashes() {
        assert_eq!(
            join_url("https://planet.osm.org/replication/minute/", "state.txt"),
            "https://planet.osm.org/replication/minute/state.txt"
        );
        assert_eq!(join_url("http://a", "/b"), "http://a/b");
    }
}
