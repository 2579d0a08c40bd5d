use super::{build_client, join_url, map_request_error, send_get, stream_to_file};
use crate::config::HttpConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, instrument};

/// One entry of the dump server's `/dumps` listing
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DumpMetadata {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
}

/// Parse `key=value` pairs into request headers
pub fn parse_headers<S: AsRef<str>>(pairs: &[S]) -> SyncResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    for pair in pairs {
        let pair = pair.as_ref();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| SyncError::config(format!("header '{}' is not in key=value form", pair)))?;

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|err| SyncError::config(format!("invalid header name '{}': {}", name, err)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|err| SyncError::config(format!("invalid header value for '{}': {}", name, err)))?;

        headers.insert(name, value);
    }

    Ok(headers)
}

#[derive(Clone)]
pub struct DumpClient {
    client: Client,
    headers: HeaderMap,
}

impl DumpClient {
    pub fn new(config: &HttpConfig, headers: HeaderMap) -> SyncResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            headers,
        })
    }

    /// Latest dump known to the server
    #[instrument(skip(self))]
    pub async fn latest_dump(&self, dump_server_url: &str) -> SyncResult<DumpMetadata> {
        let url = join_url(dump_server_url, "dumps?limit=1&sort=desc");
        info!(%url, "Getting the latest dump from the dump server");

        let response = send_get(&self.client, &url, self.headers.clone()).await?;
        let dumps: Vec<DumpMetadata> = response
            .json()
            .await
            .map_err(|err| map_request_error(&url, err))?;

        dumps
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::DumpServerEmptyResponse(dump_server_url.to_string()))
    }

    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    pub async fn download(&self, url: &str, destination: &Path) -> SyncResult<()> {
        info!(%url, "Downloading dump");

        let response = send_get(&self.client, url, self.headers.clone()).await?;
        let bytes = stream_to_file(url, response, destination).await?;

        info!(bytes, "Dump written to disk");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&["Authorization=Bearer abc", "x-api-key = 42"]).unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(headers.get("x-api-key").unwrap(), "42");
    }

    #[test]
    fn test_parse_headers_rejects_missing_separator() {
        assert!(matches!(parse_headers(&["Authorization"]), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_dump_metadata_deserializes() {
        let dump: DumpMetadata = serde_json::from_str(
            r#"{"id":"1","name":"israel","timestamp":"2023-01-01T00:00:00Z","url":"http://dumps/israel.pbf"}"#,
        )
        .unwrap();
        assert_eq!(dump.name, "israel");
        assert_eq!(dump.description, None);
    }
}
