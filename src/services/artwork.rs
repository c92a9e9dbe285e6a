/// Album art loading: HTTP download for remote references, local base64
/// decode for `data:` URIs.
use std::future::Future;
use std::time::Duration;

use base64::Engine;
use tracing::debug;

use crate::playback::model::ArtReference;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ArtworkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{uri} answered {status}")]
    Status { uri: String, status: u16 },

    #[error("bad inline artwork: {0}")]
    InlineData(String),
}

/// Downloads artwork bytes. Cloned into every fetch task.
pub trait ArtworkFetcher: Clone + Send + Sync + 'static {
    fn fetch(&self, uri: &str) -> impl Future<Output = Result<Vec<u8>, ArtworkError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpArtworkFetcher {
    http: reqwest::Client,
}

impl HttpArtworkFetcher {
    pub fn new() -> Result<Self, ArtworkError> {
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { http })
    }
}

impl ArtworkFetcher for HttpArtworkFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ArtworkError> {
        let response = self.http.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArtworkError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes of artwork from {}", bytes.len(), uri);
        Ok(bytes.to_vec())
    }
}

/// Resolve an art reference to image bytes
pub async fn load<F: ArtworkFetcher>(
    fetcher: &F,
    reference: &ArtReference,
) -> Result<Vec<u8>, ArtworkError> {
    match reference {
        ArtReference::Uri(uri) => fetcher.fetch(uri).await,
        ArtReference::Inline(uri) => decode_data_uri(uri),
    }
}

/// Bytes of a `data:[<mediatype>];base64,<data>` URI
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ArtworkError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ArtworkError::InlineData("not a data: URI".into()))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| ArtworkError::InlineData("missing ','".into()))?;
    if !header.ends_with(";base64") {
        return Err(ArtworkError::InlineData(format!(
            "unsupported encoding '{}'",
            header
        )));
    }
    let data: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| ArtworkError::InlineData(e.to_string()))
}
