//! Retrieval of raw tag data for one item.
//!
//! A fetch runs in two steps:
//! 1. a lightweight `HEAD` request on the probe URL, which must succeed
//! 2. a `GET` request on the primary URL, read up to [`TAG_WINDOW`] bytes
//!
//! The probe avoids opening a body transfer for items that are gone or
//! forbidden. The window bounds how much of an untrusted resource is
//! buffered: tag containers put their metadata up front, and the rest of
//! the file is audio that the parser has no use for.
//!
//! An ID3v2 tag with embedded cover art can be larger than the window.
//! When the data starts with one that does not fit, the item is read once
//! more with a window that covers the whole tag and some audio after it,
//! up to [`MAX_TAG_WINDOW`] bytes.

use async_trait::async_trait;
use reqwest::{header::CONTENT_LENGTH, Url};

use crate::{
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::TagRequest,
};

/// Maximum number of bytes read per item.
pub const TAG_WINDOW: u64 = 1024 * 1024;

/// Maximum number of bytes read per item with a large leading ID3v2 tag.
pub const MAX_TAG_WINDOW: u64 = 16 * 1024 * 1024;

/// Audio read after a leading ID3v2 tag, enough to probe the container.
const AUDIO_AFTER_TAG: u64 = 64 * 1024;

/// A source of raw tag data.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Retrieves the leading bytes of the resource behind `request`.
    async fn fetch(&self, request: &TagRequest) -> Result<Vec<u8>>;
}

/// Fetches tag data over HTTP.
pub struct HttpFetcher {
    http_client: HttpClient,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }

    /// Probes `url` for existence.
    ///
    /// Returns the advertised length of the resource, if any.
    async fn probe(&self, url: Url) -> Result<Option<u64>> {
        let request = self.http_client.head(url);
        let response = self.http_client.execute(request).await?.error_for_status()?;

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        Ok(length)
    }

    /// Reads at most `window` bytes from the start of `url`.
    async fn read(&self, url: Url, window: u64) -> Result<Vec<u8>> {
        let request = self.http_client.get(url, Some(window));
        let mut response = self.http_client.execute(request).await?.error_for_status()?;

        let capacity = usize::try_from(window).unwrap_or(usize::MAX);
        let mut data = Vec::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await? {
            let remaining = capacity - data.len();
            if chunk.len() >= remaining {
                // The host ignored the range; stop reading at the window.
                data.extend_from_slice(&chunk[..remaining]);
                break;
            }
            data.extend_from_slice(&chunk);
        }

        trace!("read {} bytes of {}", data.len(), response.url());
        Ok(data)
    }
}

/// Returns the window to read again with, if `data` filled `window` and
/// starts with an ID3v2 tag that does not fit in it.
///
/// `length` is the advertised length of the resource, if any.
#[must_use]
pub fn grown_window(data: &[u8], window: u64, length: Option<u64>) -> Option<u64> {
    let read = u64::try_from(data.len()).ok()?;
    if read < window {
        // The resource ended within the window.
        return None;
    }

    let tag = crate::tags::id3v2_len(data)?;
    let grown = tag.saturating_add(AUDIO_AFTER_TAG).min(MAX_TAG_WINDOW);
    let grown = length.map_or(grown, |length| grown.min(length));

    (grown > read).then_some(grown)
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &TagRequest) -> Result<Vec<u8>> {
        let probe_url = Url::parse(request.probe_url())?;
        let get_url = Url::parse(&request.get_url)?;

        let length = self.probe(probe_url).await?;
        if length == Some(0) {
            return Err(Error::not_found(format!("{} is empty", request.get_url)));
        }

        let window = length.map_or(TAG_WINDOW, |length| length.min(TAG_WINDOW));
        let data = self.read(get_url.clone(), window).await?;

        match grown_window(&data, window, length) {
            Some(window) => {
                debug!("{get_url} has a large ID3v2 tag, reading {window} bytes");
                self.read(get_url, window).await
            }
            None => Ok(data),
        }
    }
}
