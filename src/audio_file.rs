//! Provides the `AudioFile` abstraction over the byte sources of a queue item.
//!
//! Queue items point either at a remote resource, which is streamed to a
//! temporary file while it plays, or at a file on the local disk. Both end up
//! behind the same buffered reader that Symphonia decodes from.
//!
//! # Examples
//!
//! ```no_run
//! use ongaku::audio_file::AudioFile;
//! use std::io::Read;
//!
//! let mut audio = AudioFile::open("https://example.com/a.flac", &client).await?;
//!
//! let mut buf = vec![0; 1024];
//! let n = audio.read(&mut buf)?;
//! ```

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use stream_download::{
    http::HttpStream, source::SourceStream, storage::temp::TempStorageProvider, StreamDownload,
};
use symphonia::core::io::MediaSource;
use url::Url;

use crate::error::{Error, Result};

/// Combines Read and Seek traits for audio stream handling.
pub trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

/// Buffer size for reads from the underlying source (32 KiB).
///
/// Matches Symphonia's read pattern, which reads sequentially in increasing
/// chunks up to 32 KiB.
pub const BUFFER_LEN: usize = 32 * 1024;

/// Bytes to download before a remote stream may be read.
const PREFETCH_BYTES: u64 = 128 * 1024;

/// Where the audio of a queue item lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    Remote(Url),
    Local(PathBuf),
}

impl Locator {
    /// Interprets `locator` as an `http(s)` URL, a `file` URL or a path.
    ///
    /// # Errors
    ///
    /// Returns error if `locator` is empty or a `file` URL without a valid
    /// path.
    pub fn parse(locator: &str) -> Result<Self> {
        if locator.trim().is_empty() {
            return Err(Error::invalid_argument("empty locator"));
        }

        match Url::parse(locator) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|()| Error::invalid_argument(format!("{locator} is not a valid path"))),
            // Anything else, including Windows drive letters that parse as a
            // scheme, is taken as a path.
            _ => Ok(Self::Local(PathBuf::from(locator))),
        }
    }

    /// File extension of the resource, as a hint for the decoder.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let extension = match self {
            Self::Remote(url) => crate::tags::extension(url.path()),
            Self::Local(path) => path.extension().and_then(|ext| ext.to_str()),
        };
        extension.map(str::to_lowercase)
    }
}

/// Byte source of one queue item.
pub struct AudioFile {
    inner: Box<dyn ReadSeek>,

    /// `false` for streams of unknown length.
    is_seekable: bool,

    byte_len: Option<u64>,
}

impl AudioFile {
    /// Opens the resource behind `locator`.
    ///
    /// Remote resources are requested through `client` and downloaded in
    /// the background; this returns as soon as the first bytes are there.
    ///
    /// # Errors
    ///
    /// Returns error if the locator is invalid, the request fails or the
    /// file cannot be opened.
    pub async fn open(locator: &Locator, client: &reqwest::Client) -> Result<Self> {
        match locator {
            Locator::Remote(url) => {
                let stream = HttpStream::new(client.clone(), url.clone()).await?;
                let byte_len = stream.content_length();
                match byte_len {
                    Some(len) => debug!("streaming {len} bytes from {url}"),
                    None => debug!("streaming {url} with unknown length"),
                }

                let download = StreamDownload::from_stream(
                    stream,
                    TempStorageProvider::default(),
                    stream_download::Settings::default().prefetch_bytes(PREFETCH_BYTES),
                )
                .await?;

                Ok(Self::from_download(download, byte_len))
            }
            Locator::Local(path) => Self::from_path(path),
        }
    }

    /// Wraps a running download.
    pub fn from_download<P>(download: StreamDownload<P>, byte_len: Option<u64>) -> Self
    where
        P: stream_download::storage::StorageProvider + Sync + 'static,
        P::Reader: Sync,
    {
        Self::from_reader(download, byte_len)
    }

    /// Wraps any seekable reader. Without a `byte_len`, the result is not
    /// seekable.
    pub fn from_reader<R>(reader: R, byte_len: Option<u64>) -> Self
    where
        R: ReadSeek + 'static,
    {
        Self {
            inner: Box::new(BufReader::with_capacity(BUFFER_LEN, reader)),
            is_seekable: byte_len.is_some(),
            byte_len,
        }
    }

    /// Opens a local file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or inspected.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let byte_len = file.metadata()?.len();
        debug!("reading {byte_len} bytes from {}", path.display());

        Ok(Self::from_reader(file, Some(byte_len)))
    }
}

impl Read for AudioFile {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for AudioFile {
    #[inline]
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for AudioFile {
    #[inline]
    fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    #[inline]
    fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }
}
