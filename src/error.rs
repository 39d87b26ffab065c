//! Error handling for ongaku.
//!
//! Every fallible operation in the crate returns [`Result`], whose error
//! carries an [`ErrorKind`] next to the underlying cause. The kinds follow
//! the gRPC status codes, which gives the bridge one vocabulary for failures
//! coming from very different places:
//! * HTTP requests for tags and remote data
//! * Audio output devices and decoders
//! * Local settings and secrets files
//! * JSON documents exchanged with the UI
//!
//! None of these are fatal by themselves. The callers decide whether a
//! failure degrades a feature (no tags, no sound) or aborts bootstrap.
//!
//! # Example
//!
//! ```rust
//! use ongaku::error::{Error, ErrorKind, Result};
//!
//! fn duration_of(locator: &str) -> Result<std::time::Duration> {
//!     Err(Error::not_found(format!("{locator} has no known duration")))
//! }
//!
//! let err = duration_of("live.mp3").unwrap_err();
//! assert_eq!(err.kind, ErrorKind::NotFound);
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for ongaku operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// The operation was cancelled, typically by the caller.
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// Unknown error.
    #[error("unknown error")]
    Unknown = 2,

    /// The caller specified an invalid argument.
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// The deadline expired before the operation could complete.
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// Some requested entity was not found.
    #[error("not found")]
    NotFound = 5,

    /// The entity that a caller attempted to create already exists.
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// The caller does not have permission to execute the operation.
    #[error("permission denied")]
    PermissionDenied = 7,

    /// The request does not have valid authentication credentials.
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// Some resource has been exhausted.
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// The system is not in a state required for the operation.
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// The operation was aborted.
    #[error("operation aborted")]
    Aborted = 10,

    /// The operation was attempted past the valid range.
    #[error("out of range")]
    OutOfRange = 11,

    /// The operation is not implemented or supported.
    #[error("not implemented")]
    Unimplemented = 12,

    /// Internal invariants were broken.
    #[error("internal error")]
    Internal = 13,

    /// The service is currently unavailable.
    #[error("service unavailable")]
    Unavailable = 14,

    /// Unrecoverable data loss or corruption.
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

/// Generates a constructor for each error kind.
macro_rules! constructors {
    ($($(#[$doc:meta])* $name:ident => $kind:ident,)*) => {
        impl Error {
            /// Creates a new error with specified kind and details.
            pub fn new<E>(kind: ErrorKind, error: E) -> Self
            where
                E: Into<Box<dyn std::error::Error + Send + Sync>>,
            {
                Self {
                    kind,
                    error: error.into(),
                }
            }

            $(
                $(#[$doc])*
                pub fn $name<E>(error: E) -> Self
                where
                    E: Into<Box<dyn std::error::Error + Send + Sync>>,
                {
                    Self::new(ErrorKind::$kind, error)
                }
            )*
        }
    };
}

constructors! {
    /// Creates an error for operations that were interrupted mid-execution.
    aborted => Aborted,
    /// Creates an error for duplicate resource creation attempts.
    already_exists => AlreadyExists,
    /// Creates an error for cancelled operations.
    cancelled => Cancelled,
    /// Creates an error for data corruption or loss, like a truncated stream.
    data_loss => DataLoss,
    /// Creates an error for operations that exceeded their deadline.
    deadline_exceeded => DeadlineExceeded,
    /// Creates an error for operations that failed due to current state.
    failed_precondition => FailedPrecondition,
    /// Creates an error for unexpected internal errors.
    internal => Internal,
    /// Creates an error for invalid arguments.
    invalid_argument => InvalidArgument,
    /// Creates an error for missing resources.
    not_found => NotFound,
    /// Creates an error for values outside valid range.
    out_of_range => OutOfRange,
    /// Creates an error for permission denied conditions.
    permission_denied => PermissionDenied,
    /// Creates an error for exhausted resources.
    resource_exhausted => ResourceExhausted,
    /// Creates an error for missing or rejected credentials.
    unauthenticated => Unauthenticated,
    /// Creates an error for unavailable services or devices.
    unavailable => Unavailable,
    /// Creates an error for unsupported formats and features.
    unimplemented => Unimplemented,
    /// Creates an error that doesn't fit any other category.
    unknown => Unknown,
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Status errors map onto the kind matching the HTTP status code, so that a
/// `404` from a tag host reads as `NotFound` in the logs.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 => Self::unauthenticated(err),
                403 => Self::permission_denied(err),
                404 | 410 => Self::not_found(err),
                416 => Self::out_of_range(err),
                429 => Self::resource_exhausted(err),
                500..=599 => Self::unavailable(err),
                _ => Self::failed_precondition(err),
            };
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts TOML parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts stream initialization errors to `Unavailable`.
impl<S> From<stream_download::StreamInitializationError<S>> for Error
where
    S: stream_download::source::SourceStream,
{
    fn from(e: stream_download::StreamInitializationError<S>) -> Self {
        Self::unavailable(e.to_string())
    }
}

/// Converts HTTP stream errors based on their type.
///
/// Maps stream errors:
/// * `FetchFailure` -> `Unavailable`
/// * `ResponseFailure` -> `FailedPrecondition`
impl<C> From<stream_download::http::HttpStreamError<C>> for Error
where
    C: stream_download::http::Client,
{
    fn from(e: stream_download::http::HttpStreamError<C>) -> Self {
        use stream_download::http::HttpStreamError::*;
        match e {
            FetchFailure(e) => Self::unavailable(e.to_string()),
            ResponseFailure(e) => Self::failed_precondition(e.to_string()),
        }
    }
}

/// Converts audio stream errors into appropriate error kinds.
///
/// Maps audio errors:
/// * `PlayStreamError` -> `Unavailable`
/// * `NoDevice` -> `NotFound`
/// * etc.
impl From<rodio::StreamError> for Error {
    fn from(e: rodio::StreamError) -> Self {
        use rodio::StreamError::*;
        match e {
            PlayStreamError(e) => Self::unavailable(e),
            DefaultStreamConfigError(e) => Self::unavailable(e),
            BuildStreamError(e) => Self::unavailable(e),
            SupportedStreamConfigsError(e) => Self::not_found(e),
            NoDevice => Self::not_found(e),
        }
    }
}

/// Converts playback errors into appropriate error kinds.
///
/// Maps playback errors:
/// * `DecoderError` -> `DataLoss`
/// * `NoDevice` -> `NotFound`
impl From<rodio::PlayError> for Error {
    fn from(e: rodio::PlayError) -> Self {
        use rodio::PlayError::*;
        match e {
            DecoderError(e) => Self::data_loss(e),
            NoDevice => Self::not_found(e),
        }
    }
}

/// Converts seek errors into appropriate error kinds.
///
/// Maps seek errors:
/// * `NotSupported` -> `Unimplemented`
/// * Others -> `Unknown`
impl From<rodio::source::SeekError> for Error {
    fn from(e: rodio::source::SeekError) -> Self {
        use rodio::source::SeekError::*;
        match e {
            NotSupported { underlying_source } => Self::unimplemented(underlying_source),
            _ => Self::unknown(e.to_string()),
        }
    }
}

/// Converts Symphonia errors into appropriate error kinds.
///
/// Maps audio decoding errors:
/// * `IoError` → `DataLoss`
/// * `DecodeError` → `DataLoss`
/// * `LimitError` → `ResourceExhausted`
/// * `ResetRequired` → `Internal`
/// * `SeekError` → `Unavailable`
/// * `Unsupported` → `Unimplemented`
impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error::*;
        match e {
            IoError(e) => Self::data_loss(e),
            DecodeError(e) => Self::data_loss(e),
            LimitError(e) => Self::resource_exhausted(e),
            ResetRequired => Self::internal("reset required"),
            SeekError(e) => Self::unavailable(format!("seek error: {e:?}")),
            Unsupported(e) => Self::unimplemented(e),
        }
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts task join errors: cancelled tasks to `Cancelled`, panics to
/// `Internal`.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::not_found("track has no tags");
        assert_eq!(err.to_string(), "not found: track has no tags");
    }

    #[test]
    fn io_errors_map_to_kinds() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind, ErrorKind::DataLoss);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn json_errors_are_invalid_arguments() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        // Truncated input is reported by serde as end of file.
        assert_eq!(Error::from(err).kind, ErrorKind::DataLoss);

        let err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert_eq!(Error::from(err).kind, ErrorKind::InvalidArgument);
    }
}
