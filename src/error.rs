//! Error types for clients, polls and the registry.
//!
//! Every failure is reported through [`Error`]. Errors that carry a response
//! keep the raw body so a failing test can be diagnosed from its output alone.

use http::{HeaderMap, StatusCode};
use std::fmt;

/// The main error type of the crate.
///
/// # Examples
///
/// ```no_run
/// use smarthttp::{Error, SmartClient};
/// use http::StatusCode;
///
/// # async fn example() -> Result<(), Error> {
/// let client = SmartClient::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.get_and_wait_for_status("/health", StatusCode::OK).await {
///     Ok(response) => println!("ready after {:?}", response.latency),
///     Err(Error::PollTimeout { endpoint, attempts, last_observed, .. }) => {
///         eprintln!("{endpoint} never became ready in {attempts} attempts: {last_observed}");
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS lookup failed, etc.).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The transport gave up waiting for the server.
    #[error("Request to {endpoint} timed out")]
    Timeout {
        /// The endpoint the request was sent to
        endpoint: String,
    },

    /// The server answered with a non-2xx status where a success was required.
    ///
    /// Only typed flows (such as [`SmartClient::poll_until`](crate::SmartClient::poll_until))
    /// produce this; raw verbs hand every status back to the caller.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Failed to decode a body into the expected type.
    #[error("Failed to deserialize response: {serde_error}")]
    Deserialization {
        /// The raw body that failed to decode
        raw_response: String,
        /// The decoder's error message
        serde_error: String,
    },

    /// Failed to encode a request body. Nothing was sent.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// Invalid configuration: bad settings file, header name or policy.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided or produced by joining an endpoint.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No client is registered under the requested name.
    #[error("No HTTP client registered under name '{name}'")]
    ClientNotFound {
        /// The name that was looked up
        name: String,
    },

    /// A poll used up its attempt budget without the condition holding.
    #[error("Polling {endpoint} gave up after {attempts} attempts ({faulted} failed): {last_observed}")]
    PollTimeout {
        /// The polled endpoint
        endpoint: String,
        /// How many attempts were made
        attempts: usize,
        /// How many of those attempts failed instead of returning a value
        faulted: usize,
        /// What the final attempt produced
        last_observed: LastObserved,
    },

    /// A successful response had no value to decode: an empty body or `null`.
    ///
    /// Polls treat this as "not yet".
    #[error("Response from {endpoint} ({status}) had no value to decode")]
    EmptyBody {
        /// The endpoint the request was sent to
        endpoint: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// A response did not carry the status code the caller expected.
    #[error("{endpoint}: expected status {expected}, got {actual}; body: {body}")]
    StatusCodeMismatch {
        /// The path the response came from
        endpoint: String,
        /// The expected status code
        expected: StatusCode,
        /// The status code actually received
        actual: StatusCode,
        /// The response body
        body: String,
    },
}

/// What the last attempt of an exhausted poll produced.
#[derive(Debug)]
pub enum LastObserved {
    /// The request succeeded but the condition never held; holds a rendering
    /// of the final response.
    Unsatisfied(String),
    /// The final attempt failed.
    Fault(Box<Error>),
}

impl fmt::Display for LastObserved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastObserved::Unsatisfied(value) => {
                write!(f, "condition was never satisfied, last response: {value}")
            }
            LastObserved::Fault(error) => write!(f, "last attempt failed: {error}"),
        }
    }
}

impl Error {
    /// Returns `true` if a poll should treat this error as "not yet satisfied".
    ///
    /// Transport failures, timeouts and unexpected HTTP statuses are transient
    /// from the point of view of an eventually-consistent server. Codec,
    /// configuration and lookup errors point at a bug in the test itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use smarthttp::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::NOT_FOUND,
    ///     raw_response: "not yet".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::Serialization("bad map key".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Timeout { .. } => true,
            Error::HttpError { .. } => true,
            Error::EmptyBody { .. } => true,
            Error::Deserialization { .. } => false,
            Error::Serialization(_) => false,
            Error::Configuration(_) => false,
            Error::InvalidUrl(_) => false,
            Error::ClientNotFound { .. } => false,
            Error::PollTimeout { .. } => false,
            Error::StatusCodeMismatch { .. } => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::EmptyBody { status, .. } => Some(*status),
            Error::StatusCodeMismatch { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::Deserialization { raw_response, .. } => Some(raw_response),
            Error::StatusCodeMismatch { body, .. } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn from_transport(error: reqwest::Error, endpoint: &str) -> Self {
        if error.is_timeout() {
            Error::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            Error::Transport(error)
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
