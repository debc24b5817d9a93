//! Response types.
//!
//! Verbs return a [`RawResponse`]: status, headers and the fully buffered
//! body, ready for status validation and decoding. Typed polls return a
//! [`Response`] that keeps the raw details next to the decoded value.

use crate::codec::{self, Codec, JsonCodec};
use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// A buffered HTTP response.
///
/// # Examples
///
/// ```no_run
/// use smarthttp::SmartClient;
/// use http::StatusCode;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Comment {
///     email: String,
/// }
///
/// # async fn example() -> Result<(), smarthttp::Error> {
/// let client = SmartClient::builder()
///     .base_url("https://jsonplaceholder.typicode.com")?
///     .build()?;
///
/// let response = client.get("/posts/1/comments").await?;
/// response.validate_status(StatusCode::OK)?;
/// let comments: Vec<Comment> = response.json()?;
/// println!("{} comments", comments.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The response body.
    pub body: Vec<u8>,

    /// The final URL of the request.
    pub url: Url,

    /// Time from sending the request until the body was read.
    pub latency: Duration,
}

impl RawResponse {
    /// Creates a new `RawResponse`.
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        url: Url,
        latency: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            latency,
        }
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns the request path this response answers.
    pub fn endpoint(&self) -> &str {
        self.url.path()
    }

    /// Checks the status code and returns the body text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusCodeMismatch`] naming the endpoint, both codes
    /// and the body when the status differs from `expected`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use smarthttp::{Error, RawResponse};
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = RawResponse::new(
    ///     StatusCode::NOT_FOUND,
    ///     HeaderMap::new(),
    ///     b"no such order".to_vec(),
    ///     "https://shop.test/orders/9".parse().unwrap(),
    ///     Duration::from_millis(3),
    /// );
    ///
    /// match response.validate_status(StatusCode::OK) {
    ///     Err(Error::StatusCodeMismatch { endpoint, actual, body, .. }) => {
    ///         assert_eq!(endpoint, "/orders/9");
    ///         assert_eq!(actual, StatusCode::NOT_FOUND);
    ///         assert_eq!(body, "no such order");
    ///     }
    ///     other => panic!("unexpected {:?}", other),
    /// }
    /// ```
    pub fn validate_status(&self, expected: StatusCode) -> Result<String> {
        let body = self.text();
        if self.status != expected {
            tracing::error!(
                endpoint = %self.endpoint(),
                expected = expected.as_u16(),
                actual = self.status.as_u16(),
                body = %body,
                "Unexpected status code"
            );
            return Err(Error::StatusCodeMismatch {
                endpoint: self.endpoint().to_string(),
                expected,
                actual: self.status,
                body,
            });
        }
        Ok(body)
    }

    /// Decodes the body as JSON with exact field matching.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.decode(&JsonCodec::new())
    }

    /// Decodes the body with the given codec.
    pub fn decode<T: DeserializeOwned>(&self, codec: &dyn Codec) -> Result<T> {
        codec::decode(codec, &self.body)
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Status and body, as shown in poll diagnostics.
    pub(crate) fn summary(&self) -> String {
        format!("{} {}", self.status, self.text())
    }
}

/// A decoded HTTP response.
///
/// Keeps the decoded value together with the raw body, status, headers,
/// latency and the number of attempts a poll needed.
///
/// # Type Parameters
///
/// * `T` - The type of the deserialized response data
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the first attempt until this response was received.
    pub latency: Duration,

    /// The number of attempts made to obtain this response.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Maps the response data to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use smarthttp::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     42,
    ///     "42".to_string(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(100),
    ///     1,
    /// );
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns the decoded value, dropping the metadata.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
