//! Description of a single request.

use crate::codec::{self, Codec};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Body of a request.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A structured value, encoded by the resolved codec at send time.
    Structured(Value),
    /// Bytes sent as-is.
    Raw {
        /// The body bytes
        bytes: Vec<u8>,
        /// The `Content-Type` to send
        media_type: String,
    },
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Structured(value) => write!(f, "{value}"),
            Payload::Raw { bytes, media_type } => {
                write!(f, "<{} bytes of {}>", bytes.len(), media_type)
            }
        }
    }
}

/// Everything needed to send one request through a
/// [`SmartClient`](crate::SmartClient).
///
/// The endpoint is relative to the client's base address. Headers set here
/// are added on top of the client's default headers for this request only.
///
/// # Examples
///
/// ```
/// use smarthttp::RequestSpec;
/// use serde_json::json;
///
/// let spec = RequestSpec::post("/orders")
///     .json(&json!({"sku": "A-1"}))
///     .unwrap()
///     .header("X-Request-Id", "42")
///     .unwrap()
///     .query("dry_run", "true");
///
/// assert_eq!(spec.endpoint, "/orders");
/// assert!(spec.payload.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// The HTTP method.
    pub method: Method,

    /// The endpoint, relative to the client's base address.
    pub endpoint: String,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters, appended in order.
    pub query_params: Vec<(String, String)>,

    /// Optional request body.
    pub payload: Option<Payload>,

    /// Media type for a structured payload, overriding the codec's own.
    pub media_type: Option<String>,

    /// Codec overriding the client's default for this request.
    pub codec: Option<Arc<dyn Codec>>,

    /// Retry policy overriding the client's default when this request is polled.
    pub retry_policy: Option<RetryPolicy>,
}

impl RequestSpec {
    /// Creates a `RequestSpec` with the given method and endpoint.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            payload: None,
            media_type: None,
            codec: None,
            retry_policy: None,
        }
    }

    /// A GET request.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// A POST request.
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// A PUT request.
    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    /// A PATCH request.
    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    /// A DELETE request.
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Adds a header to the request.
    ///
    /// Repeating a name appends another value; it never replaces one.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Adds every header from an iterator of string pairs.
    ///
    /// # Errors
    ///
    /// Returns an error on the first invalid name or value.
    pub fn headers<I, K, V>(mut self, headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name, value)?;
        }
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Sets a structured body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `body` cannot be represented as a
    /// structured value.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.payload = Some(Payload::Structured(codec::to_value(body)?));
        Ok(self)
    }

    /// Sets a raw body with its media type.
    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        self.payload = Some(Payload::Raw {
            bytes: bytes.into(),
            media_type: media_type.into(),
        });
        self
    }

    /// Overrides the media type of a structured body.
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Overrides the client's codec for this request.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Overrides the client's retry policy when this request is polled.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl From<&str> for RequestSpec {
    fn from(endpoint: &str) -> Self {
        Self::get(endpoint)
    }
}

impl From<String> for RequestSpec {
    fn from(endpoint: String) -> Self {
        Self::get(endpoint)
    }
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self::get("")
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}
