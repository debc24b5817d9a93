//! The Smart Client: verbs plus poll-until-condition variants.
//!
//! A [`SmartClient`] wraps one `reqwest::Client` with a base address, a
//! mutable set of default headers, a default codec and a default retry
//! policy. Use [`ClientBuilder`] to create one.

use crate::codec::{self, Codec, JsonCodec};
use crate::error::LastObserved;
use crate::request::{parse_header, Payload, RequestSpec};
use crate::retry::{self, Observed, PollFailure, Polled, RetryPolicy};
use crate::{Error, RawResponse, Response, Result};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// A configured HTTP endpoint handle.
///
/// Cloning is cheap and every clone shares the same transport and default
/// headers. Header changes apply to requests built afterwards; requests
/// already in flight keep the headers they were built with.
///
/// # Examples
///
/// ```no_run
/// use smarthttp::{RequestSpec, RetryPolicy, SmartClient};
/// use http::StatusCode;
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct Job {
///     state: String,
/// }
///
/// # async fn example() -> Result<(), smarthttp::Error> {
/// let client = SmartClient::builder()
///     .base_url("https://api.example.com")?
///     .default_header("X-Tenant", "qa")?
///     .build()?;
///
/// // single shot
/// let created = client.post("/jobs", &serde_json::json!({"kind": "export"})).await?;
/// created.validate_status(StatusCode::ACCEPTED)?;
///
/// // wait until the job is done, at most 10 times, 200ms apart
/// let spec = RequestSpec::get("/jobs/1")
///     .retry_policy(RetryPolicy::new(10, Duration::from_millis(200))?);
/// let job = client.poll_until::<Job, _>(spec, |job| job.state == "done").await?;
/// println!("done after {} attempts", job.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SmartClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: Url,
    default_headers: RwLock<HeaderMap>,
    cookie_jar: bool,
    codec: Arc<dyn Codec>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl SmartClient {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The base address endpoints are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Whether the transport was built with a cookie jar.
    pub fn uses_cookie_jar(&self) -> bool {
        self.inner.cookie_jar
    }

    /// The policy polls use when the request carries none.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy
    }

    /// The codec used when the request carries none.
    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.inner.codec)
    }


    /// Adds a default header. Does nothing if a header with that name exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the name or value is invalid.
    pub fn add_header(&self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<()> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        let mut headers = self.inner.default_headers.write();
        if headers.contains_key(&name) {
            tracing::debug!(header = %name, "Default header already set, keeping existing value");
            return Ok(());
        }
        headers.insert(name, value);
        Ok(())
    }

    /// Removes a default header. Does nothing if it is absent.
    pub fn remove_header(&self, name: impl AsRef<str>) {
        self.inner.default_headers.write().remove(name.as_ref());
    }

    /// Removes every default header.
    pub fn remove_all_headers(&self) {
        self.inner.default_headers.write().clear();
    }

    /// Returns a snapshot of the current default headers.
    pub fn headers(&self) -> HeaderMap {
        self.inner.default_headers.read().clone()
    }


    /// Sends a request and returns the buffered response, whatever its status.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the body cannot be encoded (nothing is
    /// sent), [`Error::Transport`] or [`Error::Timeout`] if the exchange
    /// fails, [`Error::InvalidUrl`] if the endpoint does not form a URL.
    pub async fn send(&self, spec: impl Into<RequestSpec>) -> Result<RawResponse> {
        self.dispatch(&spec.into()).await
    }

    /// Sends a GET request.
    pub async fn get(&self, endpoint: &str) -> Result<RawResponse> {
        self.send(RequestSpec::get(endpoint)).await
    }

    /// Sends a POST request with a body encoded by the client's codec.
    pub async fn post<B>(&self, endpoint: &str, body: &B) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
    {
        self.send(with_body(RequestSpec::post(endpoint), body)?).await
    }

    /// Sends a POST request without a body.
    pub async fn post_empty(&self, endpoint: &str) -> Result<RawResponse> {
        self.send(RequestSpec::post(endpoint)).await
    }

    /// Sends a PUT request with a body encoded by the client's codec.
    pub async fn put<B>(&self, endpoint: &str, body: &B) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
    {
        self.send(with_body(RequestSpec::put(endpoint), body)?).await
    }

    /// Sends a PUT request without a body.
    pub async fn put_empty(&self, endpoint: &str) -> Result<RawResponse> {
        self.send(RequestSpec::put(endpoint)).await
    }

    /// Sends a PATCH request with a body encoded by the client's codec.
    pub async fn patch<B>(&self, endpoint: &str, body: &B) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
    {
        self.send(with_body(RequestSpec::patch(endpoint), body)?).await
    }

    /// Sends a DELETE request.
    pub async fn delete(&self, endpoint: &str) -> Result<RawResponse> {
        self.send(RequestSpec::delete(endpoint)).await
    }

    /// Sends a DELETE request with a body encoded by the client's codec.
    pub async fn delete_with_body<B>(&self, endpoint: &str, body: &B) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
    {
        self.send(with_body(RequestSpec::delete(endpoint), body)?)
            .await
    }

    /// Decodes a response body with the client's codec.
    pub fn decode<T: DeserializeOwned>(&self, response: &RawResponse) -> Result<T> {
        response.decode(self.inner.codec.as_ref())
    }


    /// Sends `spec` until its decoded body satisfies `predicate`.
    ///
    /// Each attempt needs a 2xx status; any other status counts as "not yet"
    /// and is retried, as are transport failures and empty or `null`
    /// bodies. A body that does not decode into `T` aborts the poll at once.
    ///
    /// # Errors
    ///
    /// [`Error::PollTimeout`] when the policy is exhausted, or the first
    /// non-retryable error.
    pub async fn poll_until<T, P>(
        &self,
        spec: impl Into<RequestSpec>,
        predicate: P,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        let spec = spec.into();
        let policy = self.resolve_policy(&spec);
        let codec = self.resolve_codec(&spec);
        let start = Instant::now();

        let spec_ref = &spec;
        let outcome = retry::poll_until(
            &policy,
            move |attempt| self.attempt_decoded::<T>(spec_ref, codec, attempt),
            |response: &Response<T>| predicate(&response.data),
        )
        .await;

        let polled = self.finish_poll(&spec, outcome, |response| {
            format!("{} {}", response.status, response.raw_body)
        })?;
        let mut response = polled.value;
        response.latency = start.elapsed();
        response.attempts = polled.attempts;
        Ok(response)
    }

    /// Sends `spec` until the raw response satisfies `predicate`.
    ///
    /// Every status reaches the predicate; only transport failures are
    /// retried as faults.
    ///
    /// # Errors
    ///
    /// [`Error::PollTimeout`] when the policy is exhausted, or the first
    /// non-retryable error.
    pub async fn poll_until_response<P>(
        &self,
        spec: impl Into<RequestSpec>,
        predicate: P,
    ) -> Result<RawResponse>
    where
        P: Fn(&RawResponse) -> bool,
    {
        let spec = spec.into();
        let policy = self.resolve_policy(&spec);

        let spec_ref = &spec;
        let outcome =
            retry::poll_until(&policy, move |_| self.dispatch(spec_ref), predicate).await;

        self.finish_poll(&spec, outcome, RawResponse::summary)
            .map(|polled| polled.value)
    }

    /// Sends `spec` until the response status equals `expected`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use smarthttp::SmartClient;
    /// use http::StatusCode;
    ///
    /// # async fn example(client: SmartClient) -> Result<(), smarthttp::Error> {
    /// let response = client.poll_until_status("/health", StatusCode::OK).await?;
    /// assert_eq!(response.status, StatusCode::OK);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn poll_until_status(
        &self,
        spec: impl Into<RequestSpec>,
        expected: StatusCode,
    ) -> Result<RawResponse> {
        self.poll_until_response(spec, move |response| response.status == expected)
            .await
    }

    /// GETs `endpoint` until the decoded body satisfies `predicate`.
    pub async fn get_and_wait_for<T, P>(&self, endpoint: &str, predicate: P) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        self.poll_until(RequestSpec::get(endpoint), predicate).await
    }

    /// POSTs `body` to `endpoint` until the decoded response satisfies
    /// `predicate`. The body is re-sent on every attempt.
    pub async fn post_and_wait_for<B, T, P>(
        &self,
        endpoint: &str,
        body: &B,
        predicate: P,
    ) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        let spec = with_body(RequestSpec::post(endpoint), body)?;
        self.poll_until(spec, predicate).await
    }

    /// GETs `endpoint` until the raw response satisfies `predicate`.
    pub async fn get_and_wait_for_response<P>(
        &self,
        endpoint: &str,
        predicate: P,
    ) -> Result<RawResponse>
    where
        P: Fn(&RawResponse) -> bool,
    {
        self.poll_until_response(RequestSpec::get(endpoint), predicate)
            .await
    }

    /// POSTs `body` to `endpoint` until the raw response satisfies `predicate`.
    pub async fn post_and_wait_for_response<B, P>(
        &self,
        endpoint: &str,
        body: &B,
        predicate: P,
    ) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
        P: Fn(&RawResponse) -> bool,
    {
        let spec = with_body(RequestSpec::post(endpoint), body)?;
        self.poll_until_response(spec, predicate).await
    }

    /// GETs `endpoint` until the response status equals `expected`.
    pub async fn get_and_wait_for_status(
        &self,
        endpoint: &str,
        expected: StatusCode,
    ) -> Result<RawResponse> {
        self.poll_until_status(RequestSpec::get(endpoint), expected)
            .await
    }


    fn resolve_policy(&self, spec: &RequestSpec) -> RetryPolicy {
        spec.retry_policy.unwrap_or(self.inner.retry_policy)
    }

    fn resolve_codec<'a>(&'a self, spec: &'a RequestSpec) -> &'a dyn Codec {
        spec.codec.as_deref().unwrap_or(self.inner.codec.as_ref())
    }

    /// One attempt of a typed poll.
    async fn attempt_decoded<T>(
        &self,
        spec: &RequestSpec,
        codec: &dyn Codec,
        attempt: usize,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let raw = self.dispatch(spec).await?;
        if !raw.status.is_success() {
            tracing::debug!(
                endpoint = %spec.endpoint,
                status = raw.status.as_u16(),
                attempt = attempt,
                "Non-success status while polling"
            );
            let raw_response = raw.text();
            return Err(Error::HttpError {
                status: raw.status,
                raw_response,
                headers: raw.headers,
            });
        }
        let value = if raw.body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            codec.decode(&raw.body)?
        };
        if value.is_null() {
            tracing::debug!(
                endpoint = %spec.endpoint,
                status = raw.status.as_u16(),
                attempt = attempt,
                "No value in response while polling"
            );
            return Err(Error::EmptyBody {
                endpoint: spec.endpoint.clone(),
                status: raw.status,
            });
        }
        let data = codec::from_value(codec, value, &raw.body)?;
        Ok(Response::new(
            data,
            raw.text(),
            raw.status,
            raw.headers,
            raw.latency,
            attempt,
        ))
    }

    fn finish_poll<T, D>(
        &self,
        spec: &RequestSpec,
        outcome: std::result::Result<Polled<T>, PollFailure<T>>,
        describe: D,
    ) -> Result<Polled<T>>
    where
        D: Fn(&T) -> String,
    {
        match outcome {
            Ok(polled) => Ok(polled),
            Err(PollFailure::Fatal(e)) => Err(e),
            Err(PollFailure::Exhausted {
                attempts,
                faulted,
                last,
            }) => {
                let last_observed = match last {
                    Observed::Unsatisfied(value) => LastObserved::Unsatisfied(describe(&value)),
                    Observed::Fault(e) => LastObserved::Fault(Box::new(e)),
                };
                tracing::error!(
                    method = %spec.method,
                    endpoint = %spec.endpoint,
                    attempts = attempts,
                    faulted = faulted,
                    last_observed = %last_observed,
                    "Poll condition not met before retries ran out"
                );
                Err(Error::PollTimeout {
                    endpoint: spec.endpoint.clone(),
                    attempts,
                    faulted,
                    last_observed,
                })
            }
        }
    }

    /// Logs, executes and logs the failure of a single request.
    async fn dispatch(&self, spec: &RequestSpec) -> Result<RawResponse> {
        match &spec.payload {
            Some(payload) => tracing::debug!(
                method = %spec.method,
                endpoint = %spec.endpoint,
                payload = %payload,
                "Sending request"
            ),
            None => tracing::debug!(
                method = %spec.method,
                endpoint = %spec.endpoint,
                "Sending request"
            ),
        }

        let result = self.execute(spec).await;

        if let Err(e) = &result {
            match &spec.payload {
                Some(payload) => tracing::error!(
                    method = %spec.method,
                    endpoint = %spec.endpoint,
                    error = %e,
                    payload = %payload,
                    "Request failed"
                ),
                None => tracing::error!(
                    method = %spec.method,
                    endpoint = %spec.endpoint,
                    error = %e,
                    "Request failed"
                ),
            }
        }
        result
    }

    /// Builds and sends one request. No retries happen here.
    async fn execute(&self, spec: &RequestSpec) -> Result<RawResponse> {
        let url = self.endpoint_url(spec)?;

        // snapshot: later header changes do not touch this request
        let mut headers = self.inner.default_headers.read().clone();
        for (name, value) in &spec.headers {
            headers.append(name, value.clone());
        }

        let body = match &spec.payload {
            Some(Payload::Structured(value)) => {
                let codec = self.resolve_codec(spec);
                let media_type = spec
                    .media_type
                    .as_deref()
                    .unwrap_or_else(|| codec.media_type());
                Some((codec.encode(value)?, media_type_header(media_type)?))
            }
            Some(Payload::Raw { bytes, media_type }) => {
                Some((bytes.clone(), media_type_header(media_type)?))
            }
            None => None,
        };

        let mut request = self.inner.http_client.request(spec.method.clone(), url);
        if let Some((bytes, media_type)) = body {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, media_type);
            }
            request = request.body(bytes);
        }
        request = request.headers(headers);

        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        let start_time = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Error::from_transport(e, &spec.endpoint))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::from_transport(e, &spec.endpoint))?;
        let latency = start_time.elapsed();

        tracing::debug!(
            endpoint = %spec.endpoint,
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "Received HTTP response"
        );

        Ok(RawResponse::new(status, headers, body.to_vec(), url, latency))
    }

    fn endpoint_url(&self, spec: &RequestSpec) -> Result<Url> {
        let base = self.inner.base_url.as_str().trim_end_matches('/');
        let endpoint = spec.endpoint.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{endpoint}"))?;

        if !spec.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &spec.query_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

impl fmt::Debug for SmartClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("cookie_jar", &self.inner.cookie_jar)
            .field("retry_policy", &self.inner.retry_policy)
            .field("codec", &self.inner.codec)
            .finish_non_exhaustive()
    }
}

fn with_body<B>(spec: RequestSpec, body: &B) -> Result<RequestSpec>
where
    B: Serialize + ?Sized,
{
    let method = spec.method.clone();
    let endpoint = spec.endpoint.clone();
    spec.json(body).map_err(|e| {
        tracing::error!(
            method = %method,
            endpoint = %endpoint,
            error = %e,
            "Failed to serialize request body"
        );
        e
    })
}

fn media_type_header(media_type: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(media_type)
        .map_err(|e| Error::Configuration(format!("Invalid media type '{}': {}", media_type, e)))
}

/// Builder for configuring and creating a [`SmartClient`].
///
/// # Examples
///
/// ```no_run
/// use smarthttp::{codec::JsonCodec, ClientBuilder, RetryPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), smarthttp::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .cookie_jar(true)
///     .timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::new(20, Duration::from_millis(500))?)
///     .codec(Arc::new(JsonCodec::case_insensitive()))
///     .default_header("User-Agent", "integration-tests/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    cookie_jar: bool,
    codec: Arc<dyn Codec>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            cookie_jar: false,
            codec: Arc::new(JsonCodec::new()),
            retry_policy: RetryPolicy::default(),
            timeout: None,
            http_client: None,
        }
    }

    /// Sets the base URL all endpoints are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Keeps cookies between requests. Ignored when a transport is supplied
    /// with [`ClientBuilder::http_client`].
    pub fn cookie_jar(mut self, enabled: bool) -> Self {
        self.cookie_jar = enabled;
        self
    }

    /// Sets the codec used for bodies when a request carries none.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the policy polls use when a request carries none.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses an existing transport instead of building one.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Builds the configured `SmartClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or the transport cannot
    /// be built.
    pub fn build(self) -> Result<SmartClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;

        let (http_client, cookie_jar) = match self.http_client {
            Some(http_client) => (http_client, false),
            None => {
                let http_client = reqwest::Client::builder()
                    .cookie_store(self.cookie_jar)
                    .build()
                    .map_err(|e| {
                        Error::Configuration(format!("Failed to build HTTP client: {}", e))
                    })?;
                (http_client, self.cookie_jar)
            }
        };

        Ok(SmartClient {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                default_headers: RwLock::new(self.default_headers),
                cookie_jar,
                codec: self.codec,
                retry_policy: self.retry_policy,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
