//! Named clients shared across a test run.

use crate::client::{ClientBuilder, SmartClient};
use crate::codec::{Codec, JsonCodec};
use crate::config::{ClientSettings, Settings};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A concurrency-safe map from names to [`SmartClient`]s.
///
/// Every operation takes the lock once, so a lookup never sees a client
/// half inserted or half removed.
///
/// # Examples
///
/// ```no_run
/// use smarthttp::{ClientRegistry, Settings};
/// use http::StatusCode;
///
/// # async fn example() -> Result<(), smarthttp::Error> {
/// let registry = ClientRegistry::from_settings(&Settings::load()?)?;
///
/// let orders = registry.get_client("orders")?;
/// orders.get_and_wait_for_status("/health", StatusCode::OK).await?;
///
/// registry.dispose_all();
/// # Ok(())
/// # }
/// ```
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, SmartClient>>,
    codec: Arc<dyn Codec>,
    retry_policy: RetryPolicy,
}

impl ClientRegistry {
    /// An empty registry with default codec and policy.
    pub fn new() -> Self {
        Self::with_defaults(Arc::new(JsonCodec::new()), RetryPolicy::default())
    }

    /// An empty registry whose [`client_builder`](Self::client_builder)
    /// starts from `codec` and `retry_policy`.
    pub fn with_defaults(codec: Arc<dyn Codec>, retry_policy: RetryPolicy) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            codec,
            retry_policy,
        }
    }

    /// Builds every configured client.
    ///
    /// # Errors
    ///
    /// Fails on the first client that cannot be built (bad URL, bad header)
    /// or when the polling section is invalid. Nothing is registered then.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let registry = Self::with_defaults(settings.codec(), settings.retry_policy()?);

        let mut clients = HashMap::with_capacity(settings.clients.len());
        for (name, client_settings) in &settings.clients {
            let client = registry.build_client(client_settings).map_err(|e| {
                tracing::error!(client = %name, error = %e, "Failed to build configured client");
                e
            })?;
            clients.insert(name.clone(), client);
        }
        *registry.clients.write() = clients;

        tracing::info!(
            clients = settings.clients.len(),
            max_attempts = registry.retry_policy.max_attempts(),
            "Client registry initialized"
        );
        Ok(registry)
    }

    /// Loads [`Settings`] from the working directory and builds the registry.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`] and [`ClientRegistry::from_settings`].
    pub fn load() -> Result<Self> {
        Self::from_settings(&Settings::load()?)
    }

    /// A builder pre-seeded with the registry's codec and retry policy.
    pub fn client_builder(&self) -> ClientBuilder {
        SmartClient::builder()
            .codec(Arc::clone(&self.codec))
            .retry_policy(self.retry_policy)
    }

    /// Registers `client` under `name` unless the name is taken.
    ///
    /// A duplicate is logged and ignored; the registered client stays.
    pub fn add_client(&self, name: impl Into<String>, client: SmartClient) {
        let name = name.into();
        let mut clients = self.clients.write();
        if clients.contains_key(&name) {
            tracing::error!(client = %name, "Client already registered, ignoring");
            return;
        }
        tracing::info!(client = %name, base_url = %client.base_url(), "Client registered");
        clients.insert(name, client);
    }

    /// Removes and disposes the client registered under `name`.
    ///
    /// An unknown name is logged and ignored.
    pub fn remove_client(&self, name: &str) {
        match self.clients.write().remove(name) {
            Some(_) => tracing::info!(client = %name, "Client removed"),
            None => tracing::warn!(client = %name, "No client registered under this name"),
        }
    }

    /// Returns the client registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientNotFound`] if no client has that name.
    pub fn get_client(&self, name: &str) -> Result<SmartClient> {
        self.clients
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ClientNotFound {
                name: name.to_string(),
            })
    }

    /// Disposes every client and empties the registry.
    pub fn dispose_all(&self) {
        let disposed = std::mem::take(&mut *self.clients.write());
        if !disposed.is_empty() {
            tracing::info!(clients = disposed.len(), "Disposed all clients");
        }
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// `true` when no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// `true` when a client is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.clients.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn build_client(&self, settings: &ClientSettings) -> Result<SmartClient> {
        let mut builder = self
            .client_builder()
            .base_url(&settings.base_url)?
            .cookie_jar(settings.use_cookie_jar);
        if let Some(timeout) = settings.timeout() {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &settings.default_headers {
            builder = builder.default_header(name, value)?;
        }
        builder.build()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.names())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
