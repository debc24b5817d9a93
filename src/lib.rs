//! # smarthttp - HTTP clients for integration tests
//!
//! smarthttp keeps a registry of named, configured HTTP clients and adds
//! poll-until-condition calls on top of plain request/response exchange, so
//! a test can wait for eventually-consistent server state without writing
//! its own wait loop.
//!
//! ## Quick Start
//!
//! ```no_run
//! use smarthttp::{ClientRegistry, RetryPolicy, SmartClient};
//! use http::StatusCode;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateExport {
//!     format: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct Export {
//!     id: u64,
//!     state: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), smarthttp::Error> {
//!     let registry = ClientRegistry::new();
//!     registry.add_client(
//!         "exports",
//!         registry
//!             .client_builder()
//!             .base_url("https://api.example.com")?
//!             .retry_policy(RetryPolicy::new(30, Duration::from_millis(500))?)
//!             .build()?,
//!     );
//!
//!     let client = registry.get_client("exports")?;
//!
//!     let created = client
//!         .post("/exports", &CreateExport { format: "csv".to_string() })
//!         .await?;
//!     created.validate_status(StatusCode::ACCEPTED)?;
//!     let export: Export = client.decode(&created)?;
//!
//!     let done = client
//!         .get_and_wait_for::<Export, _>(&format!("/exports/{}", export.id), |e| e.state == "done")
//!         .await?;
//!     println!("export ready after {} attempts", done.attempts);
//!
//!     registry.dispose_all();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`ClientRegistry::load`] builds clients from `test-settings.json` (or
//! `appsettings.json`) in the working directory. See [`config`] for the
//! file layout and the environment variables that override it.
//!
//! ## Polling
//!
//! Polls retry at a fixed interval until the condition holds or the
//! attempt budget is spent, then fail with [`Error::PollTimeout`] carrying
//! the last response or the last failure:
//!
//! ```no_run
//! use smarthttp::{Error, SmartClient};
//! use http::StatusCode;
//!
//! # async fn example(client: SmartClient) {
//! match client.get_and_wait_for_status("/health", StatusCode::OK).await {
//!     Ok(response) => println!("healthy: {}", response.text()),
//!     Err(Error::PollTimeout { attempts, last_observed, .. }) => {
//!         eprintln!("gave up after {attempts} attempts: {last_observed}");
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Logging
//!
//! Every request, retry and failure is reported through `tracing`. The
//! crate never installs a subscriber; install one in the test harness.

mod client;
pub mod codec;
pub mod config;
mod error;
mod registry;
mod request;
mod response;
pub mod retry;

pub use client::{ClientBuilder, SmartClient};
pub use codec::{Codec, JsonCodec};
pub use config::Settings;
pub use error::{Error, LastObserved, Result};
pub use registry::ClientRegistry;
pub use request::{Payload, RequestSpec};
pub use response::{RawResponse, Response};
pub use retry::RetryPolicy;
