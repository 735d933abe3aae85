//! # Courier Transport
//!
//! I/O hooks that connect Courier pipelines to real HTTP traffic.
//!
//! | Side | Entry point | Backed by |
//! |------|-------------|-----------|
//! | client | [`HttpClient::protocol`], [`protocol`] (shared client) | `reqwest` |
//! | server | [`ServerExchange`], [`serve`] | `http` request/response types |
//!
//! The pipeline core never touches sockets; everything here lives in the two
//! I/O hooks each protocol needs.
//!
//! ## Example
//!
//! ```no_run
//! use courier_transport::{init_shared_client, protocol, ClientConfig};
//! use http::Method;
//! use serde_json::{json, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let _guard = init_shared_client(&ClientConfig::default())?;
//!
//! let mut client = protocol(Method::POST, "http://billing.internal/charge")?;
//! let reply: Value = client.call(&json!({"amount": 10})).await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/courier-transport/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod server;

pub use client::{
    init_shared_client, protocol, shared_client, shutdown_shared_client, ClientConfig, HttpClient,
    SharedClientGuard, DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_POOL_MAX_IDLE_PER_HOST, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};
pub use error::{TransportError, TransportResult};
pub use server::{serve, ServerExchange, ServerOptions};
