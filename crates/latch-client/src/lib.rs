// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # latch-client
//!
//! OPC UA (IEC 62541) client connection core over the
//! `uatcp-uasc-uabinary` transport profile.
//!
//! The crate drives a client from a closed socket to an active
//! authenticated session through three stacked protocols:
//!
//! - **HEL/ACK**: transport handshake negotiating buffer limits
//! - **OPN**: asymmetrically protected secure-channel establishment, with
//!   periodic token renewal while connected
//! - **CreateSession / ActivateSession**: application-level session
//!   establishment, including endpoint discovery and selection when no
//!   endpoint is pre-configured
//!
//! Cryptographic policies, certificate verification, and the transport
//! factory are pluggable seams; the crate ships `SecurityPolicy#None`, an
//! accept-all verifier, and a tokio TCP transport.
//!
//! # Example
//!
//! ```rust,ignore
//! use latch_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .application_uri("urn:example:client")
//!         .build()?;
//!
//!     let mut client = Client::new(config);
//!     client.connect("opc.tcp://localhost:4840").await?;
//!
//!     // Pump the event loop while connected; this also keeps the
//!     // secure-channel token renewed.
//!     client.run_iterate(100).await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod error;
pub mod security;
pub mod types;

// Re-export commonly used types
pub use channel::{ChannelState, OpnGrant, SecureChannel, SymmetricMessage};
pub use client::tcp::{parse_endpoint_url, TcpConnector, TcpTransport};
pub use client::transport::{ConnectionState, SendBuffer, TransportConnector, UaTransport};
pub use client::Client;
pub use error::{
    ChannelError, ClientError, ClientResult, CodecError, ConfigurationError, ConnectionError,
    EndpointError, SecurityError, SessionError, TimeoutError,
};
pub use security::{
    AcceptAllVerification, CertificateVerification, ChannelKeys, PolicyNone, SecurityPolicy,
    LOCAL_NONCE_LENGTH, MAX_DATA_SIZE,
};
pub use types::{
    ClientConfig, ClientConfigBuilder, ClientState, StateCallback, TcpConnectionConfig,
    UserIdentityToken,
};
