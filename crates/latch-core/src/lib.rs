// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # latch-core
//!
//! Wire layer for the LATCH OPC UA client stack.
//!
//! This crate contains everything that touches bytes but never touches a
//! socket:
//!
//! - **Encoding**: OPC UA binary encoding primitives (little-endian integers,
//!   length-prefixed strings, `DateTime` ticks, node identifiers)
//! - **Transport**: the `uatcp` message layer — the 8-byte message header and
//!   the HEL/ACK/ERR connection-establishment messages
//! - **Status**: OPC UA status codes with symbolic names
//! - **Types**: the data model exchanged during connection establishment
//!   (endpoint descriptions, user token policies, and the service
//!   request/response pairs from GetEndpoints up to CloseSecureChannel)
//!
//! The secure-channel state machine, the TCP driver, and the cryptographic
//! policies live in `latch-client`; this crate is deliberately I/O-free so
//! the codec can be exercised byte-for-byte in unit tests.
//!
//! # Example
//!
//! ```
//! use latch_core::transport::HelloMessage;
//! use latch_core::encoding::BinaryEncodable;
//! use bytes::BytesMut;
//!
//! let hello = HelloMessage {
//!     protocol_version: 0,
//!     receive_buffer_size: 65_535,
//!     send_buffer_size: 65_535,
//!     max_message_size: 0,
//!     max_chunk_count: 0,
//!     endpoint_url: "opc.tcp://localhost:4840".to_string(),
//! };
//!
//! let mut buf = BytesMut::new();
//! hello.encode(&mut buf).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod encoding;
pub mod status;
pub mod transport;
pub mod types;

pub use encoding::{BinaryDecodable, BinaryEncodable, EncodingError, EncodingResult};
pub use status::StatusCode;
pub use transport::{
    AcknowledgeMessage, ChunkType, ErrorMessage, HelloMessage, MessageType, TcpMessageHeader,
    MESSAGE_HEADER_SIZE, MIN_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use types::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken,
    ApplicationDescription, ApplicationType, ChannelSecurityToken, CloseSecureChannelRequest,
    CloseSessionRequest, CloseSessionResponse, CreateSessionRequest, CreateSessionResponse,
    DiagnosticInfo, EndpointDescription, ExtensionBody, ExtensionObject, GetEndpointsRequest,
    GetEndpointsResponse, IssuedIdentityToken, LocalizedText, MessageSecurityMode, NodeId,
    NodeIdentifier, OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader,
    ResponseHeader, SecurityTokenRequestType, ServiceFault, SignatureData,
    SignedSoftwareCertificate, UserNameIdentityToken, UserTokenPolicy, UserTokenType,
    X509IdentityToken, BINARY_TRANSPORT_PROFILE_URI, SECURITY_POLICY_NONE_URI,
};
