// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport abstraction for the connection core.
//!
//! The client drives a [`UaTransport`]: a byte-level connection that hands
//! out pooled send buffers and yields complete uatcp frames under a
//! deadline. The production implementation is
//! [`TcpTransport`](crate::client::tcp::TcpTransport); tests substitute
//! their own to observe buffer discipline and fault behavior.
//!
//! # Buffer ownership
//!
//! Every buffer acquired with [`UaTransport::get_send_buffer`] must be
//! either passed to [`UaTransport::send`] (which consumes it) or returned
//! via [`UaTransport::release_send_buffer`] — on every error path. The
//! transport may pool buffers; [`UaTransport::outstanding_send_buffers`]
//! exposes the live count so tests can assert the no-leak property.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::time::Instant;

use crate::error::ClientResult;
use crate::types::TcpConnectionConfig;

// =============================================================================
// ConnectionState
// =============================================================================

/// Lifecycle of the TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Closed,
    /// Socket connected, handshake not yet complete.
    Opening,
    /// Handshake complete; the transport carries channel traffic.
    Established,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::Opening => "Opening",
            Self::Established => "Established",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// SendBuffer
// =============================================================================

/// A pooled outgoing buffer.
///
/// Obtained from [`UaTransport::get_send_buffer`]; ownership transfers back
/// to the transport through `send` or `release_send_buffer`.
#[derive(Debug, Default)]
pub struct SendBuffer {
    /// The frame under construction.
    pub data: BytesMut,
}

impl SendBuffer {
    /// Creates a buffer with at least `capacity` bytes available.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }
}

// =============================================================================
// UaTransport
// =============================================================================

/// Byte-level transport the connection core drives.
#[async_trait]
pub trait UaTransport: Send {
    /// Returns the transport state.
    fn state(&self) -> ConnectionState;

    /// Updates the transport state.
    ///
    /// The HEL/ACK handshake marks the transport `Established` once the
    /// server's ACK has been applied.
    fn set_state(&mut self, state: ConnectionState);

    /// Acquires a send buffer with at least `min_size` bytes of capacity.
    fn get_send_buffer(&mut self, min_size: usize) -> ClientResult<SendBuffer>;

    /// Returns an unused buffer to the pool.
    fn release_send_buffer(&mut self, buffer: SendBuffer);

    /// Transmits a buffer, consuming it.
    async fn send(&mut self, buffer: SendBuffer) -> ClientResult<()>;

    /// Receives one complete uatcp frame (header included).
    ///
    /// Returns `Ok(None)` when the deadline expires before a complete frame
    /// arrives; frames larger than `max_message_size` are an error.
    async fn receive_message(
        &mut self,
        deadline: Instant,
        max_message_size: u32,
    ) -> ClientResult<Option<BytesMut>>;

    /// Closes the transport.
    async fn close(&mut self);

    /// Number of acquired-but-not-yet-consumed send buffers.
    fn outstanding_send_buffers(&self) -> usize;
}

// =============================================================================
// TransportConnector
// =============================================================================

/// Factory producing a transport for an endpoint url.
///
/// Implementations return the transport in the `Opening` state; the
/// connection core rejects anything else.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a transport to `endpoint_url` within `timeout`.
    async fn open(
        &self,
        config: &TcpConnectionConfig,
        endpoint_url: &str,
        timeout: Duration,
    ) -> ClientResult<Box<dyn UaTransport>>;
}
