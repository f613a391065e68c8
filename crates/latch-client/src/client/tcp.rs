// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP transport over tokio.
//!
//! [`TcpTransport`] implements [`UaTransport`] on a `tokio::net::TcpStream`:
//! it accumulates bytes until a complete uatcp frame (per the `messageSize`
//! header field) is available and recycles send buffers through a small
//! free list.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, trace};

use latch_core::transport::MESSAGE_HEADER_SIZE;

use crate::error::{ClientResult, CodecError, ConnectionError};
use crate::types::TcpConnectionConfig;

use super::transport::{ConnectionState, SendBuffer, TransportConnector, UaTransport};

/// Default OPC UA TCP port.
const DEFAULT_PORT: u16 = 4840;

// =============================================================================
// Endpoint url parsing
// =============================================================================

/// Splits an `opc.tcp://host:port/path` url into host and port.
pub fn parse_endpoint_url(url: &str) -> ClientResult<(String, u16)> {
    let rest = url.strip_prefix("opc.tcp://").ok_or_else(|| {
        ConnectionError::invalid_url(url, "expected scheme opc.tcp://")
    })?;

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ConnectionError::invalid_url(url, "missing host").into());
    }

    // IPv6 literals carry brackets: opc.tcp://[::1]:4840
    if let Some(v6) = authority.strip_prefix('[') {
        let (host, tail) = v6
            .split_once(']')
            .ok_or_else(|| ConnectionError::invalid_url(url, "unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| ConnectionError::invalid_url(url, "invalid port"))?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConnectionError::invalid_url(url, "invalid port"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), DEFAULT_PORT)),
    }
}

// =============================================================================
// TcpTransport
// =============================================================================

/// [`UaTransport`] over a tokio TCP stream.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    state: ConnectionState,
    recv: BytesMut,
    free_buffers: Vec<SendBuffer>,
    outstanding: usize,
    send_buffer_size: usize,
}

impl TcpTransport {
    /// Wraps a connected stream; the transport starts in `Opening`.
    pub fn new(stream: TcpStream, config: &TcpConnectionConfig) -> Self {
        Self {
            stream: Some(stream),
            state: ConnectionState::Opening,
            recv: BytesMut::with_capacity(config.recv_buffer_size as usize),
            free_buffers: Vec::new(),
            outstanding: 0,
            send_buffer_size: config.send_buffer_size as usize,
        }
    }

    fn stream_mut(&mut self) -> ClientResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    /// Extracts one complete frame from the accumulator, if present.
    fn take_frame(&mut self, max_message_size: u32) -> ClientResult<Option<BytesMut>> {
        if self.recv.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }
        let message_size =
            u32::from_le_bytes([self.recv[4], self.recv[5], self.recv[6], self.recv[7]]) as usize;

        if message_size < MESSAGE_HEADER_SIZE {
            return Err(CodecError::decode(latch_core::EncodingError::InvalidLength {
                length: message_size as i64,
            })
            .into());
        }
        if message_size > max_message_size as usize {
            return Err(CodecError::MessageTooLarge {
                size: message_size,
                limit: max_message_size as usize,
            }
            .into());
        }
        if self.recv.len() < message_size {
            return Ok(None);
        }
        Ok(Some(self.recv.split_to(message_size)))
    }
}

#[async_trait]
impl UaTransport for TcpTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    fn get_send_buffer(&mut self, min_size: usize) -> ClientResult<SendBuffer> {
        let capacity = min_size.max(self.send_buffer_size);
        let mut buffer = self
            .free_buffers
            .pop()
            .unwrap_or_else(|| SendBuffer::with_capacity(capacity));
        buffer.data.clear();
        buffer.data.reserve(capacity);
        self.outstanding += 1;
        Ok(buffer)
    }

    fn release_send_buffer(&mut self, buffer: SendBuffer) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.free_buffers.push(buffer);
    }

    async fn send(&mut self, buffer: SendBuffer) -> ClientResult<()> {
        let result = async {
            let stream = self.stream_mut()?;
            stream
                .write_all(&buffer.data)
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted => {
                        ConnectionError::closed(Some(e.to_string())).into()
                    }
                    _ => ConnectionError::io("send failed", e).into(),
                })
        }
        .await;

        trace!(bytes = buffer.data.len(), ok = result.is_ok(), "frame sent");
        // Send consumes the buffer regardless of outcome.
        self.release_send_buffer(buffer);
        result
    }

    async fn receive_message(
        &mut self,
        deadline: Instant,
        max_message_size: u32,
    ) -> ClientResult<Option<BytesMut>> {
        loop {
            if let Some(frame) = self.take_frame(max_message_size)? {
                return Ok(Some(frame));
            }

            let recv = &mut self.recv;
            let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
            let read = timeout_at(deadline, stream.read_buf(recv)).await;
            match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    self.state = ConnectionState::Closed;
                    return Err(ConnectionError::closed(Some("peer closed".to_string())).into());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    self.state = ConnectionState::Closed;
                    return Err(ConnectionError::io("receive failed", e).into());
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = ConnectionState::Closed;
        self.recv.clear();
        debug!("TCP transport closed");
    }

    fn outstanding_send_buffers(&self) -> usize {
        self.outstanding
    }
}

// =============================================================================
// TcpConnector
// =============================================================================

/// Default [`TransportConnector`] producing [`TcpTransport`] connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn open(
        &self,
        config: &TcpConnectionConfig,
        endpoint_url: &str,
        connect_timeout: Duration,
    ) -> ClientResult<Box<dyn UaTransport>> {
        let (host, port) = parse_endpoint_url(endpoint_url)?;
        let address = format!("{host}:{port}");

        let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Err(_) => {
                return Err(
                    ConnectionError::connect_timed_out(endpoint_url, connect_timeout).into(),
                )
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ConnectionError::Refused {
                    endpoint: endpoint_url.to_string(),
                    source: Some(e),
                }
                .into())
            }
            Ok(Err(e)) => return Err(ConnectionError::io("TCP connect failed", e).into()),
            Ok(Ok(stream)) => stream,
        };

        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::io("set_nodelay failed", e))?;

        debug!(endpoint = endpoint_url, %address, "TCP socket connected");
        Ok(Box::new(TcpTransport::new(stream, config)))
    }
}

// =============================================================================
// Tests
// =============================================================================
