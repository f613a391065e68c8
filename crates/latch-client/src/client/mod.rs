// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC UA client connection core.
//!
//! [`Client`] drives a connection from closed socket to active session
//! through three stacked protocols:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       connect / disconnect                      │
//! │     (composition, endpoint discovery, policy-switch restart)    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              CreateSession -> ActivateSession                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        OPN secure-channel establishment and renewal             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  HEL/ACK transport handshake                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core is cooperative and single-driver: it spawns no tasks, and every
//! blocking wait is an `await` bounded by a monotonic deadline. The caller
//! owns the client exclusively during a connect or disconnect sequence and
//! pumps [`Client::run_iterate`] while a session is active.

pub mod tcp;
pub mod transport;

mod connect;
mod endpoint;
mod handshake;
mod session;

use bytes::Bytes;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use latch_core::encoding::BinaryDecodable;
use latch_core::transport::{ErrorMessage, MessageType, TcpMessageHeader};
use latch_core::types::{
    ActivateSessionResponse, CloseSessionResponse, CreateSessionResponse, EndpointDescription,
    GetEndpointsResponse, NodeId, ServiceFault,
};
use latch_core::StatusCode;

use crate::channel::SecureChannel;
use crate::error::{ClientError, ClientResult, CodecError, ConnectionError};
use crate::types::{ClientConfig, ClientState};

use transport::UaTransport;

// =============================================================================
// Pending Services
// =============================================================================

/// Service exchanges the dispatch loop knows how to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    CreateSession,
    ActivateSession,
    GetEndpoints,
    CloseSession,
}

/// An in-flight request awaiting its response.
#[derive(Debug)]
struct PendingService {
    request_id: u32,
    kind: ServiceKind,
}

// =============================================================================
// Client
// =============================================================================

/// OPC UA client connection state machine.
pub struct Client {
    pub(crate) config: ClientConfig,
    state: ClientState,
    pub(crate) connection: Option<Box<dyn UaTransport>>,
    pub(crate) channel: SecureChannel,
    pub(crate) authentication_token: NodeId,
    pub(crate) request_id: u32,
    pub(crate) request_handle: u32,
    pub(crate) next_channel_renewal: Option<Instant>,
    pub(crate) connect_status: StatusCode,
    pending: Vec<PendingService>,
    pub(crate) session_server_nonce: Vec<u8>,
    pub(crate) endpoints_slot: Option<Result<Vec<EndpointDescription>, StatusCode>>,
    pub(crate) close_session_done: bool,
}

impl Client {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            connection: None,
            channel: SecureChannel::new(),
            authentication_token: NodeId::null(),
            request_id: 0,
            request_handle: 0,
            next_channel_renewal: None,
            connect_status: StatusCode::GOOD,
            pending: Vec::new(),
            session_server_nonce: Vec::new(),
            endpoints_slot: None,
            close_session_done: false,
        }
    }

    // =========================================================================
    // State register
    // =========================================================================

    /// Returns the connection phase.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Updates the connection phase, notifying the configured observer.
    ///
    /// Setting the current value again is a no-op and fires no callback.
    pub(crate) fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        trace!(old = %self.state, new = %state, "Client state changed");
        self.state = state;
        if let Some(callback) = self.config.state_callback.clone() {
            callback(state);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the secure channel.
    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    /// Returns the session authentication token; null when no session
    /// exists.
    pub fn authentication_token(&self) -> &NodeId {
        &self.authentication_token
    }

    /// Returns the status of the most recent asynchronous completion.
    pub fn connect_status(&self) -> StatusCode {
        self.connect_status
    }

    /// Returns the monotonic instant at which channel renewal is due.
    pub fn next_channel_renewal(&self) -> Option<Instant> {
        self.next_channel_renewal
    }

    /// Number of send buffers currently held by the core.
    pub fn outstanding_send_buffers(&self) -> usize {
        self.connection
            .as_ref()
            .map(|c| c.outstanding_send_buffers())
            .unwrap_or(0)
    }

    pub(crate) fn next_request_handle(&mut self) -> u32 {
        self.request_handle += 1;
        self.request_handle
    }

    // =========================================================================
    // Event iteration
    // =========================================================================

    /// Runs one iteration of the event loop.
    ///
    /// Triggers channel renewal when due, then drains at most one incoming
    /// frame, waiting up to `timeout_ms`. Returning without having received
    /// anything is not an error.
    pub async fn run_iterate(&mut self, timeout_ms: u16) -> ClientResult<()> {
        if self.state >= ClientState::SecureChannel && self.renewal_due() {
            self.open_secure_channel(true).await?;
        }

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        self.receive_and_dispatch(deadline).await
    }

    fn renewal_due(&self) -> bool {
        self.next_channel_renewal
            .map(|due| Instant::now() >= due)
            .unwrap_or(false)
    }

    /// Receives at most one frame before `deadline` and dispatches it.
    pub(crate) async fn receive_and_dispatch(&mut self, deadline: Instant) -> ClientResult<()> {
        let max_size = self.channel.config().recv_buffer_size;
        let Some(conn) = self.connection.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        let frame = match conn.receive_message(deadline, max_size).await? {
            None => return Ok(()),
            Some(frame) => frame,
        };

        let message_type = peek_message_type(&frame)?;
        match message_type {
            MessageType::Opn => {
                let grant = self.channel.process_opn_response(frame)?;
                // The proper renewal point replaces the conservative one set
                // when the OPN was transmitted.
                self.next_channel_renewal = Some(Instant::now() + grant.revised_lifetime * 3 / 4);
                if self.state < ClientState::SecureChannel {
                    self.set_state(ClientState::SecureChannel);
                }
                Ok(())
            }
            MessageType::Msg => {
                let message = self.channel.open_symmetric(frame)?;
                self.dispatch_response(message.request_id, message.type_id, message.body)
                    .await
            }
            MessageType::Clo => {
                warn!("Server closed the secure channel");
                self.channel.close();
                Err(ConnectionError::closed(Some("server sent CLO".to_string())).into())
            }
            MessageType::Err => {
                let mut buf = frame.freeze();
                let _header = TcpMessageHeader::decode(&mut buf)?;
                let error = ErrorMessage::decode(&mut buf)?;
                error!(status = %error.error, reason = %error.reason, "Received ERR message");
                self.connect_status = error.error;
                Err(ClientError::service_fault(error.error))
            }
            MessageType::Hel | MessageType::Ack => Err(CodecError::UnexpectedMessage {
                expected: "OPN, MSG, CLO or ERR",
                actual: format!("{message_type:?}"),
            }
            .into()),
        }
    }

    // =========================================================================
    // Response dispatch
    // =========================================================================

    /// Sends a service request over the open channel and registers it as
    /// pending.
    pub(crate) async fn send_service_request(
        &mut self,
        type_id: NodeId,
        body: &dyn latch_core::encoding::BinaryEncodable,
        kind: ServiceKind,
    ) -> ClientResult<()> {
        self.request_id += 1;
        let request_id = self.request_id;

        let Some(conn) = self.connection.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        self.channel
            .send_symmetric(conn.as_mut(), request_id, MessageType::Msg, type_id, body)
            .await?;

        self.pending.push(PendingService { request_id, kind });
        Ok(())
    }

    async fn dispatch_response(
        &mut self,
        request_id: u32,
        type_id: NodeId,
        mut body: Bytes,
    ) -> ClientResult<()> {
        let Some(index) = self.pending.iter().position(|p| p.request_id == request_id) else {
            debug!(request_id, type_id = %type_id, "Dropping unsolicited response");
            return Ok(());
        };
        let pending = self.pending.swap_remove(index);

        // A fault terminates the exchange whatever was expected.
        if type_id.namespace_index == 0 && type_id.as_numeric() == Some(ServiceFault::TYPE_ID) {
            let fault = ServiceFault::decode(&mut body)?;
            let status = fault.response_header.service_result;
            warn!(kind = ?pending.kind, status = %status, "Service returned a fault");
            self.complete_with_failure(pending.kind, status);
            return Ok(());
        }

        match pending.kind {
            ServiceKind::CreateSession => {
                let response = expect_response::<CreateSessionResponse>(&type_id, &mut body)?;
                self.on_create_session_response(response).await
            }
            ServiceKind::ActivateSession => {
                let response = expect_response::<ActivateSessionResponse>(&type_id, &mut body)?;
                self.on_activate_session_response(response);
                Ok(())
            }
            ServiceKind::GetEndpoints => {
                let response = expect_response::<GetEndpointsResponse>(&type_id, &mut body)?;
                let header = &response.response_header;
                self.endpoints_slot = Some(if header.service_result.is_bad() {
                    Err(header.service_result)
                } else {
                    Ok(response.endpoints)
                });
                Ok(())
            }
            ServiceKind::CloseSession => {
                let _ = CloseSessionResponse::decode(&mut body);
                self.close_session_done = true;
                Ok(())
            }
        }
    }

    /// Records the failure of a pending exchange.
    fn complete_with_failure(&mut self, kind: ServiceKind, status: StatusCode) {
        match kind {
            ServiceKind::CreateSession | ServiceKind::ActivateSession => {
                self.connect_status = status;
            }
            ServiceKind::GetEndpoints => {
                self.endpoints_slot = Some(Err(status));
            }
            ServiceKind::CloseSession => {
                self.close_session_done = true;
            }
        }
    }

    /// Fails every outstanding exchange, used during teardown.
    pub(crate) fn fail_pending(&mut self, status: StatusCode) {
        for pending in std::mem::take(&mut self.pending) {
            debug!(kind = ?pending.kind, status = %status, "Failing outstanding service");
            self.complete_with_failure(pending.kind, status);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("request_id", &self.request_id)
            .field("request_handle", &self.request_handle)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn peek_message_type(frame: &[u8]) -> ClientResult<MessageType> {
    if frame.len() < 4 {
        return Err(CodecError::decode(latch_core::EncodingError::BufferExhausted {
            needed: 4 - frame.len(),
        })
        .into());
    }
    let word = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    MessageType::from_code(word).ok_or_else(|| {
        CodecError::UnexpectedMessage {
            expected: "a uatcp message type",
            actual: format!("{word:#010x}"),
        }
        .into()
    })
}

/// Decodes the expected response type, enforcing the type id.
fn expect_response<T>(type_id: &NodeId, body: &mut Bytes) -> ClientResult<T>
where
    T: BinaryDecodable + ExpectedTypeId,
{
    if type_id.namespace_index != 0 || type_id.as_numeric() != Some(T::EXPECTED_TYPE_ID) {
        return Err(CodecError::UnexpectedMessage {
            expected: T::NAME,
            actual: type_id.to_string(),
        }
        .into());
    }
    Ok(T::decode(body)?)
}

/// Compile-time binding between a response struct and its type id.
trait ExpectedTypeId {
    const EXPECTED_TYPE_ID: u32;
    const NAME: &'static str;
}

macro_rules! expected_type_id {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl ExpectedTypeId for $ty {
                const EXPECTED_TYPE_ID: u32 = $ty::TYPE_ID;
                const NAME: &'static str = stringify!($ty);
            }
        )+
    };
}

expected_type_id!(
    CreateSessionResponse,
    ActivateSessionResponse,
    GetEndpointsResponse,
    CloseSessionResponse,
);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_state_register_no_op_and_callback() {
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        let config = ClientConfig::builder()
            .state_callback(Arc::new(move |_state| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .unwrap();

        let mut client = Client::new(config);
        assert_eq!(client.state(), ClientState::Disconnected);

        // Same value: no callback.
        client.set_state(ClientState::Disconnected);
        assert_eq!(observed.load(Ordering::SeqCst), 0);

        client.set_state(ClientState::Connected);
        client.set_state(ClientState::SecureChannel);
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_peek_message_type() {
        let mut frame = vec![0u8; 8];
        frame[0] = b'M';
        frame[1] = b'S';
        frame[2] = b'G';
        frame[3] = b'F';
        assert_eq!(peek_message_type(&frame).unwrap(), MessageType::Msg);

        assert!(peek_message_type(&[0u8; 2]).is_err());
        assert!(peek_message_type(&[0xFF; 8]).is_err());
    }

    #[test]
    fn test_fail_pending_routes_by_kind() {
        let mut client = Client::new(ClientConfig::default());
        client.pending.push(PendingService {
            request_id: 1,
            kind: ServiceKind::CreateSession,
        });
        client.pending.push(PendingService {
            request_id: 2,
            kind: ServiceKind::GetEndpoints,
        });

        client.fail_pending(StatusCode::BAD_SHUTDOWN);

        assert!(client.pending.is_empty());
        assert_eq!(client.connect_status, StatusCode::BAD_SHUTDOWN);
        assert!(matches!(
            client.endpoints_slot,
            Some(Err(StatusCode::BAD_SHUTDOWN))
        ));
    }

    #[test]
    fn test_request_handle_monotonic() {
        let mut client = Client::new(ClientConfig::default());
        let first = client.next_request_handle();
        let second = client.next_request_handle();
        assert!(second > first);
    }
}
