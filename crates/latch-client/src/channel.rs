// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure-channel state and framing.
//!
//! [`SecureChannel`] owns the channel-scoped state: the bound security
//! policy, the nonces, the security token, and the sequence numbers. It
//! produces the asymmetric OPN frame, consumes the OPN response, and frames
//! symmetric MSG/CLO traffic. Cryptographic transforms are delegated to the
//! bound [`SecurityPolicy`]; with `PolicyNone` the framing is plaintext.
//!
//! Invariants upheld here:
//!
//! - a fresh local nonce is generated for every OPN, issue and renew alike
//! - the sequence number increases by one per chunk sent, OPN included
//! - `wipe` overwrites nonces and derived keys before releasing them

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use latch_core::encoding::{BinaryDecodable, BinaryEncodable};
use latch_core::transport::{ChunkType, MessageType, TcpMessageHeader, MIN_MESSAGE_SIZE};
use latch_core::types::{
    ChannelSecurityToken, MessageSecurityMode, NodeId, OpenSecureChannelRequest,
    OpenSecureChannelResponse, ServiceFault,
};

use crate::client::transport::{SendBuffer, UaTransport};
use crate::error::{ChannelError, ClientError, ClientResult, CodecError};
use crate::security::{ChannelKeys, SecurityPolicy, LOCAL_NONCE_LENGTH};
use crate::types::TcpConnectionConfig;

// =============================================================================
// ChannelState
// =============================================================================

/// Lifecycle of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ChannelState {
    /// Initialized, nothing sent.
    #[default]
    Fresh,
    /// HEL sent, waiting for ACK.
    HelSent,
    /// OPN sent, waiting for the security token.
    OpnSent,
    /// Token granted; symmetric traffic may flow.
    Open,
    /// Closed; cryptographic state wiped.
    Closed,
}

// =============================================================================
// OpnGrant / SymmetricMessage
// =============================================================================

/// Outcome of a processed OPN response.
#[derive(Debug, Clone)]
pub struct OpnGrant {
    /// Token lifetime granted by the server.
    pub revised_lifetime: Duration,
    /// `true` if this grant renewed an existing token.
    pub renewed: bool,
}

/// A decoded symmetric message.
#[derive(Debug)]
pub struct SymmetricMessage {
    /// Message type of the frame (MSG or CLO).
    pub message_type: MessageType,
    /// Request id from the sequence header.
    pub request_id: u32,
    /// DefaultBinary type id of the body.
    pub type_id: NodeId,
    /// The body, positioned after the type id.
    pub body: Bytes,
}

// =============================================================================
// SecureChannel
// =============================================================================

/// Client-side secure-channel state.
#[derive(Default)]
pub struct SecureChannel {
    state: ChannelState,
    security_mode: MessageSecurityMode,
    security_policy: Option<Arc<dyn SecurityPolicy>>,
    remote_certificate: Vec<u8>,
    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,
    security_token: ChannelSecurityToken,
    previous_token_id: Option<u32>,
    send_sequence_number: u32,
    recv_sequence_number: u32,
    keys: ChannelKeys,
    config: TcpConnectionConfig,
}

impl SecureChannel {
    /// Creates a fresh channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-initializes the channel for a new connect attempt.
    ///
    /// The bound security policy survives; everything token-related resets.
    pub fn reset_for_connect(&mut self, config: TcpConnectionConfig) {
        self.state = ChannelState::Fresh;
        self.security_token = ChannelSecurityToken::default();
        self.security_token.channel_id = 0;
        self.previous_token_id = None;
        self.send_sequence_number = 0;
        self.recv_sequence_number = 0;
        self.config = config;
    }

    /// Returns the channel state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    /// Returns `true` if symmetric traffic may flow.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Returns the channel security mode.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    /// Sets the channel security mode.
    pub fn set_security_mode(&mut self, mode: MessageSecurityMode) {
        self.security_mode = mode;
    }

    /// Returns the bound security policy, if any.
    pub fn security_policy(&self) -> Option<&Arc<dyn SecurityPolicy>> {
        self.security_policy.as_ref()
    }

    /// Binds a security policy and the server certificate it talks to.
    pub fn set_security_policy(
        &mut self,
        policy: Arc<dyn SecurityPolicy>,
        remote_certificate: Vec<u8>,
    ) {
        debug!(policy = policy.uri(), "Binding channel security policy");
        self.security_policy = Some(policy);
        self.remote_certificate = remote_certificate;
    }

    /// Returns the current security token.
    pub fn security_token(&self) -> &ChannelSecurityToken {
        &self.security_token
    }

    /// Returns the current local nonce; empty after a wipe.
    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    /// Returns the derived channel keys; empty for `PolicyNone` and after a
    /// wipe.
    pub fn keys(&self) -> &ChannelKeys {
        &self.keys
    }

    /// Returns the negotiated transport limits.
    pub fn config(&self) -> &TcpConnectionConfig {
        &self.config
    }

    /// Returns the negotiated transport limits mutably.
    pub fn config_mut(&mut self) -> &mut TcpConnectionConfig {
        &mut self.config
    }

    /// Generates a fresh local nonce via the bound policy.
    pub fn regenerate_local_nonce(&mut self) -> ClientResult<()> {
        let policy = self.require_policy()?;
        let mut nonce = vec![0u8; LOCAL_NONCE_LENGTH];
        policy.generate_nonce(&mut nonce)?;
        self.local_nonce = nonce;
        Ok(())
    }

    fn require_policy(&self) -> ClientResult<Arc<dyn SecurityPolicy>> {
        self.security_policy
            .clone()
            .ok_or_else(|| ClientError::invalid_state("no security policy bound to the channel"))
    }

    // =========================================================================
    // Asymmetric OPN path
    // =========================================================================

    /// Encodes, protects, and transmits an OPN request.
    pub async fn send_asymmetric_opn(
        &mut self,
        conn: &mut dyn UaTransport,
        request_id: u32,
        request: &OpenSecureChannelRequest,
    ) -> ClientResult<()> {
        let policy = self.require_policy()?;
        let mut buffer = conn.get_send_buffer(MIN_MESSAGE_SIZE as usize)?;

        if let Err(e) = self.build_opn_frame(&policy, request_id, request, &mut buffer.data) {
            conn.release_send_buffer(buffer);
            return Err(e);
        }

        match policy.protect_chunk(
            self.security_mode,
            &self.keys,
            mem::take(&mut buffer.data),
        ) {
            Ok(frame) => buffer.data = frame,
            Err(e) => {
                conn.release_send_buffer(buffer);
                return Err(e);
            }
        }

        TcpMessageHeader::finish(MessageType::Opn, ChunkType::Final, &mut buffer.data);

        if buffer.data.len() > self.config.send_buffer_size as usize {
            let size = buffer.data.len();
            conn.release_send_buffer(buffer);
            return Err(CodecError::MessageTooLarge {
                size,
                limit: self.config.send_buffer_size as usize,
            }
            .into());
        }

        conn.send(buffer).await?;
        self.state = ChannelState::OpnSent;
        Ok(())
    }

    fn build_opn_frame(
        &mut self,
        policy: &Arc<dyn SecurityPolicy>,
        request_id: u32,
        request: &OpenSecureChannelRequest,
        frame: &mut BytesMut,
    ) -> ClientResult<()> {
        self.send_sequence_number += 1;
        encode_opn_frame(
            self.security_token.channel_id,
            policy.as_ref(),
            &self.remote_certificate,
            self.send_sequence_number,
            request_id,
            request,
            frame,
        )
        .map_err(|e| ClientError::Encoding(CodecError::encode(e)))
    }

    /// Consumes an OPN response frame and installs the granted token.
    pub fn process_opn_response(&mut self, frame: BytesMut) -> ClientResult<OpnGrant> {
        let policy = self.require_policy()?;
        let mut buf = frame.freeze();

        let header = TcpMessageHeader::decode(&mut buf)?;
        if header.message_type != MessageType::Opn {
            return Err(CodecError::UnexpectedMessage {
                expected: "OPN",
                actual: format!("{:?}", header.message_type),
            }
            .into());
        }

        let channel_id = u32::decode(&mut buf)?;
        let policy_uri = String::decode(&mut buf)?;
        let _sender_certificate = Vec::<u8>::decode(&mut buf)?;
        let _receiver_thumbprint = Vec::<u8>::decode(&mut buf)?;

        if policy_uri != policy.uri() {
            return Err(ChannelError::policy_mismatch(policy.uri(), policy_uri).into());
        }

        let protected = BytesMut::from(&buf[..]);
        let plain = policy.unprotect_chunk(self.security_mode, &self.keys, protected)?;
        let mut body = plain.freeze();

        self.recv_sequence_number = u32::decode(&mut body)?;
        let _request_id = u32::decode(&mut body)?;

        let type_id = NodeId::decode(&mut body)?;
        if type_id.as_numeric() == Some(ServiceFault::TYPE_ID) && type_id.namespace_index == 0 {
            let fault = ServiceFault::decode(&mut body)?;
            return Err(ClientError::service_fault(
                fault.response_header.service_result,
            ));
        }
        if type_id != OpenSecureChannelResponse::type_id() {
            return Err(CodecError::UnexpectedMessage {
                expected: "OpenSecureChannelResponse",
                actual: type_id.to_string(),
            }
            .into());
        }

        let response = OpenSecureChannelResponse::decode(&mut body)?;
        if response.response_header.service_result.is_bad() {
            return Err(ClientError::service_fault(
                response.response_header.service_result,
            ));
        }

        let renewed = self.security_token.token_id != 0;
        if renewed {
            self.previous_token_id = Some(self.security_token.token_id);
        }
        if channel_id != response.security_token.channel_id {
            warn!(
                header_channel = channel_id,
                token_channel = response.security_token.channel_id,
                "OPN response header and token disagree on the channel id"
            );
        }

        self.security_token = response.security_token;
        self.remote_nonce = response.server_nonce;
        self.keys = policy.derive_keys(&self.local_nonce, &self.remote_nonce)?;
        self.state = ChannelState::Open;

        debug!(
            channel_id = self.security_token.channel_id,
            token_id = self.security_token.token_id,
            lifetime_ms = self.security_token.revised_lifetime,
            renewed,
            "Secure channel token installed"
        );

        Ok(OpnGrant {
            revised_lifetime: Duration::from_millis(u64::from(
                self.security_token.revised_lifetime,
            )),
            renewed,
        })
    }

    // =========================================================================
    // Symmetric path
    // =========================================================================

    /// Encodes, protects, and transmits a symmetric MSG or CLO frame.
    pub async fn send_symmetric(
        &mut self,
        conn: &mut dyn UaTransport,
        request_id: u32,
        message_type: MessageType,
        type_id: NodeId,
        body: &dyn BinaryEncodable,
    ) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen.into());
        }
        let policy = self.require_policy()?;
        let mut buffer = conn.get_send_buffer(MIN_MESSAGE_SIZE as usize)?;

        self.send_sequence_number += 1;
        if let Err(e) = encode_symmetric_frame(
            self.security_token.channel_id,
            self.security_token.token_id,
            self.send_sequence_number,
            request_id,
            &type_id,
            body,
            &mut buffer.data,
        ) {
            conn.release_send_buffer(buffer);
            return Err(ClientError::Encoding(CodecError::encode(e)));
        }

        match policy.protect_chunk(
            self.security_mode,
            &self.keys,
            mem::take(&mut buffer.data),
        ) {
            Ok(frame) => buffer.data = frame,
            Err(e) => {
                conn.release_send_buffer(buffer);
                return Err(e);
            }
        }

        TcpMessageHeader::finish(message_type, ChunkType::Final, &mut buffer.data);

        if buffer.data.len() > self.config.send_buffer_size as usize {
            let size = buffer.data.len();
            conn.release_send_buffer(buffer);
            return Err(CodecError::MessageTooLarge {
                size,
                limit: self.config.send_buffer_size as usize,
            }
            .into());
        }

        conn.send(buffer).await
    }

    /// Decodes and unprotects an incoming symmetric frame.
    pub fn open_symmetric(&mut self, frame: BytesMut) -> ClientResult<SymmetricMessage> {
        let policy = self.require_policy()?;
        let mut buf = frame.freeze();

        let header = TcpMessageHeader::decode(&mut buf)?;
        let channel_id = u32::decode(&mut buf)?;
        if channel_id != self.security_token.channel_id {
            return Err(ChannelError::UnknownChannelId { channel_id }.into());
        }

        let token_id = u32::decode(&mut buf)?;
        if token_id != self.security_token.token_id && Some(token_id) != self.previous_token_id {
            return Err(ChannelError::UnknownTokenId { token_id }.into());
        }

        let protected = BytesMut::from(&buf[..]);
        let plain = policy.unprotect_chunk(self.security_mode, &self.keys, protected)?;
        let mut body = plain.freeze();

        self.recv_sequence_number = u32::decode(&mut body)?;
        let request_id = u32::decode(&mut body)?;
        let type_id = NodeId::decode(&mut body)?;

        Ok(SymmetricMessage {
            message_type: header.message_type,
            request_id,
            type_id,
            body,
        })
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Marks the channel closed.
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Overwrites and releases all cryptographic state and unbinds the
    /// policy.
    pub fn wipe(&mut self) {
        self.local_nonce.fill(0);
        self.local_nonce.clear();
        self.remote_nonce.fill(0);
        self.remote_nonce.clear();
        self.keys.wipe();
        self.remote_certificate.clear();
        self.security_policy = None;
        self.security_token = ChannelSecurityToken::default();
        self.security_token.channel_id = 0;
        self.previous_token_id = None;
        self.send_sequence_number = 0;
        self.recv_sequence_number = 0;
        self.state = ChannelState::Closed;
    }
}

// =============================================================================
// Frame builders
// =============================================================================

fn encode_opn_frame(
    channel_id: u32,
    policy: &dyn SecurityPolicy,
    remote_certificate: &[u8],
    sequence_number: u32,
    request_id: u32,
    request: &OpenSecureChannelRequest,
    frame: &mut BytesMut,
) -> latch_core::EncodingResult<()> {
    frame.clear();
    TcpMessageHeader::reserve(frame);

    // Asymmetric security header.
    channel_id.encode(frame)?;
    policy.uri().encode(frame)?;
    policy.local_certificate().encode(frame)?;
    policy
        .remote_certificate_thumbprint(remote_certificate)
        .encode(frame)?;

    // Sequence header.
    sequence_number.encode(frame)?;
    request_id.encode(frame)?;

    // Body.
    OpenSecureChannelRequest::type_id().encode(frame)?;
    request.encode(frame)
}

fn encode_symmetric_frame(
    channel_id: u32,
    token_id: u32,
    sequence_number: u32,
    request_id: u32,
    type_id: &NodeId,
    body: &dyn BinaryEncodable,
    frame: &mut BytesMut,
) -> latch_core::EncodingResult<()> {
    frame.clear();
    TcpMessageHeader::reserve(frame);

    // Symmetric security header.
    channel_id.encode(frame)?;
    token_id.encode(frame)?;

    // Sequence header.
    sequence_number.encode(frame)?;
    request_id.encode(frame)?;

    type_id.encode(frame)?;
    body.encode(frame)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PolicyNone;

    fn bound_channel() -> SecureChannel {
        let mut channel = SecureChannel::new();
        channel.reset_for_connect(TcpConnectionConfig::default());
        channel.set_security_mode(MessageSecurityMode::None);
        channel.set_security_policy(Arc::new(PolicyNone), Vec::new());
        channel
    }

    #[test]
    fn test_nonce_regenerated_per_opn() {
        let mut channel = bound_channel();
        channel.regenerate_local_nonce().unwrap();
        let first = channel.local_nonce().to_vec();
        assert_eq!(first.len(), LOCAL_NONCE_LENGTH);

        channel.regenerate_local_nonce().unwrap();
        assert_eq!(channel.local_nonce().len(), LOCAL_NONCE_LENGTH);
        assert_ne!(channel.local_nonce(), &first[..]);
    }

    #[test]
    fn test_nonce_requires_policy() {
        let mut channel = SecureChannel::new();
        assert!(channel.regenerate_local_nonce().is_err());
    }

    #[test]
    fn test_wipe_zeroes_and_unbinds() {
        let mut channel = bound_channel();
        channel.regenerate_local_nonce().unwrap();
        channel.wipe();

        assert!(channel.local_nonce().is_empty());
        assert!(channel.keys().is_empty());
        assert!(channel.security_policy().is_none());
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.security_token().token_id, 0);
    }

    #[test]
    fn test_symmetric_rejects_unopened_channel() {
        let mut channel = bound_channel();
        // Hand-build a frame claiming the right channel id but wrong token.
        let mut frame = BytesMut::new();
        TcpMessageHeader::reserve(&mut frame);
        0u32.encode(&mut frame).unwrap();
        99u32.encode(&mut frame).unwrap();
        1u32.encode(&mut frame).unwrap();
        1u32.encode(&mut frame).unwrap();
        NodeId::numeric(0, 0).encode(&mut frame).unwrap();
        TcpMessageHeader::finish(MessageType::Msg, ChunkType::Final, &mut frame);

        let result = channel.open_symmetric(frame);
        assert!(matches!(
            result,
            Err(ClientError::Channel(ChannelError::UnknownTokenId { token_id: 99 }))
        ));
    }

    #[test]
    fn test_symmetric_rejects_unknown_channel_id() {
        let mut channel = bound_channel();
        let mut frame = BytesMut::new();
        TcpMessageHeader::reserve(&mut frame);
        7u32.encode(&mut frame).unwrap();
        0u32.encode(&mut frame).unwrap();
        1u32.encode(&mut frame).unwrap();
        1u32.encode(&mut frame).unwrap();
        NodeId::numeric(0, 0).encode(&mut frame).unwrap();
        TcpMessageHeader::finish(MessageType::Msg, ChunkType::Final, &mut frame);

        let result = channel.open_symmetric(frame);
        assert!(matches!(
            result,
            Err(ClientError::Channel(ChannelError::UnknownChannelId { channel_id: 7 }))
        ));
    }
}
