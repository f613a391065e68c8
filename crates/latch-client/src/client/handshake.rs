// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! HEL/ACK transport handshake.
//!
//! The first exchange on a fresh TCP connection: the client offers its
//! buffer limits in a HEL message, the server answers with an ACK carrying
//! its own, and both sides continue with the negotiated minimum. The
//! message header is written last, once the body length is known.

use tokio::time::Instant;
use tracing::{debug, error};

use latch_core::encoding::{BinaryDecodable, BinaryEncodable};
use latch_core::transport::{
    AcknowledgeMessage, ChunkType, ErrorMessage, HelloMessage, MessageType, TcpMessageHeader,
    MIN_MESSAGE_SIZE,
};

use crate::channel::ChannelState;
use crate::error::{ClientError, ClientResult, CodecError, ConnectionError, TimeoutError};
use crate::types::TcpConnectionConfig;

use super::transport::ConnectionState;
use super::Client;

impl Client {
    /// Performs the HEL/ACK handshake on the open transport.
    ///
    /// On success the negotiated limits are installed on the channel and
    /// the transport is marked `Established`.
    pub(crate) async fn hel_ack_handshake(&mut self, endpoint_url: &str) -> ClientResult<()> {
        let local = self.config.connection;

        let Some(conn) = self.connection.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };

        // Encode the HEL body at offset 8, then patch the header.
        let mut buffer = conn.get_send_buffer(MIN_MESSAGE_SIZE as usize)?;
        let hello = HelloMessage {
            protocol_version: local.protocol_version,
            receive_buffer_size: local.recv_buffer_size,
            send_buffer_size: local.send_buffer_size,
            max_message_size: local.max_message_size,
            max_chunk_count: local.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        };

        buffer.data.clear();
        TcpMessageHeader::reserve(&mut buffer.data);
        if let Err(e) = hello.encode(&mut buffer.data) {
            conn.release_send_buffer(buffer);
            return Err(CodecError::encode(e).into());
        }
        TcpMessageHeader::finish(MessageType::Hel, ChunkType::Final, &mut buffer.data);

        if let Err(e) = conn.send(buffer).await {
            error!("Sending HEL failed");
            return Err(e);
        }
        debug!("Sent HEL message");
        self.channel.set_state(ChannelState::HelSent);

        // Block until a complete chunk arrives or the budget expires.
        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        let Some(conn) = self.connection.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        let frame = match conn
            .receive_message(deadline, local.recv_buffer_size)
            .await?
        {
            Some(frame) => frame,
            None => {
                error!("Receiving ACK message timed out");
                return Err(TimeoutError::Handshake { duration: timeout }.into());
            }
        };

        let mut buf = frame.freeze();
        let header = TcpMessageHeader::decode(&mut buf)?;
        match header.message_type {
            MessageType::Ack => {
                let ack = AcknowledgeMessage::decode(&mut buf).map_err(|e| {
                    error!("Decoding ACK message failed");
                    ClientError::from(e)
                })?;
                debug!("Received ACK message");
                self.apply_acknowledge(local, &ack)?;
                if let Some(conn) = self.connection.as_mut() {
                    conn.set_state(ConnectionState::Established);
                }
                Ok(())
            }
            MessageType::Err => {
                let error = ErrorMessage::decode(&mut buf)?;
                error!(status = %error.error, reason = %error.reason, "Server rejected the HEL message");
                Err(ClientError::service_fault(error.error))
            }
            other => Err(CodecError::UnexpectedMessage {
                expected: "ACK",
                actual: format!("{other:?}"),
            }
            .into()),
        }
    }

    /// Installs the negotiated limits on the channel.
    fn apply_acknowledge(
        &mut self,
        local: TcpConnectionConfig,
        ack: &AcknowledgeMessage,
    ) -> ClientResult<()> {
        let mut effective = local;
        effective.apply_acknowledge(ack);

        if effective.recv_buffer_size < MIN_MESSAGE_SIZE
            || effective.send_buffer_size < MIN_MESSAGE_SIZE
        {
            error!(
                recv = effective.recv_buffer_size,
                send = effective.send_buffer_size,
                "Negotiated buffer sizes fall below the 8192 byte minimum"
            );
            return Err(ClientError::invalid_state(
                "negotiated buffer sizes below the protocol minimum",
            ));
        }

        debug!(
            recv = effective.recv_buffer_size,
            send = effective.send_buffer_size,
            max_message = effective.max_message_size,
            max_chunks = effective.max_chunk_count,
            "Transport limits negotiated"
        );
        *self.channel.config_mut() = effective;
        Ok(())
    }
}
