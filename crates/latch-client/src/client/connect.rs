// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Top-level connector and disconnector.
//!
//! `connect` composes the layered handshakes: TCP, HEL/ACK, OPN, then
//! (when nothing is pre-selected) endpoint discovery, and finally the
//! session exchanges. When discovery selects a security policy other than
//! the one the channel was opened with, the connection is torn down and the
//! whole procedure restarts once — the second pass finds the endpoint
//! pre-selected and goes straight through.
//!
//! `disconnect` walks the layers in reverse, best-effort: CloseSession,
//! symmetric CLO, TCP close, then failing every outstanding exchange with
//! `BadShutdown` and wiping the channel's cryptographic state. It is
//! idempotent and safe to call from any state.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use latch_core::transport::{MessageType, PROTOCOL_VERSION};
use latch_core::types::{
    CloseSecureChannelRequest, CloseSessionRequest, MessageSecurityMode,
    OpenSecureChannelRequest, RequestHeader, SecurityTokenRequestType,
};
use latch_core::SECURITY_POLICY_NONE_URI;

use crate::error::{ChannelError, ClientError, ClientResult, ConnectionError, TimeoutError};
use crate::types::{ClientState, UserIdentityToken};

use super::transport::ConnectionState;
use super::{Client, ServiceKind};

/// Timeout hint placed in teardown request headers, milliseconds.
const CLOSE_TIMEOUT_HINT: u32 = 10_000;

/// What a connect attempt decided.
enum ConnectOutcome {
    /// The session is active (or the channel, for no-session connects).
    Done,
    /// Discovery selected a different security policy; reconnect.
    SwitchPolicy,
}

impl Client {
    // =========================================================================
    // Public API
    // =========================================================================

    /// Connects to `endpoint_url`: transport, secure channel, endpoint
    /// discovery when nothing is pre-selected, and session establishment.
    ///
    /// Returns immediately when the client is already connected. On any
    /// failure the client is torn down to `Disconnected` and the first
    /// failing status is surfaced.
    ///
    /// Re-activating a dormant session (the client still holds an
    /// authentication token) is supported, but subscription republish is
    /// not: publishes missed while the session was dormant are lost.
    pub async fn connect(&mut self, endpoint_url: &str) -> ClientResult<()> {
        let mut retries = 0u32;
        loop {
            if self.state() >= ClientState::Connected {
                return Ok(());
            }

            info!(endpoint = endpoint_url, "Connecting to endpoint");
            self.verify_application_uri();

            // Discovery runs only when neither endpoint nor token policy is
            // configured; after a policy switch the second pass skips it.
            let discover = self.config.needs_endpoint_discovery();

            match self.connect_attempt(endpoint_url, discover).await {
                Ok(ConnectOutcome::Done) => return Ok(()),
                Ok(ConnectOutcome::SwitchPolicy) => {
                    if retries >= 1 {
                        self.disconnect().await;
                        return Err(ClientError::invalid_state(
                            "security policy switching did not converge",
                        ));
                    }
                    info!("Disconnecting to switch to a different SecurityPolicy");
                    self.disconnect().await;
                    retries += 1;
                }
                Err(e) => {
                    self.disconnect().await;
                    return Err(e);
                }
            }
        }
    }

    /// Connects up to the secure channel and stops: no discovery, no
    /// session.
    pub async fn connect_no_session(&mut self, endpoint_url: &str) -> ClientResult<()> {
        self.connect_tcp_secure_channel(endpoint_url).await
    }

    /// Installs a username identity token, then connects.
    pub async fn connect_username(
        &mut self,
        endpoint_url: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<()> {
        self.config.user_identity = UserIdentityToken::UserName {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.connect(endpoint_url).await
    }

    /// Tears the connection down in reverse layer order.
    ///
    /// Best-effort and idempotent; errors from the close messages are
    /// swallowed because the link may already be broken.
    pub async fn disconnect(&mut self) {
        if self.state() >= ClientState::Session {
            self.set_state(ClientState::SecureChannel);
            self.send_close_session().await;
        }

        self.authentication_token = latch_core::NodeId::null();
        self.request_handle = 0;

        if self.state() >= ClientState::SecureChannel {
            self.set_state(ClientState::Connected);
            self.send_close_secure_channel().await;
        }

        if let Some(conn) = self.connection.as_mut() {
            if !matches!(
                conn.state(),
                ConnectionState::Closed | ConnectionState::Opening
            ) {
                conn.close().await;
            }
        }
        self.connection = None;

        self.fail_pending(latch_core::StatusCode::BAD_SHUTDOWN);
        self.channel.wipe();
        self.next_channel_renewal = None;
        self.endpoints_slot = None;
        self.session_server_nonce.clear();

        self.set_state(ClientState::Disconnected);
    }

    // =========================================================================
    // Connect phases
    // =========================================================================

    async fn connect_attempt(
        &mut self,
        endpoint_url: &str,
        discover: bool,
    ) -> ClientResult<ConnectOutcome> {
        self.connect_tcp_secure_channel(endpoint_url).await?;

        if discover {
            info!("Endpoint and UserTokenPolicy unconfigured, performing GetEndpoints");
            self.select_endpoint(endpoint_url).await?;

            let selected = self
                .config
                .endpoint
                .as_ref()
                .map(|e| e.security_policy_uri.clone())
                .unwrap_or_default();
            let bound = self
                .channel
                .security_policy()
                .map(|p| p.uri().to_string())
                .unwrap_or_default();
            if selected != bound {
                return Ok(ConnectOutcome::SwitchPolicy);
            }
        }

        self.connect_session().await?;
        Ok(ConnectOutcome::Done)
    }

    /// Opens TCP, performs HEL/ACK, and issues the secure channel.
    pub(crate) async fn connect_tcp_secure_channel(
        &mut self,
        endpoint_url: &str,
    ) -> ClientResult<()> {
        if self.state() >= ClientState::Connected {
            return Ok(());
        }

        if let Err(e) = self.establish_channel(endpoint_url).await {
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn establish_channel(&mut self, endpoint_url: &str) -> ClientResult<()> {
        self.channel.reset_for_connect(self.config.connection);
        self.request_id = 0;

        // Channel mode comes from the selected endpoint; an invalid or
        // absent mode falls back to None.
        let mode = self
            .config
            .endpoint
            .as_ref()
            .map(|e| e.security_mode)
            .filter(MessageSecurityMode::is_valid)
            .unwrap_or(MessageSecurityMode::None);
        self.channel.set_security_mode(mode);

        if self.channel.security_policy().is_none() {
            debug!("Initializing the SecurityPolicy context");
            let uri = match self
                .config
                .endpoint
                .as_ref()
                .filter(|e| !e.security_policy_uri.is_empty())
            {
                Some(endpoint) => endpoint.security_policy_uri.clone(),
                None => {
                    info!("SecurityPolicy not specified, using default #None");
                    SECURITY_POLICY_NONE_URI.to_string()
                }
            };

            let policy = self.config.security_policy(&uri).cloned().ok_or_else(|| {
                error!(policy = %uri, "Failed to find the required security policy");
                ClientError::channel(ChannelError::policy_not_available(uri.clone()))
            })?;
            let server_certificate = self
                .config
                .endpoint
                .as_ref()
                .map(|e| e.server_certificate.clone())
                .unwrap_or_default();
            self.channel.set_security_policy(policy, server_certificate);
        }

        // Open the TCP connection through the configured factory.
        let connector = self.config.connector.clone();
        let conn = connector
            .open(&self.config.connection, endpoint_url, self.config.timeout)
            .await?;
        if conn.state() != ConnectionState::Opening {
            error!("Opening the TCP socket failed");
            return Err(ConnectionError::closed(Some(
                "transport factory did not return an opening connection".to_string(),
            ))
            .into());
        }
        self.connection = Some(conn);
        info!("TCP connection established");

        if let Err(e) = self.hel_ack_handshake(endpoint_url).await {
            error!("HEL/ACK handshake failed");
            return Err(e);
        }
        self.set_state(ClientState::Connected);

        if let Err(e) = self.open_secure_channel(false).await {
            error!("Opening a secure channel failed");
            return Err(e);
        }
        Ok(())
    }

    /// Issues or renews the secure-channel token.
    pub(crate) async fn open_secure_channel(&mut self, renew: bool) -> ClientResult<()> {
        // Renewal short-circuits while the current token is still fresh.
        if renew {
            if let Some(due) = self.next_channel_renewal {
                if Instant::now() < due {
                    return Ok(());
                }
            }
        }

        let established = self
            .connection
            .as_ref()
            .map(|c| c.state() == ConnectionState::Established)
            .unwrap_or(false);
        if !established {
            return Err(ChannelError::TransportNotEstablished.into());
        }

        if let Err(e) = self.channel.regenerate_local_nonce() {
            error!("Generating a local nonce failed");
            return Err(e);
        }

        let request_type = if renew {
            debug!("Requesting to renew the SecureChannel");
            SecurityTokenRequestType::Renew
        } else {
            debug!("Requesting to open a SecureChannel");
            SecurityTokenRequestType::Issue
        };

        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(self.authentication_token.clone(), 0, 0),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.channel.security_mode(),
            client_nonce: self.channel.local_nonce().to_vec(),
            requested_lifetime: self.config.secure_channel_lifetime.as_millis() as u32,
        };

        self.request_id += 1;
        let request_id = self.request_id;
        let send_result = {
            let Some(conn) = self.connection.as_mut() else {
                return Err(ConnectionError::NotConnected.into());
            };
            self.channel
                .send_asymmetric_opn(conn.as_mut(), request_id, &request)
                .await
        };
        if let Err(e) = send_result {
            error!(error = %e, "Sending OPN message failed");
            self.disconnect().await;
            return Err(e);
        }
        debug!("OPN message sent");

        // Conservative renewal point: pushed out so publish responses racing
        // the OPN response cannot re-trigger renewal; the response handler
        // installs the real point afterwards.
        self.next_channel_renewal = Some(Instant::now() + 2 * self.config.timeout);

        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                return Err(TimeoutError::Channel { duration: timeout }.into());
            }
            self.receive_and_dispatch(deadline).await?;
            if self.state() >= ClientState::SecureChannel {
                break;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Teardown helpers
    // =========================================================================

    /// Sends CloseSession and waits briefly for the answer; failures are
    /// ignored.
    async fn send_close_session(&mut self) {
        let handle = self.next_request_handle();
        let request = CloseSessionRequest {
            request_header: RequestHeader::new(
                self.authentication_token.clone(),
                handle,
                CLOSE_TIMEOUT_HINT,
            ),
            delete_subscriptions: true,
        };

        self.close_session_done = false;
        if let Err(e) = self
            .send_service_request(
                CloseSessionRequest::type_id(),
                &request,
                ServiceKind::CloseSession,
            )
            .await
        {
            debug!(error = %e, "CloseSession could not be sent");
            return;
        }

        let deadline = Instant::now() + self.config.timeout;
        while !self.close_session_done {
            if Instant::now() >= deadline {
                break;
            }
            if self.receive_and_dispatch(deadline).await.is_err() {
                break;
            }
        }
    }

    /// Sends the symmetric CLO message and closes the channel; failures are
    /// ignored.
    async fn send_close_secure_channel(&mut self) {
        self.request_handle += 1;
        self.request_id += 1;
        let request = CloseSecureChannelRequest {
            request_header: RequestHeader::new(
                self.authentication_token.clone(),
                self.request_handle,
                CLOSE_TIMEOUT_HINT,
            ),
        };

        if let Some(conn) = self.connection.as_mut() {
            let result = self
                .channel
                .send_symmetric(
                    conn.as_mut(),
                    self.request_id,
                    MessageType::Clo,
                    CloseSecureChannelRequest::type_id(),
                    &request,
                )
                .await;
            if let Err(e) = result {
                debug!(error = %e, "CloseSecureChannel could not be sent");
            }
        }
        self.channel.close();
    }

    // =========================================================================
    // Certificate checks
    // =========================================================================

    /// Warns when a policy certificate does not embed the configured
    /// application uri. Observational only; never fails the connect.
    fn verify_application_uri(&self) {
        for policy in &self.config.security_policies {
            if self
                .config
                .certificate_verification
                .verify_application_uri(
                    policy.local_certificate(),
                    &self.config.client_description.application_uri,
                )
                .is_err()
            {
                warn!(
                    policy = policy.uri(),
                    application_uri = %self.config.client_description.application_uri,
                    "The configured ApplicationURI does not match the URI specified in the certificate for the SecurityPolicy"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientConfig;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_disconnect_is_idempotent_from_any_state() {
        let mut client = Client::new(ClientConfig::default());
        client.disconnect().await;
        assert_eq!(client.state(), ClientState::Disconnected);
        client.disconnect().await;
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_open_secure_channel_requires_transport() {
        let mut client = Client::new(ClientConfig::default());
        let result = client.open_secure_channel(false).await;
        assert!(matches!(
            result,
            Err(ClientError::Channel(ChannelError::TransportNotEstablished))
        ));
    }

    #[tokio::test]
    async fn test_renew_short_circuits_while_token_fresh() {
        let mut client = Client::new(ClientConfig::default());
        client.next_channel_renewal = Some(Instant::now() + Duration::from_secs(60));
        // No transport is attached; success proves the early return.
        client.open_secure_channel(true).await.unwrap();
    }
}
