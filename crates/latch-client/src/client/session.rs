// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session establishment.
//!
//! With a secure channel open, the client either creates a fresh session
//! (CreateSession, whose completion chains ActivateSession) or, when an
//! authentication token from an earlier session is still known, activates
//! that session directly. Both requests are submitted asynchronously; the
//! caller then iterates the event loop until the session is active or the
//! deadline expires.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use latch_core::types::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken, CreateSessionRequest,
    CreateSessionResponse, ExtensionObject, IssuedIdentityToken, NodeId, RequestHeader,
    SignatureData, UserNameIdentityToken, X509IdentityToken,
};
use latch_core::{StatusCode, SECURITY_POLICY_NONE_URI};

use crate::error::{ClientResult, CodecError, SessionError, TimeoutError};
use crate::types::{ClientState, UserIdentityToken};

use super::{Client, ServiceKind};

impl Client {
    /// Drives the client from `SecureChannel` to `Session`.
    pub(crate) async fn connect_session(&mut self) -> ClientResult<()> {
        if self.state() < ClientState::SecureChannel {
            return Err(SessionError::NoSecureChannel.into());
        }

        self.connect_status = StatusCode::GOOD;

        // A known authentication token means a dormant session can be
        // re-activated directly. Subscription republish is not implemented,
        // so publishes missed while dormant are lost.
        if self.authentication_token.is_null() {
            self.create_session_async().await?;
        } else {
            self.activate_session_async().await?;
        }

        // Iterate until the session is activated or the budget expires.
        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        while self.state() != ClientState::Session {
            let now = Instant::now();
            if now >= deadline {
                return Err(TimeoutError::Session { duration: timeout }.into());
            }

            let remaining_ms = (deadline - now).as_millis().min(u128::from(u16::MAX)) as u16;
            self.run_iterate(remaining_ms).await?;

            if self.connect_status.is_bad() {
                return Err(SessionError::Aborted {
                    status: self.connect_status,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Submits CreateSession; its completion chains ActivateSession.
    pub(crate) async fn create_session_async(&mut self) -> ClientResult<()> {
        let endpoint_url = self
            .config
            .endpoint
            .as_ref()
            .map(|e| e.endpoint_url.clone())
            .unwrap_or_default();
        let client_certificate = self
            .channel
            .security_policy()
            .map(|p| p.local_certificate().to_vec())
            .unwrap_or_default();

        let handle = self.next_request_handle();
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(
                NodeId::null(),
                handle,
                self.config.timeout.as_millis() as u32,
            ),
            client_description: self.config.client_description.clone(),
            server_uri: String::new(),
            endpoint_url,
            session_name: self.config.session_name.clone(),
            client_nonce: self.channel.local_nonce().to_vec(),
            client_certificate,
            requested_session_timeout: self.config.session_timeout.as_millis() as f64,
            max_response_message_size: 0,
        };

        debug!(session_name = %request.session_name, "Requesting CreateSession");
        self.send_service_request(
            CreateSessionRequest::type_id(),
            &request,
            ServiceKind::CreateSession,
        )
        .await
    }

    /// Handles a CreateSession response, chaining ActivateSession.
    pub(crate) async fn on_create_session_response(
        &mut self,
        response: CreateSessionResponse,
    ) -> ClientResult<()> {
        let status = response.response_header.service_result;
        if status.is_bad() {
            warn!(status = %status, "CreateSession failed");
            self.connect_status = status;
            return Ok(());
        }

        self.authentication_token = response.authentication_token;
        self.session_server_nonce = response.server_nonce;
        debug!(
            session_id = %response.session_id,
            revised_timeout_ms = response.revised_session_timeout,
            "Session created"
        );

        self.activate_session_async().await
    }

    /// Submits ActivateSession with the configured user identity.
    pub(crate) async fn activate_session_async(&mut self) -> ClientResult<()> {
        let identity = self.build_identity_token()?;
        let handle = self.next_request_handle();
        let request = ActivateSessionRequest {
            request_header: RequestHeader::new(
                self.authentication_token.clone(),
                handle,
                self.config.timeout.as_millis() as u32,
            ),
            client_signature: SignatureData::default(),
            client_software_certificates: Vec::new(),
            locale_ids: Vec::new(),
            user_identity_token: identity,
            user_token_signature: SignatureData::default(),
        };

        debug!(
            identity = self.config.user_identity.type_name(),
            "Requesting ActivateSession"
        );
        self.send_service_request(
            ActivateSessionRequest::type_id(),
            &request,
            ServiceKind::ActivateSession,
        )
        .await
    }

    /// Handles an ActivateSession response.
    pub(crate) fn on_activate_session_response(&mut self, response: ActivateSessionResponse) {
        let status = response.response_header.service_result;
        if status.is_bad() {
            warn!(status = %status, "ActivateSession failed");
            self.connect_status = status;
            return;
        }

        self.session_server_nonce = response.server_nonce;
        info!("Session activated");
        self.set_state(ClientState::Session);
    }

    /// Wraps the configured identity in its wire-level extension object.
    fn build_identity_token(&self) -> ClientResult<ExtensionObject> {
        let policy_id = self
            .config
            .user_token_policy
            .as_ref()
            .map(|p| p.policy_id.clone())
            .unwrap_or_default();

        let wrapped = match &self.config.user_identity {
            UserIdentityToken::Anonymous => ExtensionObject::from_encodable(
                AnonymousIdentityToken::type_id(),
                &AnonymousIdentityToken { policy_id },
            ),
            UserIdentityToken::UserName { username, password } => {
                let channel_policy = self
                    .channel
                    .security_policy()
                    .map(|p| p.uri().to_string())
                    .unwrap_or_default();
                if channel_policy == SECURITY_POLICY_NONE_URI {
                    warn!("Password is sent in plaintext over a SecurityPolicy#None channel");
                }
                ExtensionObject::from_encodable(
                    UserNameIdentityToken::type_id(),
                    &UserNameIdentityToken {
                        policy_id,
                        user_name: username.clone(),
                        password: password.clone().into_bytes(),
                        encryption_algorithm: String::new(),
                    },
                )
            }
            UserIdentityToken::Certificate { certificate_der } => ExtensionObject::from_encodable(
                X509IdentityToken::type_id(),
                &X509IdentityToken {
                    policy_id,
                    certificate_data: certificate_der.clone(),
                },
            ),
            UserIdentityToken::IssuedToken { token_data } => ExtensionObject::from_encodable(
                IssuedIdentityToken::type_id(),
                &IssuedIdentityToken {
                    policy_id,
                    token_data: token_data.clone(),
                    encryption_algorithm: String::new(),
                },
            ),
        };

        wrapped.map_err(|e| CodecError::encode(e).into())
    }
}
