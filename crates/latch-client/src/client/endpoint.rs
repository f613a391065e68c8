// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint discovery and selection.
//!
//! GetEndpoints returns the server's endpoints in preference order; the
//! selector walks them and installs the first one that is compatible with
//! the local configuration, together with the first matching user token
//! policy inside it. First match wins on both levels; there is no scoring.
//!
//! Siemens compatibility: endpoints advertising an empty transport profile
//! uri are treated as binary.

use tokio::time::Instant;
use tracing::{error, info};

use latch_core::types::{EndpointDescription, GetEndpointsRequest, RequestHeader};
use latch_core::BINARY_TRANSPORT_PROFILE_URI;

use crate::error::{ClientError, ClientResult, EndpointError, TimeoutError};
use crate::types::ClientState;

use super::{Client, ServiceKind};

/// Timeout hint placed in discovery request headers, milliseconds.
const DISCOVERY_TIMEOUT_HINT: u32 = 10_000;

impl Client {
    /// Fetches the server's endpoint list.
    ///
    /// When no secure channel is open yet, one is established for the call
    /// and torn down afterwards.
    pub async fn get_endpoints(
        &mut self,
        endpoint_url: &str,
    ) -> ClientResult<Vec<EndpointDescription>> {
        let was_connected = self.state() >= ClientState::SecureChannel;
        if !was_connected {
            self.connect_no_session(endpoint_url).await?;
        }

        let result = self.get_endpoints_internal(endpoint_url).await;

        if !was_connected {
            self.disconnect().await;
        }
        result
    }

    /// Issues GetEndpoints over the open channel and waits for the answer.
    pub(crate) async fn get_endpoints_internal(
        &mut self,
        endpoint_url: &str,
    ) -> ClientResult<Vec<EndpointDescription>> {
        let handle = self.next_request_handle();
        let request = GetEndpointsRequest {
            request_header: RequestHeader::new(
                self.authentication_token.clone(),
                handle,
                DISCOVERY_TIMEOUT_HINT,
            ),
            endpoint_url: endpoint_url.to_string(),
            locale_ids: Vec::new(),
            profile_uris: Vec::new(),
        };

        self.endpoints_slot = None;
        self.send_service_request(
            GetEndpointsRequest::type_id(),
            &request,
            ServiceKind::GetEndpoints,
        )
        .await?;

        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.endpoints_slot.take() {
                return result.map_err(|status| {
                    error!(status = %status, "GetEndpointsRequest failed");
                    ClientError::service_fault(status)
                });
            }
            if Instant::now() >= deadline {
                return Err(TimeoutError::Service { duration: timeout }.into());
            }
            self.receive_and_dispatch(deadline).await?;
        }
    }

    /// Discovers endpoints and installs the first compatible endpoint and
    /// user token policy into the configuration.
    pub(crate) async fn select_endpoint(&mut self, endpoint_url: &str) -> ClientResult<()> {
        let endpoints = self.get_endpoints_internal(endpoint_url).await?;
        info!(count = endpoints.len(), "Found {} endpoints", endpoints.len());

        let mut endpoint_found = false;
        for (i, endpoint) in endpoints.iter().enumerate() {
            // Empty ProfileUri is accepted as binary.
            if !endpoint.transport_profile_uri.is_empty()
                && endpoint.transport_profile_uri != BINARY_TRANSPORT_PROFILE_URI
            {
                continue;
            }

            if !endpoint.security_mode.is_valid() {
                info!(index = i, "Rejecting endpoint {i}: invalid security mode");
                continue;
            }

            if self.config.security_mode.is_valid()
                && self.config.security_mode != endpoint.security_mode
            {
                info!(index = i, "Rejecting endpoint {i}: security mode doesn't match");
                continue;
            }

            if !self.config.security_policy_uri.is_empty()
                && self.config.security_policy_uri != endpoint.security_policy_uri
            {
                info!(index = i, "Rejecting endpoint {i}: security policy doesn't match");
                continue;
            }

            if self.config.security_policy(&endpoint.security_policy_uri).is_none() {
                info!(index = i, "Rejecting endpoint {i}: security policy not available");
                continue;
            }

            endpoint_found = true;
            info!(
                index = i,
                policies = endpoint.user_identity_tokens.len(),
                "Endpoint {i} has {} user token policies",
                endpoint.user_identity_tokens.len()
            );

            for (j, token) in endpoint.user_identity_tokens.iter().enumerate() {
                // User tokens may carry their own security policy.
                if !token.security_policy_uri.is_empty()
                    && self.config.security_policy(&token.security_policy_uri).is_none()
                {
                    info!(
                        policy = %token.security_policy_uri,
                        "Rejecting UserTokenPolicy {j} in endpoint {i}: security policy not available"
                    );
                    continue;
                }

                let Some(kind) = token.token_kind() else {
                    info!("Rejecting UserTokenPolicy {j} in endpoint {i}: invalid token type");
                    continue;
                };

                if kind != self.config.user_identity.token_type() {
                    info!(
                        token_type = %kind,
                        "Rejecting UserTokenPolicy {j} in endpoint {i}: configuration doesn't match"
                    );
                    continue;
                }

                // Matching pair found: copy into the configuration, with the
                // token list stripped from the endpoint.
                self.config.endpoint = Some(endpoint.without_token_policies());
                self.config.user_token_policy = Some(token.clone());

                let token_policy_uri = if token.security_policy_uri.is_empty() {
                    &endpoint.security_policy_uri
                } else {
                    &token.security_policy_uri
                };
                info!(
                    endpoint = %endpoint.endpoint_url,
                    security_mode = %endpoint.security_mode,
                    security_policy = %endpoint.security_policy_uri,
                    "Selected endpoint"
                );
                info!(
                    policy_id = %token.policy_id,
                    token_type = %kind,
                    security_policy = %token_policy_uri,
                    "Selected UserTokenPolicy"
                );
                return Ok(());
            }
        }

        if !endpoint_found {
            error!("No suitable endpoint found");
            Err(EndpointError::NoSuitableEndpoint.into())
        } else {
            error!("No suitable UserTokenPolicy found for the possible endpoints");
            Err(EndpointError::NoSuitableUserTokenPolicy.into())
        }
    }
}
