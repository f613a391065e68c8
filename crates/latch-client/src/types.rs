// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration and state types.
//!
//! [`ClientConfig`] carries everything the connection core needs to reach an
//! active session: transport limits, per-phase timeout, security selection,
//! user identity, and the pluggable seams (security policies, certificate
//! verification, transport connector). Plain values serialize with `serde`;
//! the seams are injected programmatically and skipped.
//!
//! # Examples
//!
//! ```
//! use latch_client::types::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .application_uri("urn:latch:client")
//!     .timeout(Duration::from_secs(5))
//!     .username("operator", "secret")
//!     .build()
//!     .unwrap();
//! assert!(config.endpoint.is_none());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use latch_core::transport::AcknowledgeMessage;
use latch_core::types::{
    ApplicationDescription, ApplicationType, EndpointDescription, LocalizedText,
    MessageSecurityMode, UserTokenPolicy, UserTokenType,
};

use crate::client::tcp::TcpConnector;
use crate::client::transport::TransportConnector;
use crate::error::{ClientError, ClientResult, ConfigurationError};
use crate::security::{AcceptAllVerification, CertificateVerification, PolicyNone, SecurityPolicy};

// =============================================================================
// ClientState
// =============================================================================

/// Connection phase of the client.
///
/// `connect` only ever moves forward through these values; teardown steps
/// strictly backward. The ordering of the variants is meaningful and used
/// for `>=` phase checks throughout the core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No TCP connection.
    #[default]
    Disconnected,

    /// TCP connected and HEL/ACK completed.
    Connected,

    /// A secure channel is open.
    SecureChannel,

    /// A session is active.
    Session,

    /// The session was re-activated after a channel renewal.
    SessionRenewed,

    /// The session still exists on the server but the connection is gone.
    SessionDisconnected,
}

impl ClientState {
    /// Returns `true` if a session is usable.
    #[inline]
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Session | Self::SessionRenewed)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::SecureChannel => "SecureChannel",
            Self::Session => "Session",
            Self::SessionRenewed => "SessionRenewed",
            Self::SessionDisconnected => "SessionDisconnected",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Observer invoked on every state change.
pub type StateCallback = Arc<dyn Fn(ClientState) + Send + Sync>;

// =============================================================================
// UserIdentityToken
// =============================================================================

/// How the client authenticates during ActivateSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum UserIdentityToken {
    /// Anonymous authentication.
    #[default]
    Anonymous,

    /// Username and password.
    UserName {
        /// The user name.
        username: String,
        /// The password.
        password: String,
    },

    /// X.509 certificate authentication.
    Certificate {
        /// DER-encoded user certificate.
        certificate_der: Vec<u8>,
    },

    /// Externally issued token.
    IssuedToken {
        /// The issued token data.
        token_data: Vec<u8>,
    },
}

impl UserIdentityToken {
    /// Returns the wire-level token type this identity corresponds to.
    pub const fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::Certificate { .. } => UserTokenType::Certificate,
            Self::IssuedToken { .. } => UserTokenType::IssuedToken,
        }
    }

    /// Returns the display name without credentials.
    pub const fn type_name(&self) -> &'static str {
        self.token_type().name()
    }
}

// =============================================================================
// TcpConnectionConfig
// =============================================================================

/// Local uatcp transport limits, negotiated down by the server's ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConnectionConfig {
    /// uatcp protocol version; always zero today.
    #[serde(default)]
    pub protocol_version: u32,

    /// Largest frame this side is willing to receive.
    #[serde(default = "default_buffer_size")]
    pub recv_buffer_size: u32,

    /// Largest frame this side will send.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: u32,

    /// Largest assembled message accepted; zero is unbounded.
    #[serde(default)]
    pub max_message_size: u32,

    /// Largest chunk count accepted; zero is unbounded.
    #[serde(default)]
    pub max_chunk_count: u32,
}

fn default_buffer_size() -> u32 {
    65_535
}

impl Default for TcpConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: 0,
            recv_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
            max_message_size: 0,
            max_chunk_count: 0,
        }
    }
}

impl TcpConnectionConfig {
    /// Folds the server's ACK into the local limits.
    ///
    /// The local send limit is capped by what the server can receive and the
    /// local receive limit by what the server will send; for the
    /// unbounded-capable fields a zero on either side means "no limit from
    /// that side".
    pub fn apply_acknowledge(&mut self, ack: &AcknowledgeMessage) {
        self.protocol_version = self.protocol_version.min(ack.protocol_version);
        self.send_buffer_size = self.send_buffer_size.min(ack.receive_buffer_size);
        self.recv_buffer_size = self.recv_buffer_size.min(ack.send_buffer_size);
        self.max_message_size = min_nonzero(self.max_message_size, ack.max_message_size);
        self.max_chunk_count = min_nonzero(self.max_chunk_count, ack.max_chunk_count);
    }
}

fn min_nonzero(local: u32, remote: u32) -> u32 {
    match (local, remote) {
        (0, r) => r,
        (l, 0) => l,
        (l, r) => l.min(r),
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Configuration of the connection core.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local transport limits offered in the HEL message.
    #[serde(default)]
    pub connection: TcpConnectionConfig,

    /// Per-phase deadline. Each connect phase (handshake, channel, session)
    /// starts a fresh budget of this size.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Requested secure-channel token lifetime.
    #[serde(default = "default_channel_lifetime", with = "humantime_serde")]
    pub secure_channel_lifetime: Duration,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Desired security mode; [`MessageSecurityMode::Invalid`] accepts any
    /// mode the server offers.
    #[serde(default)]
    pub security_mode: MessageSecurityMode,

    /// Desired security policy uri; empty accepts any policy available
    /// locally.
    #[serde(default)]
    pub security_policy_uri: String,

    /// User identity presented during ActivateSession.
    #[serde(default)]
    pub user_identity: UserIdentityToken,

    /// Pre-selected endpoint. When this and `user_token_policy` are absent,
    /// `connect` runs endpoint discovery.
    #[serde(default)]
    pub endpoint: Option<EndpointDescription>,

    /// Pre-selected user token policy.
    #[serde(default)]
    pub user_token_policy: Option<UserTokenPolicy>,

    /// Description of this client sent in CreateSession.
    #[serde(default = "default_client_description")]
    pub client_description: ApplicationDescription,

    /// Human-readable session name.
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Security policies available to the channel, looked up by uri.
    #[serde(skip, default = "default_security_policies")]
    pub security_policies: Vec<Arc<dyn SecurityPolicy>>,

    /// Hook verifying that policy certificates match the application uri.
    #[serde(skip, default = "default_certificate_verification")]
    pub certificate_verification: Arc<dyn CertificateVerification>,

    /// Observer invoked on every state change. The callback must not call
    /// back into the client.
    #[serde(skip)]
    pub state_callback: Option<StateCallback>,

    /// Factory producing the TCP transport for an endpoint url.
    #[serde(skip, default = "default_connector")]
    pub connector: Arc<dyn TransportConnector>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_secs(600)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_session_name() -> String {
    "latch client session".to_string()
}

fn default_client_description() -> ApplicationDescription {
    ApplicationDescription {
        application_uri: "urn:latch:client".to_string(),
        product_uri: "urn:latch".to_string(),
        application_name: LocalizedText::new("LATCH client"),
        application_type: ApplicationType::Client,
        gateway_server_uri: String::new(),
        discovery_profile_uri: String::new(),
        discovery_urls: Vec::new(),
    }
}

fn default_security_policies() -> Vec<Arc<dyn SecurityPolicy>> {
    vec![Arc::new(PolicyNone)]
}

fn default_certificate_verification() -> Arc<dyn CertificateVerification> {
    Arc::new(AcceptAllVerification)
}

fn default_connector() -> Arc<dyn TransportConnector> {
    Arc::new(TcpConnector)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: TcpConnectionConfig::default(),
            timeout: default_timeout(),
            secure_channel_lifetime: default_channel_lifetime(),
            session_timeout: default_session_timeout(),
            security_mode: MessageSecurityMode::Invalid,
            security_policy_uri: String::new(),
            user_identity: UserIdentityToken::default(),
            endpoint: None,
            user_token_policy: None,
            client_description: default_client_description(),
            session_name: default_session_name(),
            security_policies: default_security_policies(),
            certificate_verification: default_certificate_verification(),
            state_callback: None,
            connector: default_connector(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Looks up a security policy by uri.
    pub fn security_policy(&self, uri: &str) -> Option<&Arc<dyn SecurityPolicy>> {
        self.security_policies.iter().find(|p| p.uri() == uri)
    }

    /// Returns `true` if endpoint discovery must run during `connect`.
    ///
    /// Discovery runs when neither an endpoint nor a user token policy has
    /// been configured.
    pub fn needs_endpoint_discovery(&self) -> bool {
        self.endpoint.is_none() && self.user_token_policy.is_none()
    }

    /// Validates this configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.timeout.is_zero() {
            return Err(ClientError::configuration(ConfigurationError::invalid_value(
                "timeout",
                "must be greater than zero",
            )));
        }
        if self.secure_channel_lifetime.is_zero() {
            return Err(ClientError::configuration(ConfigurationError::invalid_value(
                "secure_channel_lifetime",
                "must be greater than zero",
            )));
        }
        if self.security_policies.is_empty() {
            return Err(ClientError::configuration(ConfigurationError::missing_field(
                "security_policies",
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connection", &self.connection)
            .field("timeout", &self.timeout)
            .field("secure_channel_lifetime", &self.secure_channel_lifetime)
            .field("session_timeout", &self.session_timeout)
            .field("security_mode", &self.security_mode)
            .field("security_policy_uri", &self.security_policy_uri)
            .field("user_identity", &self.user_identity.type_name())
            .field("endpoint", &self.endpoint.as_ref().map(|e| &e.endpoint_url))
            .field(
                "security_policies",
                &self
                    .security_policies
                    .iter()
                    .map(|p| p.uri().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the local transport limits.
    pub fn connection(mut self, connection: TcpConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Sets the per-phase timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the requested secure-channel token lifetime.
    pub fn secure_channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.secure_channel_lifetime = lifetime;
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Requires a specific security mode.
    pub fn security_mode(mut self, mode: MessageSecurityMode) -> Self {
        self.config.security_mode = mode;
        self
    }

    /// Requires a specific security policy uri.
    pub fn security_policy_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.security_policy_uri = uri.into();
        self
    }

    /// Sets anonymous authentication.
    pub fn anonymous(mut self) -> Self {
        self.config.user_identity = UserIdentityToken::Anonymous;
        self
    }

    /// Sets username/password authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.user_identity = UserIdentityToken::UserName {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Sets the user identity directly.
    pub fn user_identity(mut self, identity: UserIdentityToken) -> Self {
        self.config.user_identity = identity;
        self
    }

    /// Pre-selects an endpoint, skipping discovery.
    pub fn endpoint(mut self, endpoint: EndpointDescription) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    /// Pre-selects a user token policy, skipping discovery.
    pub fn user_token_policy(mut self, policy: UserTokenPolicy) -> Self {
        self.config.user_token_policy = Some(policy);
        self
    }

    /// Sets the application uri of the client description.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.client_description.application_uri = uri.into();
        self
    }

    /// Sets the application name of the client description.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_description.application_name = LocalizedText::new(name);
        self
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    /// Registers an additional security policy.
    pub fn add_security_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.config.security_policies.push(policy);
        self
    }

    /// Replaces the certificate-verification hook.
    pub fn certificate_verification(mut self, hook: Arc<dyn CertificateVerification>) -> Self {
        self.config.certificate_verification = hook;
        self
    }

    /// Registers a state-change observer.
    pub fn state_callback(mut self, callback: StateCallback) -> Self {
        self.config.state_callback = Some(callback);
        self
    }

    /// Replaces the transport connector.
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.config.connector = connector;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> ClientResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// Tests
// =============================================================================
