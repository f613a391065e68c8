// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client error types with status-code mapping.
//!
//! Every failure inside the connection core is expressed as a [`ClientError`]
//! and, at the API boundary, as an OPC UA [`StatusCode`] via
//! [`ClientError::status_code`]:
//!
//! ```text
//! ClientError
//! ├── Connection    - TCP transport failures        -> BadConnectionClosed family
//! ├── Channel       - secure-channel failures       -> BadConnectionClosed / BadServerNotConnected
//! ├── Session       - session lifecycle failures    -> BadTimeout / service results
//! ├── Endpoint      - discovery and selection       -> BadInternalError
//! ├── Security      - policy and certificate issues -> BadSecurityChecksFailed
//! ├── Encoding      - malformed frames              -> BadEncodingError / BadDecodingError
//! ├── ServiceFault  - server-reported results       -> surfaced verbatim
//! ├── Timeout       - deadline expiry               -> BadTimeout / BadConnectionClosed
//! └── Configuration - invalid local settings        -> BadInternalError
//! ```
//!
//! # Examples
//!
//! ```
//! use latch_client::error::{ClientError, ConnectionError};
//! use latch_core::StatusCode;
//!
//! let error = ClientError::connection(ConnectionError::closed(None));
//! assert_eq!(error.status_code(), StatusCode::BAD_CONNECTION_CLOSED);
//! assert!(error.is_retryable());
//! ```

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use latch_core::{EncodingError, StatusCode};

// =============================================================================
// ClientError
// =============================================================================

/// The main error type of the connection core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP transport errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Secure-channel errors.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Endpoint discovery and selection errors.
    #[error("{0}")]
    Endpoint(#[from] EndpointError),

    /// Security policy and certificate errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Malformed frames or oversized messages.
    #[error("{0}")]
    Encoding(#[from] CodecError),

    /// The server answered with a non-good service result.
    #[error("Service fault: {status}")]
    ServiceFault {
        /// The status code reported by the server.
        status: StatusCode,
    },

    /// A phase deadline expired.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Invalid local configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a secure-channel error.
    #[inline]
    pub fn channel(error: ChannelError) -> Self {
        Self::Channel(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates an endpoint selection error.
    #[inline]
    pub fn endpoint(error: EndpointError) -> Self {
        Self::Endpoint(error)
    }

    /// Creates a security error.
    #[inline]
    pub fn security(error: SecurityError) -> Self {
        Self::Security(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a service-fault error from a server-reported status.
    #[inline]
    pub fn service_fault(status: StatusCode) -> Self {
        Self::ServiceFault { status }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::InvalidState {
            message: message.into(),
        })
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Maps this error to the OPC UA status code reported at the API
    /// boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Connection(e) => e.status_code(),
            Self::Channel(e) => e.status_code(),
            Self::Session(e) => e.status_code(),
            Self::Endpoint(_) => StatusCode::BAD_INTERNAL_ERROR,
            Self::Security(_) => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::Encoding(e) => e.status_code(),
            Self::ServiceFault { status } => *status,
            Self::Timeout(e) => e.status_code(),
            Self::Configuration(_) => StatusCode::BAD_INTERNAL_ERROR,
        }
    }

    /// Returns `true` if a fresh connect attempt may succeed without a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Channel(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::ServiceFault { status } => {
                // Transient server conditions are worth another attempt.
                matches!(
                    *status,
                    StatusCode::BAD_TIMEOUT
                        | StatusCode::BAD_SERVER_HALTED
                        | StatusCode::BAD_SESSION_CLOSED
                        | StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
                )
            }
            Self::Endpoint(_) | Self::Security(_) | Self::Encoding(_) | Self::Configuration(_) => {
                false
            }
        }
    }

    /// Returns the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Channel(_) => "channel",
            Self::Session(_) => "session",
            Self::Endpoint(_) => "endpoint",
            Self::Security(_) => "security",
            Self::Encoding(_) => "encoding",
            Self::ServiceFault { .. } => "service",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns the tracing level this error should be reported at.
    pub fn tracing_level(&self) -> Level {
        match self {
            Self::Timeout(_) | Self::Connection(_) => Level::WARN,
            Self::ServiceFault { .. } => Level::WARN,
            _ => Level::ERROR,
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// TCP transport errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection refused by the server.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint url.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Option<io::Error>,
    },

    /// The TCP connect did not complete in time.
    #[error("Connection to '{endpoint}' timed out after {duration:?}")]
    ConnectTimedOut {
        /// Target endpoint url.
        endpoint: String,
        /// The expired timeout.
        duration: Duration,
    },

    /// The endpoint url could not be parsed.
    #[error("Invalid endpoint url '{url}': {reason}")]
    InvalidUrl {
        /// The offending url.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The peer closed the connection.
    #[error("Connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Reason, when known.
        reason: Option<String>,
    },

    /// No connection is open.
    #[error("Not connected")]
    NotConnected,

    /// A send-buffer could not be acquired.
    #[error("Out of send buffers")]
    OutOfBuffers,

    /// Generic I/O failure.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failed operation.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Creates a connection-refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: None,
        }
    }

    /// Creates a connect-timeout error.
    pub fn connect_timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::ConnectTimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an invalid-url error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection-closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Creates a generic I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Maps to the boundary status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::BAD_SERVER_NOT_CONNECTED,
            Self::OutOfBuffers => StatusCode::BAD_OUT_OF_MEMORY,
            Self::InvalidUrl { .. } => StatusCode::BAD_TCP_ENDPOINT_URL_INVALID,
            _ => StatusCode::BAD_CONNECTION_CLOSED,
        }
    }

    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. } => false,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => true,
        }
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Secure-channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An OPN was attempted without an established transport.
    #[error("Transport not established")]
    TransportNotEstablished,

    /// No security policy satisfies the requested uri.
    #[error("Security policy '{uri}' is not available locally")]
    PolicyNotAvailable {
        /// The requested policy uri.
        uri: String,
    },

    /// The OPN response named a different policy than the channel uses.
    #[error("Security policy mismatch: channel uses '{expected}', response carries '{actual}'")]
    PolicyMismatch {
        /// Policy bound to the channel.
        expected: String,
        /// Policy named in the response.
        actual: String,
    },

    /// A frame arrived for an unknown channel id.
    #[error("Unknown secure channel id {channel_id}")]
    UnknownChannelId {
        /// The offending channel id.
        channel_id: u32,
    },

    /// A symmetric message referenced an expired or unknown token.
    #[error("Unknown security token id {token_id}")]
    UnknownTokenId {
        /// The offending token id.
        token_id: u32,
    },

    /// The channel is not open for symmetric traffic.
    #[error("Secure channel is not open")]
    NotOpen,
}

impl ChannelError {
    /// Creates a policy-not-available error.
    pub fn policy_not_available(uri: impl Into<String>) -> Self {
        Self::PolicyNotAvailable { uri: uri.into() }
    }

    /// Creates a policy-mismatch error.
    pub fn policy_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::PolicyMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Maps to the boundary status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TransportNotEstablished => StatusCode::BAD_SERVER_NOT_CONNECTED,
            Self::PolicyNotAvailable { .. } => StatusCode::BAD_INTERNAL_ERROR,
            Self::PolicyMismatch { .. } => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::UnknownChannelId { .. } => StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
            Self::UnknownTokenId { .. } => StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
            Self::NotOpen => StatusCode::BAD_SERVER_NOT_CONNECTED,
        }
    }

    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportNotEstablished
                | Self::NotOpen
                | Self::UnknownChannelId { .. }
                | Self::UnknownTokenId { .. }
        )
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session operation was attempted without an open secure channel.
    #[error("No secure channel; cannot start a session")]
    NoSecureChannel,

    /// CreateSession failed.
    #[error("Failed to create session: {status}")]
    CreateFailed {
        /// Server-reported status.
        status: StatusCode,
    },

    /// ActivateSession failed.
    #[error("Failed to activate session: {status}")]
    ActivateFailed {
        /// Server-reported status.
        status: StatusCode,
    },

    /// The session wait loop was aborted by an async completion status.
    #[error("Session establishment aborted: {status}")]
    Aborted {
        /// The terminating status.
        status: StatusCode,
    },
}

impl SessionError {
    /// Maps to the boundary status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSecureChannel => StatusCode::BAD_INTERNAL_ERROR,
            Self::CreateFailed { status }
            | Self::ActivateFailed { status }
            | Self::Aborted { status } => *status,
        }
    }

    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoSecureChannel)
    }
}

// =============================================================================
// EndpointError
// =============================================================================

/// Endpoint discovery and selection errors.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// No advertised endpoint satisfied the local configuration.
    #[error("No suitable endpoint found")]
    NoSuitableEndpoint,

    /// A qualifying endpoint exists but none of its user token policies
    /// match the configured identity.
    #[error("No suitable UserTokenPolicy found for the possible endpoints")]
    NoSuitableUserTokenPolicy,
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security policy and certificate errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Nonce generation failed.
    #[error("Generating a local nonce failed: {message}")]
    NonceGeneration {
        /// Description of the failure.
        message: String,
    },

    /// The application uri does not match the certificate.
    #[error("ApplicationURI '{application_uri}' does not match the certificate for policy '{policy_uri}'")]
    ApplicationUriMismatch {
        /// Configured application uri.
        application_uri: String,
        /// The policy whose certificate disagrees.
        policy_uri: String,
    },

    /// A cryptographic transform failed.
    #[error("Security transform failed: {message}")]
    TransformFailed {
        /// Description of the failure.
        message: String,
    },
}

impl SecurityError {
    /// Creates a nonce-generation error.
    pub fn nonce_generation(message: impl Into<String>) -> Self {
        Self::NonceGeneration {
            message: message.into(),
        }
    }

    /// Creates a transform-failed error.
    pub fn transform_failed(message: impl Into<String>) -> Self {
        Self::TransformFailed {
            message: message.into(),
        }
    }
}

// =============================================================================
// CodecError
// =============================================================================

/// Frame encoding and decoding errors at the client boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding an outgoing message failed.
    #[error("Encoding failed: {source}")]
    Encode {
        /// Underlying codec error.
        #[source]
        source: EncodingError,
    },

    /// Decoding an incoming message failed.
    #[error("Decoding failed: {source}")]
    Decode {
        /// Underlying codec error.
        #[source]
        source: EncodingError,
    },

    /// An outgoing message exceeds the negotiated send-buffer size.
    #[error("Message of {size} bytes exceeds the negotiated limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the encoded message.
        size: usize,
        /// Negotiated limit.
        limit: usize,
    },

    /// An unexpected message type arrived.
    #[error("Unexpected message type '{actual}', expected '{expected}'")]
    UnexpectedMessage {
        /// What the current phase was waiting for.
        expected: &'static str,
        /// What arrived instead.
        actual: String,
    },
}

impl CodecError {
    /// Wraps an encoding-direction codec error.
    pub fn encode(source: EncodingError) -> Self {
        Self::Encode { source }
    }

    /// Wraps a decoding-direction codec error.
    pub fn decode(source: EncodingError) -> Self {
        Self::Decode { source }
    }

    /// Maps to the boundary status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode { .. } => StatusCode::BAD_ENCODING_ERROR,
            Self::Decode { .. } => StatusCode::BAD_DECODING_ERROR,
            Self::MessageTooLarge { .. } => StatusCode::BAD_ENCODING_LIMITS_EXCEEDED,
            Self::UnexpectedMessage { .. } => StatusCode::BAD_UNKNOWN_RESPONSE,
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Deadline expiry, by phase.
///
/// Channel-phase expiry reports `BadConnectionClosed` while session-phase
/// expiry reports `BadTimeout`, matching the distinct failure modes of the
/// two layers.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// No complete ACK arrived before the handshake deadline.
    #[error("HEL/ACK handshake timed out after {duration:?}")]
    Handshake {
        /// The expired budget.
        duration: Duration,
    },

    /// No OPN response arrived before the channel deadline.
    #[error("OpenSecureChannel timed out after {duration:?}")]
    Channel {
        /// The expired budget.
        duration: Duration,
    },

    /// The session did not activate before the deadline.
    #[error("Session establishment timed out after {duration:?}")]
    Session {
        /// The expired budget.
        duration: Duration,
    },

    /// A synchronous service call ran out of time.
    #[error("Service call timed out after {duration:?}")]
    Service {
        /// The expired budget.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Maps to the boundary status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Handshake { .. } | Self::Channel { .. } => StatusCode::BAD_CONNECTION_CLOSED,
            Self::Session { .. } | Self::Service { .. } => StatusCode::BAD_TIMEOUT,
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid local configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required field is missing.
    #[error("Missing configuration field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field holds an unusable value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An operation was invoked in a state that does not permit it.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the violated precondition.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates a missing-field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<EncodingError> for ClientError {
    fn from(error: EncodingError) -> Self {
        // Errors surfacing from raw codec calls occur while decoding
        // incoming frames; encode paths wrap explicitly.
        Self::Encoding(CodecError::decode(error))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ClientError::connection(ConnectionError::closed(None)).status_code(),
            StatusCode::BAD_CONNECTION_CLOSED
        );
        assert_eq!(
            ClientError::connection(ConnectionError::NotConnected).status_code(),
            StatusCode::BAD_SERVER_NOT_CONNECTED
        );
        assert_eq!(
            ClientError::connection(ConnectionError::OutOfBuffers).status_code(),
            StatusCode::BAD_OUT_OF_MEMORY
        );
        assert_eq!(
            ClientError::endpoint(EndpointError::NoSuitableEndpoint).status_code(),
            StatusCode::BAD_INTERNAL_ERROR
        );
        assert_eq!(
            ClientError::endpoint(EndpointError::NoSuitableUserTokenPolicy).status_code(),
            StatusCode::BAD_INTERNAL_ERROR
        );
        assert_eq!(
            ClientError::service_fault(StatusCode::BAD_IDENTITY_TOKEN_REJECTED).status_code(),
            StatusCode::BAD_IDENTITY_TOKEN_REJECTED
        );
        assert_eq!(
            ClientError::invalid_state("session before channel").status_code(),
            StatusCode::BAD_INTERNAL_ERROR
        );
    }

    #[test]
    fn test_timeout_mapping_differs_by_phase() {
        let channel = ClientError::Timeout(TimeoutError::Channel {
            duration: Duration::from_secs(5),
        });
        assert_eq!(channel.status_code(), StatusCode::BAD_CONNECTION_CLOSED);

        let session = ClientError::Timeout(TimeoutError::Session {
            duration: Duration::from_secs(5),
        });
        assert_eq!(session.status_code(), StatusCode::BAD_TIMEOUT);
    }

    #[test]
    fn test_retryability() {
        assert!(ClientError::connection(ConnectionError::closed(None)).is_retryable());
        assert!(!ClientError::endpoint(EndpointError::NoSuitableEndpoint).is_retryable());
        assert!(!ClientError::configuration(ConfigurationError::missing_field("endpoint"))
            .is_retryable());
        assert!(ClientError::Timeout(TimeoutError::Session {
            duration: Duration::from_secs(1)
        })
        .is_retryable());
    }

    #[test]
    fn test_encoding_direction_mapping() {
        let encode = ClientError::Encoding(CodecError::MessageTooLarge {
            size: 100_000,
            limit: 8192,
        });
        assert_eq!(encode.status_code(), StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ClientError::channel(ChannelError::NotOpen).category(),
            "channel"
        );
        assert_eq!(
            ClientError::service_fault(StatusCode::BAD).category(),
            "service"
        );
    }
}
