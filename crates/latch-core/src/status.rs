// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.
//!
//! A status code is a 32-bit value whose top two bits encode the severity
//! (`00` good, `01` uncertain, `10` bad). Everything the connection core
//! reports at its API boundary is eventually expressed as one of these.

use std::fmt;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::encoding::{BinaryDecodable, BinaryEncodable, EncodingResult};

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The operation succeeded.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);

    /// The operation failed for an unspecified reason.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);

    /// An unexpected error occurred.
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);

    /// An internal error occurred as a result of a programming or
    /// configuration error.
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);

    /// Not enough memory to complete the operation.
    pub const BAD_OUT_OF_MEMORY: StatusCode = StatusCode(0x8003_0000);

    /// An operating system resource is not available.
    pub const BAD_RESOURCE_UNAVAILABLE: StatusCode = StatusCode(0x8004_0000);

    /// A low level communication error occurred.
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);

    /// Encoding halted because of invalid data in the objects being
    /// serialized.
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8006_0000);

    /// Decoding halted because of invalid data in the stream.
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);

    /// The message encoding/decoding limits imposed by the stack have been
    /// exceeded.
    pub const BAD_ENCODING_LIMITS_EXCEEDED: StatusCode = StatusCode(0x8008_0000);

    /// The request message size exceeds limits set by the server.
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x8009_0000);

    /// The response message size exceeds limits set by the client.
    pub const BAD_RESPONSE_TOO_LARGE: StatusCode = StatusCode(0x800A_0000);

    /// An unrecognized response was received from the server.
    pub const BAD_UNKNOWN_RESPONSE: StatusCode = StatusCode(0x800B_0000);

    /// The operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800C_0000);

    /// The server does not support the requested service.
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800D_0000);

    /// The operation was cancelled because the application is shutting down.
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800E_0000);

    /// The operation could not complete because the client is not connected
    /// to the server.
    pub const BAD_SERVER_NOT_CONNECTED: StatusCode = StatusCode(0x800F_0000);

    /// The server has stopped and cannot process any requests.
    pub const BAD_SERVER_HALTED: StatusCode = StatusCode(0x8010_0000);

    /// The certificate provided as a parameter is not valid.
    pub const BAD_CERTIFICATE_INVALID: StatusCode = StatusCode(0x8015_0000);

    /// An error occurred verifying security.
    pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8016_0000);

    /// User does not have permission to perform the requested operation.
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x8023_0000);

    /// The user identity token is not valid.
    pub const BAD_IDENTITY_TOKEN_INVALID: StatusCode = StatusCode(0x8024_0000);

    /// The user identity token is valid but the server has rejected it.
    pub const BAD_IDENTITY_TOKEN_REJECTED: StatusCode = StatusCode(0x8025_0000);

    /// The specified secure channel is no longer valid.
    pub const BAD_SECURE_CHANNEL_ID_INVALID: StatusCode = StatusCode(0x8026_0000);

    /// The timestamp is outside the range allowed by the server.
    pub const BAD_INVALID_TIMESTAMP: StatusCode = StatusCode(0x8027_0000);

    /// The nonce does appear to be not a random value or it is not the
    /// correct length.
    pub const BAD_NONCE_INVALID: StatusCode = StatusCode(0x8028_0000);

    /// The session id is not valid.
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8029_0000);

    /// The session was closed by the client.
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x802A_0000);

    /// The session cannot be used because ActivateSession has not been
    /// called.
    pub const BAD_SESSION_NOT_ACTIVATED: StatusCode = StatusCode(0x802B_0000);

    /// The message type of a uatcp frame was invalid.
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807A_0000);

    /// A uatcp frame referenced an unknown secure channel.
    pub const BAD_TCP_SECURE_CHANNEL_UNKNOWN: StatusCode = StatusCode(0x807B_0000);

    /// A uatcp frame was larger than the negotiated buffer size.
    pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x807C_0000);

    /// The endpoint url in the HEL message is invalid.
    pub const BAD_TCP_ENDPOINT_URL_INVALID: StatusCode = StatusCode(0x807D_0000);

    /// The network connection has been closed.
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);

    /// The operation cannot be completed because the object is in the wrong
    /// state.
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);

    /// Returns `true` if the severity is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0x4000_0000 != 0 && self.0 & 0x8000_0000 == 0
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name for this status code.
    ///
    /// Unknown codes report as `"Unknown"`; the numeric value remains
    /// available through [`fmt::Display`].
    pub const fn name(&self) -> &'static str {
        match self.0 {
            0x0000_0000 => "Good",
            0x8000_0000 => "Bad",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8003_0000 => "BadOutOfMemory",
            0x8004_0000 => "BadResourceUnavailable",
            0x8005_0000 => "BadCommunicationError",
            0x8006_0000 => "BadEncodingError",
            0x8007_0000 => "BadDecodingError",
            0x8008_0000 => "BadEncodingLimitsExceeded",
            0x8009_0000 => "BadRequestTooLarge",
            0x800A_0000 => "BadResponseTooLarge",
            0x800B_0000 => "BadUnknownResponse",
            0x800C_0000 => "BadTimeout",
            0x800D_0000 => "BadServiceUnsupported",
            0x800E_0000 => "BadShutdown",
            0x800F_0000 => "BadServerNotConnected",
            0x8010_0000 => "BadServerHalted",
            0x8015_0000 => "BadCertificateInvalid",
            0x8016_0000 => "BadSecurityChecksFailed",
            0x8023_0000 => "BadUserAccessDenied",
            0x8024_0000 => "BadIdentityTokenInvalid",
            0x8025_0000 => "BadIdentityTokenRejected",
            0x8026_0000 => "BadSecureChannelIdInvalid",
            0x8027_0000 => "BadInvalidTimestamp",
            0x8028_0000 => "BadNonceInvalid",
            0x8029_0000 => "BadSessionIdInvalid",
            0x802A_0000 => "BadSessionClosed",
            0x802B_0000 => "BadSessionNotActivated",
            0x807A_0000 => "BadTcpMessageTypeInvalid",
            0x807B_0000 => "BadTcpSecureChannelUnknown",
            0x807C_0000 => "BadTcpMessageTooLarge",
            0x807D_0000 => "BadTcpEndpointUrlInvalid",
            0x80AE_0000 => "BadConnectionClosed",
            0x80AF_0000 => "BadInvalidState",
            _ => "Unknown",
        }
    }
}

impl BinaryEncodable for StatusCode {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.0.encode(buf)
    }
}

impl BinaryDecodable for StatusCode {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(StatusCode(u32::decode(buf)?))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010X})", self.name(), self.0)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        StatusCode(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

// =============================================================================
// Tests
// =============================================================================
