// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection-establishment data model.
//!
//! This module defines the OPC UA structures a client exchanges on its way
//! from a fresh TCP connection to an activated session, together with their
//! DefaultBinary encodings:
//!
//! - **Identifiers**: [`NodeId`] in all four identifier forms
//! - **Discovery**: [`ApplicationDescription`], [`EndpointDescription`],
//!   [`UserTokenPolicy`]
//! - **Services**: GetEndpoints, OpenSecureChannel, CreateSession,
//!   ActivateSession, CloseSession, CloseSecureChannel, ServiceFault
//! - **Identity**: the four user identity token structures
//!
//! All structures are plain owned data; `Clone` therefore yields the deep
//! copy the endpoint-selection logic relies on.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{
    decode_array, encode_array, wire_time_now, BinaryDecodable, BinaryEncodable, EncodingError,
    EncodingResult,
};
use crate::status::StatusCode;

/// The binary transport profile this client implements.
pub const BINARY_TRANSPORT_PROFILE_URI: &str =
    "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary";

/// The security policy used when none is configured.
pub const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// During connection establishment node ids appear as authentication tokens,
/// session ids, and structure type ids. The four identifier forms of the
/// standard are supported; the compressed two-byte and four-byte encodings
/// are emitted automatically when a numeric id fits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque (byte string) identifier.
    Opaque(Vec<u8>),
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Returns the null node id (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            identifier: NodeIdentifier::Numeric(0),
        }
    }

    /// Returns `true` if this is the null node id.
    ///
    /// A session that has never been created carries the null id as its
    /// authentication token.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "ns={};", self.namespace_index)?;
        }
        match &self.identifier {
            NodeIdentifier::Numeric(v) => write!(f, "i={}", v),
            NodeIdentifier::String(v) => write!(f, "s={}", v),
            NodeIdentifier::Guid(v) => write!(f, "g={}", v),
            NodeIdentifier::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

const NODEID_ENC_TWO_BYTE: u8 = 0x00;
const NODEID_ENC_FOUR_BYTE: u8 = 0x01;
const NODEID_ENC_NUMERIC: u8 = 0x02;
const NODEID_ENC_STRING: u8 = 0x03;
const NODEID_ENC_GUID: u8 = 0x04;
const NODEID_ENC_OPAQUE: u8 = 0x05;

impl BinaryEncodable for NodeId {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => {
                if self.namespace_index == 0 && *v <= u32::from(u8::MAX) {
                    buf.put_u8(NODEID_ENC_TWO_BYTE);
                    buf.put_u8(*v as u8);
                } else if self.namespace_index <= u16::from(u8::MAX) && *v <= u32::from(u16::MAX) {
                    buf.put_u8(NODEID_ENC_FOUR_BYTE);
                    buf.put_u8(self.namespace_index as u8);
                    buf.put_u16_le(*v as u16);
                } else {
                    buf.put_u8(NODEID_ENC_NUMERIC);
                    buf.put_u16_le(self.namespace_index);
                    buf.put_u32_le(*v);
                }
            }
            NodeIdentifier::String(v) => {
                buf.put_u8(NODEID_ENC_STRING);
                buf.put_u16_le(self.namespace_index);
                v.encode(buf)?;
            }
            NodeIdentifier::Guid(v) => {
                buf.put_u8(NODEID_ENC_GUID);
                buf.put_u16_le(self.namespace_index);
                let (d1, d2, d3, d4) = v.as_fields();
                buf.put_u32_le(d1);
                buf.put_u16_le(d2);
                buf.put_u16_le(d3);
                buf.put_slice(d4);
            }
            NodeIdentifier::Opaque(v) => {
                buf.put_u8(NODEID_ENC_OPAQUE);
                buf.put_u16_le(self.namespace_index);
                v.encode(buf)?;
            }
        }
        Ok(())
    }
}

impl BinaryDecodable for NodeId {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let encoding = u8::decode(buf)?;
        // High bits flag ServerIndex/NamespaceUri in ExpandedNodeId; plain
        // node ids must not carry them.
        match encoding & 0x3F {
            NODEID_ENC_TWO_BYTE => {
                let id = u8::decode(buf)?;
                Ok(NodeId::numeric(0, u32::from(id)))
            }
            NODEID_ENC_FOUR_BYTE => {
                let ns = u8::decode(buf)?;
                let id = u16::decode(buf)?;
                Ok(NodeId::numeric(u16::from(ns), u32::from(id)))
            }
            NODEID_ENC_NUMERIC => {
                let ns = u16::decode(buf)?;
                let id = u32::decode(buf)?;
                Ok(NodeId::numeric(ns, id))
            }
            NODEID_ENC_STRING => {
                let ns = u16::decode(buf)?;
                let id = String::decode(buf)?;
                Ok(NodeId::string(ns, id))
            }
            NODEID_ENC_GUID => {
                let ns = u16::decode(buf)?;
                let d1 = u32::decode(buf)?;
                let d2 = u16::decode(buf)?;
                let d3 = u16::decode(buf)?;
                let mut d4 = [0u8; 8];
                if buf.remaining() < 8 {
                    return Err(EncodingError::BufferExhausted {
                        needed: 8 - buf.remaining(),
                    });
                }
                buf.copy_to_slice(&mut d4);
                Ok(NodeId::guid(ns, Uuid::from_fields(d1, d2, d3, &d4)))
            }
            NODEID_ENC_OPAQUE => {
                let ns = u16::decode(buf)?;
                let id = Vec::<u8>::decode(buf)?;
                Ok(NodeId::opaque(ns, id))
            }
            other => Err(EncodingError::InvalidValue {
                field: "nodeIdEncoding",
                value: i64::from(other),
            }),
        }
    }
}

// =============================================================================
// LocalizedText
// =============================================================================

/// A localized string with an optional locale tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    /// RFC 3066 locale tag, empty when unspecified.
    pub locale: String,
    /// The text itself.
    pub text: String,
}

impl LocalizedText {
    /// Creates a localized text without a locale tag.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: String::new(),
            text: text.into(),
        }
    }
}

impl BinaryEncodable for LocalizedText {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut mask = 0u8;
        if !self.locale.is_empty() {
            mask |= 0x01;
        }
        if !self.text.is_empty() {
            mask |= 0x02;
        }
        buf.put_u8(mask);
        if mask & 0x01 != 0 {
            self.locale.encode(buf)?;
        }
        if mask & 0x02 != 0 {
            self.text.encode(buf)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for LocalizedText {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let mask = u8::decode(buf)?;
        let locale = if mask & 0x01 != 0 {
            String::decode(buf)?
        } else {
            String::new()
        };
        let text = if mask & 0x02 != 0 {
            String::decode(buf)?
        } else {
            String::new()
        };
        Ok(Self { locale, text })
    }
}

// =============================================================================
// ExtensionObject
// =============================================================================

/// The body of an [`ExtensionObject`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtensionBody {
    /// No body.
    #[default]
    None,
    /// A binary body, already encoded.
    ByteString(Vec<u8>),
}

/// A structure wrapped with its encoding type id.
///
/// The user identity token inside ActivateSession travels as an extension
/// object; the type id names which identity token structure the body holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionObject {
    /// DefaultBinary encoding id of the wrapped structure.
    pub type_id: NodeId,
    /// The encoded body.
    pub body: ExtensionBody,
}

impl ExtensionObject {
    /// Wraps an already-encoded structure.
    pub fn binary(type_id: NodeId, body: Vec<u8>) -> Self {
        Self {
            type_id,
            body: ExtensionBody::ByteString(body),
        }
    }

    /// Encodes `value` and wraps it under its type id.
    pub fn from_encodable(
        type_id: NodeId,
        value: &impl BinaryEncodable,
    ) -> EncodingResult<Self> {
        let mut body = BytesMut::new();
        value.encode(&mut body)?;
        Ok(Self::binary(type_id, body.to_vec()))
    }
}

impl BinaryEncodable for ExtensionObject {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.type_id.encode(buf)?;
        match &self.body {
            ExtensionBody::None => buf.put_u8(0x00),
            ExtensionBody::ByteString(bytes) => {
                buf.put_u8(0x01);
                bytes.encode(buf)?;
            }
        }
        Ok(())
    }
}

impl BinaryDecodable for ExtensionObject {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let type_id = NodeId::decode(buf)?;
        let encoding = u8::decode(buf)?;
        let body = match encoding {
            0x00 => ExtensionBody::None,
            // XML bodies share the length-prefixed layout; keep the raw bytes.
            0x01 | 0x02 => ExtensionBody::ByteString(Vec::<u8>::decode(buf)?),
            other => {
                return Err(EncodingError::InvalidValue {
                    field: "extensionObjectEncoding",
                    value: i64::from(other),
                })
            }
        };
        Ok(Self { type_id, body })
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

/// Diagnostic information attached to a response.
///
/// The connection core never generates diagnostics; decoding exists so
/// responses that carry them parse cleanly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    /// Index into the response string table.
    pub symbolic_id: Option<i32>,
    /// Index into the response string table.
    pub namespace_uri: Option<i32>,
    /// Index into the response string table.
    pub locale: Option<i32>,
    /// Index into the response string table.
    pub localized_text: Option<i32>,
    /// Vendor-specific detail.
    pub additional_info: Option<String>,
    /// Status code of a nested operation.
    pub inner_status_code: Option<StatusCode>,
    /// Nested diagnostic info.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncodable for DiagnosticInfo {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= 0x01;
        }
        if self.namespace_uri.is_some() {
            mask |= 0x02;
        }
        if self.localized_text.is_some() {
            mask |= 0x04;
        }
        if self.locale.is_some() {
            mask |= 0x08;
        }
        if self.additional_info.is_some() {
            mask |= 0x10;
        }
        if self.inner_status_code.is_some() {
            mask |= 0x20;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= 0x40;
        }
        buf.put_u8(mask);
        if let Some(v) = self.symbolic_id {
            v.encode(buf)?;
        }
        if let Some(v) = self.namespace_uri {
            v.encode(buf)?;
        }
        if let Some(v) = self.locale {
            v.encode(buf)?;
        }
        if let Some(v) = self.localized_text {
            v.encode(buf)?;
        }
        if let Some(v) = &self.additional_info {
            v.encode(buf)?;
        }
        if let Some(v) = self.inner_status_code {
            v.0.encode(buf)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.as_ref().encode(buf)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for DiagnosticInfo {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let mask = u8::decode(buf)?;
        let mut info = DiagnosticInfo::default();
        if mask & 0x01 != 0 {
            info.symbolic_id = Some(i32::decode(buf)?);
        }
        if mask & 0x02 != 0 {
            info.namespace_uri = Some(i32::decode(buf)?);
        }
        if mask & 0x08 != 0 {
            info.locale = Some(i32::decode(buf)?);
        }
        if mask & 0x04 != 0 {
            info.localized_text = Some(i32::decode(buf)?);
        }
        if mask & 0x10 != 0 {
            info.additional_info = Some(String::decode(buf)?);
        }
        if mask & 0x20 != 0 {
            info.inner_status_code = Some(StatusCode(u32::decode(buf)?));
        }
        if mask & 0x40 != 0 {
            info.inner_diagnostic_info = Some(Box::new(DiagnosticInfo::decode(buf)?));
        }
        Ok(info)
    }
}

// =============================================================================
// Security Enums
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageSecurityMode {
    /// Mode was absent or out of range.
    #[default]
    Invalid,
    /// Messages are neither signed nor encrypted.
    None,
    /// Messages are signed but not encrypted.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl MessageSecurityMode {
    /// Returns the wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Parses a wire value; anything out of range is `None`.
    pub const fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => Option::None,
        }
    }

    /// Returns `true` if the mode is one of the three usable modes.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl BinaryEncodable for MessageSecurityMode {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.value().encode(buf)
    }
}

impl BinaryDecodable for MessageSecurityMode {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        // Out-of-range modes collapse to Invalid; the endpoint selector
        // skips such endpoints instead of failing the whole response.
        let raw = u32::decode(buf)?;
        Ok(Self::from_value(raw).unwrap_or(Self::Invalid))
    }
}

/// How a client authenticates against a user token policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserTokenType {
    /// Anonymous authentication.
    #[default]
    Anonymous,
    /// Username and password.
    UserName,
    /// X.509 certificate.
    Certificate,
    /// Externally issued token.
    IssuedToken,
}

impl UserTokenType {
    /// Returns the wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Anonymous => 0,
            Self::UserName => 1,
            Self::Certificate => 2,
            Self::IssuedToken => 3,
        }
    }

    /// Parses a wire value.
    pub const fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Anonymous),
            1 => Some(Self::UserName),
            2 => Some(Self::Certificate),
            3 => Some(Self::IssuedToken),
            _ => None,
        }
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName => "UserName",
            Self::Certificate => "Certificate",
            Self::IssuedToken => "IssuedToken",
        }
    }
}

impl fmt::Display for UserTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether an OPN request issues a fresh token or renews the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTokenRequestType {
    /// Issue the first token on a channel.
    Issue,
    /// Renew the token on an open channel.
    Renew,
}

impl BinaryEncodable for SecurityTokenRequestType {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let value: u32 = match self {
            Self::Issue => 0,
            Self::Renew => 1,
        };
        value.encode(buf)
    }
}

impl BinaryDecodable for SecurityTokenRequestType {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        match u32::decode(buf)? {
            0 => Ok(Self::Issue),
            1 => Ok(Self::Renew),
            other => Err(EncodingError::InvalidValue {
                field: "securityTokenRequestType",
                value: i64::from(other),
            }),
        }
    }
}

// =============================================================================
// ApplicationDescription
// =============================================================================

/// The kind of application an [`ApplicationDescription`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    /// A server.
    Server,
    /// A client.
    #[default]
    Client,
    /// Both client and server.
    ClientAndServer,
    /// A discovery server.
    DiscoveryServer,
}

impl BinaryEncodable for ApplicationType {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let value: u32 = match self {
            Self::Server => 0,
            Self::Client => 1,
            Self::ClientAndServer => 2,
            Self::DiscoveryServer => 3,
        };
        value.encode(buf)
    }
}

impl BinaryDecodable for ApplicationType {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        match u32::decode(buf)? {
            0 => Ok(Self::Server),
            1 => Ok(Self::Client),
            2 => Ok(Self::ClientAndServer),
            3 => Ok(Self::DiscoveryServer),
            other => Err(EncodingError::InvalidValue {
                field: "applicationType",
                value: i64::from(other),
            }),
        }
    }
}

/// Identity of an OPC UA application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationDescription {
    /// Globally unique application uri. Must match the uri embedded in the
    /// application instance certificate.
    pub application_uri: String,
    /// Product uri.
    pub product_uri: String,
    /// Human-readable application name.
    pub application_name: LocalizedText,
    /// Application kind.
    pub application_type: ApplicationType,
    /// Gateway the application sits behind, empty when direct.
    pub gateway_server_uri: String,
    /// Discovery profile, empty when unspecified.
    pub discovery_profile_uri: String,
    /// Discovery urls of the application.
    pub discovery_urls: Vec<String>,
}

impl BinaryEncodable for ApplicationDescription {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.application_uri.encode(buf)?;
        self.product_uri.encode(buf)?;
        self.application_name.encode(buf)?;
        self.application_type.encode(buf)?;
        self.gateway_server_uri.encode(buf)?;
        self.discovery_profile_uri.encode(buf)?;
        encode_array(&self.discovery_urls, buf)
    }
}

impl BinaryDecodable for ApplicationDescription {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            application_uri: String::decode(buf)?,
            product_uri: String::decode(buf)?,
            application_name: LocalizedText::decode(buf)?,
            application_type: ApplicationType::decode(buf)?,
            gateway_server_uri: String::decode(buf)?,
            discovery_profile_uri: String::decode(buf)?,
            discovery_urls: decode_array(buf)?,
        })
    }
}

// =============================================================================
// UserTokenPolicy / EndpointDescription
// =============================================================================

/// A way the server accepts user authentication on an endpoint.
///
/// `token_type` is kept as the raw wire value: servers have been observed
/// advertising values outside the standard range, and the selection logic
/// skips those rather than rejecting the whole endpoint list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserTokenPolicy {
    /// Server-assigned policy identifier, echoed back in the identity token.
    pub policy_id: String,
    /// Raw token type value; see [`UserTokenPolicy::token_kind`].
    pub token_type: u32,
    /// Token type uri for issued tokens.
    pub issued_token_type: String,
    /// Endpoint to obtain an issued token from.
    pub issuer_endpoint_url: String,
    /// Security policy for the token, empty to inherit the endpoint's.
    pub security_policy_uri: String,
}

impl UserTokenPolicy {
    /// Creates an anonymous policy with the given id.
    pub fn anonymous(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            token_type: UserTokenType::Anonymous.value(),
            ..Default::default()
        }
    }

    /// Creates a username policy with the given id.
    pub fn username(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            token_type: UserTokenType::UserName.value(),
            ..Default::default()
        }
    }

    /// Returns the token type, or `None` for out-of-range values.
    pub fn token_kind(&self) -> Option<UserTokenType> {
        UserTokenType::from_value(self.token_type)
    }
}

impl BinaryEncodable for UserTokenPolicy {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.policy_id.encode(buf)?;
        self.token_type.encode(buf)?;
        self.issued_token_type.encode(buf)?;
        self.issuer_endpoint_url.encode(buf)?;
        self.security_policy_uri.encode(buf)
    }
}

impl BinaryDecodable for UserTokenPolicy {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            policy_id: String::decode(buf)?,
            token_type: u32::decode(buf)?,
            issued_token_type: String::decode(buf)?,
            issuer_endpoint_url: String::decode(buf)?,
            security_policy_uri: String::decode(buf)?,
        })
    }
}

/// A server endpoint as returned by GetEndpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointDescription {
    /// Url of the endpoint.
    pub endpoint_url: String,
    /// The server behind the endpoint.
    pub server: ApplicationDescription,
    /// DER-encoded server instance certificate, empty without security.
    pub server_certificate: Vec<u8>,
    /// Security mode of the endpoint.
    pub security_mode: MessageSecurityMode,
    /// Security policy uri of the endpoint.
    pub security_policy_uri: String,
    /// Accepted user authentication policies, in server preference order.
    pub user_identity_tokens: Vec<UserTokenPolicy>,
    /// Transport profile; some servers leave this empty for binary.
    pub transport_profile_uri: String,
    /// Relative security level assigned by the server.
    pub security_level: u8,
}

impl EndpointDescription {
    /// Returns a copy with the user token policies stripped.
    ///
    /// The configuration stores the selected endpoint without its token
    /// list; the selected token policy is stored separately.
    pub fn without_token_policies(&self) -> Self {
        Self {
            user_identity_tokens: Vec::new(),
            ..self.clone()
        }
    }
}

impl BinaryEncodable for EndpointDescription {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.endpoint_url.encode(buf)?;
        self.server.encode(buf)?;
        self.server_certificate.encode(buf)?;
        self.security_mode.encode(buf)?;
        self.security_policy_uri.encode(buf)?;
        encode_array(&self.user_identity_tokens, buf)?;
        self.transport_profile_uri.encode(buf)?;
        buf.put_u8(self.security_level);
        Ok(())
    }
}

impl BinaryDecodable for EndpointDescription {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            endpoint_url: String::decode(buf)?,
            server: ApplicationDescription::decode(buf)?,
            server_certificate: Vec::<u8>::decode(buf)?,
            security_mode: MessageSecurityMode::decode(buf)?,
            security_policy_uri: String::decode(buf)?,
            user_identity_tokens: decode_array(buf)?,
            transport_profile_uri: String::decode(buf)?,
            security_level: u8::decode(buf)?,
        })
    }
}

// =============================================================================
// Request / Response Headers
// =============================================================================

/// Header carried by every service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Token identifying the session, null before CreateSession completes.
    pub authentication_token: NodeId,
    /// Wall-clock timestamp of the request.
    pub timestamp: DateTime<Utc>,
    /// Client-assigned correlator echoed in the response.
    pub request_handle: u32,
    /// Diagnostics requested from the server; zero for none.
    pub return_diagnostics: u32,
    /// Audit log correlation id, empty when unused.
    pub audit_entry_id: String,
    /// Hint for how long the client will wait, in milliseconds.
    pub timeout_hint: u32,
    /// Reserved extension point.
    pub additional_header: ExtensionObject,
}

impl RequestHeader {
    /// Creates a request header with the given token, handle, and timeout
    /// hint, stamped with the current wall-clock time.
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: wire_time_now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: String::new(),
            timeout_hint,
            additional_header: ExtensionObject::default(),
        }
    }
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(NodeId::null(), 0, 0)
    }
}

impl BinaryEncodable for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.authentication_token.encode(buf)?;
        self.timestamp.encode(buf)?;
        self.request_handle.encode(buf)?;
        self.return_diagnostics.encode(buf)?;
        self.audit_entry_id.encode(buf)?;
        self.timeout_hint.encode(buf)?;
        self.additional_header.encode(buf)
    }
}

impl BinaryDecodable for RequestHeader {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            authentication_token: NodeId::decode(buf)?,
            timestamp: DateTime::<Utc>::decode(buf)?,
            request_handle: u32::decode(buf)?,
            return_diagnostics: u32::decode(buf)?,
            audit_entry_id: String::decode(buf)?,
            timeout_hint: u32::decode(buf)?,
            additional_header: ExtensionObject::decode(buf)?,
        })
    }
}

/// Header carried by every service response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Wall-clock timestamp of the response.
    pub timestamp: DateTime<Utc>,
    /// The request handle this response answers.
    pub request_handle: u32,
    /// Service-level result.
    pub service_result: StatusCode,
    /// Service-level diagnostics.
    pub service_diagnostics: DiagnosticInfo,
    /// String table referenced by diagnostics.
    pub string_table: Vec<String>,
    /// Reserved extension point.
    pub additional_header: ExtensionObject,
}

impl ResponseHeader {
    /// Creates a good response header answering `request_handle`.
    pub fn good(request_handle: u32) -> Self {
        Self::with_result(request_handle, StatusCode::GOOD)
    }

    /// Creates a response header with an explicit service result.
    pub fn with_result(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: wire_time_now(),
            request_handle,
            service_result,
            service_diagnostics: DiagnosticInfo::default(),
            string_table: Vec::new(),
            additional_header: ExtensionObject::default(),
        }
    }
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self::good(0)
    }
}

impl BinaryEncodable for ResponseHeader {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.timestamp.encode(buf)?;
        self.request_handle.encode(buf)?;
        self.service_result.0.encode(buf)?;
        self.service_diagnostics.encode(buf)?;
        encode_array(&self.string_table, buf)?;
        self.additional_header.encode(buf)
    }
}

impl BinaryDecodable for ResponseHeader {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            timestamp: DateTime::<Utc>::decode(buf)?,
            request_handle: u32::decode(buf)?,
            service_result: StatusCode(u32::decode(buf)?),
            service_diagnostics: DiagnosticInfo::decode(buf)?,
            string_table: decode_array(buf)?,
            additional_header: ExtensionObject::decode(buf)?,
        })
    }
}

// =============================================================================
// Service Messages
// =============================================================================

macro_rules! service_struct {
    (
        $(#[$meta:meta])*
        $name:ident, $type_id:expr, { $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        impl $name {
            /// DefaultBinary encoding id of this structure (ns=0).
            pub const TYPE_ID: u32 = $type_id;

            /// Returns the DefaultBinary encoding node id.
            pub fn type_id() -> NodeId {
                NodeId::numeric(0, Self::TYPE_ID)
            }
        }

        impl BinaryEncodable for $name {
            fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
                $( self.$field.encode(buf)?; )+
                Ok(())
            }
        }

        impl BinaryDecodable for $name {
            fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
                Ok(Self {
                    $( $field: <$ty>::decode(buf)?, )+
                })
            }
        }
    };
}

/// Lifetime and identity of a secure-channel security token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSecurityToken {
    /// Server-assigned channel id.
    pub channel_id: u32,
    /// Server-assigned token id.
    pub token_id: u32,
    /// When the token was created, server wall clock.
    pub created_at: DateTime<Utc>,
    /// Token lifetime granted by the server, in milliseconds.
    pub revised_lifetime: u32,
}

impl Default for ChannelSecurityToken {
    fn default() -> Self {
        Self {
            channel_id: 0,
            token_id: 0,
            created_at: wire_time_now(),
            revised_lifetime: 0,
        }
    }
}

impl BinaryEncodable for ChannelSecurityToken {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.channel_id.encode(buf)?;
        self.token_id.encode(buf)?;
        self.created_at.encode(buf)?;
        self.revised_lifetime.encode(buf)
    }
}

impl BinaryDecodable for ChannelSecurityToken {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            channel_id: u32::decode(buf)?,
            token_id: u32::decode(buf)?,
            created_at: DateTime::<Utc>::decode(buf)?,
            revised_lifetime: u32::decode(buf)?,
        })
    }
}

/// An asymmetric signature over some block of data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignatureData {
    /// Uri of the signature algorithm, empty when unsigned.
    pub algorithm: String,
    /// The signature bytes, empty when unsigned.
    pub signature: Vec<u8>,
}

impl BinaryEncodable for SignatureData {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.algorithm.encode(buf)?;
        self.signature.encode(buf)
    }
}

impl BinaryDecodable for SignatureData {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            algorithm: String::decode(buf)?,
            signature: Vec::<u8>::decode(buf)?,
        })
    }
}

/// A software certificate with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedSoftwareCertificate {
    /// The certificate data.
    pub certificate_data: Vec<u8>,
    /// Signature over the certificate data.
    pub signature: Vec<u8>,
}

impl BinaryEncodable for SignedSoftwareCertificate {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.certificate_data.encode(buf)?;
        self.signature.encode(buf)
    }
}

impl BinaryDecodable for SignedSoftwareCertificate {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            certificate_data: Vec::<u8>::decode(buf)?,
            signature: Vec::<u8>::decode(buf)?,
        })
    }
}

service_struct!(
    /// Asks a server for its endpoint list.
    GetEndpointsRequest, 428, {
        /// Common request header.
        request_header: RequestHeader,
        /// The url the client used to reach the server.
        endpoint_url: String,
        /// Preferred locales for localized strings.
        locale_ids: Vec<String>,
        /// Transport profiles the client accepts; empty for all.
        profile_uris: Vec<String>,
    }
);

service_struct!(
    /// The server's endpoint list.
    GetEndpointsResponse, 431, {
        /// Common response header.
        response_header: ResponseHeader,
        /// Endpoints, in server preference order.
        endpoints: Vec<EndpointDescription>,
    }
);

service_struct!(
    /// Opens or renews a secure channel.
    OpenSecureChannelRequest, 446, {
        /// Common request header.
        request_header: RequestHeader,
        /// uatcp protocol version of the client.
        client_protocol_version: u32,
        /// Issue or renew.
        request_type: SecurityTokenRequestType,
        /// Security mode requested for the channel.
        security_mode: MessageSecurityMode,
        /// Fresh client nonce for key derivation.
        client_nonce: Vec<u8>,
        /// Requested token lifetime, milliseconds.
        requested_lifetime: u32,
    }
);

service_struct!(
    /// Grants a secure-channel security token.
    OpenSecureChannelResponse, 449, {
        /// Common response header.
        response_header: ResponseHeader,
        /// uatcp protocol version of the server.
        server_protocol_version: u32,
        /// The granted token.
        security_token: ChannelSecurityToken,
        /// Fresh server nonce for key derivation.
        server_nonce: Vec<u8>,
    }
);

service_struct!(
    /// Closes the secure channel; the server sends no response.
    CloseSecureChannelRequest, 452, {
        /// Common request header.
        request_header: RequestHeader,
    }
);

service_struct!(
    /// Creates an (inactive) session.
    CreateSessionRequest, 461, {
        /// Common request header.
        request_header: RequestHeader,
        /// Description of this client.
        client_description: ApplicationDescription,
        /// Uri of the server the client expects to talk to, empty to skip.
        server_uri: String,
        /// The network address the client used.
        endpoint_url: String,
        /// Human-readable session name.
        session_name: String,
        /// Client nonce; the server proves possession of its key over it.
        client_nonce: Vec<u8>,
        /// DER-encoded client instance certificate.
        client_certificate: Vec<u8>,
        /// Requested session timeout, milliseconds.
        requested_session_timeout: f64,
        /// Largest response the client accepts; zero is unbounded.
        max_response_message_size: u32,
    }
);

service_struct!(
    /// Result of CreateSession.
    CreateSessionResponse, 464, {
        /// Common response header.
        response_header: ResponseHeader,
        /// Server-assigned session id.
        session_id: NodeId,
        /// Token the client must present on every later request.
        authentication_token: NodeId,
        /// Session timeout granted by the server, milliseconds.
        revised_session_timeout: f64,
        /// Server nonce for the following ActivateSession.
        server_nonce: Vec<u8>,
        /// DER-encoded server instance certificate.
        server_certificate: Vec<u8>,
        /// The server's endpoints, for certificate cross-checking.
        server_endpoints: Vec<EndpointDescription>,
        /// Deprecated; always empty.
        server_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Server signature over client certificate and nonce.
        server_signature: SignatureData,
        /// Largest request the server accepts; zero is unbounded.
        max_request_message_size: u32,
    }
);

service_struct!(
    /// Activates a created (or dormant) session with user credentials.
    ActivateSessionRequest, 467, {
        /// Common request header.
        request_header: RequestHeader,
        /// Client signature over server certificate and nonce.
        client_signature: SignatureData,
        /// Deprecated; always empty.
        client_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Preferred locales for the session.
        locale_ids: Vec<String>,
        /// The user identity token, wrapped with its type id.
        user_identity_token: ExtensionObject,
        /// Signature over the identity token, when the policy demands one.
        user_token_signature: SignatureData,
    }
);

service_struct!(
    /// Result of ActivateSession.
    ActivateSessionResponse, 470, {
        /// Common response header.
        response_header: ResponseHeader,
        /// Fresh server nonce for the next activation.
        server_nonce: Vec<u8>,
        /// Per-software-certificate results; empty in practice.
        results: Vec<StatusCode>,
        /// Per-software-certificate diagnostics; empty in practice.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
);

service_struct!(
    /// Closes the session.
    CloseSessionRequest, 473, {
        /// Common request header.
        request_header: RequestHeader,
        /// Whether the server should drop the session's subscriptions.
        delete_subscriptions: bool,
    }
);

service_struct!(
    /// Result of CloseSession.
    CloseSessionResponse, 476, {
        /// Common response header.
        response_header: ResponseHeader,
    }
);

service_struct!(
    /// Generic failure response carrying only a response header.
    ServiceFault, 397, {
        /// Common response header; `service_result` holds the failure.
        response_header: ResponseHeader,
    }
);

// =============================================================================
// User Identity Tokens
// =============================================================================

service_struct!(
    /// Anonymous identity token.
    AnonymousIdentityToken, 321, {
        /// Policy id copied from the selected [`UserTokenPolicy`].
        policy_id: String,
    }
);

service_struct!(
    /// Username/password identity token.
    UserNameIdentityToken, 324, {
        /// Policy id copied from the selected [`UserTokenPolicy`].
        policy_id: String,
        /// The user name.
        user_name: String,
        /// The password, encrypted per `encryption_algorithm`.
        password: Vec<u8>,
        /// Encryption algorithm uri; empty means plaintext (only acceptable
        /// on an encrypted channel or for testing).
        encryption_algorithm: String,
    }
);

service_struct!(
    /// X.509 certificate identity token.
    X509IdentityToken, 327, {
        /// Policy id copied from the selected [`UserTokenPolicy`].
        policy_id: String,
        /// DER-encoded user certificate.
        certificate_data: Vec<u8>,
    }
);

service_struct!(
    /// Externally issued identity token.
    IssuedIdentityToken, 940, {
        /// Policy id copied from the selected [`UserTokenPolicy`].
        policy_id: String,
        /// The issued token, encrypted per `encryption_algorithm`.
        token_data: Vec<u8>,
        /// Encryption algorithm uri; empty means plaintext.
        encryption_algorithm: String,
    }
);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: BinaryEncodable + BinaryDecodable + PartialEq + std::fmt::Debug>(value: &T) {
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        let decoded = T::decode(&mut read).unwrap();
        assert_eq!(&decoded, value);
        assert_eq!(read.remaining(), 0, "decoder left trailing bytes");
    }

    #[test]
    fn test_node_id_forms_roundtrip() {
        roundtrip(&NodeId::null());
        roundtrip(&NodeId::numeric(0, 255));
        roundtrip(&NodeId::numeric(3, 1025));
        roundtrip(&NodeId::numeric(300, 70_000));
        roundtrip(&NodeId::string(2, "Machine.Temperature"));
        roundtrip(&NodeId::guid(1, Uuid::new_v4()));
        roundtrip(&NodeId::opaque(4, vec![0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn test_node_id_compressed_encodings() {
        // ns=0, id<=255 takes the two-byte form.
        let mut buf = BytesMut::new();
        NodeId::numeric(0, 42).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00, 42]);

        // small ns and id take the four-byte form.
        let mut buf = BytesMut::new();
        NodeId::numeric(5, 1025).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x01, 5, 0x01, 0x04]);
    }

    #[test]
    fn test_node_id_null_detection() {
        assert!(NodeId::null().is_null());
        assert!(!NodeId::numeric(0, 1).is_null());
        assert!(!NodeId::string(0, "").is_null());
    }

    #[test]
    fn test_localized_text_mask() {
        roundtrip(&LocalizedText::default());
        roundtrip(&LocalizedText::new("Demo Server"));
        roundtrip(&LocalizedText {
            locale: "en-US".to_string(),
            text: "Demo Server".to_string(),
        });

        // Empty fields are omitted entirely.
        let mut buf = BytesMut::new();
        LocalizedText::default().encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00]);
    }

    #[test]
    fn test_extension_object_roundtrip() {
        roundtrip(&ExtensionObject::default());

        let token = AnonymousIdentityToken {
            policy_id: "anonymous".to_string(),
        };
        let wrapped =
            ExtensionObject::from_encodable(AnonymousIdentityToken::type_id(), &token).unwrap();
        roundtrip(&wrapped);

        // The wrapped body decodes back into the token.
        match &wrapped.body {
            ExtensionBody::ByteString(bytes) => {
                let mut read = bytes::Bytes::copy_from_slice(bytes);
                let decoded = AnonymousIdentityToken::decode(&mut read).unwrap();
                assert_eq!(decoded, token);
            }
            ExtensionBody::None => panic!("expected a binary body"),
        }
    }

    #[test]
    fn test_security_mode_decode_tolerates_garbage() {
        let mut buf = BytesMut::new();
        99u32.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        assert_eq!(
            MessageSecurityMode::decode(&mut read).unwrap(),
            MessageSecurityMode::Invalid
        );
    }

    #[test]
    fn test_user_token_policy_keeps_raw_token_type() {
        let policy = UserTokenPolicy {
            policy_id: "weird".to_string(),
            token_type: 17,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        policy.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        let decoded = UserTokenPolicy::decode(&mut read).unwrap();
        assert_eq!(decoded.token_type, 17);
        assert_eq!(decoded.token_kind(), None);
        assert_eq!(
            UserTokenPolicy::anonymous("a").token_kind(),
            Some(UserTokenType::Anonymous)
        );
    }

    fn sample_endpoint() -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://plc:4840".to_string(),
            server: ApplicationDescription {
                application_uri: "urn:plc:server".to_string(),
                product_uri: "urn:vendor:product".to_string(),
                application_name: LocalizedText::new("PLC Server"),
                application_type: ApplicationType::Server,
                gateway_server_uri: String::new(),
                discovery_profile_uri: String::new(),
                discovery_urls: vec!["opc.tcp://plc:4840".to_string()],
            },
            server_certificate: vec![1, 2, 3],
            security_mode: MessageSecurityMode::None,
            security_policy_uri: SECURITY_POLICY_NONE_URI.to_string(),
            user_identity_tokens: vec![
                UserTokenPolicy::anonymous("anon"),
                UserTokenPolicy::username("user-pass"),
            ],
            transport_profile_uri: BINARY_TRANSPORT_PROFILE_URI.to_string(),
            security_level: 0,
        }
    }

    #[test]
    fn test_endpoint_description_roundtrip() {
        roundtrip(&sample_endpoint());
    }

    #[test]
    fn test_endpoint_description_copy_is_deep() {
        let original = sample_endpoint();
        let mut copied = original.clone();

        copied.endpoint_url.push_str("/changed");
        copied.server.discovery_urls.push("opc.tcp://other".to_string());
        copied.user_identity_tokens[0].policy_id = "mutated".to_string();

        assert_eq!(original.endpoint_url, "opc.tcp://plc:4840");
        assert_eq!(original.server.discovery_urls.len(), 1);
        assert_eq!(original.user_identity_tokens[0].policy_id, "anon");
    }

    #[test]
    fn test_without_token_policies_strips_only_tokens() {
        let original = sample_endpoint();
        let stripped = original.without_token_policies();
        assert!(stripped.user_identity_tokens.is_empty());
        assert_eq!(stripped.endpoint_url, original.endpoint_url);
        assert_eq!(stripped.security_policy_uri, original.security_policy_uri);
    }

    #[test]
    fn test_open_secure_channel_roundtrip() {
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::null(), 7, 5000),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::None,
            client_nonce: vec![9u8; 32],
            requested_lifetime: 600_000,
        };
        roundtrip(&request);

        let response = OpenSecureChannelResponse {
            response_header: ResponseHeader::good(7),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 11,
                token_id: 1,
                created_at: wire_time_now(),
                revised_lifetime: 300_000,
            },
            server_nonce: vec![3u8; 32],
        };
        // DateTime survives at tick precision, so exact roundtrip holds.
        roundtrip(&response);
    }

    #[test]
    fn test_create_session_roundtrip() {
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::null(), 2, 5000),
            client_description: ApplicationDescription::default(),
            server_uri: String::new(),
            endpoint_url: "opc.tcp://plc:4840".to_string(),
            session_name: "latch session".to_string(),
            client_nonce: vec![5u8; 32],
            client_certificate: Vec::new(),
            requested_session_timeout: 60_000.0,
            max_response_message_size: 0,
        };
        roundtrip(&request);

        let response = CreateSessionResponse {
            response_header: ResponseHeader::good(2),
            session_id: NodeId::guid(1, Uuid::new_v4()),
            authentication_token: NodeId::opaque(0, vec![0xAA; 16]),
            revised_session_timeout: 30_000.0,
            server_nonce: vec![1u8; 32],
            server_certificate: Vec::new(),
            server_endpoints: vec![sample_endpoint()],
            server_software_certificates: Vec::new(),
            server_signature: SignatureData::default(),
            max_request_message_size: 0,
        };
        roundtrip(&response);
    }

    #[test]
    fn test_activate_session_roundtrip() {
        let token = UserNameIdentityToken {
            policy_id: "user-pass".to_string(),
            user_name: "operator".to_string(),
            password: b"secret".to_vec(),
            encryption_algorithm: String::new(),
        };
        let request = ActivateSessionRequest {
            request_header: RequestHeader::new(NodeId::opaque(0, vec![0xAA; 16]), 3, 5000),
            client_signature: SignatureData::default(),
            client_software_certificates: Vec::new(),
            locale_ids: vec!["en".to_string()],
            user_identity_token: ExtensionObject::from_encodable(
                UserNameIdentityToken::type_id(),
                &token,
            )
            .unwrap(),
            user_token_signature: SignatureData::default(),
        };
        roundtrip(&request);

        let response = ActivateSessionResponse {
            response_header: ResponseHeader::good(3),
            server_nonce: vec![2u8; 32],
            results: vec![StatusCode::GOOD],
            diagnostic_infos: Vec::new(),
        };
        roundtrip(&response);
    }

    #[test]
    fn test_service_fault_roundtrip() {
        let fault = ServiceFault {
            response_header: ResponseHeader::with_result(9, StatusCode::BAD_IDENTITY_TOKEN_REJECTED),
        };
        roundtrip(&fault);
    }

    #[test]
    fn test_diagnostic_info_roundtrip() {
        roundtrip(&DiagnosticInfo::default());
        roundtrip(&DiagnosticInfo {
            symbolic_id: Some(1),
            namespace_uri: Some(2),
            locale: Some(3),
            localized_text: Some(4),
            additional_info: Some("detail".to_string()),
            inner_status_code: Some(StatusCode::BAD),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(5),
                ..Default::default()
            })),
        });
    }

    #[test]
    fn test_type_ids() {
        assert_eq!(GetEndpointsRequest::TYPE_ID, 428);
        assert_eq!(GetEndpointsResponse::TYPE_ID, 431);
        assert_eq!(OpenSecureChannelRequest::TYPE_ID, 446);
        assert_eq!(OpenSecureChannelResponse::TYPE_ID, 449);
        assert_eq!(CloseSecureChannelRequest::TYPE_ID, 452);
        assert_eq!(CreateSessionRequest::TYPE_ID, 461);
        assert_eq!(CreateSessionResponse::TYPE_ID, 464);
        assert_eq!(ActivateSessionRequest::TYPE_ID, 467);
        assert_eq!(ActivateSessionResponse::TYPE_ID, 470);
        assert_eq!(CloseSessionRequest::TYPE_ID, 473);
        assert_eq!(CloseSessionResponse::TYPE_ID, 476);
        assert_eq!(ServiceFault::TYPE_ID, 397);
    }
}
