// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security policy seam.
//!
//! The channel applies all cryptography through the [`SecurityPolicy`]
//! trait: nonce generation, key derivation, and the per-chunk protect /
//! unprotect transforms. The crate ships only [`PolicyNone`]; real
//! cryptographic policies (Basic256Sha256 and friends) are separate
//! implementations plugged in through
//! [`ClientConfigBuilder::add_security_policy`](crate::types::ClientConfigBuilder::add_security_policy).
//!
//! Policies are looked up by uri; the channel binds exactly one policy for
//! its lifetime.

use latch_core::types::MessageSecurityMode;
use latch_core::SECURITY_POLICY_NONE_URI;

use bytes::BytesMut;
use rand::RngCore;

use crate::error::{ClientResult, SecurityError};

/// Length of the local nonce contributed to key derivation, in octets.
pub const LOCAL_NONCE_LENGTH: usize = 32;

/// Upper bound on the plaintext block size when a policy encrypts identity
/// token secrets for transmission.
pub const MAX_DATA_SIZE: usize = 4096;

// =============================================================================
// ChannelKeys
// =============================================================================

/// Symmetric key material derived from the two channel nonces.
///
/// [`PolicyNone`] derives no keys; the struct stays empty. Policies with
/// real cryptography fill all six fields.
#[derive(Debug, Clone, Default)]
pub struct ChannelKeys {
    /// Local signing key.
    pub local_signing: Vec<u8>,
    /// Local encryption key.
    pub local_encryption: Vec<u8>,
    /// Local initialization vector.
    pub local_iv: Vec<u8>,
    /// Remote signing key.
    pub remote_signing: Vec<u8>,
    /// Remote encryption key.
    pub remote_encryption: Vec<u8>,
    /// Remote initialization vector.
    pub remote_iv: Vec<u8>,
}

impl ChannelKeys {
    /// Returns `true` if no key material is held.
    pub fn is_empty(&self) -> bool {
        self.local_signing.is_empty()
            && self.local_encryption.is_empty()
            && self.local_iv.is_empty()
            && self.remote_signing.is_empty()
            && self.remote_encryption.is_empty()
            && self.remote_iv.is_empty()
    }

    /// Overwrites all key material with zeros and releases it.
    pub fn wipe(&mut self) {
        for key in [
            &mut self.local_signing,
            &mut self.local_encryption,
            &mut self.local_iv,
            &mut self.remote_signing,
            &mut self.remote_encryption,
            &mut self.remote_iv,
        ] {
            key.fill(0);
            key.clear();
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// Cryptographic operations bound to a security policy uri.
pub trait SecurityPolicy: Send + Sync {
    /// The policy uri endpoints are matched against.
    fn uri(&self) -> &str;

    /// DER-encoded local application instance certificate; empty for
    /// certificate-less policies.
    fn local_certificate(&self) -> &[u8];

    /// Thumbprint of the remote certificate for the asymmetric header;
    /// empty for certificate-less policies.
    fn remote_certificate_thumbprint(&self, remote_certificate: &[u8]) -> Vec<u8>;

    /// Fills `nonce` with fresh random material.
    fn generate_nonce(&self, nonce: &mut [u8]) -> ClientResult<()>;

    /// Derives the symmetric channel keys from the two nonces.
    fn derive_keys(&self, local_nonce: &[u8], remote_nonce: &[u8]) -> ClientResult<ChannelKeys>;

    /// Applies outgoing protection (signing/encryption) to a complete chunk.
    ///
    /// The chunk arrives with its 8-byte message header already reserved at
    /// the front; implementations must keep the header plaintext.
    fn protect_chunk(
        &self,
        mode: MessageSecurityMode,
        keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> ClientResult<BytesMut>;

    /// Removes incoming protection from a complete chunk.
    fn unprotect_chunk(
        &self,
        mode: MessageSecurityMode,
        keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> ClientResult<BytesMut>;
}

// =============================================================================
// PolicyNone
// =============================================================================

/// The `SecurityPolicy#None` profile: no certificates, no keys, chunks pass
/// through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyNone;

impl SecurityPolicy for PolicyNone {
    fn uri(&self) -> &str {
        SECURITY_POLICY_NONE_URI
    }

    fn local_certificate(&self) -> &[u8] {
        &[]
    }

    fn remote_certificate_thumbprint(&self, _remote_certificate: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn generate_nonce(&self, nonce: &mut [u8]) -> ClientResult<()> {
        // The None profile still contributes a random nonce; servers reject
        // all-zero nonces.
        rand::thread_rng().fill_bytes(nonce);
        Ok(())
    }

    fn derive_keys(&self, _local_nonce: &[u8], _remote_nonce: &[u8]) -> ClientResult<ChannelKeys> {
        Ok(ChannelKeys::default())
    }

    fn protect_chunk(
        &self,
        mode: MessageSecurityMode,
        _keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> ClientResult<BytesMut> {
        if mode != MessageSecurityMode::None && mode != MessageSecurityMode::Invalid {
            return Err(SecurityError::transform_failed(format!(
                "SecurityPolicy#None cannot provide mode {mode}"
            ))
            .into());
        }
        Ok(chunk)
    }

    fn unprotect_chunk(
        &self,
        _mode: MessageSecurityMode,
        _keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> ClientResult<BytesMut> {
        Ok(chunk)
    }
}

// =============================================================================
// CertificateVerification
// =============================================================================

/// Hook verifying certificates against the local configuration.
///
/// The connection core uses this only to check that each policy certificate
/// embeds the configured application uri; the result is reported as a
/// warning and never fails the connect.
pub trait CertificateVerification: Send + Sync {
    /// Verifies that `certificate` embeds `application_uri`.
    fn verify_application_uri(
        &self,
        certificate: &[u8],
        application_uri: &str,
    ) -> ClientResult<()>;
}

/// Verification hook that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerification;

impl CertificateVerification for AcceptAllVerification {
    fn verify_application_uri(
        &self,
        _certificate: &[u8],
        _application_uri: &str,
    ) -> ClientResult<()> {
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_none_uri() {
        assert_eq!(
            PolicyNone.uri(),
            "http://opcfoundation.org/UA/SecurityPolicy#None"
        );
        assert!(PolicyNone.local_certificate().is_empty());
    }

    #[test]
    fn test_nonce_is_random() {
        let mut first = [0u8; LOCAL_NONCE_LENGTH];
        let mut second = [0u8; LOCAL_NONCE_LENGTH];
        PolicyNone.generate_nonce(&mut first).unwrap();
        PolicyNone.generate_nonce(&mut second).unwrap();
        assert_ne!(first, [0u8; LOCAL_NONCE_LENGTH]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_policy_none_passthrough() {
        let chunk = BytesMut::from(&b"payload"[..]);
        let out = PolicyNone
            .protect_chunk(MessageSecurityMode::None, &ChannelKeys::default(), chunk)
            .unwrap();
        assert_eq!(&out[..], b"payload");
    }

    #[test]
    fn test_policy_none_rejects_sign() {
        let chunk = BytesMut::new();
        let result =
            PolicyNone.protect_chunk(MessageSecurityMode::Sign, &ChannelKeys::default(), chunk);
        assert!(result.is_err());
    }

    #[test]
    fn test_keys_wipe() {
        let mut keys = ChannelKeys {
            local_signing: vec![1; 32],
            local_encryption: vec![2; 32],
            local_iv: vec![3; 16],
            remote_signing: vec![4; 32],
            remote_encryption: vec![5; 32],
            remote_iv: vec![6; 16],
        };
        assert!(!keys.is_empty());
        keys.wipe();
        assert!(keys.is_empty());
    }
}
