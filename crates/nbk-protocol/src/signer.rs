use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::error::ProtocolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl SignatureScheme {
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "hmac-sha256" => Ok(SignatureScheme::HmacSha256),
            "hmac-sha512" => Ok(SignatureScheme::HmacSha512),
            other => Err(ProtocolError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Computes and checks the hex HMAC over the four JSON frames
/// (header, parent header, metadata, content). An empty key disables signing.
#[derive(Clone)]
pub struct Signer {
    key: Option<(SignatureScheme, Vec<u8>)>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("scheme", &self.key.as_ref().map(|(scheme, _)| *scheme))
            .finish()
    }
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self, ProtocolError> {
        if key.is_empty() {
            return Ok(Self::unsigned());
        }
        let scheme = SignatureScheme::parse(scheme)?;
        Ok(Self { key: Some((scheme, key.as_bytes().to_vec())) })
    }

    pub fn unsigned() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn sign(&self, parts: [&[u8]; 4]) -> Result<String, ProtocolError> {
        match &self.key {
            None => Ok(String::new()),
            Some((SignatureScheme::HmacSha256, key)) => {
                Ok(hex::encode(mac::<Hmac<Sha256>>(key, parts)?.finalize().into_bytes()))
            }
            Some((SignatureScheme::HmacSha512, key)) => {
                Ok(hex::encode(mac::<Hmac<Sha512>>(key, parts)?.finalize().into_bytes()))
            }
        }
    }

    /// Constant-time comparison of `signature` (hex) against the expected MAC.
    pub fn verify(&self, parts: [&[u8]; 4], signature: &[u8]) -> Result<(), ProtocolError> {
        let Some((scheme, key)) = &self.key else {
            return Ok(());
        };
        let expected = hex::decode(signature).map_err(|_| ProtocolError::InvalidSignature)?;
        let verified = match scheme {
            SignatureScheme::HmacSha256 => mac::<Hmac<Sha256>>(key, parts)?.verify_slice(&expected),
            SignatureScheme::HmacSha512 => mac::<Hmac<Sha512>>(key, parts)?.verify_slice(&expected),
        };
        verified.map_err(|_| ProtocolError::InvalidSignature)
    }
}

fn mac<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: [&[u8]; 4]) -> Result<M, ProtocolError> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .map_err(|err| ProtocolError::InvalidKey(err.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}
