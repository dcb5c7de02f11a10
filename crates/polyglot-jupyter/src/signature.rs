//! HMAC signing of the four JSON parts of every message.
//!
//! An empty key disables signing: outbound signatures are empty and inbound
//! ones are not checked.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::error::JupyterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl SignatureScheme {
    /// Accepts the connection-file spelling (`hmac-sha256`), ignoring case
    /// and dashes.
    pub fn parse(raw: &str) -> Result<Self, JupyterError> {
        match raw.replace('-', "").to_ascii_lowercase().as_str() {
            "hmacsha256" => Ok(Self::HmacSha256),
            "hmacsha512" => Ok(Self::HmacSha512),
            _ => Err(JupyterError::UnsupportedScheme(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signer {
    scheme: SignatureScheme,
    key: Vec<u8>,
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self, JupyterError> {
        Ok(Self {
            scheme: SignatureScheme::parse(scheme)?,
            key: key.as_bytes().to_vec(),
        })
    }

    pub fn unsigned() -> Self {
        Self {
            scheme: SignatureScheme::HmacSha256,
            key: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.key.is_empty()
    }

    /// Lowercase hex digest over `parts` in order.
    pub fn sign(&self, parts: &[&[u8]]) -> Result<String, JupyterError> {
        if !self.is_enabled() {
            return Ok(String::new());
        }
        let tag = match self.scheme {
            SignatureScheme::HmacSha256 => digest::<Hmac<Sha256>>(&self.key, parts)?,
            SignatureScheme::HmacSha512 => digest::<Hmac<Sha512>>(&self.key, parts)?,
        };
        Ok(hex::encode(tag))
    }

    pub fn verify(&self, signature: &str, parts: &[&[u8]]) -> Result<(), JupyterError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let tag = hex::decode(signature)
            .map_err(|e| JupyterError::Protocol(format!("signature is not hex: {e}")))?;
        match self.scheme {
            SignatureScheme::HmacSha256 => check::<Hmac<Sha256>>(&self.key, parts, &tag),
            SignatureScheme::HmacSha512 => check::<Hmac<Sha512>>(&self.key, parts, &tag),
        }
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<M, JupyterError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|e| JupyterError::Protocol(format!("signing key rejected: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

fn digest<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, JupyterError> {
    Ok(keyed::<M>(key, parts)?.finalize().into_bytes().to_vec())
}

fn check<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<(), JupyterError> {
    keyed::<M>(key, parts)?
        .verify_slice(tag)
        .map_err(JupyterError::InvalidSignature)
}
