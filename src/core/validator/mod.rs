use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::core::error::UpdateError;

/// Checks a detached signature over a downloaded payload before anything
/// touches disk.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature_base64: &str) -> Result<(), UpdateError>;
}

/// Ed25519 detached signatures, key and signature both base64 encoded.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn from_base64(public_key: &str) -> Result<Self, UpdateError> {
        let bytes = general_purpose::STANDARD
            .decode(public_key.trim())
            .map_err(|error| UpdateError::Signature(format!("invalid public key encoding: {error}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| UpdateError::Signature("invalid public key length".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|error| UpdateError::Signature(format!("invalid public key: {error}")))?;
        Ok(Self::new(key))
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, payload: &[u8], signature_base64: &str) -> Result<(), UpdateError> {
        let bytes = general_purpose::STANDARD
            .decode(signature_base64.trim())
            .map_err(|error| UpdateError::Signature(format!("invalid signature encoding: {error}")))?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| UpdateError::Signature("invalid signature length".to_string()))?;
        let signature = Signature::from_bytes(&bytes);

        self.key.verify(payload, &signature).map_err(|error| {
            tracing::error!("Signature verification failed: {error}");
            UpdateError::Signature("signature does not match the payload".to_string())
        })
    }
}

/// Used when no update key is configured. Rejects everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissingKeyVerifier;

impl SignatureVerifier for MissingKeyVerifier {
    fn verify(&self, _payload: &[u8], _signature_base64: &str) -> Result<(), UpdateError> {
        Err(UpdateError::Signature(
            "no update public key is configured".to_string(),
        ))
    }
}

pub fn verifier_from_key(public_key: Option<&str>) -> Box<dyn SignatureVerifier> {
    match public_key.map(Ed25519Verifier::from_base64) {
        Some(Ok(verifier)) => Box::new(verifier),
        Some(Err(error)) => {
            tracing::warn!("Ignoring update public key: {error}");
            Box::new(MissingKeyVerifier)
        }
        None => Box::new(MissingKeyVerifier),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{public_key_base64, sign_base64};
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let verifier = Ed25519Verifier::from_base64(&public_key_base64()).expect("key");
        let payload = b"launcher archive";
        verifier.verify(payload, &sign_base64(payload)).expect("valid");
    }

    #[test]
    fn rejects_tampered_payload() {
        let verifier = Ed25519Verifier::from_base64(&public_key_base64()).expect("key");
        let signature = sign_base64(b"launcher archive");
        assert!(matches!(
            verifier.verify(b"launcher archivf", &signature),
            Err(UpdateError::Signature(_))
        ));
    }

    #[test]
    fn rejects_malformed_signature() {
        let verifier = Ed25519Verifier::from_base64(&public_key_base64()).expect("key");
        assert!(verifier.verify(b"x", "not base64!").is_err());
        assert!(verifier.verify(b"x", "AAAA").is_err());
    }

    #[test]
    fn missing_key_fails_closed() {
        let verifier = verifier_from_key(None);
        assert!(verifier.verify(b"x", &sign_base64(b"x")).is_err());
        let verifier = verifier_from_key(Some("garbage"));
        assert!(verifier.verify(b"x", &sign_base64(b"x")).is_err());
    }
}
