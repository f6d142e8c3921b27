//! Detached Ed25519 signatures over raw manifest bytes.

use crate::SchemaError;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `<manifest>.sig` next to the manifest.
pub fn signature_path(manifest: &Path) -> PathBuf {
    let mut s = manifest.as_os_str().to_owned();
    s.push(".sig");
    PathBuf::from(s)
}

pub fn signing_key_from_base64(encoded: &str) -> Result<SigningKey, SchemaError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| SchemaError::BadSignature(format!("signing key: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SchemaError::BadSignature("signing key must be 32 bytes".to_owned()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

pub fn public_key_base64(key: &SigningKey) -> String {
    BASE64_STANDARD.encode(key.verifying_key().to_bytes())
}

/// Sign `raw` and return the base64 signature text.
pub fn sign_manifest(raw: &[u8], key: &SigningKey) -> String {
    BASE64_STANDARD.encode(key.sign(raw).to_bytes())
}

/// Accept the manifest if any trusted key verifies the signature.
pub fn verify_manifest_signature(
    raw: &[u8],
    signature_b64: &str,
    trusted_keys: &[String],
) -> Result<(), SchemaError> {
    let sig_bytes = BASE64_STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| SchemaError::BadSignature(format!("signature encoding: {e}")))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| SchemaError::BadSignature("signature must be 64 bytes".to_owned()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    for encoded in trusted_keys {
        let Some(key) = decode_verifying_key(encoded) else {
            debug!("skipping malformed trusted key");
            continue;
        };
        if key.verify(raw, &signature).is_ok() {
            return Ok(());
        }
    }
    Err(SchemaError::BadSignature(
        "no trusted key verifies the signature".to_owned(),
    ))
}

fn decode_verifying_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = BASE64_STANDARD.decode(encoded.trim()).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn sign_and_verify() {
        let k = key(7);
        let sig = sign_manifest(b"a = 00\n", &k);
        let trusted = vec![public_key_base64(&k)];
        assert!(verify_manifest_signature(b"a = 00\n", &sig, &trusted).is_ok());
    }

    #[test]
    fn modified_content_is_rejected() {
        let k = key(7);
        let sig = sign_manifest(b"a = 00\n", &k);
        let trusted = vec![public_key_base64(&k)];
        assert!(verify_manifest_signature(b"a = 01\n", &sig, &trusted).is_err());
    }

    #[test]
    fn untrusted_key_is_rejected() {
        let sig = sign_manifest(b"data", &key(1));
        let trusted = vec![public_key_base64(&key(2))];
        assert!(matches!(
            verify_manifest_signature(b"data", &sig, &trusted),
            Err(SchemaError::BadSignature(_))
        ));
    }

    #[test]
    fn any_trusted_key_suffices() {
        let sig = sign_manifest(b"data", &key(3));
        let trusted = vec![
            "not base64!".to_owned(),
            public_key_base64(&key(4)),
            public_key_base64(&key(3)),
        ];
        assert!(verify_manifest_signature(b"data", &sig, &trusted).is_ok());
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let trusted = vec![public_key_base64(&key(1))];
        assert!(verify_manifest_signature(b"data", "AAAA", &trusted).is_err());
    }

    #[test]
    fn signing_key_roundtrip_through_base64() {
        let encoded = BASE64_STANDARD.encode([9u8; 32]);
        let k = signing_key_from_base64(&encoded).unwrap();
        assert_eq!(public_key_base64(&k), public_key_base64(&key(9)));
        assert!(signing_key_from_base64("AAAA").is_err());
    }

    #[test]
    fn signature_path_appends_suffix() {
        assert_eq!(
            signature_path(Path::new("/app/digest2.txt")),
            PathBuf::from("/app/digest2.txt.sig")
        );
    }
}
