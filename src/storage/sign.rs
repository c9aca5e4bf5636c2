//! Query-string signing for part upload URLs.
//!
//! Both backends embed the same token shape in their presigned URLs:
//! a url-safe base64 SHA-256 digest over the signing secret, object key,
//! part number and expiry. The local part-PUT handler verifies it before
//! accepting bytes.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Characters escaped when an object key rides in a URL path. `/` stays
/// literal so the key keeps its segment structure; everything here would
/// otherwise terminate the path, start the query, or be eaten by
/// percent-decoding on the receiving side.
const KEY_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode an object key for use as a URL path. Signatures are
/// always computed over the decoded key, so the PUT handler verifies
/// against exactly what the router hands it after decoding.
pub fn encode_key_path(key: &str) -> String {
    utf8_percent_encode(key, KEY_PATH).to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("upload URL has expired")]
    Expired,
    #[error("upload URL signature mismatch")]
    Mismatch,
}

/// Signs and verifies part upload tokens with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the signature for one part of one object, valid until
    /// `expires_unix`.
    pub fn sign(&self, object_key: &str, part_number: i64, expires_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(object_key.as_bytes());
        hasher.update(b"\n");
        hasher.update(part_number.to_be_bytes());
        hasher.update(expires_unix.to_be_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Check a presented signature and its expiry against `now_unix`.
    pub fn verify(
        &self,
        object_key: &str,
        part_number: i64,
        expires_unix: i64,
        signature: &str,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        if now_unix >= expires_unix {
            return Err(SignatureError::Expired);
        }
        let expected = self.sign(object_key, part_number, expires_unix);
        if expected != signature {
            return Err(SignatureError::Mismatch);
        }
        Ok(())
    }
}
