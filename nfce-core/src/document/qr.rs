//! NFC-e verification QR-code URL derivation (version 2).
//!
//! Online mode runs before signing and signs the URL with the CSC pair.
//! Offline mode runs after signing and embeds the signed document's
//! `DigestValue`, so the code can be verified without the live channel.
use super::{AccessKey, DocumentError, sign::extract_digest};
use crate::config::{CscCredentials, Environment};
use sha1::{Digest, Sha1};

pub const QR_CODE_VERSION: &str = "2";

/// Digest-type tag placed in offline QR payloads.
pub const OFFLINE_DIGEST_TAG: &str = "02";

/// Derives QR-code URLs from an explicit base URL and CSC pair.
#[derive(Debug, Clone)]
pub struct QrCodeDeriver {
    base_url: String,
    csc: CscCredentials,
}

impl QrCodeDeriver {
    pub fn new(base_url: impl Into<String>, csc: CscCredentials) -> Self {
        Self {
            base_url: base_url.into(),
            csc,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Online URL: `key|2|tpAmb|cscId|hash`.
    ///
    /// # Examples
    /// ```rust
    /// use nfce_core::config::{CscCredentials, Environment};
    /// use nfce_core::document::{AccessKey, qr::QrCodeDeriver};
    ///
    /// let key = AccessKey::parse("35240811222333000181650010004523801611650830")?;
    /// let deriver = QrCodeDeriver::new("https://example.test/qr", CscCredentials::new(1, "SECRET"));
    /// let url = deriver.online(&key, Environment::Homologation);
    /// assert!(url.starts_with("https://example.test/qr?p=35240811222333000181650010004523801611650830|2|2|1|"));
    /// # Ok::<(), nfce_core::document::access_key::AccessKeyError>(())
    /// ```
    pub fn online(&self, key: &AccessKey, env: Environment) -> String {
        let payload = format!(
            "{key}|{QR_CODE_VERSION}|{}|{}",
            env.code(),
            self.csc.id()
        );
        self.finish(payload)
    }

    /// Offline URL: `key|2|tpAmb|02|vNF|hex(digest)|hash`.
    pub fn offline(&self, key: &AccessKey, env: Environment, total: f64, digest: &str) -> String {
        let payload = format!(
            "{key}|{QR_CODE_VERSION}|{}|{OFFLINE_DIGEST_TAG}|{total:.2}|{}",
            env.code(),
            hex::encode(digest.as_bytes())
        );
        self.finish(payload)
    }

    /// Offline URL using the digest embedded in `signed_xml`.
    ///
    /// # Errors
    /// Returns [`DocumentError::DigestNotFound`] if the XML carries no digest.
    pub fn offline_from_signed(
        &self,
        signed_xml: &str,
        key: &AccessKey,
        env: Environment,
        total: f64,
    ) -> Result<String, DocumentError> {
        let digest = extract_digest(signed_xml)?;
        Ok(self.offline(key, env, total, &digest))
    }

    fn finish(&self, payload: String) -> String {
        let hash = csc_hash(&payload, self.csc.token());
        format!("{}?p={payload}|{hash}", self.base_url)
    }
}

/// Upper-case hex SHA-1 over the payload followed by the CSC token.
fn csc_hash(payload: &str, token: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode_upper(hasher.finalize())
}
