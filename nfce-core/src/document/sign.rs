//! Signing collaborator contract and digest-marker extraction.
use super::{DocumentError, xml::locate};
use thiserror::Error;

/// Element whose subtree the signature covers.
pub const SIGNED_ELEMENT: &str = "infNFe";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing failed: {0}")]
    SigningError(String),
    #[error("signer returned XML without the {0} element")]
    MissingSignedElement(&'static str),
}

/// XML digital signature provider.
///
/// Implementations sign the element named `reference_tag` (always
/// `infNFe`) with an enveloped XMLDSig signature and return the complete
/// document, embedding a `DigestValue`. Bytes outside the signed element
/// are expected to come back unchanged.
pub trait Signer: Send + Sync {
    fn sign(&self, xml: &str, reference_tag: &str) -> Result<String, SigningError>;
}

impl<T: Signer + ?Sized> Signer for std::sync::Arc<T> {
    fn sign(&self, xml: &str, reference_tag: &str) -> Result<String, SigningError> {
        (**self).sign(xml, reference_tag)
    }
}

/// Text of the first `DigestValue` element, any namespace prefix.
///
/// # Errors
/// Returns [`DocumentError::DigestNotFound`] if the XML carries no
/// non-empty digest marker.
pub fn extract_digest(signed_xml: &str) -> Result<String, DocumentError> {
    let span = locate::first_element(signed_xml, "DigestValue", 0..signed_xml.len())
        .map_err(|_| DocumentError::DigestNotFound)?
        .ok_or(DocumentError::DigestNotFound)?;
    let value = signed_xml[span.inner].trim();
    if value.is_empty() {
        return Err(DocumentError::DigestNotFound);
    }
    Ok(value.to_string())
}

/// Check that the signer kept the signed element in its output.
pub(crate) fn ensure_signed_element(signed_xml: &str) -> Result<(), SigningError> {
    match locate::first_element(signed_xml, SIGNED_ELEMENT, 0..signed_xml.len()) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(SigningError::MissingSignedElement(SIGNED_ELEMENT)),
        Err(err) => Err(SigningError::SigningError(format!(
            "signer returned malformed XML: {err}"
        ))),
    }
}
