use super::{
    AccessKey, AccessKeyInput, DocumentError, EmissionType, FiscalDocument, HOMOLOGATION_RECIPIENT_NAME,
    Header, HolderError, HolderKind, HolderRole, OneOrMany, RandomCode, ReferencedDocument,
    holder::{self, validate_holder},
    qr::QrCodeDeriver,
    sign::{self, SIGNED_ELEMENT, Signer},
    xml::{self, DocumentXmlError, NfeXml, ResolvedHolders, ToXml, XmlFormat},
};
use crate::config::{Config, Environment};
use tracing::debug;

/// Supplemental block (`infNFeSupl`): QR-code URL and consultation URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Supplemental {
    pub qr_code: String,
    pub consult_url: String,
}

/// Turns caller input into canonical, signable documents.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    env: Environment,
    process_version: String,
    consult_url: String,
    deriver: QrCodeDeriver,
}

/// A validated document with its canonical XML, ready for signing.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    document: FiscalDocument,
    access_key: AccessKey,
    random_code: RandomCode,
    process_version: String,
    holders: ResolvedHolders,
    supplemental: Supplemental,
    deriver: QrCodeDeriver,
    xml: String,
}

/// Signed XML with its QR code finalized; immutable from here on.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDocument {
    access_key: AccessKey,
    emission_type: EmissionType,
    total: f64,
    supplemental: Supplemental,
    xml: String,
}

impl DocumentAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            env: config.env(),
            process_version: config.process_version().to_string(),
            consult_url: config.endpoints().consult.clone(),
            deriver: QrCodeDeriver::new(config.endpoints().qr_code.clone(), config.csc().clone()),
        }
    }

    /// Validate, key, watermark and serialize one document.
    ///
    /// For offline emission types the QR field is left empty; it is
    /// filled in by [`AssembledDocument::sign`].
    ///
    /// # Errors
    /// Returns [`DocumentError`] for header precondition violations, an
    /// environment mismatch, missing items or an invalid holder document.
    pub fn assemble(&self, mut document: FiscalDocument) -> Result<AssembledDocument, DocumentError> {
        if document.header.environment != self.env {
            return Err(DocumentError::EnvironmentMismatch {
                document: document.header.environment,
                configured: self.env,
            });
        }
        if document.items.is_empty() {
            return Err(DocumentError::MissingItems);
        }
        check_header(&document.header)?;

        let random_code = match document.header.random_code.as_deref() {
            Some(code) => RandomCode::parse(code).map_err(|_| DocumentError::InvalidHeader {
                field: "cNF",
                value: code.to_string(),
            })?,
            None => RandomCode::generate(),
        };
        document.header.random_code = Some(random_code.as_str().to_string());

        let emitter_digits = key_holder_digits(&document.emitter.document)?;
        let access_key = AccessKey::compute(&AccessKeyInput {
            state_code: document.header.state_code,
            issued_at: document.header.issued_at,
            holder_document: &emitter_digits,
            model: document.header.model,
            series: document.header.series,
            number: document.header.number,
            emission_type: document.header.emission_type,
            random_code: &random_code,
        });
        let process_version = document
            .header
            .process_version
            .get_or_insert_with(|| self.process_version.clone())
            .clone();
        debug!(access_key = %access_key, "access key generated");

        let holders = resolve_holders(&document)?;
        debug!(access_key = %access_key, "holder documents validated");

        if self.env.is_homologation() {
            if let Some(recipient) = document.recipient.as_mut() {
                recipient.name = Some(HOMOLOGATION_RECIPIENT_NAME.to_string());
            }
        }

        let qr_code = if document.header.emission_type.is_offline() {
            String::new()
        } else {
            self.deriver.online(&access_key, self.env)
        };
        let supplemental = Supplemental {
            qr_code,
            consult_url: self.consult_url.clone(),
        };

        let xml = NfeXml {
            document: &document,
            access_key: &access_key,
            random_code: &random_code,
            process_version: &process_version,
            holders: &holders,
            supplemental: &supplemental,
        }
        .to_xml()?;
        debug!(access_key = %access_key, items = document.items.len(), "document assembled");

        Ok(AssembledDocument {
            document,
            access_key,
            random_code,
            process_version,
            holders,
            supplemental,
            deriver: self.deriver.clone(),
            xml,
        })
    }

    /// Assemble and sign every document in input order.
    ///
    /// Stops at the first failure; no partial batch is returned.
    pub fn assemble_all(
        &self,
        documents: OneOrMany<FiscalDocument>,
        signer: &dyn Signer,
    ) -> Result<Vec<SignedDocument>, DocumentError> {
        let documents = documents.into_vec();
        let mut signed = Vec::with_capacity(documents.len());
        for (idx, document) in documents.into_iter().enumerate() {
            let assembled = self.assemble(document).inspect_err(|err| {
                debug!(index = idx, error = %err, "document assembly failed");
            })?;
            signed.push(assembled.sign(signer)?);
        }
        Ok(signed)
    }
}

fn check_header(header: &Header) -> Result<(), DocumentError> {
    let invalid = |field: &'static str, value: String| DocumentError::InvalidHeader { field, value };
    if !(10..100).contains(&header.state_code) {
        return Err(invalid("cUF", header.state_code.to_string()));
    }
    if !(10..100).contains(&header.model) {
        return Err(invalid("mod", header.model.to_string()));
    }
    if header.series > 999 {
        return Err(invalid("serie", header.series.to_string()));
    }
    if header.number == 0 || header.number > 999_999_999 {
        return Err(invalid("nNF", header.number.to_string()));
    }
    let municipality = &header.municipality_code;
    if municipality.len() != 7 || !municipality.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("cMunFG", municipality.clone()));
    }
    if header.emission_type != EmissionType::Normal && header.contingency.is_none() {
        return Err(invalid("dhCont", String::new()));
    }
    Ok(())
}

/// Emitter digits for the access key; at most 14 digits.
fn key_holder_digits(document: &str) -> Result<String, DocumentError> {
    match holder::normalize(document) {
        Some(digits) if !digits.is_empty() && digits.len() <= 14 => Ok(digits),
        _ => Err(HolderError {
            role: HolderRole::Emitter,
            kind: HolderKind::Unknown,
            document: document.to_string(),
        }
        .into()),
    }
}

fn resolve_holders(document: &FiscalDocument) -> Result<ResolvedHolders, DocumentError> {
    let emitter = validate_holder(&document.emitter.document, HolderRole::Emitter)?;
    let recipient = document
        .recipient
        .as_ref()
        .map(|r| validate_holder(&r.document, HolderRole::Recipient))
        .transpose()?;
    let carrier = document
        .transport
        .carrier
        .as_ref()
        .map(|c| validate_holder(&c.document, HolderRole::Carrier))
        .transpose()?;

    let mut references = Vec::with_capacity(document.header.references.len());
    for reference in document.header.references.as_slice() {
        match reference {
            ReferencedDocument::AccessKey(key) => {
                AccessKey::parse(key).map_err(|_| DocumentError::InvalidHeader {
                    field: "refNFe",
                    value: key.clone(),
                })?;
                references.push(None);
            }
            ReferencedDocument::RuralProducer(rural) => {
                let holder =
                    validate_holder(&rural.document, HolderRole::RuralProducerReference)?;
                references.push(Some(holder));
            }
        }
    }

    Ok(ResolvedHolders {
        emitter,
        recipient,
        carrier,
        references,
    })
}

impl AssembledDocument {
    pub fn document(&self) -> &FiscalDocument {
        &self.document
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    pub fn random_code(&self) -> &RandomCode {
        &self.random_code
    }

    pub fn supplemental(&self) -> &Supplemental {
        &self.supplemental
    }

    pub fn emission_type(&self) -> EmissionType {
        self.document.header.emission_type
    }

    /// Compact canonical XML, as handed to the signer.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Sign the core element and, for offline emission, finalize the QR code.
    ///
    /// # Errors
    /// Returns [`DocumentError::Signing`] if the signer fails and
    /// [`DocumentError::DigestNotFound`] if an offline document comes back
    /// without a digest marker.
    pub fn sign(self, signer: &dyn Signer) -> Result<SignedDocument, DocumentError> {
        let signed_xml = signer.sign(&self.xml, SIGNED_ELEMENT)?;
        sign::ensure_signed_element(&signed_xml)?;
        debug!(access_key = %self.access_key, "document signed");

        let emission_type = self.emission_type();
        let total = self.document.totals.total;
        let mut supplemental = self.supplemental;
        let xml = if emission_type.is_offline() {
            let qr_code = self.deriver.offline_from_signed(
                &signed_xml,
                &self.access_key,
                self.document.header.environment,
                total,
            )?;
            let rewritten = xml::rewrite_supplemental_qr(&signed_xml, &qr_code)?;
            debug!(access_key = %self.access_key, "offline QR code finalized");
            supplemental.qr_code = qr_code;
            rewritten
        } else {
            signed_xml
        };

        Ok(SignedDocument {
            access_key: self.access_key,
            emission_type,
            total,
            supplemental,
            xml,
        })
    }
}

impl ToXml for AssembledDocument {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentXmlError> {
        match format {
            XmlFormat::Compact => Ok(self.xml.clone()),
            pretty => NfeXml {
                document: &self.document,
                access_key: &self.access_key,
                random_code: &self.random_code,
                process_version: &self.process_version,
                holders: &self.holders,
                supplemental: &self.supplemental,
            }
            .to_xml_with_format(pretty),
        }
    }
}

impl SignedDocument {
    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    pub fn emission_type(&self) -> EmissionType {
        self.emission_type
    }

    /// Document total (`vNF`).
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn supplemental(&self) -> &Supplemental {
        &self.supplemental
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn into_xml(self) -> String {
        self.xml
    }
}

impl ToXml for SignedDocument {
    fn to_xml_with_format(&self, _format: XmlFormat) -> Result<String, DocumentXmlError> {
        // signed bytes are final; reformatting would break the signature
        Ok(self.xml.clone())
    }
}
