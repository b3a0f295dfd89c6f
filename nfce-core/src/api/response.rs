//! Response classification and per-document reconciliation.
use libxml::{parser::Parser, tree::Document, xpath};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, Operation};
use crate::document::{
    AccessKey, SignedDocument,
    xml::{
        constants::{NFE_NS, SCHEMA_VERSION, XML_DECLARATION},
        locate, strip_declaration,
    },
};

/// Lot-level statuses meaning the lot was received.
/// 103: received, 104: processed, 105: still processing.
const LOT_ACCEPTED: [u16; 3] = [103, 104, 105];

/// Document-level statuses meaning the document was authorized.
/// 150 is an authorization granted after the deadline.
const DOCUMENT_AUTHORIZED: [u16; 2] = [100, 150];

/// One per-document protocol (`protNFe/infProt`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    pub access_key: String,
    pub protocol_number: Option<String>,
    pub status_code: u16,
    pub status_reason: String,
    pub received_at: Option<String>,
    pub digest: Option<String>,
    /// The `protNFe` element exactly as received.
    #[serde(skip)]
    pub raw: String,
}

impl ProtocolRecord {
    pub fn is_authorized(&self) -> bool {
        DOCUMENT_AUTHORIZED.contains(&self.status_code)
    }
}

/// Classified service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    accepted: bool,
    status_code: u16,
    status_reason: String,
    receipt_number: Option<String>,
    protocols: Vec<ProtocolRecord>,
    raw: String,
}

impl ServiceResponse {
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_reason(&self) -> &str {
        &self.status_reason
    }

    pub fn receipt_number(&self) -> Option<&str> {
        self.receipt_number.as_deref()
    }

    pub fn protocols(&self) -> &[ProtocolRecord] {
        &self.protocols
    }

    pub fn into_protocols(self) -> Vec<ProtocolRecord> {
        self.protocols
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// Decides whether a raw response is an acceptance or a rejection.
pub trait RejectionClassifier: Send + Sync {
    /// # Errors
    /// [`ApiError::InvalidResponse`] when the body carries no recognizable
    /// result element for `operation`.
    fn classify(&self, raw: &str, operation: Operation) -> Result<ServiceResponse, ApiError>;
}

/// Reads `cStat`, `xMotivo`, `nRec` and `protNFe` from the result element.
#[derive(Debug, Clone, Copy, Default)]
pub struct SefazRejectionClassifier;

impl RejectionClassifier for SefazRejectionClassifier {
    fn classify(&self, raw: &str, operation: Operation) -> Result<ServiceResponse, ApiError> {
        let doc = Parser::default()
            .parse_string(raw)
            .map_err(|e| ApiError::InvalidResponse(format!("unparseable response: {e:?}")))?;
        let ctx = build_context(&doc)?;
        let ret = format!("//nfe:{}", operation.result_element());

        let status = xpath_text(&ctx, &format!("{ret}/nfe:cStat"))?.ok_or_else(|| {
            ApiError::InvalidResponse(format!(
                "response has no {}/cStat",
                operation.result_element()
            ))
        })?;
        let status_code = parse_status(&status)?;
        let status_reason = xpath_text(&ctx, &format!("{ret}/nfe:xMotivo"))?.unwrap_or_default();
        let receipt_number = xpath_text(&ctx, &format!("{ret}/nfe:infRec/nfe:nRec"))?
            .or(xpath_text(&ctx, &format!("{ret}/nfe:nRec"))?);

        let protocols = parse_protocols(&ctx, raw, &ret)?;
        debug!(
            operation = operation.service_name(),
            status_code,
            protocols = protocols.len(),
            "classified response"
        );

        Ok(ServiceResponse {
            accepted: LOT_ACCEPTED.contains(&status_code),
            status_code,
            status_reason,
            receipt_number,
            protocols,
            raw: raw.to_string(),
        })
    }
}

fn parse_protocols(
    ctx: &xpath::Context,
    raw: &str,
    ret: &str,
) -> Result<Vec<ProtocolRecord>, ApiError> {
    let count = ctx
        .evaluate(&format!("{ret}/nfe:protNFe"))
        .map_err(|e| ApiError::InvalidResponse(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec()
        .len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let fragments = locate::all_elements(raw, "protNFe", 0..raw.len())
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    if fragments.len() != count {
        return Err(ApiError::InvalidResponse(format!(
            "expected {count} protNFe elements, located {}",
            fragments.len()
        )));
    }

    let mut protocols = Vec::with_capacity(count);
    for (index, span) in fragments.into_iter().enumerate() {
        let base = format!("({ret}/nfe:protNFe)[{}]/nfe:infProt", index + 1);
        let field = |name: &str| xpath_text(ctx, &format!("{base}/nfe:{name}"));
        let access_key = field("chNFe")?
            .ok_or_else(|| ApiError::InvalidResponse("protNFe without chNFe".into()))?;
        let status = field("cStat")?
            .ok_or_else(|| ApiError::InvalidResponse("protNFe without cStat".into()))?;
        protocols.push(ProtocolRecord {
            access_key,
            protocol_number: field("nProt")?,
            status_code: parse_status(&status)?,
            status_reason: field("xMotivo")?.unwrap_or_default(),
            received_at: field("dhRecbto")?,
            digest: field("digVal")?,
            raw: raw[span.outer].to_string(),
        });
    }
    Ok(protocols)
}

fn parse_status(value: &str) -> Result<u16, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::InvalidResponse(format!("non-numeric cStat {value:?}")))
}

fn build_context(doc: &Document) -> Result<xpath::Context, ApiError> {
    let ctx = xpath::Context::new(doc)
        .map_err(|e| ApiError::InvalidResponse(format!("XPath error: {e:?}")))?;
    ctx.register_namespace("nfe", NFE_NS)
        .map_err(|e| ApiError::InvalidResponse(format!("XPath error: {e:?}")))?;
    Ok(ctx)
}

fn xpath_text(ctx: &xpath::Context, expr: &str) -> Result<Option<String>, ApiError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| ApiError::InvalidResponse(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec();
    let value = match nodes.first() {
        Some(node) => node.get_content().trim().to_string(),
        None => return Ok(None),
    };
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Distribution document (`nfeProc`): the signed document followed by its
/// protocol, both embedded without re-serialization.
pub fn nfe_proc(signed_xml: &str, protocol: &ProtocolRecord) -> String {
    format!(
        r#"{XML_DECLARATION}<nfeProc xmlns="{NFE_NS}" versao="{SCHEMA_VERSION}">{}{}</nfeProc>"#,
        strip_declaration(signed_xml),
        protocol.raw
    )
}

/// Final state of one submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentOutcome {
    access_key: AccessKey,
    status_code: Option<u16>,
    status_reason: Option<String>,
    protocol: Option<ProtocolRecord>,
    #[serde(skip)]
    authorized_xml: Option<String>,
}

impl DocumentOutcome {
    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    /// Document-level `cStat`, `None` while the lot is still pending.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn protocol(&self) -> Option<&ProtocolRecord> {
        self.protocol.as_ref()
    }

    pub fn is_authorized(&self) -> bool {
        self.protocol
            .as_ref()
            .is_some_and(ProtocolRecord::is_authorized)
    }

    /// `nfeProc` for authorized documents.
    pub fn authorized_xml(&self) -> Option<&str> {
        self.authorized_xml.as_deref()
    }
}

/// How the lot result was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Protocols arrived in the submission response.
    Synchronous,
    /// Protocols arrived through the receipt query.
    Asynchronous { receipt_number: String, polls: u32 },
    /// The poll budget ran out while the lot was still processing.
    Pending { receipt_number: String, attempts: u32 },
}

/// Outcome of one authorization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationResult {
    success: bool,
    lot_id: String,
    documents: Vec<DocumentOutcome>,
    batch: BatchOutcome,
}

impl AuthorizationResult {
    pub(crate) fn new(lot_id: String, documents: Vec<DocumentOutcome>, batch: BatchOutcome) -> Self {
        Self {
            success: true,
            lot_id,
            documents,
            batch,
        }
    }

    /// True once the lot was accepted; per-document status may still be a
    /// rejection.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn lot_id(&self) -> &str {
        &self.lot_id
    }

    pub fn documents(&self) -> &[DocumentOutcome] {
        &self.documents
    }

    pub fn batch(&self) -> &BatchOutcome {
        &self.batch
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.batch, BatchOutcome::Pending { .. })
    }
}

/// Pair every signed document with its protocol by access key, in
/// submission order.
pub(crate) fn reconcile_documents(
    signed: &[SignedDocument],
    protocols: &[ProtocolRecord],
) -> Vec<DocumentOutcome> {
    for protocol in protocols {
        if !signed
            .iter()
            .any(|doc| doc.access_key().as_str() == protocol.access_key)
        {
            warn!(access_key = %protocol.access_key, "protocol for a document not in this lot");
        }
    }

    signed
        .iter()
        .map(|doc| {
            let protocol = protocols
                .iter()
                .find(|p| p.access_key == doc.access_key().as_str())
                .cloned();
            let authorized_xml = protocol
                .as_ref()
                .filter(|p| p.is_authorized())
                .map(|p| nfe_proc(doc.xml(), p));
            DocumentOutcome {
                access_key: doc.access_key().clone(),
                status_code: protocol.as_ref().map(|p| p.status_code),
                status_reason: protocol.as_ref().map(|p| p.status_reason.clone()),
                protocol,
                authorized_xml,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "35240811222333000181650010004523801611650830";

    fn sync_response(c_stat: &str) -> String {
        format!(
            concat!(
                r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>"#,
                r#"<nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4">"#,
                r#"<retEnviNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">"#,
                r#"<tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo>"#,
                r#"<protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{key}</chNFe>"#,
                r#"<dhRecbto>2024-08-01T10:00:00-03:00</dhRecbto><nProt>135240000000001</nProt>"#,
                r#"<digVal>abc=</digVal><cStat>{c_stat}</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>"#,
                r#"</infProt></protNFe></retEnviNFe></nfeResultMsg></soap:Body></soap:Envelope>"#
            ),
            key = KEY,
            c_stat = c_stat
        )
    }

    #[test]
    fn classifies_synchronous_acceptance() {
        let raw = sync_response("100");
        let response = SefazRejectionClassifier
            .classify(&raw, Operation::Authorization)
            .unwrap();
        assert!(response.accepted());
        assert_eq!(response.status_code(), 104);
        assert_eq!(response.receipt_number(), None);

        let protocol = &response.protocols()[0];
        assert_eq!(protocol.access_key, KEY);
        assert_eq!(protocol.protocol_number.as_deref(), Some("135240000000001"));
        assert_eq!(protocol.digest.as_deref(), Some("abc="));
        assert!(protocol.is_authorized());
        assert!(protocol.raw.starts_with("<protNFe versao=\"4.00\">"));
        assert!(protocol.raw.ends_with("</protNFe>"));
    }

    #[test]
    fn classifies_lot_rejection_and_receipt() {
        let rejected = r#"<retEnviNFe xmlns="http://www.portalfiscal.inf.br/nfe"><cStat>225</cStat><xMotivo>Falha no Schema XML</xMotivo></retEnviNFe>"#;
        let response = SefazRejectionClassifier
            .classify(rejected, Operation::Authorization)
            .unwrap();
        assert!(!response.accepted());
        assert_eq!(response.status_reason(), "Falha no Schema XML");

        let received = r#"<retEnviNFe xmlns="http://www.portalfiscal.inf.br/nfe"><cStat>103</cStat><xMotivo>Lote recebido</xMotivo><infRec><nRec>351000000000001</nRec><tMed>1</tMed></infRec></retEnviNFe>"#;
        let response = SefazRejectionClassifier
            .classify(received, Operation::Authorization)
            .unwrap();
        assert!(response.accepted());
        assert_eq!(response.receipt_number(), Some("351000000000001"));
    }

    #[test]
    fn missing_result_element_is_invalid() {
        let fault = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><soap:Fault><soap:Reason>boom</soap:Reason></soap:Fault></soap:Body></soap:Envelope>"#;
        assert!(matches!(
            SefazRejectionClassifier.classify(fault, Operation::Authorization),
            Err(ApiError::InvalidResponse(_))
        ));
        assert!(matches!(
            SefazRejectionClassifier.classify("not xml", Operation::ReceiptQuery),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn nfe_proc_concatenates_without_reserializing() {
        let protocol = ProtocolRecord {
            access_key: KEY.into(),
            protocol_number: None,
            status_code: 100,
            status_reason: String::new(),
            received_at: None,
            digest: None,
            raw: "<protNFe versao=\"4.00\"><infProt/></protNFe>".into(),
        };
        let proc = nfe_proc("<?xml version=\"1.0\"?><NFe>  x </NFe>", &protocol);
        assert!(proc.ends_with(
            "<nfeProc xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><NFe>  x </NFe><protNFe versao=\"4.00\"><infProt/></protNFe></nfeProc>"
        ));
    }
}
