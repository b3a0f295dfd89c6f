//! XML serialization for NFC-e documents.
use super::{
    AccessKey, AdditionalInfo, Address, Carrier, Contribution, Emitter, FiscalDocument,
    HolderDocument, Icms, LineItem, Payment, RandomCode, Recipient, ReferencedDocument,
    RuralProducerRef, Supplemental, Totals, Transport,
};
use constants::{EMISSION_PROCESS, NFE_NS, NO_GTIN, SCHEMA_VERSION, XML_DECLARATION};
use helpers::{amount, quantity, rate};
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;
pub(crate) mod locate;

/// XML serialization or rewrite error.
#[derive(Debug, Error)]
pub enum DocumentXmlError {
    #[error("failed to serialize document to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("element {0} not found")]
    MissingElement(&'static str),
}

impl From<quick_xml::Error> for DocumentXmlError {
    fn from(err: quick_xml::Error) -> Self {
        DocumentXmlError::Malformed(err.to_string())
    }
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentXmlError>;

    /// Compact output; this is the form that gets signed and transmitted.
    fn to_xml(&self) -> Result<String, DocumentXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, DocumentXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

/// Resolved holder documents, in the shapes the XML needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedHolders {
    pub emitter: HolderDocument,
    pub recipient: Option<HolderDocument>,
    pub carrier: Option<HolderDocument>,
    /// One entry per header reference; `Some` for rural-producer references.
    pub references: Vec<Option<HolderDocument>>,
}

/// Borrowed view of an assembled document, serialized as `<NFe>`.
pub(crate) struct NfeXml<'a> {
    pub document: &'a FiscalDocument,
    pub access_key: &'a AccessKey,
    pub random_code: &'a RandomCode,
    pub process_version: &'a str,
    pub holders: &'a ResolvedHolders,
    pub supplemental: &'a Supplemental,
}

impl ToXml for NfeXml<'_> {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentXmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(XML_DECLARATION);
        if matches!(format, XmlFormat::Pretty { .. }) {
            buffer.push('\n');
        }
        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            self.serialize(serializer)?;
        }
        Ok(buffer)
    }
}

/// Drop a leading `<?xml ...?>` declaration, if any.
pub fn strip_declaration(fragment: &str) -> &str {
    let trimmed = fragment.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

/// Replace the text of the first `qrCode` inside `infNFeSupl`.
///
/// Every byte outside that element's content is left untouched, so the
/// signature over `infNFe` stays valid.
///
/// # Errors
/// Fails if the XML is malformed or either element is absent.
pub fn rewrite_supplemental_qr(signed_xml: &str, qr_code: &str) -> Result<String, DocumentXmlError> {
    let region = locate::first_element(signed_xml, "infNFeSupl", 0..signed_xml.len())?
        .ok_or(DocumentXmlError::MissingElement("infNFeSupl"))?;
    let target = locate::first_element(signed_xml, "qrCode", region.inner.clone())?
        .ok_or(DocumentXmlError::MissingElement("qrCode"))?;

    let escaped = quick_xml::escape::escape(qr_code);
    let mut out = String::with_capacity(signed_xml.len() + escaped.len());
    if target.self_closing {
        out.push_str(&signed_xml[..target.outer.start]);
        out.push('<');
        out.push_str(&target.name);
        out.push('>');
        out.push_str(&escaped);
        out.push_str("</");
        out.push_str(&target.name);
        out.push('>');
        out.push_str(&signed_xml[target.outer.end..]);
    } else {
        out.push_str(&signed_xml[..target.inner.start]);
        out.push_str(&escaped);
        out.push_str(&signed_xml[target.inner.end..]);
    }
    Ok(out)
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    pub(super) fn amount(value: f64) -> FixedPrecision {
        FixedPrecision { value, precision: 2 }
    }

    pub(super) fn rate(value: f64) -> FixedPrecision {
        FixedPrecision { value, precision: 2 }
    }

    pub(super) fn quantity(value: f64) -> FixedPrecision {
        FixedPrecision { value, precision: 4 }
    }
}

fn serialize_holder<S: SerializeStruct>(st: &mut S, doc: &HolderDocument) -> Result<(), S::Error> {
    st.serialize_field(doc.tag(), doc.digits())
}

impl Serialize for NfeXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct("NFe", 3)?;
        root.serialize_field("@xmlns", NFE_NS)?;
        root.serialize_field("infNFe", &InfNfeXml(self))?;
        root.serialize_field("infNFeSupl", &SupplementalXml(self.supplemental))?;
        root.end()
    }
}

struct InfNfeXml<'a, 'b>(&'b NfeXml<'a>);

impl Serialize for InfNfeXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let doc = view.document;
        let mut st = s.serialize_struct("infNFe", 0)?;
        st.serialize_field("@versao", SCHEMA_VERSION)?;
        st.serialize_field("@Id", &view.access_key.element_id())?;

        st.serialize_field("ide", &IdeXml(view))?;
        st.serialize_field("emit", &EmitterXml(&doc.emitter, &view.holders.emitter))?;
        if let (Some(recipient), Some(holder)) = (&doc.recipient, &view.holders.recipient) {
            st.serialize_field("dest", &RecipientXml(recipient, holder))?;
        }
        for (idx, item) in doc.items.as_slice().iter().enumerate() {
            st.serialize_field("det", &DetXml(idx + 1, item))?;
        }
        st.serialize_field("total", &TotalXml(&doc.totals))?;
        st.serialize_field(
            "transp",
            &TransportXml(&doc.transport, view.holders.carrier.as_ref()),
        )?;
        st.serialize_field("pag", &PaymentXml(&doc.payment))?;
        if let Some(info) = &doc.additional_info {
            st.serialize_field("infAdic", &AdditionalInfoXml(info))?;
        }
        st.end()
    }
}

struct IdeXml<'a, 'b>(&'b NfeXml<'a>);

impl Serialize for IdeXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let header = &view.document.header;
        let mut st = s.serialize_struct("ide", 0)?;
        st.serialize_field("cUF", &header.state_code)?;
        st.serialize_field("cNF", view.random_code.as_str())?;
        st.serialize_field("natOp", &header.operation_nature)?;
        st.serialize_field("mod", &header.model)?;
        st.serialize_field("serie", &header.series)?;
        st.serialize_field("nNF", &header.number)?;
        st.serialize_field(
            "dhEmi",
            &header.issued_at.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        )?;
        st.serialize_field("tpNF", &header.operation_type)?;
        st.serialize_field("idDest", &header.destination)?;
        st.serialize_field("cMunFG", &header.municipality_code)?;
        st.serialize_field("tpImp", &header.print_format)?;
        st.serialize_field("tpEmis", &header.emission_type.code())?;
        st.serialize_field("cDV", &view.access_key.check_digit())?;
        st.serialize_field("tpAmb", &header.environment.code())?;
        st.serialize_field("finNFe", &header.purpose)?;
        st.serialize_field("indFinal", &header.final_consumer)?;
        st.serialize_field("indPres", &header.presence)?;
        st.serialize_field("procEmi", &EMISSION_PROCESS)?;
        st.serialize_field("verProc", view.process_version)?;
        if let Some(contingency) = &header.contingency {
            st.serialize_field(
                "dhCont",
                &contingency
                    .entered_at
                    .format("%Y-%m-%dT%H:%M:%S%:z")
                    .to_string(),
            )?;
            st.serialize_field("xJust", &contingency.justification)?;
        }
        for (reference, holder) in header
            .references
            .as_slice()
            .iter()
            .zip(view.holders.references.iter())
        {
            st.serialize_field("NFref", &ReferenceXml(reference, holder.as_ref()))?;
        }
        st.end()
    }
}

struct ReferenceXml<'a>(&'a ReferencedDocument, Option<&'a HolderDocument>);

impl Serialize for ReferenceXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("NFref", 1)?;
        match (self.0, self.1) {
            (ReferencedDocument::AccessKey(key), _) => st.serialize_field("refNFe", key)?,
            (ReferencedDocument::RuralProducer(rural), Some(holder)) => {
                st.serialize_field("refNFP", &RuralProducerXml(rural, holder))?
            }
            (ReferencedDocument::RuralProducer(_), None) => {}
        }
        st.end()
    }
}

struct RuralProducerXml<'a>(&'a RuralProducerRef, &'a HolderDocument);

impl Serialize for RuralProducerXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rural = self.0;
        let mut st = s.serialize_struct("refNFP", 0)?;
        st.serialize_field("cUF", &rural.state_code)?;
        st.serialize_field("AAMM", &rural.year_month)?;
        serialize_holder(&mut st, self.1)?;
        st.serialize_field("IE", &rural.state_registration)?;
        st.serialize_field("mod", &rural.model)?;
        st.serialize_field("serie", &rural.series)?;
        st.serialize_field("nNF", &rural.number)?;
        st.end()
    }
}

struct AddressXml<'a>(&'static str, &'a Address);

impl Serialize for AddressXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let addr = self.1;
        let mut st = s.serialize_struct(self.0, 0)?;
        st.serialize_field("xLgr", &addr.street)?;
        st.serialize_field("nro", &addr.number)?;
        if let Some(complement) = &addr.complement {
            st.serialize_field("xCpl", complement)?;
        }
        st.serialize_field("xBairro", &addr.district)?;
        st.serialize_field("cMun", &addr.municipality_code)?;
        st.serialize_field("xMun", &addr.municipality)?;
        st.serialize_field("UF", &addr.state)?;
        if let Some(cep) = &addr.postal_code {
            st.serialize_field("CEP", cep)?;
        }
        if let Some(code) = &addr.country_code {
            st.serialize_field("cPais", code)?;
        }
        if let Some(country) = &addr.country {
            st.serialize_field("xPais", country)?;
        }
        if let Some(phone) = &addr.phone {
            st.serialize_field("fone", phone)?;
        }
        st.end()
    }
}

struct EmitterXml<'a>(&'a Emitter, &'a HolderDocument);

impl Serialize for EmitterXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let emitter = self.0;
        let mut st = s.serialize_struct("emit", 0)?;
        serialize_holder(&mut st, self.1)?;
        st.serialize_field("xNome", &emitter.name)?;
        if let Some(trade_name) = &emitter.trade_name {
            st.serialize_field("xFant", trade_name)?;
        }
        st.serialize_field("enderEmit", &AddressXml("enderEmit", &emitter.address))?;
        st.serialize_field("IE", &emitter.state_registration)?;
        st.serialize_field("CRT", &emitter.tax_regime)?;
        st.end()
    }
}

struct RecipientXml<'a>(&'a Recipient, &'a HolderDocument);

impl Serialize for RecipientXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let recipient = self.0;
        let mut st = s.serialize_struct("dest", 0)?;
        serialize_holder(&mut st, self.1)?;
        if let Some(name) = &recipient.name {
            st.serialize_field("xNome", name)?;
        }
        if let Some(address) = &recipient.address {
            st.serialize_field("enderDest", &AddressXml("enderDest", address))?;
        }
        st.serialize_field("indIEDest", &recipient.ie_indicator)?;
        if let Some(email) = &recipient.email {
            st.serialize_field("email", email)?;
        }
        st.end()
    }
}

struct DetXml<'a>(usize, &'a LineItem);

impl Serialize for DetXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("det", 3)?;
        st.serialize_field("@nItem", &self.0)?;
        st.serialize_field("prod", &ProductXml(self.1))?;
        st.serialize_field("imposto", &ItemTaxXml(self.1))?;
        st.end()
    }
}

struct ProductXml<'a>(&'a LineItem);

impl Serialize for ProductXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let gtin = item.gtin.as_deref().unwrap_or(NO_GTIN);
        let mut st = s.serialize_struct("prod", 0)?;
        st.serialize_field("cProd", &item.code)?;
        st.serialize_field("cEAN", gtin)?;
        st.serialize_field("xProd", &item.description)?;
        st.serialize_field("NCM", &item.ncm)?;
        st.serialize_field("CFOP", &item.cfop)?;
        st.serialize_field("uCom", &item.unit)?;
        st.serialize_field("qCom", &quantity(item.quantity))?;
        st.serialize_field("vUnCom", &amount(item.unit_price))?;
        st.serialize_field("vProd", &amount(item.total))?;
        st.serialize_field("cEANTrib", gtin)?;
        st.serialize_field("uTrib", &item.unit)?;
        st.serialize_field("qTrib", &quantity(item.quantity))?;
        st.serialize_field("vUnTrib", &amount(item.unit_price))?;
        st.serialize_field("indTot", &1u8)?;
        st.end()
    }
}

struct ItemTaxXml<'a>(&'a LineItem);

impl Serialize for ItemTaxXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let tax = &self.0.tax;
        let mut st = s.serialize_struct("imposto", 0)?;
        if let Some(approx) = tax.approximate_total {
            st.serialize_field("vTotTrib", &amount(approx))?;
        }
        st.serialize_field("ICMS", &IcmsXml(&tax.icms))?;
        st.serialize_field("PIS", &ContributionXml("PIS", &tax.pis))?;
        st.serialize_field("COFINS", &ContributionXml("COFINS", &tax.cofins))?;
        st.end()
    }
}

struct IcmsXml<'a>(&'a Icms);

impl Serialize for IcmsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ICMS", 1)?;
        match self.0 {
            Icms::SimplesNacional { origin, csosn } => st.serialize_field(
                "ICMSSN102",
                &IcmsSimplesXml {
                    origin: *origin,
                    csosn,
                },
            )?,
            Icms::Taxed {
                origin,
                base,
                rate,
                value,
            } => st.serialize_field(
                "ICMS00",
                &IcmsTaxedXml {
                    origin: *origin,
                    base: *base,
                    rate: *rate,
                    value: *value,
                },
            )?,
        }
        st.end()
    }
}

struct IcmsSimplesXml<'a> {
    origin: u8,
    csosn: &'a str,
}

impl Serialize for IcmsSimplesXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ICMSSN102", 2)?;
        st.serialize_field("orig", &self.origin)?;
        st.serialize_field("CSOSN", self.csosn)?;
        st.end()
    }
}

struct IcmsTaxedXml {
    origin: u8,
    base: f64,
    rate: f64,
    value: f64,
}

impl Serialize for IcmsTaxedXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ICMS00", 6)?;
        st.serialize_field("orig", &self.origin)?;
        st.serialize_field("CST", "00")?;
        // 3: value of the operation
        st.serialize_field("modBC", &3u8)?;
        st.serialize_field("vBC", &amount(self.base))?;
        st.serialize_field("pICMS", &rate(self.rate))?;
        st.serialize_field("vICMS", &amount(self.value))?;
        st.end()
    }
}

/// PIS and COFINS share a layout; only the tag prefix differs.
struct ContributionXml<'a>(&'static str, &'a Contribution);

impl Serialize for ContributionXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (not_taxed, taxed, rate_tag, value_tag) = match self.0 {
            "PIS" => ("PISNT", "PISAliq", "pPIS", "vPIS"),
            _ => ("COFINSNT", "COFINSAliq", "pCOFINS", "vCOFINS"),
        };
        let mut st = s.serialize_struct(self.0, 1)?;
        match self.1 {
            Contribution::NotTaxed { cst } => {
                st.serialize_field(not_taxed, &CstOnlyXml(not_taxed, cst))?
            }
            Contribution::Taxed {
                cst,
                base,
                rate,
                value,
            } => st.serialize_field(
                taxed,
                &ContributionTaxedXml {
                    tag: taxed,
                    rate_tag,
                    value_tag,
                    cst,
                    base: *base,
                    rate: *rate,
                    value: *value,
                },
            )?,
        }
        st.end()
    }
}

struct CstOnlyXml<'a>(&'static str, &'a str);

impl Serialize for CstOnlyXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.0, 1)?;
        st.serialize_field("CST", self.1)?;
        st.end()
    }
}

struct ContributionTaxedXml<'a> {
    tag: &'static str,
    rate_tag: &'static str,
    value_tag: &'static str,
    cst: &'a str,
    base: f64,
    rate: f64,
    value: f64,
}

impl Serialize for ContributionTaxedXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.tag, 4)?;
        st.serialize_field("CST", self.cst)?;
        st.serialize_field("vBC", &amount(self.base))?;
        st.serialize_field(self.rate_tag, &rate(self.rate))?;
        st.serialize_field(self.value_tag, &amount(self.value))?;
        st.end()
    }
}

struct TotalXml<'a>(&'a Totals);

impl Serialize for TotalXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("total", 1)?;
        st.serialize_field("ICMSTot", &IcmsTotXml(self.0))?;
        st.end()
    }
}

struct IcmsTotXml<'a>(&'a Totals);

impl Serialize for IcmsTotXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let t = self.0;
        let mut st = s.serialize_struct("ICMSTot", 0)?;
        st.serialize_field("vBC", &amount(t.icms_base))?;
        st.serialize_field("vICMS", &amount(t.icms_value))?;
        st.serialize_field("vICMSDeson", &amount(t.icms_relief))?;
        st.serialize_field("vFCP", &amount(t.fcp))?;
        st.serialize_field("vBCST", &amount(t.st_base))?;
        st.serialize_field("vST", &amount(t.st_value))?;
        st.serialize_field("vFCPST", &amount(t.fcp_st))?;
        st.serialize_field("vFCPSTRet", &amount(t.fcp_st_withheld))?;
        st.serialize_field("vProd", &amount(t.products))?;
        st.serialize_field("vFrete", &amount(t.freight))?;
        st.serialize_field("vSeg", &amount(t.insurance))?;
        st.serialize_field("vDesc", &amount(t.discount))?;
        st.serialize_field("vII", &amount(t.import_tax))?;
        st.serialize_field("vIPI", &amount(t.ipi))?;
        st.serialize_field("vIPIDevol", &amount(t.ipi_returned))?;
        st.serialize_field("vPIS", &amount(t.pis))?;
        st.serialize_field("vCOFINS", &amount(t.cofins))?;
        st.serialize_field("vOutro", &amount(t.other))?;
        st.serialize_field("vNF", &amount(t.total))?;
        if let Some(approx) = t.approximate_tax {
            st.serialize_field("vTotTrib", &amount(approx))?;
        }
        st.end()
    }
}

struct TransportXml<'a>(&'a Transport, Option<&'a HolderDocument>);

impl Serialize for TransportXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("transp", 0)?;
        st.serialize_field("modFrete", &self.0.freight_mode)?;
        if let (Some(carrier), Some(holder)) = (&self.0.carrier, self.1) {
            st.serialize_field("transporta", &CarrierXml(carrier, holder))?;
        }
        st.end()
    }
}

struct CarrierXml<'a>(&'a Carrier, &'a HolderDocument);

impl Serialize for CarrierXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let carrier = self.0;
        let mut st = s.serialize_struct("transporta", 0)?;
        serialize_holder(&mut st, self.1)?;
        if let Some(name) = &carrier.name {
            st.serialize_field("xNome", name)?;
        }
        if let Some(ie) = &carrier.state_registration {
            st.serialize_field("IE", ie)?;
        }
        if let Some(address) = &carrier.address {
            st.serialize_field("xEnder", address)?;
        }
        if let Some(municipality) = &carrier.municipality {
            st.serialize_field("xMun", municipality)?;
        }
        if let Some(state) = &carrier.state {
            st.serialize_field("UF", state)?;
        }
        st.end()
    }
}

struct PaymentXml<'a>(&'a Payment);

impl Serialize for PaymentXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let payment = self.0;
        let mut st = s.serialize_struct("pag", 0)?;
        for detail in &payment.details {
            st.serialize_field("detPag", &PaymentDetailXml(detail))?;
        }
        if let Some(change) = payment.change {
            st.serialize_field("vTroco", &amount(change))?;
        }
        st.end()
    }
}

struct PaymentDetailXml<'a>(&'a super::PaymentDetail);

impl Serialize for PaymentDetailXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let detail = self.0;
        let mut st = s.serialize_struct("detPag", 0)?;
        if let Some(indicator) = detail.indicator {
            st.serialize_field("indPag", &indicator)?;
        }
        st.serialize_field("tPag", &detail.method)?;
        st.serialize_field("vPag", &amount(detail.amount))?;
        st.end()
    }
}

struct AdditionalInfoXml<'a>(&'a AdditionalInfo);

impl Serialize for AdditionalInfoXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("infAdic", 0)?;
        if let Some(fiscal) = &self.0.fiscal {
            st.serialize_field("infAdFisco", fiscal)?;
        }
        if let Some(complementary) = &self.0.complementary {
            st.serialize_field("infCpl", complementary)?;
        }
        st.end()
    }
}

struct SupplementalXml<'a>(&'a Supplemental);

impl Serialize for SupplementalXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("infNFeSupl", 2)?;
        st.serialize_field("qrCode", &self.0.qr_code)?;
        st.serialize_field("urlChave", &self.0.consult_url)?;
        st.end()
    }
}
