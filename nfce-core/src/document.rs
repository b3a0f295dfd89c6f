//! Fiscal document (NFC-e) domain types.
pub mod access_key;
mod builder;
pub mod holder;
pub mod qr;
pub mod sign;
pub mod validation;
pub mod xml;

pub use access_key::{AccessKey, AccessKeyInput, RandomCode, modulo11_check_digit};
pub use builder::{AssembledDocument, DocumentAssembler, SignedDocument, Supplemental};
pub use holder::{HolderDocument, HolderError, HolderKind, HolderRole};

use crate::config::Environment;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed recipient name required by the authority for test-environment documents.
pub const HOMOLOGATION_RECIPIENT_NAME: &str =
    "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";

/// NFC-e model code.
pub const NFCE_MODEL: u8 = 65;

/// Errors raised while assembling or signing a fiscal document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    InvalidHolderDocument(#[from] HolderError),
    #[error("invalid header field {field}: {value:?}")]
    InvalidHeader { field: &'static str, value: String },
    #[error("document has no line items")]
    MissingItems,
    #[error(
        "document environment {document:?} does not match configured environment {configured:?}"
    )]
    EnvironmentMismatch {
        document: Environment,
        configured: Environment,
    },
    #[error("DigestValue not found in signed XML")]
    DigestNotFound,
    #[error(transparent)]
    Signing(#[from] sign::SigningError),
    #[error(transparent)]
    Xml(#[from] xml::DocumentXmlError),
}

/// Input that may hold a single value or a sequence of values.
///
/// # Examples
/// ```rust
/// use nfce_core::document::OneOrMany;
///
/// let one: OneOrMany<u8> = 7.into();
/// let many: OneOrMany<u8> = vec![1, 2].into();
/// assert_eq!(one.into_vec(), vec![7]);
/// assert_eq!(many.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(values) => values.len(),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        OneOrMany::Many(values)
    }
}

/// Emission type (`tpEmis`).
///
/// # Examples
/// ```rust
/// use nfce_core::document::EmissionType;
///
/// assert!(EmissionType::try_from(9u8)?.is_offline());
/// assert!(!EmissionType::Normal.is_offline());
/// # Ok::<(), nfce_core::document::DocumentError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EmissionType {
    Normal,
    ContingencyFsIa,
    SpecialRegime,
    Epec,
    ContingencyFsDa,
    SvcAn,
    SvcRs,
    Offline,
}

impl EmissionType {
    pub fn code(&self) -> u8 {
        match self {
            EmissionType::Normal => 1,
            EmissionType::ContingencyFsIa => 2,
            EmissionType::SpecialRegime => 3,
            EmissionType::Epec => 4,
            EmissionType::ContingencyFsDa => 5,
            EmissionType::SvcAn => 6,
            EmissionType::SvcRs => 7,
            EmissionType::Offline => 9,
        }
    }

    /// Offline emission requires the digest-based QR code, derived after signing.
    pub fn is_offline(&self) -> bool {
        matches!(self, EmissionType::Epec | EmissionType::Offline)
    }
}

impl TryFrom<u8> for EmissionType {
    type Error = DocumentError;
    fn try_from(code: u8) -> Result<Self, DocumentError> {
        match code {
            1 => Ok(EmissionType::Normal),
            2 => Ok(EmissionType::ContingencyFsIa),
            3 => Ok(EmissionType::SpecialRegime),
            4 => Ok(EmissionType::Epec),
            5 => Ok(EmissionType::ContingencyFsDa),
            6 => Ok(EmissionType::SvcAn),
            7 => Ok(EmissionType::SvcRs),
            9 => Ok(EmissionType::Offline),
            other => Err(DocumentError::InvalidHeader {
                field: "tpEmis",
                value: other.to_string(),
            }),
        }
    }
}

impl From<EmissionType> for u8 {
    fn from(value: EmissionType) -> Self {
        value.code()
    }
}

/// Contingency entry metadata (`dhCont`/`xJust`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub entered_at: DateTime<FixedOffset>,
    pub justification: String,
}

/// Rural producer note reference (`refNFP`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuralProducerRef {
    pub state_code: u8,
    /// Issue year and month as `AAMM`.
    pub year_month: String,
    pub document: String,
    pub state_registration: String,
    #[serde(default = "default_rural_model")]
    pub model: String,
    pub series: u16,
    pub number: u32,
}

fn default_rural_model() -> String {
    "04".into()
}

/// Referenced document (`NFref`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencedDocument {
    AccessKey(String),
    RuralProducer(RuralProducerRef),
}

fn default_one() -> u8 {
    1
}

fn default_print_format() -> u8 {
    4
}

fn default_model() -> u8 {
    NFCE_MODEL
}

/// Document header (`ide`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub state_code: u8,
    /// Eight-digit random code (`cNF`); generated when absent.
    #[serde(default)]
    pub random_code: Option<String>,
    pub operation_nature: String,
    #[serde(default = "default_model")]
    pub model: u8,
    pub series: u16,
    pub number: u32,
    pub issued_at: DateTime<FixedOffset>,
    #[serde(default = "default_one")]
    pub operation_type: u8,
    #[serde(default = "default_one")]
    pub destination: u8,
    pub municipality_code: String,
    #[serde(default = "default_print_format")]
    pub print_format: u8,
    pub emission_type: EmissionType,
    pub environment: Environment,
    #[serde(default = "default_one")]
    pub purpose: u8,
    #[serde(default = "default_one")]
    pub final_consumer: u8,
    #[serde(default = "default_one")]
    pub presence: u8,
    #[serde(default)]
    pub process_version: Option<String>,
    #[serde(default)]
    pub contingency: Option<Contingency>,
    #[serde(default)]
    pub references: OneOrMany<ReferencedDocument>,
}

/// Postal address for emitter and recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    pub district: String,
    pub municipality_code: String,
    pub municipality: String,
    pub state: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Document emitter (`emit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emitter {
    pub document: String,
    pub name: String,
    #[serde(default)]
    pub trade_name: Option<String>,
    pub address: Address,
    pub state_registration: String,
    pub tax_regime: u8,
}

fn default_ie_indicator() -> u8 {
    9
}

/// Document recipient (`dest`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub document: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default = "default_ie_indicator")]
    pub ie_indicator: u8,
    #[serde(default)]
    pub email: Option<String>,
}

/// Freight carrier (`transporta`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub document: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state_registration: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub municipality: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

fn default_freight_mode() -> u8 {
    9
}

/// Transport information (`transp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    #[serde(default = "default_freight_mode")]
    pub freight_mode: u8,
    #[serde(default)]
    pub carrier: Option<Carrier>,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            freight_mode: default_freight_mode(),
            carrier: None,
        }
    }
}

/// ICMS group for a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Icms {
    /// Simples Nacional without credit (`ICMSSN102`, CSOSN 102/103/300/400).
    SimplesNacional { origin: u8, csosn: String },
    /// Fully taxed (`ICMS00`).
    Taxed {
        origin: u8,
        base: f64,
        rate: f64,
        value: f64,
    },
}

/// PIS or COFINS group for a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Contribution {
    NotTaxed {
        cst: String,
    },
    Taxed {
        cst: String,
        base: f64,
        rate: f64,
        value: f64,
    },
}

impl Contribution {
    pub fn value(&self) -> f64 {
        match self {
            Contribution::NotTaxed { .. } => 0.0,
            Contribution::Taxed { value, .. } => *value,
        }
    }
}

/// Item taxes (`imposto`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTax {
    #[serde(default)]
    pub approximate_total: Option<f64>,
    pub icms: Icms,
    pub pis: Contribution,
    pub cofins: Contribution,
}

/// Single line item (`det`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub code: String,
    #[serde(default)]
    pub gtin: Option<String>,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
    pub tax: ItemTax,
}

/// Document totals (`total/ICMSTot`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Totals {
    pub icms_base: f64,
    pub icms_value: f64,
    pub icms_relief: f64,
    pub fcp: f64,
    pub st_base: f64,
    pub st_value: f64,
    pub fcp_st: f64,
    pub fcp_st_withheld: f64,
    pub products: f64,
    pub freight: f64,
    pub insurance: f64,
    pub discount: f64,
    pub import_tax: f64,
    pub ipi: f64,
    pub ipi_returned: f64,
    pub pis: f64,
    pub cofins: f64,
    pub other: f64,
    pub total: f64,
    pub approximate_tax: Option<f64>,
}

impl Totals {
    /// Sum product and tax values over the items; charges and discounts stay zero.
    pub fn from_items(items: &[LineItem]) -> Self {
        let mut totals = Totals::default();
        for item in items {
            totals.products += item.total;
            if let Icms::Taxed { base, value, .. } = item.tax.icms {
                totals.icms_base += base;
                totals.icms_value += value;
            }
            totals.pis += item.tax.pis.value();
            totals.cofins += item.tax.cofins.value();
            if let Some(approx) = item.tax.approximate_total {
                *totals.approximate_tax.get_or_insert(0.0) += approx;
            }
        }
        totals.total = totals.products;
        totals
    }
}

/// Single payment entry (`detPag`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetail {
    #[serde(default)]
    pub indicator: Option<u8>,
    pub method: String,
    pub amount: f64,
}

/// Payment information (`pag`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub details: Vec<PaymentDetail>,
    #[serde(default)]
    pub change: Option<f64>,
}

/// Additional information (`infAdic`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(default)]
    pub fiscal: Option<String>,
    #[serde(default)]
    pub complementary: Option<String>,
}

/// Caller input for one fiscal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub header: Header,
    pub emitter: Emitter,
    #[serde(default)]
    pub recipient: Option<Recipient>,
    pub items: OneOrMany<LineItem>,
    pub totals: Totals,
    #[serde(default)]
    pub transport: Transport,
    pub payment: Payment,
    #[serde(default)]
    pub additional_info: Option<AdditionalInfo>,
}
