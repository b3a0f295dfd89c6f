pub(crate) const NFE_NS: &str = "http://www.portalfiscal.inf.br/nfe";
pub(crate) const SCHEMA_VERSION: &str = "4.00";
pub(crate) const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// `cEAN` placeholder for items without a barcode.
pub(crate) const NO_GTIN: &str = "SEM GTIN";
/// `procEmi`: issued by the taxpayer's own application.
pub(crate) const EMISSION_PROCESS: u8 = 0;
