//! Lot envelope (`enviNFe`) assembly.
//!
//! Signed fragments are embedded as raw text so their bytes, and therefore
//! their signatures, are preserved exactly.
use crate::document::xml::{
    constants::{NFE_NS, SCHEMA_VERSION},
    strip_declaration,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of documents the authority accepts in one lot.
pub const MAX_DOCUMENTS_PER_LOT: usize = 50;

const MAX_LOT_ID_LEN: usize = 15;

/// Synchronization flag (`indSinc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Receipt number now, protocol later through the receipt query.
    Asynchronous,
    /// Protocol in the immediate response when the authority can process it inline.
    Synchronous,
}

impl SyncMode {
    pub fn code(&self) -> u8 {
        match self {
            SyncMode::Asynchronous => 0,
            SyncMode::Synchronous => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("lot has no documents")]
    Empty,
    #[error("lot has {count} documents, at most {MAX_DOCUMENTS_PER_LOT} allowed")]
    TooManyDocuments { count: usize },
    #[error("lot id must be 1 to {MAX_LOT_ID_LEN} digits, got {0:?}")]
    InvalidLotId(String),
}

/// Random numeric lot identifier.
pub fn generate_lot_id() -> String {
    let mut rng = rand::thread_rng();
    let head = rng.gen_range(1..10u8);
    let tail = rng.gen_range(0..10_000_000_000_000u64);
    format!("{head}{tail:014}")
}

/// Accumulates signed fragments in push order.
///
/// # Examples
/// ```rust
/// use nfce_core::batch::{BatchEnvelopeBuilder, SyncMode};
///
/// let mut builder = BatchEnvelopeBuilder::new("1", SyncMode::Synchronous);
/// builder.push("<NFe>a</NFe>");
/// let lot = builder.build()?;
/// assert!(lot.xml().contains("<indSinc>1</indSinc><NFe>a</NFe></enviNFe>"));
/// # Ok::<(), nfce_core::batch::BatchError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BatchEnvelopeBuilder {
    lot_id: String,
    sync: SyncMode,
    fragments: Vec<String>,
}

impl BatchEnvelopeBuilder {
    pub fn new(lot_id: impl Into<String>, sync: SyncMode) -> Self {
        Self {
            lot_id: lot_id.into(),
            sync,
            fragments: Vec::new(),
        }
    }

    pub fn push(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.fragments.push(fragment.into());
        self
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn build(self) -> Result<BatchEnvelope, BatchError> {
        let lot_id = self.lot_id.trim();
        if lot_id.is_empty()
            || lot_id.len() > MAX_LOT_ID_LEN
            || !lot_id.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(BatchError::InvalidLotId(self.lot_id.clone()));
        }
        match self.fragments.len() {
            0 => return Err(BatchError::Empty),
            count if count > MAX_DOCUMENTS_PER_LOT => {
                return Err(BatchError::TooManyDocuments { count });
            }
            _ => {}
        }

        let body_len: usize = self.fragments.iter().map(String::len).sum();
        let mut xml = String::with_capacity(body_len + 160);
        xml.push_str(&format!(
            r#"<enviNFe xmlns="{NFE_NS}" versao="{SCHEMA_VERSION}"><idLote>{lot_id}</idLote><indSinc>{}</indSinc>"#,
            self.sync.code()
        ));
        for fragment in &self.fragments {
            xml.push_str(strip_declaration(fragment));
        }
        xml.push_str("</enviNFe>");

        Ok(BatchEnvelope {
            lot_id: lot_id.to_string(),
            sync: self.sync,
            document_count: self.fragments.len(),
            xml,
        })
    }
}

/// A serialized lot, ready for validation and transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEnvelope {
    lot_id: String,
    sync: SyncMode,
    document_count: usize,
    xml: String,
}

impl BatchEnvelope {
    pub fn lot_id(&self) -> &str {
        &self.lot_id
    }

    pub fn sync(&self) -> SyncMode {
        self.sync
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }
}
