//! Taxpayer identifier classification and validation (CPF / CNPJ).
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Role of the party whose document is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderRole {
    Emitter,
    Recipient,
    Carrier,
    RuralProducerReference,
}

impl HolderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderRole::Emitter => "emitter",
            HolderRole::Recipient => "recipient",
            HolderRole::Carrier => "carrier",
            HolderRole::RuralProducerReference => "rural-producer-reference",
        }
    }
}

impl fmt::Display for HolderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tag of a holder document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderKind {
    /// 11-digit individual identifier.
    Cpf,
    /// 14-digit company identifier.
    Cnpj,
    Unknown,
}

impl HolderKind {
    /// XML element name used for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            HolderKind::Cpf => "CPF",
            HolderKind::Cnpj => "CNPJ",
            HolderKind::Unknown => "Desconhecido",
        }
    }
}

/// Result of [`classify`]: the tag plus a validity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: HolderKind,
    pub valid: bool,
}

/// Invalid holder document for a given role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.role, .kind))]
pub struct HolderError {
    pub role: HolderRole,
    pub kind: HolderKind,
    pub document: String,
}

fn describe(role: &HolderRole, kind: &HolderKind) -> String {
    match kind {
        HolderKind::Unknown => format!("{role} document missing or invalid"),
        known => format!("{} of {role} is invalid", known.tag()),
    }
}

/// A validated holder document, digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderDocument {
    Cpf(String),
    Cnpj(String),
}

impl HolderDocument {
    pub fn kind(&self) -> HolderKind {
        match self {
            HolderDocument::Cpf(_) => HolderKind::Cpf,
            HolderDocument::Cnpj(_) => HolderKind::Cnpj,
        }
    }

    pub fn digits(&self) -> &str {
        match self {
            HolderDocument::Cpf(digits) | HolderDocument::Cnpj(digits) => digits,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind().tag()
    }
}

/// Strip formatting punctuation; `None` if anything else is not a digit.
pub(crate) fn normalize(document: &str) -> Option<String> {
    let mut digits = String::with_capacity(document.len());
    for ch in document.trim().chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            '.' | '-' | '/' | ' ' => {}
            _ => return None,
        }
    }
    Some(digits)
}

/// Classify a document by length and verify its check digits.
///
/// # Examples
/// ```rust
/// use nfce_core::document::holder::{classify, HolderKind};
///
/// let c = classify("11.222.333/0001-81");
/// assert_eq!(c.kind, HolderKind::Cnpj);
/// assert!(c.valid);
/// ```
pub fn classify(document: &str) -> Classification {
    let Some(digits) = normalize(document) else {
        return Classification {
            kind: HolderKind::Unknown,
            valid: false,
        };
    };
    match digits.len() {
        11 => Classification {
            kind: HolderKind::Cpf,
            valid: cpf_is_valid(&digits),
        },
        14 => Classification {
            kind: HolderKind::Cnpj,
            valid: cnpj_is_valid(&digits),
        },
        _ => Classification {
            kind: HolderKind::Unknown,
            valid: false,
        },
    }
}

/// Validate a document for `role`, returning the typed holder document.
///
/// # Errors
/// Returns [`HolderError`] for empty, malformed, unknown-length or
/// check-digit-invalid documents.
pub fn validate_holder(document: &str, role: HolderRole) -> Result<HolderDocument, HolderError> {
    let classification = classify(document);
    let error = || HolderError {
        role,
        kind: classification.kind,
        document: document.to_string(),
    };
    if !classification.valid {
        return Err(error());
    }
    let digits = normalize(document).ok_or_else(error)?;
    match classification.kind {
        HolderKind::Cpf => Ok(HolderDocument::Cpf(digits)),
        HolderKind::Cnpj => Ok(HolderDocument::Cnpj(digits)),
        HolderKind::Unknown => Err(error()),
    }
}

fn digit_values(digits: &str) -> Vec<u32> {
    digits.bytes().map(|b| (b - b'0') as u32).collect()
}

fn all_same(values: &[u32]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}

fn cpf_is_valid(digits: &str) -> bool {
    let values = digit_values(digits);
    if all_same(&values) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let sum: u32 = values[..len]
            .iter()
            .zip((2..=len as u32 + 1).rev())
            .map(|(digit, weight)| digit * weight)
            .sum();
        (sum * 10 % 11) % 10
    };
    check(9) == values[9] && check(10) == values[10]
}

fn cnpj_is_valid(digits: &str) -> bool {
    const FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const SECOND: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    let values = digit_values(digits);
    if all_same(&values) {
        return false;
    }
    let check = |weights: &[u32]| -> u32 {
        let sum: u32 = values
            .iter()
            .zip(weights)
            .map(|(digit, weight)| digit * weight)
            .sum();
        match sum % 11 {
            0 | 1 => 0,
            remainder => 11 - remainder,
        }
    };
    check(&FIRST) == values[12] && check(&SECOND) == values[13]
}
