//! 44-digit access key (`chave de acesso`) and its modulo-11 check digit.
use super::EmissionType;
use chrono::{DateTime, FixedOffset};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Weights applied left to right over the 43-digit base sequence.
///
/// Read right to left this is the usual 2..=9 cycle.
const WEIGHTS: [u32; 8] = [4, 3, 2, 9, 8, 7, 6, 5];

pub const ACCESS_KEY_LEN: usize = 44;

/// Error returned by [`AccessKey::parse`], [`RandomCode::parse`] and
/// [`AccessKeyInput::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessKeyError {
    #[error("access key must be {ACCESS_KEY_LEN} digits, got {0:?}")]
    InvalidFormat(String),
    #[error("access key check digit mismatch: expected {expected}, found {found}")]
    CheckDigitMismatch { expected: u8, found: u8 },
    #[error("random code must be 8 digits, got {0:?}")]
    InvalidRandomCode(String),
    #[error("access key field {field} out of range: {value:?}")]
    OutOfRange { field: &'static str, value: String },
}

/// Eight-digit random numeric code (`cNF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomCode(String);

impl RandomCode {
    pub fn parse(value: &str) -> Result<Self, AccessKeyError> {
        let value = value.trim();
        if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccessKeyError::InvalidRandomCode(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn generate() -> Self {
        let value = rand::thread_rng().gen_range(0..100_000_000u32);
        Self(format!("{value:08}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Header fields that make up an access key.
///
/// [`AccessKey::compute`] assumes the numeric preconditions checked by
/// [`AccessKeyInput::validate`]: `holder_document` holds 1 to 14 ASCII
/// digits, `state_code` and `model` have two digits, `series` is below 1000
/// and `number` is in `1..=999_999_999`.
#[derive(Debug, Clone)]
pub struct AccessKeyInput<'a> {
    pub state_code: u8,
    pub issued_at: DateTime<FixedOffset>,
    pub holder_document: &'a str,
    pub model: u8,
    pub series: u16,
    pub number: u32,
    pub emission_type: EmissionType,
    pub random_code: &'a RandomCode,
}

impl AccessKeyInput<'_> {
    pub fn validate(&self) -> Result<(), AccessKeyError> {
        let out_of_range = |field: &'static str, value: String| {
            Err(AccessKeyError::OutOfRange { field, value })
        };
        if !(10..100).contains(&self.state_code) {
            return out_of_range("cUF", self.state_code.to_string());
        }
        let holder = self.holder_document;
        if holder.is_empty() || holder.len() > 14 || !holder.bytes().all(|b| b.is_ascii_digit()) {
            return out_of_range("CNPJ", holder.to_string());
        }
        if !(10..100).contains(&self.model) {
            return out_of_range("mod", self.model.to_string());
        }
        if self.series > 999 {
            return out_of_range("serie", self.series.to_string());
        }
        if !(1..=999_999_999).contains(&self.number) {
            return out_of_range("nNF", self.number.to_string());
        }
        Ok(())
    }

    /// The 43-digit sequence the check digit is computed over.
    pub fn base_sequence(&self) -> String {
        format!(
            "{:02}{}{:0>14}{:02}{:03}{:09}{}{}",
            self.state_code,
            self.issued_at.format("%y%m"),
            self.holder_document,
            self.model,
            self.series,
            self.number,
            self.emission_type.code(),
            self.random_code.as_str(),
        )
    }
}

/// Compute the modulo-11 check digit of a numeric sequence.
///
/// Non-digit characters are a caller error; they are weighted as zero.
///
/// # Examples
/// ```rust
/// use nfce_core::document::modulo11_check_digit;
///
/// let dv = modulo11_check_digit("3524081122233300018165001000452380161165083");
/// assert_eq!(dv, 0);
/// ```
pub fn modulo11_check_digit(sequence: &str) -> u8 {
    let sum: u32 = sequence
        .bytes()
        .enumerate()
        .map(|(idx, byte)| {
            let digit = byte.wrapping_sub(b'0');
            let digit = if digit > 9 { 0 } else { digit as u32 };
            digit * WEIGHTS[idx % WEIGHTS.len()]
        })
        .sum();
    match sum % 11 {
        0 | 1 => 0,
        remainder => (11 - remainder) as u8,
    }
}

/// A complete 44-digit access key.
///
/// # Examples
/// ```rust
/// use nfce_core::document::AccessKey;
///
/// let key = AccessKey::parse("35240811222333000181650010004523801611650830")?;
/// assert_eq!(key.check_digit(), 0);
/// assert_eq!(key.element_id(), "NFe35240811222333000181650010004523801611650830");
/// # Ok::<(), nfce_core::document::access_key::AccessKeyError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct AccessKey(String);

impl AccessKey {
    pub fn compute(input: &AccessKeyInput<'_>) -> Self {
        let sequence = input.base_sequence();
        let check_digit = modulo11_check_digit(&sequence);
        AccessKey(format!("{sequence}{check_digit}"))
    }

    pub fn parse(value: &str) -> Result<Self, AccessKeyError> {
        let value = value.trim().trim_start_matches("NFe");
        if value.len() != ACCESS_KEY_LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccessKeyError::InvalidFormat(value.to_string()));
        }
        let expected = modulo11_check_digit(&value[..ACCESS_KEY_LEN - 1]);
        let found = value.as_bytes()[ACCESS_KEY_LEN - 1] - b'0';
        if expected != found {
            return Err(AccessKeyError::CheckDigitMismatch { expected, found });
        }
        Ok(AccessKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[ACCESS_KEY_LEN - 1] - b'0'
    }

    /// Value of the `Id` attribute on `infNFe`.
    pub fn element_id(&self) -> String {
        format!("NFe{}", self.0)
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = AccessKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
