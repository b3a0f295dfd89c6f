//! NFC-e (model 65) issuance toolkit: document assembly, access keys, QR
//! codes, lot envelopes and the SEFAZ authorization web service.
//!
//! # Examples
//! ```rust
//! use nfce_core::config::{Config, CscCredentials, Endpoints, Environment};
//!
//! let env = Environment::Homologation;
//! let config = Config::new(env, CscCredentials::new(1, "csc"), Endpoints::sao_paulo(env));
//! # let _ = config;
//! ```
pub mod api;
pub mod batch;
pub mod config;
pub mod document;
pub mod store;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Document(#[from] document::DocumentError),
    #[error(transparent)]
    Holder(#[from] document::HolderError),
    #[error(transparent)]
    AccessKey(#[from] document::access_key::AccessKeyError),
    #[error(transparent)]
    Batch(#[from] batch::BatchError),
    #[error(transparent)]
    Api(#[from] api::ApiError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Environment(#[from] config::EnvironmentParseError),
}
