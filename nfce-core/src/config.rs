//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// SEFAZ environment flag (`tpAmb`).
///
/// - Production: documents carry fiscal value.
/// - Homologation: the test environment; recipients are watermarked and
///   nothing issued there has fiscal value.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use nfce_core::config::Environment;
///
/// let env = Environment::from_str("homologation")?;
/// assert_eq!(env.code(), 2);
/// # Ok::<(), nfce_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Homologation,
}

/// Error returned when parsing an [`Environment`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment: {input}")]
    Invalid { input: String },
}

impl FromStr for Environment {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<Environment, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "production" | "1" => Ok(Environment::Production),
            "homologation" | "2" => Ok(Environment::Homologation),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl Environment {
    /// Numeric `tpAmb` code used in the XML and in the access-key QR payload.
    pub fn code(&self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Homologation => "homologation",
        }
    }

    pub fn is_homologation(&self) -> bool {
        matches!(self, Environment::Homologation)
    }
}

/// Consumer security code (CSC) pair used to sign QR-code URLs.
#[derive(Clone, PartialEq, Eq)]
pub struct CscCredentials {
    id: u32,
    token: String,
}

impl CscCredentials {
    pub fn new(id: u32, token: impl Into<String>) -> Self {
        Self {
            id,
            token: token.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

// keep the token out of debug output
impl std::fmt::Debug for CscCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CscCredentials")
            .field("id", &self.id)
            .field("token", &"***")
            .finish()
    }
}

/// Web-service and consultation URLs for one state authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub authorization: String,
    pub receipt_query: String,
    pub qr_code: String,
    pub consult: String,
}

impl Endpoints {
    /// São Paulo (cUF 35) NFC-e endpoints.
    pub fn sao_paulo(env: Environment) -> Self {
        match env {
            Environment::Production => Self {
                authorization: "https://nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx".into(),
                receipt_query: "https://nfce.fazenda.sp.gov.br/ws/NFeRetAutorizacao4.asmx".into(),
                qr_code: "https://www.nfce.fazenda.sp.gov.br/NFCeConsultaPublica/Paginas/ConsultaQRCode.aspx".into(),
                consult: "https://www.nfce.fazenda.sp.gov.br/consulta".into(),
            },
            Environment::Homologation => Self {
                authorization: "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx"
                    .into(),
                receipt_query:
                    "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeRetAutorizacao4.asmx".into(),
                qr_code: "https://www.homologacao.nfce.fazenda.sp.gov.br/NFCeConsultaPublica/Paginas/ConsultaQRCode.aspx".into(),
                consult: "https://www.homologacao.nfce.fazenda.sp.gov.br/consulta".into(),
            },
        }
    }
}

/// Bounded polling policy for asynchronous lot reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

pub const DEFAULT_PROCESS_VERSION: &str = "1.0.0.0";

/// Pipeline configuration, passed explicitly to the assembler and the client.
///
/// # Examples
/// ```rust
/// use nfce_core::config::{Config, CscCredentials, Endpoints, Environment};
///
/// let env = Environment::Homologation;
/// let config = Config::new(env, CscCredentials::new(1, "secret"), Endpoints::sao_paulo(env));
/// assert_eq!(config.env(), Environment::Homologation);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: Environment,
    csc: CscCredentials,
    endpoints: Endpoints,
    request_timeout: Duration,
    poll_policy: PollPolicy,
    process_version: String,
    schema_dir: PathBuf,
    artifact_dir: Option<PathBuf>,
}

impl Config {
    pub fn new(env: Environment, csc: CscCredentials, endpoints: Endpoints) -> Self {
        Self {
            env,
            csc,
            endpoints,
            request_timeout: Duration::from_secs(30),
            poll_policy: PollPolicy::default(),
            process_version: DEFAULT_PROCESS_VERSION.to_string(),
            schema_dir: PathBuf::from("./assets/schemas/PL_009_V4"),
            artifact_dir: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn with_process_version(mut self, version: impl Into<String>) -> Self {
        self.process_version = version.into();
        self
    }

    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = dir.into();
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    pub fn csc(&self) -> &CscCredentials {
        &self.csc
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }

    pub fn process_version(&self) -> &str {
        &self.process_version
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }
}
