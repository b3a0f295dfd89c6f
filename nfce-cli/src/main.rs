use std::{fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand, ValueEnum};
use nfce_core::{
    config::{Config, CscCredentials, Endpoints, Environment},
    document::{
        AccessKey, AccessKeyInput, DocumentAssembler, EmissionType, FiscalDocument, HolderRole,
        RandomCode,
        holder::{classify, validate_holder},
        qr::QrCodeDeriver,
        xml::ToXml,
    },
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nfce")]
#[command(about = "NFC-e access keys, QR codes and document assembly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a 44-digit access key from its components.
    AccessKey {
        #[arg(long)]
        state: u8,
        /// Issue timestamp, RFC 3339.
        #[arg(long)]
        issued_at: String,
        #[arg(long)]
        emitter: String,
        #[arg(long, default_value_t = 65)]
        model: u8,
        #[arg(long)]
        series: u16,
        #[arg(long)]
        number: u32,
        #[arg(long, default_value_t = 1)]
        emission_type: u8,
        /// Eight-digit cNF; generated when omitted.
        #[arg(long)]
        random_code: Option<String>,
    },
    /// Classify and validate a CPF or CNPJ.
    CheckHolder {
        document: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Recipient)]
        role: RoleArg,
    },
    /// Derive the verification QR-code URL for an access key.
    Qr {
        #[arg(long)]
        key: String,
        #[arg(long)]
        env: String,
        #[arg(long)]
        csc_id: u32,
        #[arg(long)]
        csc_token: String,
        #[arg(long)]
        base_url: Option<String>,
        /// Offline mode: document total (vNF).
        #[arg(long, requires = "digest")]
        total: Option<f64>,
        /// Offline mode: signed document DigestValue.
        #[arg(long, requires = "total")]
        digest: Option<String>,
    },
    /// Assemble an unsigned NFC-e from a JSON document.
    Assemble {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Emitter,
    Recipient,
    Carrier,
    RuralProducer,
}

impl From<RoleArg> for HolderRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Emitter => HolderRole::Emitter,
            RoleArg::Recipient => HolderRole::Recipient,
            RoleArg::Carrier => HolderRole::Carrier,
            RoleArg::RuralProducer => HolderRole::RuralProducerReference,
        }
    }
}

/// JSON configuration file for `assemble`.
#[derive(Deserialize)]
struct CliConfig {
    environment: Environment,
    csc_id: u32,
    csc_token: String,
    #[serde(default)]
    endpoints: Option<Endpoints>,
    #[serde(default)]
    process_version: Option<String>,
}

impl CliConfig {
    fn into_config(self) -> Config {
        let endpoints = self
            .endpoints
            .unwrap_or_else(|| Endpoints::sao_paulo(self.environment));
        let config = Config::new(
            self.environment,
            CscCredentials::new(self.csc_id, self.csc_token),
            endpoints,
        );
        match self.process_version {
            Some(version) => config.with_process_version(version),
            None => config,
        }
    }
}

#[derive(Serialize)]
struct HolderReport<'a> {
    document: &'a str,
    kind: &'static str,
    valid: bool,
}

fn init_tracing() {
    // logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::AccessKey {
            state,
            issued_at,
            emitter,
            model,
            series,
            number,
            emission_type,
            random_code,
        } => {
            let issued_at = DateTime::parse_from_rfc3339(&issued_at)
                .with_context(|| format!("invalid --issued-at {issued_at:?}"))?;
            let emitter = validate_holder(&emitter, HolderRole::Emitter)?;
            let emission_type = EmissionType::try_from(emission_type)?;
            let random_code = match random_code {
                Some(code) => RandomCode::parse(&code)?,
                None => RandomCode::generate(),
            };
            let input = AccessKeyInput {
                state_code: state,
                issued_at,
                holder_document: emitter.digits(),
                model,
                series,
                number,
                emission_type,
                random_code: &random_code,
            };
            input.validate()?;
            let key = AccessKey::compute(&input);
            info!(access_key = %key, "access key computed");
            println!("{key}");
        }
        Commands::CheckHolder { document, role } => {
            let classification = classify(&document);
            let report = HolderReport {
                document: &document,
                kind: classification.kind.tag(),
                valid: classification.valid,
            };
            println!("{}", serde_json::to_string(&report)?);
            if let Err(err) = validate_holder(&document, role.into()) {
                bail!(err);
            }
        }
        Commands::Qr {
            key,
            env,
            csc_id,
            csc_token,
            base_url,
            total,
            digest,
        } => {
            let key = AccessKey::parse(&key)?;
            let env = Environment::from_str(&env)?;
            let base_url = base_url.unwrap_or_else(|| Endpoints::sao_paulo(env).qr_code);
            let deriver = QrCodeDeriver::new(base_url, CscCredentials::new(csc_id, csc_token));
            let url = match (total, digest) {
                (Some(total), Some(digest)) => deriver.offline(&key, env, total, &digest),
                _ => deriver.online(&key, env),
            };
            println!("{url}");
        }
        Commands::Assemble {
            config,
            document,
            pretty,
        } => {
            let raw = fs::read_to_string(&config)
                .with_context(|| format!("reading {}", config.display()))?;
            let config: CliConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", config.display()))?;
            let raw = fs::read_to_string(&document)
                .with_context(|| format!("reading {}", document.display()))?;
            let document: FiscalDocument = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", document.display()))?;

            let assembled = DocumentAssembler::new(&config.into_config()).assemble(document)?;
            info!(access_key = %assembled.access_key(), "document assembled");
            let xml = if pretty {
                assembled.to_xml_pretty()?
            } else {
                assembled.to_xml()?
            };
            println!("{xml}");
        }
    }

    Ok(())
}
