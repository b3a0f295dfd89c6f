//! SEFAZ authorization web-service client.
//!
//! The flow per call: assemble and sign every document, build the lot,
//! validate it, wrap it in SOAP, post it with a timeout, classify the
//! response, then either take the inline protocols (synchronous) or poll
//! the receipt query until a final answer or the poll budget runs out.
use async_trait::async_trait;
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    Error,
    batch::{BatchEnvelopeBuilder, SyncMode, generate_lot_id},
    config::{Config, Endpoints},
    document::{
        DocumentAssembler, FiscalDocument, OneOrMany, SignedDocument,
        sign::Signer,
        validation::{SchemaValidator, XsdSchemaValidator},
    },
    store::{ArtifactKind, ArtifactStore, FsArtifactStore, NoopArtifactStore, save_best_effort},
};

pub mod response;
pub mod retrieval;

pub use response::{
    AuthorizationResult, BatchOutcome, DocumentOutcome, ProtocolRecord, RejectionClassifier,
    SefazRejectionClassifier, ServiceResponse,
};
pub use retrieval::{
    PollOutcome, ReceiptQueryRetrieval, RetrievalStatus, SecondaryRetrieval, poll_until_final,
};

/// Errors returned by the web-service layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("service rejected request ({status_code}): {reason}")]
    ServiceRejection {
        status_code: u16,
        reason: String,
        raw: String,
    },
    #[error("invalid response from SEFAZ: {0}")]
    InvalidResponse(String),
    #[error("{operation:?} message failed schema validation: {errors:?}")]
    SchemaValidationFailed {
        operation: Operation,
        errors: Vec<String>,
    },
}

/// Web-service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `NFeAutorizacao4`: lot submission.
    Authorization,
    /// `NFeRetAutorizacao4`: lot result by receipt number.
    ReceiptQuery,
}

impl Operation {
    pub fn service_name(&self) -> &'static str {
        match self {
            Operation::Authorization => "NFeAutorizacao4",
            Operation::ReceiptQuery => "NFeRetAutorizacao4",
        }
    }

    pub fn wsdl_namespace(&self) -> &'static str {
        match self {
            Operation::Authorization => "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4",
            Operation::ReceiptQuery => "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRetAutorizacao4",
        }
    }

    pub fn soap_action(&self) -> String {
        let method = match self {
            Operation::Authorization => "nfeAutorizacaoLote",
            Operation::ReceiptQuery => "nfeRetAutorizacaoLote",
        };
        format!("{}/{method}", self.wsdl_namespace())
    }

    /// XSD the outbound message is validated against.
    pub fn schema_file(&self) -> &'static str {
        match self {
            Operation::Authorization => "enviNFe_v4.00.xsd",
            Operation::ReceiptQuery => "consReciNFe_v4.00.xsd",
        }
    }

    /// Local name of the result element in the response body.
    pub fn result_element(&self) -> &'static str {
        match self {
            Operation::Authorization => "retEnviNFe",
            Operation::ReceiptQuery => "retConsReciNFe",
        }
    }

    pub fn url<'a>(&self, endpoints: &'a Endpoints) -> &'a str {
        match self {
            Operation::Authorization => &endpoints.authorization,
            Operation::ReceiptQuery => &endpoints.receipt_query,
        }
    }
}

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound HTTP channel. Client certificates and TLS roots are the
/// implementation's concern.
#[async_trait]
pub trait HttpChannel: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: Vec<(&'static str, String)>,
    ) -> Result<HttpResponse, ApiError>;
}

/// [`HttpChannel`] over a `reqwest` client.
///
/// Build the client with an identity (`reqwest::Identity`) for mutual TLS.
#[derive(Debug, Clone)]
pub struct ReqwestChannel {
    client: Client,
}

impl ReqwestChannel {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpChannel for ReqwestChannel {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: Vec<(&'static str, String)>,
    ) -> Result<HttpResponse, ApiError> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Wraps a message for transport and names the headers that go with it.
pub trait TransportEnvelopeBuilder: Send + Sync {
    fn wrap(&self, xml: &str, operation: Operation) -> String;
    fn headers(&self, operation: Operation) -> Vec<(&'static str, String)>;
}

/// SOAP 1.2 envelope with the message inside `nfeDadosMsg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Soap12EnvelopeBuilder;

impl TransportEnvelopeBuilder for Soap12EnvelopeBuilder {
    fn wrap(&self, xml: &str, operation: Operation) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap12:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
                r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
                r#"xmlns:soap12="http://www.w3.org/2003/05/soap-envelope">"#,
                r#"<soap12:Body><nfeDadosMsg xmlns="{ns}">{body}</nfeDadosMsg></soap12:Body>"#,
                r#"</soap12:Envelope>"#
            ),
            ns = operation.wsdl_namespace(),
            body = crate::document::xml::strip_declaration(xml),
        )
    }

    fn headers(&self, operation: Operation) -> Vec<(&'static str, String)> {
        vec![
            (
                "Content-Type",
                format!(
                    r#"application/soap+xml; charset=utf-8; action="{}""#,
                    operation.soap_action()
                ),
            ),
            ("SOAPAction", operation.soap_action()),
        ]
    }
}

/// Validate, wrap, post and classify one message.
///
/// Shared by the client and the default receipt-query retrieval.
#[derive(Clone)]
pub struct SoapExchange {
    endpoints: Endpoints,
    timeout: Duration,
    channel: Arc<dyn HttpChannel>,
    validator: Arc<dyn SchemaValidator>,
    envelope: Arc<dyn TransportEnvelopeBuilder>,
    classifier: Arc<dyn RejectionClassifier>,
}

impl std::fmt::Debug for SoapExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapExchange")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SoapExchange {
    pub fn new(
        endpoints: Endpoints,
        timeout: Duration,
        channel: Arc<dyn HttpChannel>,
        validator: Arc<dyn SchemaValidator>,
        envelope: Arc<dyn TransportEnvelopeBuilder>,
        classifier: Arc<dyn RejectionClassifier>,
    ) -> Self {
        Self {
            endpoints,
            timeout,
            channel,
            validator,
            envelope,
            classifier,
        }
    }

    /// Send `xml` and return the raw response body.
    ///
    /// # Errors
    /// [`ApiError::SchemaValidationFailed`] before sending,
    /// [`ApiError::Timeout`] if no answer arrives in time,
    /// [`ApiError::HttpStatus`] for non-2xx replies.
    pub async fn send(&self, operation: Operation, xml: &str) -> Result<String, ApiError> {
        self.validator
            .validate(xml, operation.schema_file())
            .map_err(|errors| ApiError::SchemaValidationFailed { operation, errors })?;

        let url = operation.url(&self.endpoints);
        let body = self.envelope.wrap(xml, operation);
        let headers = self.envelope.headers(operation);
        debug!(operation = operation.service_name(), url, "posting request");

        // dropping the pending future aborts the request
        let response = tokio::time::timeout(self.timeout, self.channel.post(url, body, headers))
            .await
            .map_err(|_| ApiError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            })??;

        if !(200..300).contains(&response.status) {
            return Err(ApiError::HttpStatus {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response.body)
    }

    pub fn classify(&self, raw: &str, operation: Operation) -> Result<ServiceResponse, ApiError> {
        self.classifier.classify(raw, operation)
    }
}

/// Submission coordinator and response reconciler.
///
/// # Examples
/// ```rust,no_run
/// use std::sync::Arc;
/// use nfce_core::api::SefazClient;
/// use nfce_core::batch::SyncMode;
/// use nfce_core::config::{Config, CscCredentials, Endpoints, Environment};
/// use nfce_core::document::{FiscalDocument, sign::{Signer, SigningError}};
///
/// struct MySigner;
/// impl Signer for MySigner {
///     fn sign(&self, xml: &str, _tag: &str) -> Result<String, SigningError> {
///         Ok(xml.to_string())
///     }
/// }
///
/// # async fn run(document: FiscalDocument) -> Result<(), nfce_core::Error> {
/// let env = Environment::Homologation;
/// let config = Config::new(env, CscCredentials::new(1, "token"), Endpoints::sao_paulo(env));
/// let client = SefazClient::new(config, Arc::new(MySigner))?;
/// let result = client.authorize(document, SyncMode::Synchronous).await?;
/// for outcome in result.documents() {
///     println!("{} {:?}", outcome.access_key(), outcome.status_code());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SefazClient {
    config: Config,
    assembler: DocumentAssembler,
    signer: Arc<dyn Signer>,
    exchange: SoapExchange,
    retrieval: Option<Arc<dyn SecondaryRetrieval>>,
    store: Arc<dyn ArtifactStore>,
}

impl std::fmt::Debug for SefazClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SefazClient")
            .field("config", &self.config)
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl SefazClient {
    /// Client with the default collaborators: reqwest channel, XSD
    /// validation from the configured schema directory, SOAP 1.2, the
    /// SEFAZ classifier, receipt-query polling, and filesystem artifacts
    /// when an artifact directory is configured.
    ///
    /// # Errors
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: Config, signer: Arc<dyn Signer>) -> Result<Self, ApiError> {
        let channel = ReqwestChannel::new()?;
        let store: Arc<dyn ArtifactStore> = match config.artifact_dir() {
            Some(dir) => Arc::new(FsArtifactStore::new(dir)),
            None => Arc::new(NoopArtifactStore),
        };
        let exchange = SoapExchange::new(
            config.endpoints().clone(),
            config.request_timeout(),
            Arc::new(channel),
            Arc::new(XsdSchemaValidator::from_config(&config)),
            Arc::new(Soap12EnvelopeBuilder),
            Arc::new(SefazRejectionClassifier),
        );
        Ok(Self {
            assembler: DocumentAssembler::new(&config),
            config,
            signer,
            exchange,
            retrieval: None,
            store,
        })
    }

    pub fn with_channel(mut self, channel: Arc<dyn HttpChannel>) -> Self {
        self.exchange.channel = channel;
        self
    }

    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.exchange.validator = validator;
        self
    }

    pub fn with_envelope_builder(mut self, envelope: Arc<dyn TransportEnvelopeBuilder>) -> Self {
        self.exchange.envelope = envelope;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RejectionClassifier>) -> Self {
        self.exchange.classifier = classifier;
        self
    }

    /// Replace the receipt-query retrieval used for asynchronous lots.
    pub fn with_retrieval(mut self, retrieval: Arc<dyn SecondaryRetrieval>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Authorize one document or a sequence under a generated lot id.
    pub async fn authorize(
        &self,
        documents: impl Into<OneOrMany<FiscalDocument>>,
        sync: SyncMode,
    ) -> Result<AuthorizationResult, Error> {
        self.authorize_lot(&generate_lot_id(), documents, sync).await
    }

    /// Authorize documents under an explicit lot id.
    ///
    /// Document and lot errors are raised before any network call.
    /// Per-document rejections by the authority are reported in the
    /// result, not raised.
    ///
    /// # Errors
    /// Returns [`Error`] for assembly, signing, digest, lot, validation,
    /// transport, timeout and service-rejection failures.
    pub async fn authorize_lot(
        &self,
        lot_id: &str,
        documents: impl Into<OneOrMany<FiscalDocument>>,
        sync: SyncMode,
    ) -> Result<AuthorizationResult, Error> {
        let signed = self
            .assembler
            .assemble_all(documents.into(), self.signer.as_ref())?;

        let mut builder = BatchEnvelopeBuilder::new(lot_id, sync);
        for document in &signed {
            builder.push(document.xml());
        }
        let lot = builder.build()?;
        save_best_effort(
            self.store.as_ref(),
            lot.xml(),
            &format!("{}-{lot_id}-consulta", Operation::Authorization.service_name()),
            ArtifactKind::Xml,
            None,
        );

        info!(lot_id, documents = lot.document_count(), sync = sync.code(), "submitting lot");
        let raw = self.exchange.send(Operation::Authorization, lot.xml()).await?;
        save_best_effort(
            self.store.as_ref(),
            &raw,
            &format!("{}-{lot_id}-retorno", Operation::Authorization.service_name()),
            ArtifactKind::Xml,
            None,
        );

        let response = self.exchange.classify(&raw, Operation::Authorization)?;
        if !response.accepted() {
            return Err(rejection(response).into());
        }
        info!(
            lot_id,
            status_code = response.status_code(),
            reason = response.status_reason(),
            "lot accepted"
        );

        let (protocols, batch) = self.reconcile(sync, response).await?;
        let outcomes = response::reconcile_documents(&signed, &protocols);
        self.persist_outcomes(&outcomes);

        Ok(AuthorizationResult::new(lot_id.to_string(), outcomes, batch))
    }

    async fn reconcile(
        &self,
        sync: SyncMode,
        response: ServiceResponse,
    ) -> Result<(Vec<ProtocolRecord>, BatchOutcome), ApiError> {
        if sync == SyncMode::Synchronous && !response.protocols().is_empty() {
            let protocols = response.into_protocols();
            return Ok((protocols, BatchOutcome::Synchronous));
        }

        let receipt = response
            .receipt_number()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("accepted lot without nRec".into()))?;
        info!(receipt = %receipt, "polling receipt query");

        let default_retrieval;
        let retrieval: &dyn SecondaryRetrieval = match &self.retrieval {
            Some(retrieval) => retrieval.as_ref(),
            None => {
                default_retrieval =
                    ReceiptQueryRetrieval::new(self.exchange.clone(), self.config.env());
                &default_retrieval
            }
        };

        match poll_until_final(retrieval, &receipt, self.config.poll_policy()).await? {
            PollOutcome::Final { protocols, polls } => Ok((
                protocols,
                BatchOutcome::Asynchronous {
                    receipt_number: receipt,
                    polls,
                },
            )),
            PollOutcome::Pending { attempts } => {
                warn!(receipt = %receipt, attempts, "poll budget exhausted, lot still processing");
                Ok((
                    Vec::new(),
                    BatchOutcome::Pending {
                        receipt_number: receipt,
                        attempts,
                    },
                ))
            }
        }
    }

    fn persist_outcomes(&self, outcomes: &[DocumentOutcome]) {
        for outcome in outcomes {
            let key = outcome.access_key().as_str();
            if let Some(xml) = outcome.authorized_xml() {
                save_best_effort(self.store.as_ref(), xml, key, ArtifactKind::Xml, Some("autorizados"));
            }
            match serde_json::to_string_pretty(outcome) {
                Ok(json) => {
                    save_best_effort(self.store.as_ref(), &json, key, ArtifactKind::Json, Some("autorizados"))
                }
                Err(err) => debug!(access_key = key, error = %err, "outcome not serializable"),
            }
        }
    }

    /// Signed documents are not retained; exposed for callers that only
    /// want assembly and signing.
    pub fn assemble_and_sign(
        &self,
        documents: impl Into<OneOrMany<FiscalDocument>>,
    ) -> Result<Vec<SignedDocument>, Error> {
        Ok(self
            .assembler
            .assemble_all(documents.into(), self.signer.as_ref())?)
    }
}

pub(crate) fn rejection(response: ServiceResponse) -> ApiError {
    ApiError::ServiceRejection {
        status_code: response.status_code(),
        reason: response.status_reason().to_string(),
        raw: response.into_raw(),
    }
}
