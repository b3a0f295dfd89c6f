use async_trait::async_trait;
use chrono::DateTime;
use nfce_core::{
    api::{ApiError, HttpChannel, HttpResponse, RetrievalStatus, SecondaryRetrieval},
    config::{Config, CscCredentials, Endpoints, Environment, PollPolicy},
    document::{
        Address, Contingency, Contribution, EmissionType, Emitter, FiscalDocument, Header, Icms,
        ItemTax, LineItem, OneOrMany, Payment, PaymentDetail, Recipient, Totals, Transport,
        sign::{Signer, SigningError},
        validation::{SchemaValidator, ValidationResult},
    },
};
use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Access key of [`sample_document`].
#[allow(dead_code)]
pub const SAMPLE_KEY: &str = "35240811222333000181650010004523801611650830";

#[allow(dead_code)]
pub fn config() -> Config {
    let env = Environment::Homologation;
    Config::new(env, CscCredentials::new(1, "SECRET"), Endpoints::sao_paulo(env))
        .with_poll_policy(PollPolicy::new(Duration::from_secs(1), 3))
        .with_request_timeout(Duration::from_secs(5))
}

#[allow(dead_code)]
pub fn address() -> Address {
    Address {
        street: "Av. Paulista".into(),
        number: "1000".into(),
        complement: None,
        district: "Bela Vista".into(),
        municipality_code: "3550308".into(),
        municipality: "Sao Paulo".into(),
        state: "SP".into(),
        postal_code: Some("01310100".into()),
        country_code: Some("1058".into()),
        country: Some("BRASIL".into()),
        phone: None,
    }
}

#[allow(dead_code)]
pub fn line_item(code: &str, total: f64) -> LineItem {
    LineItem {
        code: code.into(),
        gtin: None,
        description: format!("Produto {code}"),
        ncm: "21069090".into(),
        cfop: "5102".into(),
        unit: "UN".into(),
        quantity: 1.0,
        unit_price: total,
        total,
        tax: ItemTax {
            approximate_total: None,
            icms: Icms::SimplesNacional {
                origin: 0,
                csosn: "102".into(),
            },
            pis: Contribution::NotTaxed { cst: "07".into() },
            cofins: Contribution::NotTaxed { cst: "07".into() },
        },
    }
}

#[allow(dead_code)]
pub fn sample_document() -> FiscalDocument {
    let items = vec![line_item("001", 12.5), line_item("002", 7.5)];
    FiscalDocument {
        header: Header {
            state_code: 35,
            random_code: Some("61165083".into()),
            operation_nature: "VENDA AO CONSUMIDOR".into(),
            model: 65,
            series: 1,
            number: 452380,
            issued_at: DateTime::parse_from_rfc3339("2024-08-01T10:00:00-03:00").unwrap(),
            operation_type: 1,
            destination: 1,
            municipality_code: "3550308".into(),
            print_format: 4,
            emission_type: EmissionType::Normal,
            environment: Environment::Homologation,
            purpose: 1,
            final_consumer: 1,
            presence: 1,
            process_version: None,
            contingency: None,
            references: OneOrMany::default(),
        },
        emitter: Emitter {
            document: "11.222.333/0001-81".into(),
            name: "Mercado Exemplo LTDA".into(),
            trade_name: Some("Mercado Exemplo".into()),
            address: address(),
            state_registration: "123456789012".into(),
            tax_regime: 1,
        },
        recipient: Some(Recipient {
            document: "529.982.247-25".into(),
            name: Some("Maria Silva".into()),
            address: None,
            ie_indicator: 9,
            email: None,
        }),
        totals: Totals::from_items(&items),
        items: items.into(),
        transport: Transport::default(),
        payment: Payment {
            details: vec![PaymentDetail {
                indicator: Some(0),
                method: "01".into(),
                amount: 20.0,
            }],
            change: None,
        },
        additional_info: None,
    }
}

/// [`sample_document`] issued offline, with contingency metadata.
#[allow(dead_code)]
pub fn offline_document() -> FiscalDocument {
    let mut document = sample_document();
    document.header.emission_type = EmissionType::Offline;
    document.header.contingency = Some(Contingency {
        entered_at: DateTime::parse_from_rfc3339("2024-08-01T09:55:00-03:00").unwrap(),
        justification: "Falha de comunicacao com a SEFAZ autorizadora".into(),
    });
    document
}

/// Appends an enveloped signature block before `</NFe>`.
#[allow(dead_code)]
pub struct StubSigner {
    pub digest: Option<&'static str>,
}

#[allow(dead_code)]
impl StubSigner {
    pub fn new() -> Self {
        Self {
            digest: Some("qnVYlnsuGsOBfQ0Y2qDdVU3xyv4="),
        }
    }

    pub fn without_digest() -> Self {
        Self { digest: None }
    }
}

impl Signer for StubSigner {
    fn sign(&self, xml: &str, reference_tag: &str) -> Result<String, SigningError> {
        assert_eq!(reference_tag, "infNFe");
        let digest = self
            .digest
            .map(|d| format!("<DigestValue>{d}</DigestValue>"))
            .unwrap_or_default();
        let signature = format!(
            r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#"><SignedInfo><Reference URI="">{digest}</Reference></SignedInfo><SignatureValue>c2ln</SignatureValue></Signature>"#
        );
        let end = xml
            .rfind("</NFe>")
            .ok_or_else(|| SigningError::SigningError("no NFe element".into()))?;
        Ok(format!("{}{signature}{}", &xml[..end], &xml[end..]))
    }
}

#[allow(dead_code)]
pub struct AcceptAll;

impl SchemaValidator for AcceptAll {
    fn validate(&self, _xml: &str, _schema_file: &str) -> ValidationResult {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct RejectAll;

impl SchemaValidator for RejectAll {
    fn validate(&self, _xml: &str, _schema_file: &str) -> ValidationResult {
        Err(vec!["Element 'idLote': not a valid value".into()])
    }
}

/// A request as seen by [`ScriptedChannel`].
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

/// Replies with queued responses in order and records every request.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedChannel {
    replies: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl ScriptedChannel {
    pub fn new(bodies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(
                bodies
                    .into_iter()
                    .map(|body| HttpResponse { status: 200, body })
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([HttpResponse {
                status,
                body: body.to_string(),
            }])),
            ..Self::default()
        }
    }

    /// Never answers within any reasonable timeout.
    pub fn hanging() -> Self {
        Self {
            delay: Some(Duration::from_secs(3600)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpChannel for ScriptedChannel {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: Vec<(&'static str, String)>,
    ) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body,
            headers,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Transport("no scripted reply left".into()))
    }
}

/// Retrieval that replays scripted statuses and counts polls.
#[allow(dead_code)]
pub struct RecordingRetrieval {
    replies: Mutex<VecDeque<RetrievalStatus>>,
    polls: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingRetrieval {
    pub fn new(replies: Vec<RetrievalStatus>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecondaryRetrieval for RecordingRetrieval {
    async fn poll(&self, _receipt_number: &str) -> Result<RetrievalStatus, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RetrievalStatus::Pending))
    }
}

#[allow(dead_code)]
pub fn prot_nfe(key: &str, c_stat: u16, reason: &str) -> String {
    format!(
        concat!(
            r#"<protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><verAplic>SP_NFCE_PL_009_V400</verAplic>"#,
            r#"<chNFe>{key}</chNFe><dhRecbto>2024-08-01T10:00:02-03:00</dhRecbto>"#,
            r#"<nProt>135240001234567</nProt><digVal>qnVYlnsuGsOBfQ0Y2qDdVU3xyv4=</digVal>"#,
            r#"<cStat>{c_stat}</cStat><xMotivo>{reason}</xMotivo></infProt></protNFe>"#
        ),
        key = key,
        c_stat = c_stat,
        reason = reason
    )
}

fn soap(wsdl: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>"#,
            r#"<nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/{wsdl}">{body}</nfeResultMsg>"#,
            r#"</soap:Body></soap:Envelope>"#
        ),
        wsdl = wsdl,
        body = body
    )
}

/// `retEnviNFe` with the given lot status and inline protocols.
#[allow(dead_code)]
pub fn ret_envi(c_stat: u16, reason: &str, receipt: Option<&str>, protocols: &[String]) -> String {
    let rec = receipt
        .map(|n| format!("<infRec><nRec>{n}</nRec><tMed>1</tMed></infRec>"))
        .unwrap_or_default();
    soap(
        "NFeAutorizacao4",
        &format!(
            r#"<retEnviNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><tpAmb>2</tpAmb><verAplic>SP_NFCE_PL_009_V400</verAplic><cStat>{c_stat}</cStat><xMotivo>{reason}</xMotivo><cUF>35</cUF><dhRecbto>2024-08-01T10:00:01-03:00</dhRecbto>{rec}{}</retEnviNFe>"#,
            protocols.concat()
        ),
    )
}

/// `retConsReciNFe` with the given lot status and protocols.
#[allow(dead_code)]
pub fn ret_cons_reci(c_stat: u16, reason: &str, receipt: &str, protocols: &[String]) -> String {
    soap(
        "NFeRetAutorizacao4",
        &format!(
            r#"<retConsReciNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><tpAmb>2</tpAmb><verAplic>SP_NFCE_PL_009_V400</verAplic><nRec>{receipt}</nRec><cStat>{c_stat}</cStat><xMotivo>{reason}</xMotivo><cUF>35</cUF><dhRecbto>2024-08-01T10:00:03-03:00</dhRecbto>{}</retConsReciNFe>"#,
            protocols.concat()
        ),
    )
}
