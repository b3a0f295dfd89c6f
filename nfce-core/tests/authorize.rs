mod common;

use common::{
    AcceptAll, RecordingRetrieval, RejectAll, SAMPLE_KEY, ScriptedChannel, StubSigner, config,
    offline_document, prot_nfe, ret_cons_reci, ret_envi, sample_document,
};
use nfce_core::{
    Error,
    api::{ApiError, BatchOutcome, Operation, RetrievalStatus, SefazClient},
    batch::SyncMode,
    document::DocumentError,
    store::FsArtifactStore,
};
use std::sync::Arc;

fn client(channel: Arc<ScriptedChannel>) -> SefazClient {
    SefazClient::new(config(), Arc::new(StubSigner::new()))
        .unwrap()
        .with_channel(channel)
        .with_schema_validator(Arc::new(AcceptAll))
}

fn protocol(key: &str, c_stat: u16) -> nfce_core::api::ProtocolRecord {
    nfce_core::api::ProtocolRecord {
        access_key: key.into(),
        protocol_number: Some("135240001234567".into()),
        status_code: c_stat,
        status_reason: "Autorizado o uso da NF-e".into(),
        received_at: None,
        digest: None,
        raw: prot_nfe(key, c_stat, "Autorizado o uso da NF-e"),
    }
}

#[tokio::test]
async fn synchronous_lot_uses_inline_protocols() {
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        104,
        "Lote processado",
        None,
        &[prot_nfe(SAMPLE_KEY, 100, "Autorizado o uso da NF-e")],
    )]));
    let retrieval = Arc::new(RecordingRetrieval::new(Vec::new()));
    let result = client(channel.clone())
        .with_retrieval(retrieval.clone())
        .authorize_lot("1", sample_document(), SyncMode::Synchronous)
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.lot_id(), "1");
    assert_eq!(result.batch(), &BatchOutcome::Synchronous);
    assert_eq!(channel.calls(), 1);
    assert_eq!(retrieval.polls(), 0);

    let outcome = &result.documents()[0];
    assert_eq!(outcome.access_key().as_str(), SAMPLE_KEY);
    assert_eq!(outcome.status_code(), Some(100));
    assert!(outcome.is_authorized());
    let proc = outcome.authorized_xml().expect("nfeProc");
    assert!(proc.contains("<nfeProc xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><NFe"));
    assert!(proc.contains("</NFe><protNFe versao=\"4.00\">"));

    let request = &channel.requests()[0];
    assert_eq!(request.url, config().endpoints().authorization);
    assert!(request.body.contains("<idLote>1</idLote><indSinc>1</indSinc><NFe"));
    assert!(request
        .headers
        .iter()
        .any(|(name, value)| *name == "SOAPAction" && *value == Operation::Authorization.soap_action()));
}

#[tokio::test(start_paused = true)]
async fn asynchronous_lot_polls_until_final() {
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        103,
        "Lote recebido com sucesso",
        Some("351000012345678"),
        &[],
    )]));
    let retrieval = Arc::new(RecordingRetrieval::new(vec![
        RetrievalStatus::Pending,
        RetrievalStatus::Final(vec![protocol(SAMPLE_KEY, 100)]),
    ]));
    let result = client(channel.clone())
        .with_retrieval(retrieval.clone())
        .authorize(sample_document(), SyncMode::Asynchronous)
        .await
        .unwrap();

    assert_eq!(retrieval.polls(), 2);
    assert_eq!(channel.calls(), 1);
    assert_eq!(
        result.batch(),
        &BatchOutcome::Asynchronous {
            receipt_number: "351000012345678".into(),
            polls: 2
        }
    );
    assert!(result.documents()[0].is_authorized());
    assert_eq!(result.lot_id().len(), 15);
}

#[tokio::test(start_paused = true)]
async fn synchronous_request_falls_back_to_receipt_query() {
    let receipt = "351000012345679";
    let channel = Arc::new(ScriptedChannel::new(vec![
        ret_envi(103, "Lote recebido com sucesso", Some(receipt), &[]),
        ret_cons_reci(105, "Lote em processamento", receipt, &[]),
        ret_cons_reci(
            104,
            "Lote processado",
            receipt,
            &[prot_nfe(SAMPLE_KEY, 100, "Autorizado o uso da NF-e")],
        ),
    ]));
    let result = client(channel.clone())
        .authorize_lot("77", sample_document(), SyncMode::Synchronous)
        .await
        .unwrap();

    assert_eq!(channel.calls(), 3);
    let query = &channel.requests()[1];
    assert_eq!(query.url, config().endpoints().receipt_query);
    assert!(query.body.contains(&format!(
        "<consReciNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><nRec>{receipt}</nRec></consReciNFe>"
    )));
    assert!(matches!(
        result.batch(),
        BatchOutcome::Asynchronous { polls: 2, .. }
    ));
    assert_eq!(result.documents()[0].status_code(), Some(100));
}

#[tokio::test(start_paused = true)]
async fn exhausted_polling_reports_pending() {
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        103,
        "Lote recebido com sucesso",
        Some("351000012345680"),
        &[],
    )]));
    let retrieval = Arc::new(RecordingRetrieval::new(Vec::new()));
    let result = client(channel)
        .with_retrieval(retrieval.clone())
        .authorize(sample_document(), SyncMode::Asynchronous)
        .await
        .unwrap();

    assert!(result.is_pending());
    assert_eq!(retrieval.polls(), 3);
    assert_eq!(result.documents()[0].status_code(), None);
    assert!(!result.documents()[0].is_authorized());
}

#[tokio::test]
async fn document_rejection_is_reported_per_document() {
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        104,
        "Lote processado",
        None,
        &[prot_nfe(SAMPLE_KEY, 539, "Rejeicao: Duplicidade de NF-e")],
    )]));
    let result = client(channel)
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap();

    assert!(result.success());
    let outcome = &result.documents()[0];
    assert_eq!(outcome.status_code(), Some(539));
    assert_eq!(outcome.status_reason(), Some("Rejeicao: Duplicidade de NF-e"));
    assert!(outcome.authorized_xml().is_none());
}

#[tokio::test]
async fn lot_rejection_is_an_error() {
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        225,
        "Rejeicao: Falha no Schema XML do lote de NFe",
        None,
        &[],
    )]));
    let err = client(channel)
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap_err();
    match err {
        Error::Api(ApiError::ServiceRejection {
            status_code, raw, ..
        }) => {
            assert_eq!(status_code, 225);
            assert!(raw.contains("<retEnviNFe"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn schema_failure_stops_before_sending() {
    let channel = Arc::new(ScriptedChannel::new(Vec::new()));
    let err = client(channel.clone())
        .with_schema_validator(Arc::new(RejectAll))
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Api(ApiError::SchemaValidationFailed {
            operation: Operation::Authorization,
            ..
        })
    ));
    assert_eq!(channel.calls(), 0);
}

#[tokio::test]
async fn missing_digest_stops_before_sending() {
    let channel = Arc::new(ScriptedChannel::new(Vec::new()));
    let client = SefazClient::new(config(), Arc::new(StubSigner::without_digest()))
        .unwrap()
        .with_channel(channel.clone())
        .with_schema_validator(Arc::new(AcceptAll));
    let err = client
        .authorize(
            vec![sample_document(), offline_document()],
            SyncMode::Synchronous,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Document(DocumentError::DigestNotFound)));
    assert_eq!(channel.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_service_times_out() {
    let channel = Arc::new(ScriptedChannel::hanging());
    let err = client(channel.clone())
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Api(ApiError::Timeout { elapsed_ms: 5000 })
    ));
    assert_eq!(channel.calls(), 1);
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let channel = Arc::new(ScriptedChannel::with_status(503, "Service Unavailable"));
    let err = client(channel)
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap_err();
    match err {
        Error::Api(ApiError::HttpStatus { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "Service Unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn artifacts_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new(vec![ret_envi(
        104,
        "Lote processado",
        None,
        &[prot_nfe(SAMPLE_KEY, 100, "Autorizado o uso da NF-e")],
    )]));
    client(channel)
        .with_store(Arc::new(FsArtifactStore::new(dir.path())))
        .authorize_lot("42", sample_document(), SyncMode::Synchronous)
        .await
        .unwrap();

    assert!(dir.path().join("NFeAutorizacao4-42-consulta.xml").exists());
    assert!(dir.path().join("NFeAutorizacao4-42-retorno.xml").exists());
    let authorized = dir.path().join("autorizados");
    let proc = std::fs::read_to_string(authorized.join(format!("{SAMPLE_KEY}.xml"))).unwrap();
    assert!(proc.contains("<nfeProc"));
    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(authorized.join(format!("{SAMPLE_KEY}.json"))).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["status_code"], 100);
    assert_eq!(summary["access_key"], SAMPLE_KEY);
}
