mod common;

use common::{AcceptAll, SAMPLE_KEY, StubSigner, prot_nfe, ret_envi, sample_document};
use httpmock::{Method::POST, MockServer};
use nfce_core::{
    Error,
    api::{ApiError, SefazClient},
    batch::SyncMode,
    config::{Config, CscCredentials, Endpoints, Environment},
};
use std::sync::Arc;

fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}

fn config_for(server: &MockServer) -> Config {
    let env = Environment::Homologation;
    let endpoints = Endpoints {
        authorization: server.url("/ws/NFeAutorizacao4.asmx"),
        receipt_query: server.url("/ws/NFeRetAutorizacao4.asmx"),
        ..Endpoints::sao_paulo(env)
    };
    Config::new(env, CscCredentials::new(1, "SECRET"), endpoints)
}

#[test]
fn authorizes_over_http() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/ws/NFeAutorizacao4.asmx")
            .header_exists("SOAPAction")
            .body_contains("<nfeDadosMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4\"><enviNFe");
        then.status(200)
            .header("content-type", "application/soap+xml; charset=utf-8")
            .body(ret_envi(
                104,
                "Lote processado",
                None,
                &[prot_nfe(SAMPLE_KEY, 100, "Autorizado o uso da NF-e")],
            ));
    });

    let client = SefazClient::new(config_for(&server), Arc::new(StubSigner::new()))
        .unwrap()
        .with_schema_validator(Arc::new(AcceptAll));
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let result = rt
        .block_on(client.authorize(sample_document(), SyncMode::Synchronous))
        .unwrap();

    mock.assert();
    assert!(result.documents()[0].is_authorized());
}

#[test]
fn server_errors_surface_as_http_status() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path("/ws/NFeAutorizacao4.asmx");
        then.status(500).body("internal error");
    });

    let client = SefazClient::new(config_for(&server), Arc::new(StubSigner::new()))
        .unwrap()
        .with_schema_validator(Arc::new(AcceptAll));
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let err = rt
        .block_on(client.authorize(sample_document(), SyncMode::Synchronous))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Api(ApiError::HttpStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let env = Environment::Homologation;
    let endpoints = Endpoints {
        authorization: "http://127.0.0.1:9/ws/NFeAutorizacao4.asmx".into(),
        ..Endpoints::sao_paulo(env)
    };
    let config = Config::new(env, CscCredentials::new(1, "SECRET"), endpoints);
    let client = SefazClient::new(config, Arc::new(StubSigner::new()))
        .unwrap()
        .with_schema_validator(Arc::new(AcceptAll));
    let err = client
        .authorize(sample_document(), SyncMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::Transport(_))));
}
