//! Session lifecycle tests: deferred auth setup, the single identity round
//! trip, scope validation, and catalog-driven endpoint lookup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nimbusctl::auth::{AuthField, AuthParams, AuthPlugin};
use nimbusctl::config::{CliOptions, TlsVerify};
use nimbusctl::error::CliError;
use nimbusctl::session::{PasswordPrompt, SessionManager};

fn no_prompt() -> PasswordPrompt {
    Box::new(|_| panic!("password prompt must not fire"))
}

fn password_options(auth_url: &str) -> CliOptions {
    let mut auth = AuthParams::new();
    auth.set(AuthField::AuthUrl, auth_url);
    auth.set(AuthField::Username, "alice");
    auth.set(AuthField::Password, "hunter2");
    CliOptions {
        auth,
        ..CliOptions::default()
    }
}

fn v3_token_response(project_id: Option<&str>, catalog: serde_json::Value) -> ResponseTemplate {
    let mut token = json!({ "catalog": catalog });
    if let Some(id) = project_id {
        token["project"] = json!({ "id": id, "name": "widgets" });
    }
    ResponseTemplate::new(201)
        .insert_header("X-Subject-Token", "tok-123")
        .set_body_json(json!({ "token": token }))
}

fn compute_catalog(endpoint: &str) -> serde_json::Value {
    json!([{
        "type": "compute",
        "name": "nimbus-compute",
        "endpoints": [{
            "interface": "public",
            "region": "region-a",
            "url": endpoint
        }]
    }])
}

#[tokio::test]
async fn setup_auth_is_idempotent_and_prompts_at_most_once() {
    let mut auth = AuthParams::new();
    auth.set(AuthField::AuthUrl, "https://identity.example.test/v3");
    auth.set(AuthField::Username, "alice");
    let options = CliOptions {
        auth,
        ..CliOptions::default()
    };

    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let prompt: PasswordPrompt = Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("hunter2".to_string())
    });

    let manager = SessionManager::new(options, prompt);

    let session = manager.setup_auth().await.unwrap();
    assert_eq!(session.plugin, AuthPlugin::V3Password);
    assert_eq!(session.auth_params.get(AuthField::Password), Some("hunter2"));

    manager.setup_auth().await.unwrap();
    manager.setup_auth().await.unwrap();
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_auth_url_fails_before_any_network_access() {
    let mut auth = AuthParams::new();
    auth.set(AuthField::Username, "alice");
    auth.set(AuthField::Password, "hunter2");
    let options = CliOptions {
        auth,
        ..CliOptions::default()
    };

    let manager = SessionManager::new(options, no_prompt());
    let err = manager.setup_auth().await.unwrap_err();
    match err {
        CliError::Config(msg) => assert!(msg.contains("auth_url"), "got: {msg}"),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[tokio::test]
async fn v3_password_auth_round_trips_once() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .and(body_partial_json(json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": { "user": { "name": "alice", "password": "hunter2" } }
                },
                "scope": { "project": { "id": "p-1" } }
            }
        })))
        .respond_with(v3_token_response(Some("p-1"), compute_catalog("https://compute.example.test")))
        .expect(1)
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");

    let manager = SessionManager::new(options, no_prompt());

    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "tok-123");
    assert_eq!(auth_ref.project_id.as_deref(), Some("p-1"));

    // Second dereference is a cache hit; the expect(1) above would trip
    // if another identity request went out.
    manager.auth_ref().await.unwrap();

    let endpoint = manager
        .get_endpoint_for_service("compute", None, None)
        .await
        .unwrap();
    assert_eq!(endpoint, "https://compute.example.test");
}

#[tokio::test]
async fn empty_interface_defaults_to_public() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(Some("p-1"), compute_catalog("https://compute.example.test")))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");

    let manager = SessionManager::new(options, no_prompt());
    let endpoint = manager
        .get_endpoint_for_service("compute", None, Some(""))
        .await
        .unwrap();
    assert_eq!(endpoint, "https://compute.example.test");

    let err = manager
        .get_endpoint_for_service("volume", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::EndpointNotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn validate_scope_rejects_unscoped_sessions() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(None, json!([])))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let manager = SessionManager::new(password_options(&auth_url), no_prompt());

    // Baseline auth succeeds unscoped.
    manager.auth_ref().await.unwrap();

    let err = manager.validate_scope().await.unwrap_err();
    assert!(matches!(err, CliError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn validate_scope_accepts_a_project_scoped_session() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(Some("p-1"), json!([])))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");

    let manager = SessionManager::new(options, no_prompt());
    manager.validate_scope().await.unwrap();
}

#[tokio::test]
async fn v2_password_auth_renames_project_to_tenant() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2.0/tokens"))
        .and(body_partial_json(json!({
            "auth": {
                "passwordCredentials": { "username": "alice", "password": "hunter2" },
                "tenantName": "widgets"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": {
                "token": { "id": "tok-v2", "tenant": { "id": "t-1" } },
                "serviceCatalog": [{
                    "type": "compute",
                    "name": "nimbus-compute",
                    "endpoints": [{
                        "region": "region-a",
                        "publicURL": "https://compute.example.test"
                    }]
                }]
            }
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v2.0", mock.uri());
    let mut options = password_options(&auth_url);
    options.identity_api_version = "2.0".to_string();
    options.auth.set(AuthField::ProjectName, "widgets");

    let manager = SessionManager::new(options, no_prompt());

    let session = manager.setup_auth().await.unwrap();
    assert_eq!(session.plugin, AuthPlugin::V2Password);

    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "tok-v2");
    assert_eq!(auth_ref.project_id.as_deref(), Some("t-1"));

    let endpoint = manager
        .get_endpoint_for_service("compute", Some("region-a"), None)
        .await
        .unwrap();
    assert_eq!(endpoint, "https://compute.example.test");
}

#[tokio::test]
async fn generic_password_plugin_discovers_version_from_document() {
    let mock = MockServer::start().await;

    // Bare identity root: version document behind a 300.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(300).set_body_json(json!({
            "versions": { "values": [ { "id": "v3.14" }, { "id": "v2.0" } ] }
        })))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/tokens"))
        .respond_with(v3_token_response(Some("p-1"), json!([])))
        .expect(1)
        .mount(&mock)
        .await;

    let mut options = password_options(&mock.uri());
    options.auth.set(AuthField::ProjectId, "p-1");
    options.auth_type = Some("password".to_string());

    let manager = SessionManager::new(options, no_prompt());
    assert_eq!(
        manager.setup_auth().await.unwrap().plugin,
        AuthPlugin::Password
    );

    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "tok-123");
}

#[tokio::test]
async fn failed_identity_request_surfaces_the_server_message() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "The request you have made requires authentication." }
        })))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let manager = SessionManager::new(password_options(&auth_url), no_prompt());

    let err = manager.auth_ref().await.unwrap_err();
    match err {
        CliError::Api { status, message, .. } => {
            assert_eq!(status, 401);
            assert!(message.contains("requires authentication"), "got: {message}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn network_probe_reads_the_catalog_and_fails_open() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(
            Some("p-1"),
            compute_catalog("https://compute.example.test"),
        ))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");

    // Catalog present but no network entry: disabled.
    let manager = SessionManager::new(options, no_prompt());
    assert!(!manager.is_network_service_enabled().await.unwrap());

    // Token/endpoint auth carries no catalog at all: assume enabled.
    let mut auth = AuthParams::new();
    auth.set(AuthField::Url, "https://network.example.test");
    auth.set(AuthField::Token, "sekret");
    let fixed = SessionManager::new(
        CliOptions {
            auth,
            ..CliOptions::default()
        },
        no_prompt(),
    );
    assert!(fixed.is_network_service_enabled().await.unwrap());
}

#[tokio::test]
async fn token_endpoint_auth_never_touches_the_network() {
    let mut auth = AuthParams::new();
    auth.set(AuthField::Url, "https://compute.example.test");
    auth.set(AuthField::Token, "sekret");

    let manager = SessionManager::new(
        CliOptions {
            auth,
            ..CliOptions::default()
        },
        no_prompt(),
    );

    let session = manager.setup_auth().await.unwrap();
    assert_eq!(session.plugin, AuthPlugin::TokenEndpoint);

    // No identity service exists; the fixed endpoint answers everything.
    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "sekret");
    assert!(auth_ref.catalog.is_none());

    let endpoint = manager
        .get_endpoint_for_service("compute", None, None)
        .await
        .unwrap();
    assert_eq!(endpoint, "https://compute.example.test");
}

#[tokio::test]
async fn timing_flag_records_one_entry_per_network_call() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(Some("p-1"), json!([])))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");
    options.timing = true;

    let manager = SessionManager::new(options, no_prompt());
    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "tok-123");

    let report = manager.timing_report();
    assert_eq!(report.len(), 1);
    assert!(report[0].label.starts_with("POST"), "got: {}", report[0].label);
}

#[tokio::test]
async fn timing_off_leaves_the_report_empty_and_responses_unchanged() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(v3_token_response(Some("p-1"), json!([])))
        .mount(&mock)
        .await;

    let auth_url = format!("{}/v3", mock.uri());
    let mut options = password_options(&auth_url);
    options.auth.set(AuthField::ProjectId, "p-1");

    let manager = SessionManager::new(options, no_prompt());
    let auth_ref = manager.auth_ref().await.unwrap();
    assert_eq!(auth_ref.token, "tok-123");
    assert_eq!(auth_ref.project_id.as_deref(), Some("p-1"));
    assert!(manager.timing_report().is_empty());
}

#[tokio::test]
async fn unreadable_ca_bundle_fails_before_the_password_prompt() {
    let mut auth = AuthParams::new();
    auth.set(AuthField::AuthUrl, "https://identity.example.test/v3");
    auth.set(AuthField::Username, "alice");
    let options = CliOptions {
        auth,
        verify: TlsVerify::CaBundle("/nonexistent/nimbus-ca.pem".into()),
        ..CliOptions::default()
    };

    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let prompt: PasswordPrompt = Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("hunter2".to_string())
    });

    let manager = SessionManager::new(options, prompt);
    let err = manager.setup_auth().await.unwrap_err();
    match err {
        CliError::Config(msg) => assert!(msg.contains("CA bundle"), "got: {msg}"),
        other => panic!("expected Config error, got {other:?}"),
    }
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn configuration_view_masks_secrets() {
    let mut auth = AuthParams::new();
    auth.set(AuthField::AuthUrl, "https://identity.example.test/v3");
    auth.set(AuthField::Username, "alice");
    auth.set(AuthField::Password, "hunter2");

    let manager = SessionManager::new(
        CliOptions {
            auth,
            ..CliOptions::default()
        },
        no_prompt(),
    );

    let view = manager.get_configuration();
    assert_eq!(view.auth.get("password").map(String::as_str), Some("<redacted>"));
    assert_eq!(
        view.auth.get("username").map(String::as_str),
        Some("alice")
    );
}
