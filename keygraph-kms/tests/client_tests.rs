mod support;

use keygraph_accounts::{
    BootstrapAccount, BootstrapAccountUser, BootstrapConfig, Encrypter, KeyGraph, KeyGraphConfig,
    KeyGraphError, open, seal,
};
use keygraph_kms::{KmsConfig, RPC_HEADER, RemoteEncrypter};
use keygraph_store::{AdminLevel, MemoryStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{app, copy_key, master_key};
use tokio::net::TcpListener;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

// ── Wire format ─────────────────────────────────────────────────

#[tokio::test]
async fn encrypt_posts_plaintext_with_rpc_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/encrypt"))
        .and(header(RPC_HEADER, "server-token"))
        .and(body_json(json!({ "decrypted": "abc123" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "encrypted": "sealed" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteEncrypter::new(server.uri(), TIMEOUT)
        .unwrap()
        .with_rpc_token("server-token");
    assert_eq!(client.encrypt("abc123").await.unwrap(), "sealed");
}

#[tokio::test]
async fn decrypt_posts_ciphertext() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decrypt"))
        .and(body_json(json!({ "encrypted_private_key": "sealed" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "decrypted_private_key": "abc123" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteEncrypter::new(format!("{}/", server.uri()), TIMEOUT).unwrap();
    assert_eq!(client.decrypt("sealed").await.unwrap(), "abc123");
}

#[tokio::test]
async fn error_responses_become_remote_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decrypt"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "could not decrypt the given value", "status": 400 })),
        )
        .mount(&server)
        .await;

    let client = RemoteEncrypter::new(server.uri(), TIMEOUT).unwrap();
    match client.decrypt("garbage").await {
        Err(KeyGraphError::Remote(message)) => {
            assert!(message.contains("could not decrypt"), "{message}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_service_is_remote_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RemoteEncrypter::new(format!("http://{addr}"), TIMEOUT).unwrap();
    assert!(matches!(client.encrypt("abc").await, Err(KeyGraphError::Remote(_))));
}

// ── Against a running service ───────────────────────────────────

async fn spawn_kms(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn round_trips_through_running_service() {
    let master = master_key();
    let check = copy_key(&master);
    let url = spawn_kms(app(master, KmsConfig::default())).await;
    let client = RemoteEncrypter::new(url, TIMEOUT).unwrap();

    let sealed = client.encrypt("abc123").await.unwrap();
    assert_eq!(open(&check, &sealed).unwrap(), "abc123");
    assert_eq!(client.decrypt(&seal(&check, "xyz").unwrap()).await.unwrap(), "xyz");
}

#[tokio::test]
async fn key_graph_resets_password_through_service() {
    let url = spawn_kms(app(master_key(), KmsConfig::default())).await;
    let encrypter = RemoteEncrypter::new(url, TIMEOUT).unwrap();
    let graph = KeyGraph::new(
        Arc::new(MemoryStore::new()),
        Arc::new(encrypter),
        KeyGraphConfig::fast_keys(),
    );

    let account_id = Uuid::new_v4();
    graph
        .bootstrap(BootstrapConfig {
            accounts: vec![BootstrapAccount {
                account_id,
                name: "Acme".into(),
            }],
            account_users: vec![BootstrapAccountUser {
                email: "alice@acme.test".into(),
                password: "correct-password".into(),
                accounts: vec![account_id],
                admin_level: AdminLevel::None,
            }],
            force: false,
        })
        .await
        .unwrap();

    let token = graph.issue_reset_token("alice@acme.test").await.unwrap();
    graph
        .reset_password_with_token(&token, "alice@acme.test", "brand-new-password")
        .await
        .unwrap();

    let login = graph.login("alice@acme.test", "brand-new-password", true).await.unwrap();
    assert_eq!(login.accounts.len(), 1);
    assert_eq!(login.accounts[0].account_id, account_id);
    assert!(graph.login("alice@acme.test", "correct-password", false).await.is_err());
}
