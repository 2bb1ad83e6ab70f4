//! End-to-end enrollment flow against an in-process server.
//!
//! Drives the real router over TCP with a deterministic mock extractor:
//! enroll, re-enroll, unknown identity, undecodable image, and the health
//! counters that should move along the way.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use visage::server::{create_router, AppConfig, AppState};
use visage::store::IdentityStore;
use visage::testing::{solid_png, MockExtractor};

const FACE_A: [u8; 3] = [220, 30, 30];
const FACELESS: [u8; 3] = [0, 0, 0];

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let router = create_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    addr
}

fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
    let store = IdentityStore::open(dir.path().join("store.json"), 4).unwrap();
    store.provision("A1").unwrap();
    store.provision("B2").unwrap();

    let extractor = MockExtractor::new(4).with_face(FACE_A, vec![0.1, 0.2, 0.3, 0.4]);

    Arc::new(AppState {
        store,
        extractor: Arc::new(extractor),
        config: AppConfig {
            match_threshold: 1.2,
            frame_timeout: Duration::from_secs(5),
        },
    })
}

fn enroll_form(identity: &str, image: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("identity", identity.to_string())
        .part(
            "image",
            reqwest::multipart::Part::bytes(image).file_name("face.png"),
        )
}

#[tokio::test]
async fn enroll_then_reenroll_is_idempotent() {
    let dir = tempdir().unwrap();
    let state = test_state(&dir);
    let addr = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/enroll", addr);

    let response = client
        .post(&url)
        .multipart(enroll_form("A1", solid_png(FACE_A, 16, 16)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");

    // Same identity, same image: same stored embedding, no duplicate.
    let response = client
        .post(&url)
        .multipart(enroll_form("A1", solid_png(FACE_A, 16, 16)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let all = state.store.get_all_with_embedding();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "A1");
    assert_eq!(all[0].1, vec![0.1, 0.2, 0.3, 0.4]);
}

#[tokio::test]
async fn enroll_unknown_identity_is_404_and_store_untouched() {
    let dir = tempdir().unwrap();
    let state = test_state(&dir);
    let addr = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/enroll", addr))
        .multipart(enroll_form("nobody", solid_png(FACE_A, 16, 16)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nobody"));
    assert!(state.store.get_all_with_embedding().is_empty());
}

#[tokio::test]
async fn enroll_rejects_bad_images_with_400() {
    let dir = tempdir().unwrap();
    let state = test_state(&dir);
    let addr = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/enroll", addr);

    // Bytes that decode as no known codec.
    let response = client
        .post(&url)
        .multipart(enroll_form("A1", b"garbage bytes".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // A valid image in which the extractor finds no face: strict failure
    // on the enrollment path.
    let response = client
        .post(&url)
        .multipart(enroll_form("A1", solid_png(FACELESS, 16, 16)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    assert!(state.store.get_all_with_embedding().is_empty());
}

#[tokio::test]
async fn health_counters_track_enrollment() {
    let dir = tempdir().unwrap();
    let state = test_state(&dir);
    let addr = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["identities"], 2);
    assert_eq!(health["enrolled"], 0);
    assert_eq!(health["embedding_dim"], 4);

    client
        .post(format!("http://{}/enroll", addr))
        .multipart(enroll_form("A1", solid_png(FACE_A, 16, 16)))
        .send()
        .await
        .unwrap();

    let health: serde_json::Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["enrolled"], 1);
}
