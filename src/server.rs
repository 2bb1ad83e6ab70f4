//! HTTP/WebSocket server for Visage
//!
//! Exposes the face enrollment and recognition pipeline over axum.
//!
//! # Endpoints
//!
//! - `POST /enroll` - One-shot enrollment (multipart: identity + image)
//! - `GET /ws/analyze` - Streaming face detection channel
//! - `GET /ws/recognize` - Streaming face recognition channel
//! - `GET /health` - Server health and telemetry

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::extract::{Extraction, FaceExtractor};
use crate::frame;
use crate::session::{self, StreamKind};
use crate::store::{IdentityStore, StoreError};

/// Recognition tunables, fixed at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// L2 distance below which a probe matches an enrolled identity.
    pub match_threshold: f32,
    /// Time limit for one frame's decode → extract → resolve pass.
    pub frame_timeout: Duration,
}

/// Shared application state, constructed once at startup and passed by
/// reference into every handler. No ambient globals.
pub struct AppState {
    pub store: IdentityStore,
    pub extractor: Arc<dyn FaceExtractor>,
    pub config: AppConfig,
}

/// Enrollment success body
#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub status: String,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status
    pub status: String,

    /// Provisioned identities
    pub identities: usize,

    /// Identities with an enrolled embedding
    pub enrolled: usize,

    /// Fixed embedding dimension
    pub embedding_dim: usize,

    /// Match threshold (L2)
    pub match_threshold: f32,

    /// Whether a real extractor backend is loaded
    pub extractor_ready: bool,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// POST /enroll - Extract an embedding from one image and store it under an
/// existing identity.
///
/// Strict by design: a frame without a localizable face is a client error
/// here, unlike on the streaming channels.
async fn enroll(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut identity: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().map(str::to_owned);
                match name.as_deref() {
                    Some("identity") => match field.text().await {
                        Ok(value) => identity = Some(value),
                        Err(e) => {
                            return error_response(
                                StatusCode::BAD_REQUEST,
                                format!("unreadable 'identity' field: {}", e),
                            )
                        }
                    },
                    Some("image") => match field.bytes().await {
                        Ok(bytes) => image = Some(bytes.to_vec()),
                        Err(e) => {
                            return error_response(
                                StatusCode::BAD_REQUEST,
                                format!("unreadable 'image' field: {}", e),
                            )
                        }
                    },
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("malformed multipart body: {}", e),
                )
            }
        }
    }

    let Some(identity) = identity.filter(|v| !v.trim().is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing 'identity' field".to_string(),
        );
    };
    let Some(image) = image else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'image' file".to_string());
    };

    let decoded = match frame::decode_image_bytes(&image) {
        Ok(decoded) => decoded,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("could not decode image: {}", e),
            )
        }
    };

    let extractor = state.extractor.clone();
    let extraction = match tokio::task::spawn_blocking(move || extractor.extract(&decoded)).await
    {
        Ok(Ok(extraction)) => extraction,
        Ok(Err(e)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("could not extract face embedding: {}", e),
            )
        }
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("extraction task failed: {}", e),
            )
        }
    };

    let embedding = match extraction {
        Extraction::Face(embedding) => embedding,
        Extraction::NoFace => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "no face detected in enrollment image".to_string(),
            )
        }
    };

    match state.store.upsert(&identity, embedding) {
        Ok(()) => {
            tracing::info!("enrolled face for identity '{}'", identity);
            (
                StatusCode::OK,
                Json(EnrollResponse {
                    status: "success".to_string(),
                    message: format!("Successfully enrolled face for identity '{}'.", identity),
                }),
            )
                .into_response()
        }
        Err(StoreError::IdentityNotFound(_)) => error_response(
            StatusCode::NOT_FOUND,
            format!(
                "identity '{}' not found; enrollment does not create identities",
                identity
            ),
        ),
        Err(e @ StoreError::DimensionMismatch { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /ws/analyze - Upgrade to a streaming detection session
async fn analyze_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state, StreamKind::Analyze))
}

/// GET /ws/recognize - Upgrade to a streaming recognition session
async fn recognize_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state, StreamKind::Recognize))
}

/// GET /health - Server health and telemetry
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        identities: state.store.len(),
        enrolled: state.store.enrolled_len(),
        embedding_dim: state.store.dim(),
        match_threshold: state.config.match_threshold,
        extractor_ready: state.extractor.available(),
    };

    (StatusCode::OK, Json(response))
}

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/enroll", post(enroll))
        .route("/ws/analyze", get(analyze_ws))
        .route("/ws/recognize", get(recognize_ws))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Start the server
pub async fn serve(state: Arc<AppState>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);

    tracing::info!("Starting Visage server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{solid_png, MockExtractor};
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const FACE_A: [u8; 3] = [200, 10, 10];

    fn create_test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let store = IdentityStore::open(dir.path().join("store.json"), 4).unwrap();
        store.provision("A1").unwrap();

        let extractor = MockExtractor::new(4).with_face(FACE_A, vec![0.25, 0.5, 0.75, 1.0]);

        Arc::new(AppState {
            store,
            extractor: Arc::new(extractor),
            config: AppConfig {
                match_threshold: 1.2,
                frame_timeout: Duration::from_secs(5),
            },
        })
    }

    const BOUNDARY: &str = "visage-test-boundary";

    fn multipart_body(identity: &str, image: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"identity\"\r\n\r\n{identity}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"face.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn enroll_request(identity: &str, image: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/enroll")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(identity, image)))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);
        let router = create_router(state);

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body_bytes(response).await;
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.identities, 1);
        assert_eq!(health.enrolled, 0);
        assert_eq!(health.embedding_dim, 4);
        assert!(health.extractor_ready);
    }

    #[tokio::test]
    async fn test_enroll_success() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);
        let router = create_router(state.clone());

        let response = router
            .oneshot(enroll_request("A1", &solid_png(FACE_A, 8, 8)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body_bytes(response).await;
        let enroll: EnrollResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(enroll.status, "success");
        assert!(enroll.message.contains("A1"));

        let all = state.store.get_all_with_embedding();
        assert_eq!(all, vec![("A1".to_string(), vec![0.25, 0.5, 0.75, 1.0])]);
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);

        for _ in 0..2 {
            let router = create_router(state.clone());
            let response = router
                .oneshot(enroll_request("A1", &solid_png(FACE_A, 8, 8)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let all = state.store.get_all_with_embedding();
        assert_eq!(all.len(), 1, "re-enrollment must not duplicate the identity");
        assert_eq!(all[0].1, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[tokio::test]
    async fn test_enroll_unknown_identity_is_404_without_mutation() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);
        let router = create_router(state.clone());

        let response = router
            .oneshot(enroll_request("ghost", &solid_png(FACE_A, 8, 8)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(state.store.get_all_with_embedding().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_undecodable_image_is_400() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);
        let router = create_router(state);

        let response = router
            .oneshot(enroll_request("A1", b"not an image at all"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_enroll_faceless_image_is_400() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);
        let router = create_router(state.clone());

        // Valid PNG, but not a color the mock recognizes as a face.
        let response = router
            .oneshot(enroll_request("A1", &solid_png([0, 0, 0], 8, 8)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = body_bytes(response).await;
        let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(error.error.contains("no face"));
        assert!(state.store.get_all_with_embedding().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_missing_image_is_400() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir);

        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"identity\"\r\n\r\nA1\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/enroll")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
