//! Streaming session manager
//!
//! One session per WebSocket connection. Each connection walks the same
//! state machine: accepted (Open), waiting for the next frame (Receiving),
//! running decode → extract/detect → resolve for exactly one frame
//! (Processing), back to Receiving, until the peer disconnects (Closed).
//!
//! Frames are processed strictly one at a time per connection. A reader
//! task forwards incoming payloads into a `watch` channel, which is the
//! depth-1 latest-frame buffer: while one frame is being processed, newer
//! arrivals overwrite each other and only the most recent is picked up next.
//! Superseded frames produce no reply.
//!
//! Per-frame failures (bad payload, extractor error, timeout) degrade to
//! the channel's sentinel result and the session keeps receiving. Only
//! transport-level failures close the session; those are logged, never
//! surfaced to the peer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use crate::extract::Extraction;
use crate::frame;
use crate::resolver::{self, Resolution};
use crate::server::AppState;

/// Sentinel reply on the recognition channel when no face was usable.
pub const NO_FACE_RESULT: &str = "no face detected";

/// Reply on the recognition channel when nothing matched within threshold.
pub const UNKNOWN_RESULT: &str = "Unknown";

/// Which pipeline a streaming connection runs per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Detection only: `{"face_found": bool, "confidence": f32}` per frame.
    Analyze,
    /// Full recognition: identity key, `"Unknown"`, or `"no face detected"`.
    Recognize,
}

/// Drive one streaming connection to completion.
pub async fn run(socket: WebSocket, state: Arc<AppState>, kind: StreamKind) {
    let (mut sink, mut stream) = socket.split();
    let (frame_tx, mut frame_rx) = watch::channel::<Option<String>>(None);

    // Reader half: forward text frames into the latest-frame slot until the
    // peer closes or the transport fails.
    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(payload)) => {
                    if frame_tx.send(Some(payload)).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // binary frames and pings are not part of the protocol
                Err(e) => {
                    tracing::debug!("session transport error: {}", e);
                    break;
                }
            }
        }
    });

    // Processing half: one frame at a time, one reply per processed frame.
    loop {
        if frame_rx.changed().await.is_err() {
            break; // reader gone: peer disconnected
        }
        let payload = frame_rx.borrow_and_update().clone();
        let Some(payload) = payload else { continue };

        let reply = process_frame(&state, kind, payload).await;
        if sink.send(Message::Text(reply)).await.is_err() {
            tracing::debug!("session closed while sending result");
            break;
        }
    }

    reader.abort();
    tracing::debug!("streaming session closed");
}

/// Run the per-frame pipeline under the configured timeout. Expiry counts
/// as a failed frame, never a hung session.
pub async fn process_frame(state: &Arc<AppState>, kind: StreamKind, payload: String) -> String {
    match tokio::time::timeout(state.config.frame_timeout, run_pipeline(state, kind, payload))
        .await
    {
        Ok(reply) => reply,
        Err(_) => {
            tracing::warn!("frame processing timed out; reporting no face");
            sentinel(kind)
        }
    }
}

fn sentinel(kind: StreamKind) -> String {
    match kind {
        StreamKind::Analyze => analyze_reply(false, 0.0),
        StreamKind::Recognize => NO_FACE_RESULT.to_string(),
    }
}

/// Per-frame detection report on the analyze channel.
#[derive(Debug, Serialize)]
struct AnalyzeReport {
    face_found: bool,
    confidence: f32,
}

// Serialized as a struct field so the f32 keeps its shortest representation
// ("0.9173", not the widened f64 digits).
fn analyze_reply(face_found: bool, confidence: f32) -> String {
    let report = AnalyzeReport {
        face_found,
        confidence: round4(confidence),
    };
    serde_json::to_string(&report).expect("report serialization cannot fail")
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

async fn run_pipeline(state: &Arc<AppState>, kind: StreamKind, payload: String) -> String {
    let frame = match frame::decode_frame(&payload) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("undecodable frame: {}", e);
            return sentinel(kind);
        }
    };

    match kind {
        StreamKind::Analyze => {
            let extractor = state.extractor.clone();
            let detection =
                tokio::task::spawn_blocking(move || extractor.detect(&frame)).await;
            match detection {
                Ok(Ok(detection)) => analyze_reply(detection.found, detection.confidence),
                Ok(Err(e)) => {
                    tracing::warn!("detection failed: {}", e);
                    sentinel(kind)
                }
                Err(e) => {
                    tracing::warn!("detection task failed: {}", e);
                    sentinel(kind)
                }
            }
        }
        StreamKind::Recognize => {
            let extractor = state.extractor.clone();
            let extraction =
                tokio::task::spawn_blocking(move || extractor.extract(&frame)).await;
            let embedding = match extraction {
                Ok(Ok(Extraction::Face(embedding))) => embedding,
                Ok(Ok(Extraction::NoFace)) => return sentinel(kind),
                Ok(Err(e)) => {
                    tracing::warn!("extraction failed: {}", e);
                    return sentinel(kind);
                }
                Err(e) => {
                    tracing::warn!("extraction task failed: {}", e);
                    return sentinel(kind);
                }
            };

            let candidates = state.store.get_all_with_embedding();
            match resolver::resolve(&embedding, &candidates, state.config.match_threshold) {
                Ok(Resolution::Match { identity, distance }) => {
                    tracing::debug!("recognized '{}' at distance {:.4}", identity, distance);
                    identity
                }
                Ok(Resolution::Unknown) => UNKNOWN_RESULT.to_string(),
                Err(e) => {
                    // Dimension drift between extractor and store; absorbed
                    // per-frame like every other pipeline failure.
                    tracing::error!("resolver error: {}", e);
                    UNKNOWN_RESULT.to_string()
                }
            }
        }
    }
}
