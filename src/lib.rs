//! Visage: a streaming face enrollment and recognition service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 HTTP/WebSocket API (axum)                   │
//! │       POST /enroll, /ws/analyze, /ws/recognize              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Streaming Session Manager                   │
//! │     one frame at a time per connection, drop-stale buffer   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//! ┌──────────────────┐ ┌──────────────┐ ┌──────────────────────┐
//! │   Frame Decoder  │ │  Extractor   │ │  Identity Resolver   │
//! │  base64 → pixels │ │  (boundary)  │ │  L2 nearest neighbor │
//! └──────────────────┘ └──────────────┘ └──────────────────────┘
//!                                                │
//!                                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  IdentityStore (JSON snapshot)              │
//! │        identity → embedding, atomic replace on write        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod extract;
pub mod frame;
pub mod metric;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod resolver;
pub mod server;
pub mod session;
pub mod store;
pub mod testing;

pub use extract::{Detection, ExtractError, Extraction, FaceExtractor, NullExtractor};
pub use frame::{decode_frame, decode_image_bytes, DecodeError};
pub use resolver::{resolve, Resolution, DEFAULT_MATCH_THRESHOLD};
pub use server::{create_router, serve, AppConfig, AppState};
pub use store::{IdentityStore, StoreError};
