//! Visage CLI
//!
//! A streaming face enrollment and recognition service.
//!
//! # Usage
//!
//! ```bash
//! # Provision identities, then start the server
//! visage provision --store store.json --identity A1 --identity B2
//! visage serve --store store.json --port 8080
//!
//! # Enroll a face from the command line
//! visage enroll --server http://localhost:8080 --identity A1 --image face.jpg
//!
//! # Inspect a store snapshot
//! visage stats --store store.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use visage::extract::{FaceExtractor, NullExtractor, DEFAULT_EMBEDDING_DIM};
use visage::resolver::DEFAULT_MATCH_THRESHOLD;
use visage::server::{serve, AppConfig, AppState};
use visage::store::IdentityStore;

#[derive(Parser)]
#[command(name = "visage")]
#[command(about = "A streaming face enrollment and recognition service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Path to the store snapshot file
        #[arg(short, long)]
        store: PathBuf,

        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Embedding dimension the extractor produces
        #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
        dim: usize,

        /// Match threshold in L2 distance (extractor-specific)
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,

        /// Per-frame processing time limit in milliseconds
        #[arg(long, default_value = "10000")]
        frame_timeout_ms: u64,

        /// Directory holding the extractor model files
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
    },

    /// Create identity records (no embedding yet) in a store snapshot
    Provision {
        /// Path to the store snapshot file
        #[arg(short, long)]
        store: PathBuf,

        /// Identity key to provision (repeatable)
        #[arg(short, long, required = true)]
        identity: Vec<String>,

        /// Embedding dimension of the store
        #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
        dim: usize,
    },

    /// Display statistics about a store snapshot
    Stats {
        /// Path to the store snapshot file
        #[arg(short, long)]
        store: PathBuf,

        /// Embedding dimension of the store
        #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
        dim: usize,
    },

    /// Enroll a face against a running server
    Enroll {
        /// Server URL
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,

        /// Identity key to enroll
        #[arg(short, long)]
        identity: String,

        /// Path to the face image
        #[arg(long)]
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            store,
            port,
            host,
            dim,
            threshold,
            frame_timeout_ms,
            model_dir,
        } => {
            tracing::info!("Loading identity store from {:?}", store);
            let store = IdentityStore::open(&store, dim)?;
            tracing::info!(
                "Loaded {} identities ({} enrolled), embedding dimension {}",
                store.len(),
                store.enrolled_len(),
                dim
            );

            // Startup stays online even if no extractor model is present;
            // the server then reports every frame as faceless.
            let extractor = build_extractor(&model_dir, dim);

            let state = Arc::new(AppState {
                store,
                extractor,
                config: AppConfig {
                    match_threshold: threshold,
                    frame_timeout: Duration::from_millis(frame_timeout_ms),
                },
            });

            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            serve(state, addr).await?;
        }

        Commands::Provision {
            store,
            identity,
            dim,
        } => {
            let store = IdentityStore::open(&store, dim)?;
            for key in identity {
                store.provision(&key)?;
                tracing::info!("provisioned identity '{}'", key);
            }
            println!("Store now holds {} identities", store.len());
        }

        Commands::Stats { store, dim } => {
            let path = store.clone();
            let store = IdentityStore::open(&store, dim)?;
            println!("Identity Store: {:?}", path);
            println!("  Identities: {}", store.len());
            println!("  Enrolled: {}", store.enrolled_len());
            println!("  Embedding Dimension: {}", store.dim());
        }

        Commands::Enroll {
            server,
            identity,
            image,
        } => {
            let bytes = std::fs::read(&image)?;
            let file_name = image
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image")
                .to_string();

            let form = reqwest::multipart::Form::new()
                .text("identity", identity.clone())
                .part(
                    "image",
                    reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                );

            let client = reqwest::Client::new();
            let url = format!("{}/enroll", server.trim_end_matches('/'));
            let response = client.post(&url).multipart(form).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let error: serde_json::Value = response.json().await?;
                eprintln!("Error ({}): {}", status, error);
                std::process::exit(1);
            }

            let result: serde_json::Value = response.json().await?;
            println!(
                "{}",
                result["message"].as_str().unwrap_or("enrollment succeeded")
            );
        }
    }

    Ok(())
}

#[cfg(feature = "onnx")]
fn build_extractor(model_dir: &PathBuf, dim: usize) -> Arc<dyn FaceExtractor> {
    match visage::onnx::OnnxExtractor::from_dir(model_dir, dim) {
        Ok(extractor) => {
            tracing::info!("Face extractor loaded from {:?}", model_dir);
            Arc::new(extractor)
        }
        Err(e) => {
            tracing::warn!(
                "Face extractor unavailable: {}. Server will run in degraded mode (every frame reports no face).",
                e
            );
            Arc::new(NullExtractor::new(dim))
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_extractor(_model_dir: &PathBuf, dim: usize) -> Arc<dyn FaceExtractor> {
    tracing::warn!(
        "Built without the 'onnx' feature; server runs in degraded mode (every frame reports no face)."
    );
    Arc::new(NullExtractor::new(dim))
}
