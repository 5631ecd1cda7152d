use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use faceprint_core::{FaceEncoder, OnnxFaceEncoder, UserId};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceprint", about = "faceprint face registration and recognition CLI")]
struct Cli {
    /// Base URL of the faceprintd service
    #[arg(long, env = "FACEPRINT_URL", default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face under a user id
    Register {
        /// Integer or [A-Za-z0-9_-] identifier
        user_id: String,
        /// Photo containing exactly one face
        image: PathBuf,
    },
    /// Identify the face in a photo
    Recognize {
        image: PathBuf,
    },
    /// Delete a registered face
    Delete {
        user_id: String,
    },
    /// Show daemon health and registered user count
    Status,
    /// Run detection and encoding locally, bypassing the daemon
    Test {
        image: PathBuf,
        /// Directory containing det_10g.onnx and w600k_r50.onnx
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Register { user_id, image } => {
            let body = json!({
                "user_id": UserId::parse(&user_id)?,
                "image": encode_image_file(&image)?,
            });
            let req = client.post(endpoint(&cli.server, "/api/face/register")).json(&body);
            print_response(req).await?;
        }
        Commands::Recognize { image } => {
            let body = json!({ "image": encode_image_file(&image)? });
            let req = client.post(endpoint(&cli.server, "/api/face/recognize")).json(&body);
            print_response(req).await?;
        }
        Commands::Delete { user_id } => {
            let user_id = UserId::parse(&user_id)?;
            let req = client.delete(endpoint(&cli.server, &format!("/api/face/delete/{user_id}")));
            print_response(req).await?;
        }
        Commands::Status => {
            print_response(client.get(endpoint(&cli.server, "/health"))).await?;
        }
        Commands::Test { image: path, model_dir } => {
            let model_dir = model_dir.unwrap_or_else(faceprint_core::default_model_dir);
            println!("Loading models from {}", model_dir.display());
            let mut encoder = OnnxFaceEncoder::load(&model_dir)?;

            let img = image::open(&path)
                .with_context(|| format!("opening {}", path.display()))?
                .to_rgb8();
            let start = std::time::Instant::now();
            let embeddings = encoder.detect_and_encode(&img)?;
            println!(
                "{} face(s) detected in {}x{} image ({:.1} ms)",
                embeddings.len(),
                img.width(),
                img.height(),
                start.elapsed().as_secs_f64() * 1000.0
            );
            for (i, embedding) in embeddings.iter().enumerate() {
                let preview: Vec<String> =
                    embedding.values.iter().take(4).map(|v| format!("{v:.4}")).collect();
                println!("  face {i}: {}-d [{}, ...]", embedding.dim(), preview.join(", "));
            }
        }
    }

    Ok(())
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}{path}", server.trim_end_matches('/'))
}

fn encode_image_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Send the request, pretty-print the JSON answer, and fail on non-2xx.
async fn print_response(req: reqwest::RequestBuilder) -> Result<()> {
    let resp = req.send().await.context("faceprintd unreachable")?;
    let status = resp.status();
    tracing::debug!(%status, url = %resp.url(), "response received");
    let body: Value = resp.json().await.context("invalid JSON from faceprintd")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("request failed with HTTP {status}");
    }
    Ok(())
}
