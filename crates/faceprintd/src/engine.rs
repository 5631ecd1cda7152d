use faceprint_core::{decode_base64_image, DecodeError, Embedding, EncoderError, FaceEncoder};
use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Encoder(#[from] EncoderError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("face encoder panicked: {0}")]
    Panicked(String),
}

/// Decoded image plus one embedding per detected face, most confident first.
pub struct Encoded {
    pub image: RgbImage,
    pub embeddings: Vec<Embedding>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        payload: String,
        reply: oneshot::Sender<Result<Encoded, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode a base64 image and run face detection + embedding on it.
    pub async fn encode(&self, payload: String) -> Result<Encoded, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Run the encoder on a dedicated OS thread.
///
/// Model inference is CPU-bound and needs `&mut` access, so requests are
/// queued and processed one at a time off the async runtime.
pub fn spawn_engine(mut encoder: Box<dyn FaceEncoder>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("faceprint-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { payload, reply } => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_encode(encoder.as_mut(), &payload)
                        }))
                        .unwrap_or_else(|cause| {
                            let reason = panic_message(cause.as_ref());
                            tracing::error!(%reason, "face encoder panicked");
                            Err(EngineError::Panicked(reason))
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_encode(encoder: &mut dyn FaceEncoder, payload: &str) -> Result<Encoded, EngineError> {
    let image = decode_base64_image(payload)?;
    tracing::debug!(width = image.width(), height = image.height(), "image decoded");

    let embeddings = encoder.detect_and_encode(&image)?;
    Ok(Encoded { image, embeddings })
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    cause
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| cause.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
