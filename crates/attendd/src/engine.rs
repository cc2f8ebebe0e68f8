use attend_core::extractor::{first_face, EmbeddingExtractor, ExtractError};
use attend_core::payload::{self, PayloadError};
use attend_core::Embedding;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("extractor: {0}")]
    Extract(#[from] ExtractError),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread could not be started: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Extract {
        payload: String,
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Decode an image payload and extract the first face's embedding.
    ///
    /// `Ok(None)` means the image decoded but no face was found.
    pub async fn extract(&self, payload: String) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The extractor may block for as long as it likes; requests queue behind
/// it and never stall the async runtime. The thread exits when every
/// handle has been dropped.
pub fn spawn_engine(
    mut extractor: Box<dyn EmbeddingExtractor>,
    expected_dim: Option<usize>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("attend-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { payload, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("extract: caller gone, skipping");
                            continue;
                        }
                        let result = run_extract(extractor.as_mut(), &payload, expected_dim);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}

fn run_extract(
    extractor: &mut dyn EmbeddingExtractor,
    payload: &str,
    expected_dim: Option<usize>,
) -> Result<Option<Embedding>, EngineError> {
    let started = Instant::now();
    let image = payload::decode_image(payload)?;
    let faces = extractor.extract(&image)?;
    let detected = faces.len();
    let face = first_face(faces, expected_dim)?;

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = detected,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extract: done"
    );
    Ok(face)
}
