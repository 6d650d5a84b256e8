use rollcall_core::{
    EmbeddingExtractor, EnrollError, EnrollmentService, Identity, RecognitionOutcome,
    RecognitionService, RecognizeError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("enroll: {0}")]
    Enroll(#[from] EnrollError),
    #[error("recognize: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: Identity,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<(), EnrollError>>,
    },
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RecognitionOutcome, RecognizeError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll one photo for an identity.
    pub async fn enroll(&self, identity: Identity, image: Vec<u8>) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { identity, image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }

    /// Recognize every face in a photo against the gallery.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognitionOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The ONNX session is neither cheap to share nor `Sync`, so every
/// extractor pass funnels through this one thread; requests queue behind
/// a small channel. The extractor is loaded by the caller beforehand,
/// keeping resource failures at startup rather than at first request.
pub fn spawn_engine<X>(
    mut extractor: X,
    enroller: EnrollmentService,
    recognizer: RecognitionService,
) -> EngineHandle
where
    X: EmbeddingExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { identity, image, reply } => {
                        let result = enroller.enroll(&mut extractor, &identity, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let result = recognizer.recognize(&mut extractor, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
