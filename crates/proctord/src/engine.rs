use proctor_core::{Detector, Embedder, FrameRef, FrameResult, Matcher, Pipeline, PipelineError};
use proctor_hw::Frame;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Pending evaluations beyond this make callers wait for channel capacity.
const ENGINE_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
pub(crate) enum EngineRequest {
    Evaluate {
        frame: Frame,
        reply: oneshot::Sender<Result<FrameResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run detection and evaluation for one decoded frame.
    pub async fn evaluate(&self, frame: Frame) -> Result<FrameResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Evaluate {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move the pipeline onto a dedicated OS thread and return a handle to it.
///
/// ONNX sessions need `&mut` access, so one thread owns them and requests are
/// served in arrival order.
pub fn spawn_engine<D, E, M>(mut pipeline: Pipeline<D, E, M>) -> Result<EngineHandle, EngineError>
where
    D: Detector + Send + 'static,
    E: Embedder + Send + 'static,
    M: Matcher + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("proctor-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Evaluate { frame, reply } => {
                        let started = std::time::Instant::now();
                        let result = pipeline
                            .run(FrameRef::new(&frame.data, frame.width, frame.height))
                            .map_err(EngineError::from);

                        match &result {
                            Ok(r) => tracing::debug!(
                                status = r.status.code(),
                                faces = r.outcomes.len(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "frame evaluated"
                            ),
                            Err(e) => tracing::warn!(error = %e, "frame evaluation failed"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
