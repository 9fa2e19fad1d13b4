//! Extraction engine: a pool of OS threads, each owning one extractor.
//!
//! Async callers submit image buffers through a bounded queue and await the
//! descriptor on a oneshot channel. A caller-side deadline covers both the
//! queue wait and the inference itself.

use crate::extractor::{ExtractError, Extractor};
use crate::types::Descriptor;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine workers exited")]
    ChannelClosed,
    #[error("failed to spawn engine worker: {0}")]
    Spawn(std::io::Error),
}

/// One unit of work for a worker thread.
struct ExtractRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Descriptor, ExtractError>>,
}

/// Clone-safe handle to the engine workers.
#[derive(Clone)]
pub struct EngineHandle {
    tx: async_channel::Sender<ExtractRequest>,
    timeout: Option<Duration>,
}

impl EngineHandle {
    /// Extract a descriptor from `image`, failing with [`EngineError::Timeout`]
    /// once the configured deadline passes.
    ///
    /// The image buffer moves into the request and is freed when the request
    /// is dropped, whether it completed, failed or was abandoned.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ExtractRequest {
            image,
            reply: reply_tx,
        };

        let work = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
            Ok::<Descriptor, EngineError>(result?)
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => work.await,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Spawn `workers` engine threads.
///
/// `load` is called once per worker on the calling thread, so a missing
/// model fails here rather than on the first request.
pub fn spawn_engine<E, F>(
    workers: usize,
    queue_depth: usize,
    timeout: Option<Duration>,
    mut load: F,
) -> Result<EngineHandle, EngineError>
where
    E: Extractor + Send + 'static,
    F: FnMut() -> Result<E, ExtractError>,
{
    let (tx, rx) = async_channel::bounded::<ExtractRequest>(queue_depth.max(1));

    for worker in 0..workers.max(1) {
        let mut extractor = load()?;
        let rx = rx.clone();

        std::thread::Builder::new()
            .name(format!("facewatch-engine-{worker}"))
            .spawn(move || {
                tracing::info!(worker, "engine worker started");
                while let Ok(req) = rx.recv_blocking() {
                    if req.reply.is_closed() {
                        tracing::warn!(worker, "caller gave up before extraction started; skipping");
                        continue;
                    }
                    let result = extractor.extract(&req.image);
                    drop(req.image);
                    let _ = req.reply.send(result);
                }
                tracing::info!(worker, "engine worker exiting");
            })
            .map_err(EngineError::Spawn)?;
    }

    Ok(EngineHandle { tx, timeout })
}
