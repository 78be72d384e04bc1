//! Background image optimisation.
//!
//! Decoding and resizing a 12-megapixel phone photo takes long enough to
//! stall an interactive front end. [`ImageOptimizer`] moves that work to a
//! dedicated thread. Requests and responses are plain messages: each request
//! carries a correlation id, the worker echoes it back, and a small dispatcher
//! task routes each response to the caller waiting on that id.
//!
//! There is no queue management and no cancellation; a caller that stops
//! waiting simply never reads its response.

use crate::error::DocuLatexError;
use crate::pipeline::raster::{optimize_image, PageImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub struct OptimizeRequest {
    pub id: u64,
    pub name: String,
    pub bytes: Vec<u8>,
}

pub struct OptimizeResponse {
    pub id: u64,
    pub result: Result<PageImage, DocuLatexError>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<PageImage, DocuLatexError>>>>>;

/// The thread side: decode, downscale, re-encode, reply.
pub struct OptimizerWorker {
    receiver: mpsc::UnboundedReceiver<OptimizeRequest>,
    responses: mpsc::UnboundedSender<OptimizeResponse>,
    max_width: u32,
    quality: u8,
}

impl OptimizerWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<OptimizeRequest>,
        responses: mpsc::UnboundedSender<OptimizeResponse>,
        max_width: u32,
        quality: u8,
    ) -> Self {
        Self {
            receiver,
            responses,
            max_width,
            quality,
        }
    }

    /// Blocking loop; returns when every request sender is gone.
    pub fn run(mut self) {
        info!("Image optimizer started");
        while let Some(req) = self.receiver.blocking_recv() {
            let span = tracing::debug_span!("optimize", id = req.id, file = %req.name);
            let _guard = span.enter();

            let result = optimize_image(&req.bytes, self.max_width, self.quality)
                .map_err(|e| DocuLatexError::file(&req.name, e));
            debug!(ok = result.is_ok(), "optimized");

            if self
                .responses
                .send(OptimizeResponse { id: req.id, result })
                .is_err()
            {
                break;
            }
        }
        info!("Image optimizer stopped: channel closed");
    }
}

/// Handle to the optimiser thread.
pub struct ImageOptimizer {
    requests: mpsc::UnboundedSender<OptimizeRequest>,
    pending: Pending,
    next_id: AtomicU64,
}

impl ImageOptimizer {
    /// Start the worker thread and its response dispatcher.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn spawn(max_width: u32, quality: u8) -> Result<Self, DocuLatexError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DocuLatexError::Internal(format!("image optimizer needs a runtime: {e}")))?;

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<OptimizeResponse>();

        let worker = OptimizerWorker::new(req_rx, resp_tx, max_width, quality);
        std::thread::Builder::new()
            .name("image-optimizer".into())
            .spawn(move || worker.run())
            .map_err(|e| DocuLatexError::Internal(format!("spawn image optimizer: {e}")))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::clone(&pending);
        runtime.spawn(async move {
            while let Some(resp) = resp_rx.recv().await {
                let waiter = routes.lock().ok().and_then(|mut m| m.remove(&resp.id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp.result);
                    }
                    None => warn!("Dropping optimizer response {} with no waiter", resp.id),
                }
            }
        });

        Ok(Self {
            requests: req_tx,
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    /// Optimise one image on the worker thread and wait for its response.
    pub async fn optimize(&self, name: &str, bytes: Vec<u8>) -> Result<PageImage, DocuLatexError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| DocuLatexError::Internal("optimizer map poisoned".into()))?
            .insert(id, tx);

        let request = OptimizeRequest {
            id,
            name: name.to_string(),
            bytes,
        };
        if self.requests.send(request).is_err() {
            if let Ok(mut m) = self.pending.lock() {
                m.remove(&id);
            }
            return Err(DocuLatexError::Internal("image optimizer stopped".into()));
        }

        rx.await
            .map_err(|_| DocuLatexError::Internal("image optimizer dropped a request".into()))?
    }
}
