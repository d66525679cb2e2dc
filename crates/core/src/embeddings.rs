use crate::config::EmbeddingConfig;
use crate::coordinator::AccessCoordinator;
use crate::error::{CoreError, CoreResult};
use futures::stream::{self, StreamExt};
use providers::{EmbeddingProvider, ProviderError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROBE_TEXT: &str = "embedding capability probe";
/// Load-lock key for embedding model loads and probes.
pub const EMBEDDING_MODEL_TYPE: &str = "embedding";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelProbe {
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub text: String,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchEmbedResult {
    pub results: Vec<EmbeddedItem>,
    pub errors: Vec<BatchError>,
    pub stats: BatchStats,
    /// Model every vector in `results` came from.
    pub model: Option<String>,
}

/// Turns text into vectors through the shared backend, bounded by the coordinator.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingProvider>,
    coordinator: Arc<AccessCoordinator>,
    cfg: EmbeddingConfig,
    active_model: Arc<RwLock<Option<String>>>,
    probe: Arc<Mutex<Option<ModelProbe>>>,
    readiness: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    shut_down: AtomicBool,
    next_request: AtomicU64,
}

/// Counts a call as in flight until dropped.
struct InFlight {
    count: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>, drained: &Arc<Notify>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self {
            count: Arc::clone(count),
            drained: Arc::clone(drained),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_one();
        }
    }
}

impl EmbeddingService {
    pub fn new(
        backend: Arc<dyn EmbeddingProvider>,
        coordinator: Arc<AccessCoordinator>,
        cfg: EmbeddingConfig,
    ) -> Self {
        Self {
            backend,
            coordinator,
            cfg,
            active_model: Arc::new(RwLock::new(None)),
            probe: Arc::new(Mutex::new(None)),
            readiness: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            shut_down: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn coordinator(&self) -> &Arc<AccessCoordinator> {
        &self.coordinator
    }

    /// Model most recently announced by the backend or seen in a response.
    pub fn active_model(&self) -> Option<String> {
        self.active_model.read().ok().and_then(|m| m.clone())
    }

    fn set_active_model(&self, model: &str) {
        if let Ok(mut current) = self.active_model.write() {
            if current.as_deref() != Some(model) {
                *current = Some(model.to_string());
            }
        }
    }

    /// Embeds one text, holding an inference slot per attempt.
    ///
    /// Transient backend failures are retried with exponential backoff; the
    /// slot is released before each backoff sleep. A full wait queue is not
    /// retried.
    pub async fn embed_text(&self, text: &str) -> CoreResult<EmbeddingVector> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutDown);
        }
        let _in_flight = InFlight::enter(&self.in_flight, &self.drained);
        let request_id = format!("embed-{}", self.next_request.fetch_add(1, Ordering::Relaxed));

        let mut attempt: u32 = 0;
        loop {
            let slot = self.coordinator.acquire_inference_slot(&request_id).await?;
            let result = self.backend.generate_embedding(text).await;
            slot.release();

            match result {
                Ok(resp) => {
                    self.set_active_model(&resp.model);
                    return Ok(EmbeddingVector {
                        vector: resp.embedding,
                        model: resp.model,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let delay = Duration::from_millis(
                        self.cfg.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)),
                    );
                    attempt += 1;
                    warn!(
                        request_id = %request_id,
                        attempt,
                        max_retries = self.cfg.max_retries,
                        error = %e,
                        "embedding failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Like [`embed_text`](Self::embed_text), but abandons the call after `timeout`.
    ///
    /// The backend future is dropped on expiry, which releases its slot.
    pub async fn embed_text_with_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> CoreResult<EmbeddingVector> {
        tokio::time::timeout(timeout, self.embed_text(text))
            .await
            .map_err(|_| CoreError::Timeout(timeout.as_millis() as u64))?
    }

    pub async fn embed_text_cancellable(
        &self,
        text: &str,
        token: &CancellationToken,
    ) -> CoreResult<EmbeddingVector> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CoreError::Cancelled),
            result = self.embed_text(text) => result,
        }
    }

    /// Embeds a probe string to learn the active model and its dimensionality.
    ///
    /// Cached until the backend announces a different model. Runs under the
    /// embedding load lock, so concurrent callers share a single probe.
    pub async fn probe_model(&self) -> CoreResult<ModelProbe> {
        if let Some(cached) = self.cached_probe() {
            return Ok(cached);
        }
        let _load = self.coordinator.acquire_load_lock(EMBEDDING_MODEL_TYPE).await;
        if let Some(cached) = self.cached_probe() {
            return Ok(cached);
        }
        let out = self
            .embed_text_with_timeout(PROBE_TEXT, Duration::from_millis(self.cfg.probe_timeout_ms))
            .await?;
        let probe = ModelProbe {
            model: out.model,
            dimensions: out.vector.len(),
        };
        if let Ok(mut cached) = self.probe.lock() {
            *cached = Some(probe.clone());
        }
        info!(model = %probe.model, dimensions = probe.dimensions, "embedding model probed");
        Ok(probe)
    }

    fn cached_probe(&self) -> Option<ModelProbe> {
        self.probe.lock().ok().and_then(|p| p.clone())
    }

    /// Embeds every item; individual failures never abort the batch.
    ///
    /// The first successful item (in input order) fixes the batch's model and
    /// dimensionality. Later items from a different model or with a different
    /// length are reported as per-item errors rather than mixed into results.
    pub async fn batch_embed_texts(&self, items: Vec<BatchItem>) -> BatchEmbedResult {
        let concurrency = self.coordinator.max_concurrent();
        let outcomes: Vec<(String, CoreResult<EmbeddingVector>)> = stream::iter(items)
            .map(|item| async move {
                let result = self.embed_text(&item.text).await;
                (item.id, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut batch = BatchEmbedResult::default();
        let mut expected_dim: Option<usize> = None;
        for (id, outcome) in outcomes {
            let checked = outcome.and_then(|out| {
                if out.vector.is_empty() {
                    return Err(CoreError::Provider(ProviderError::RequestFailed(
                        "backend returned an empty embedding".into(),
                    )));
                }
                match (&batch.model, expected_dim) {
                    (Some(model), _) if *model != out.model => Err(CoreError::ModelMismatch {
                        expected: model.clone(),
                        actual: out.model,
                    }),
                    (_, Some(dim)) if dim != out.vector.len() => {
                        Err(CoreError::DimensionMismatch {
                            expected: dim,
                            actual: out.vector.len(),
                        })
                    }
                    _ => Ok(out),
                }
            });

            match checked {
                Ok(out) => {
                    if batch.model.is_none() {
                        batch.model = Some(out.model.clone());
                        expected_dim = Some(out.vector.len());
                    }
                    batch.results.push(EmbeddedItem {
                        id,
                        vector: out.vector,
                        model: out.model,
                    });
                }
                Err(e) => {
                    debug!(id = %id, error = %e, "batch item failed");
                    batch.errors.push(BatchError {
                        id,
                        message: e.to_string(),
                    });
                }
            }
        }
        batch.stats = BatchStats {
            successful: batch.results.len(),
            failed: batch.errors.len(),
        };
        if batch.stats.failed > 0 {
            warn!(
                successful = batch.stats.successful,
                failed = batch.stats.failed,
                "batch embedding finished with failures"
            );
        }
        batch
    }

    /// Starts listening for backend model announcements.
    ///
    /// Returns false when the backend does not emit them. Must be called from
    /// within a tokio runtime.
    pub fn attach_readiness(&self) -> bool {
        let Some(mut rx) = self.backend.subscribe_models() else {
            return false;
        };
        let active_model = Arc::clone(&self.active_model);
        let probe = Arc::clone(&self.probe);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ready) => {
                        info!(model = %ready.model, "embedding model ready");
                        if let Ok(mut current) = active_model.write() {
                            *current = Some(ready.model);
                        }
                        if let Ok(mut cached) = probe.lock() {
                            *cached = None;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed model readiness notifications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Ok(mut slot) = self.readiness.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        true
    }

    /// Detaches the readiness listener and waits (bounded) for in-flight calls.
    ///
    /// Safe to call repeatedly and when no listener was attached.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.readiness.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }

        let drain = async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                self.drained.notified().await;
            }
        };
        let limit = Duration::from_millis(self.cfg.shutdown_drain_ms);
        if tokio::time::timeout(limit, drain).await.is_err() {
            warn!(
                in_flight = self.in_flight.load(Ordering::SeqCst),
                "embedding shutdown gave up waiting for in-flight calls"
            );
        } else {
            info!("embedding service shut down");
        }
    }
}
