//! Model availability: check, pull and protocol validation
//!
//! Checking and pulling are kept apart: `check_availability` and
//! `validate_protocol` only read, `ensure_available` is the one call that may
//! start a download on the backend.
//!
//! # Pull coordination
//!
//! ```text
//! ensure_available(m) ──┐
//!                       ├─► pulls[(root, m)] ─► check ─► pull ─► poll ─► status
//! ensure_available(m) ──┘        (shared future: one pull, one result)
//! ```
//!
//! Concurrent callers for the same model on the same server join the
//! in-flight pull instead of issuing a second one. Each pull runs in its own
//! task, so it finishes and removes its map entry even when every caller
//! stops waiting. The whole pull, checks and handshake included, is bounded
//! by the first caller's `max_wait`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendClient, BackendConfig, BackendError, ChatMessage, ModelUnavailableError,
    UnavailableReason,
};
use crate::metrics::{AVAILABILITY_CHECKS, MODEL_PULLS};

/// Where a model stands with respect to pulling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PullState {
    /// Absent and nobody is pulling it
    Idle,
    /// A pull issued through this manager is in flight
    Pulling,
    /// The backend could not be reached
    Failed,
    /// Present and ready to serve
    Ready,
}

/// Result of one availability check; recomputed on every check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub model_name: String,
    pub present: bool,
    pub last_checked_at: DateTime<Utc>,
    pub pull_state: PullState,
}

/// Polling schedule used while waiting for a pull
///
/// The delay before poll `n` is `min(base * 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl PollBackoff {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        }
    }
}

type PullKey = (String, String);
type PullFuture = Shared<BoxFuture<'static, Result<ModelStatus, ModelUnavailableError>>>;

/// Checks, pulls and validates models on backends
///
/// Cheap to clone; clones share the in-flight pull table.
#[derive(Clone)]
pub struct ModelAvailabilityManager {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    backoff: PollBackoff,
    pulls: Mutex<HashMap<PullKey, PullFuture>>,
}

impl Default for ModelAvailabilityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelAvailabilityManager {
    pub fn new() -> Self {
        Self::with_backoff(PollBackoff::default())
    }

    pub fn with_backoff(backoff: PollBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                backoff,
                pulls: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn backoff(&self) -> PollBackoff {
        self.inner.backoff
    }

    /// Probe whether the backend's configured model is present
    ///
    /// Never fails: an unreachable backend yields `present = false` with
    /// `PullState::Failed`.
    pub async fn check_availability(&self, backend: &Arc<BackendConfig>) -> ModelStatus {
        self.check_model(backend, backend.model_name()).await
    }

    /// Probe whether `model` is present on `backend`
    pub async fn check_model(&self, backend: &Arc<BackendConfig>, model: &str) -> ModelStatus {
        let in_flight = self.is_pulling(backend, model);
        let client = self.client(backend);

        let (present, pull_state) = match client.list_models().await {
            Ok(ids) => {
                let present = ids.iter().any(|id| model_matches(id, model));
                let state = if present {
                    PullState::Ready
                } else if in_flight {
                    PullState::Pulling
                } else {
                    PullState::Idle
                };
                AVAILABILITY_CHECKS
                    .with_label_values(&[model, if present { "present" } else { "absent" }])
                    .inc();
                (present, state)
            }
            Err(e) => {
                warn!(backend = %backend.id(), model, error = %e, "Availability check failed");
                AVAILABILITY_CHECKS
                    .with_label_values(&[model, "unreachable"])
                    .inc();
                (false, PullState::Failed)
            }
        };

        ModelStatus {
            model_name: model.to_string(),
            present,
            last_checked_at: Utc::now(),
            pull_state,
        }
    }

    /// Make sure `model` is present, pulling it if needed
    ///
    /// Polls with [`PollBackoff`] until the model is listed or `max_wait`
    /// elapses. A caller that arrives while a pull for the same model is in
    /// flight joins it (the first caller's `max_wait` governs) and receives
    /// the same final status.
    pub async fn ensure_available(
        &self,
        backend: &Arc<BackendConfig>,
        model: &str,
        max_wait: Duration,
    ) -> Result<ModelStatus, ModelUnavailableError> {
        let key = pull_key(backend, model);

        let pull = {
            let mut pulls = self.inner.pulls.lock().unwrap_or_else(PoisonError::into_inner);
            match pulls.get(&key) {
                Some(existing) => {
                    debug!(backend = %backend.id(), model, "Joining in-flight pull");
                    existing.clone()
                }
                None => {
                    // The entry is inserted before the task can take the lock to remove it
                    let task = tokio::spawn(self.clone().acquire(
                        backend.clone(),
                        model.to_string(),
                        max_wait,
                        key.clone(),
                    ));
                    let (backend_id, model_name) = (backend.id().to_string(), model.to_string());
                    let fut = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ModelUnavailableError {
                                backend: backend_id,
                                model: model_name,
                                reason: UnavailableReason::PullFailed {
                                    detail: format!("pull task ended abnormally: {}", e),
                                },
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    pulls.insert(key, fut.clone());
                    fut
                }
            }
        };

        pull.await
    }

    /// Send a minimal generation request and check the reply's shape
    ///
    /// Distinguishes an incompatible backend (`ProtocolMismatch`) from an
    /// unreachable one (`Connectivity`).
    pub async fn validate_protocol(&self, backend: &Arc<BackendConfig>) -> Result<(), BackendError> {
        let messages = [ChatMessage::user("Reply with one word: ready")];
        let reply = self.client(backend).chat_once(&messages, Some(16), None).await?;
        debug!(backend = %backend.id(), reply_len = reply.len(), "Protocol validated");
        Ok(())
    }

    /// Whether a pull for `model` on this backend is in flight
    pub fn is_pulling(&self, backend: &BackendConfig, model: &str) -> bool {
        self.inner
            .pulls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&pull_key(backend, model))
    }

    async fn acquire(
        self,
        backend: Arc<BackendConfig>,
        model: String,
        max_wait: Duration,
        key: PullKey,
    ) -> Result<ModelStatus, ModelUnavailableError> {
        let _claim = PullClaim {
            inner: self.inner.clone(),
            key: Some(key),
        };
        let start = Instant::now();

        match tokio::time::timeout(max_wait, self.drive_pull(&backend, &model, max_wait, start))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(&backend, &model, start.elapsed())),
        }
    }

    async fn drive_pull(
        &self,
        backend: &Arc<BackendConfig>,
        model: &str,
        max_wait: Duration,
        start: Instant,
    ) -> Result<ModelStatus, ModelUnavailableError> {
        let status = self.check_model(backend, model).await;
        if status.present {
            return Ok(status);
        }

        info!(backend = %backend.id(), model, "Model not present, requesting pull");
        let unavailable = |reason| ModelUnavailableError {
            backend: backend.id().to_string(),
            model: model.to_string(),
            reason,
        };

        let progress = match self.client(backend).pull_model(model).await {
            Ok(progress) => progress,
            Err(e) => {
                MODEL_PULLS.with_label_values(&[model, "failed"]).inc();
                return Err(unavailable(UnavailableReason::PullFailed {
                    detail: e.to_string(),
                }));
            }
        };
        // The download runs server-side; this task only watches for a reported error
        let mut pull_task = Some(tokio::spawn(progress.finish()));

        let mut attempt = 0u32;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= max_wait {
                return Err(self.timed_out(backend, model, elapsed));
            }

            let delay = self.inner.backoff.delay_for(attempt).min(max_wait - elapsed);
            tokio::time::sleep(delay).await;

            if pull_task.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = pull_task.take() {
                    if let Ok(Err(detail)) = handle.await {
                        warn!(backend = %backend.id(), model, error = %detail, "Backend reported pull failure");
                        MODEL_PULLS.with_label_values(&[model, "failed"]).inc();
                        return Err(unavailable(UnavailableReason::PullFailed { detail }));
                    }
                }
            }

            let status = self.check_model(backend, model).await;
            if status.present {
                info!(backend = %backend.id(), model, elapsed_ms = start.elapsed().as_millis() as u64, "Model ready");
                MODEL_PULLS.with_label_values(&[model, "ready"]).inc();
                return Ok(status);
            }
            attempt += 1;
        }
    }

    fn timed_out(
        &self,
        backend: &BackendConfig,
        model: &str,
        waited: Duration,
    ) -> ModelUnavailableError {
        warn!(backend = %backend.id(), model, waited_ms = waited.as_millis() as u64, "Pull timed out");
        MODEL_PULLS.with_label_values(&[model, "timeout"]).inc();
        ModelUnavailableError {
            backend: backend.id().to_string(),
            model: model.to_string(),
            reason: UnavailableReason::Timeout { waited },
        }
    }

    fn client(&self, backend: &Arc<BackendConfig>) -> BackendClient {
        BackendClient::with_http(self.inner.http.clone(), backend.clone())
    }
}

/// Releases a pull's table entry however the pull task ends
struct PullClaim {
    inner: Arc<Inner>,
    key: Option<PullKey>,
}

impl Drop for PullClaim {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner
                .pulls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

fn pull_key(backend: &BackendConfig, model: &str) -> PullKey {
    (backend.native_root().to_string(), model.to_string())
}

/// `name` and `name:latest` refer to the same model
pub fn model_matches(listed: &str, wanted: &str) -> bool {
    fn strip_latest(name: &str) -> &str {
        name.strip_suffix(":latest").unwrap_or(name)
    }
    listed == wanted || strip_latest(listed) == strip_latest(wanted)
}
