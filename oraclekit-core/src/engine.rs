//! Background polling task.
//!
//! One iteration mints a token, GETs the endpoint and publishes
//! `"<body>@<HH:MM:SS>"`, then sleeps for the configured interval. Only the
//! sleep observes the stop signal, so an iteration that has started always
//! completes and publishes. Iterations never overlap, including those run
//! on demand through [`PollingEngine::poll_once`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::OracleKitError;
use crate::http_request::Request;
use crate::identity::DeviceIdentity;
use crate::status::StatusChannel;
use crate::storage::SecureStore;

/// Raw-namespace entry holding the latest poll result.
pub const RESULT_ENTRY: &str = "result";
/// Raw-namespace entry holding epoch millis of the last successful poll.
pub const LAST_SYNC_ENTRY: &str = "lastSync";

/// Lifecycle of a [`PollingEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum EngineState {
    /// Never started.
    Idle,
    /// The polling task is active.
    Running,
    /// Stop was requested and the task is finishing its current iteration.
    Suspended,
    /// The task has exited. The engine can be started again.
    Terminated,
}

/// Everything one poll iteration needs.
pub(crate) struct PollContext {
    pub(crate) request: Arc<Request>,
    pub(crate) identity: Arc<DeviceIdentity>,
    pub(crate) store: Arc<SecureStore>,
    pub(crate) status: Arc<StatusChannel>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) endpoint: String,
    pub(crate) interval: Duration,
}

impl PollContext {
    /// Runs one iteration and returns the published result.
    pub(crate) async fn poll_once(&self) -> String {
        let body = match self.identity.mint_token(self.clock.now_millis()) {
            Ok(token) => match self.request.get_authorized(&self.endpoint, &token).await {
                Ok(reply) => {
                    if reply.is_success() {
                        self.record_sync();
                    } else {
                        log::warn!("poll returned status {}", reply.status);
                    }
                    reply.body.trim_end_matches(['\r', '\n']).to_string()
                }
                Err(err) => {
                    log::warn!("poll failed: {err}");
                    err.to_string()
                }
            },
            Err(err) => {
                log::error!("could not mint auth token, skipping request: {err}");
                err.to_string()
            }
        };

        let result = format!("{body}@{}", self.clock.time_of_day());
        self.status.publish(result.clone());
        if let Err(err) = self.store.set_raw(RESULT_ENTRY, &result) {
            log::warn!("failed to persist poll result: {err}");
        }
        result
    }

    fn record_sync(&self) {
        if let Err(err) = self
            .store
            .set_raw(LAST_SYNC_ENTRY, &self.clock.now_millis().to_string())
        {
            log::warn!("failed to persist last sync time: {err}");
        }
    }
}

/// Owns at most one polling task.
pub struct PollingEngine {
    ctx: Arc<PollContext>,
    iteration: Arc<tokio::sync::Mutex<()>>,
    state: Arc<watch::Sender<EngineState>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PollingEngine {
    pub(crate) fn new(ctx: PollContext) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            ctx: Arc::new(ctx),
            iteration: Arc::new(tokio::sync::Mutex::new(())),
            state: Arc::new(state),
            shutdown: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Spawns the polling task on the current Tokio runtime.
    ///
    /// Returns `false` without spawning if a task is already running or
    /// draining.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::RuntimeUnavailable`] when called outside a
    /// Tokio runtime.
    pub fn start(&self) -> Result<bool, OracleKitError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            OracleKitError::RuntimeUnavailable {
                message: err.to_string(),
            }
        })?;

        let mut shutdown = self.shutdown_slot();
        let started = self.state.send_if_modified(|state| match state {
            EngineState::Idle | EngineState::Terminated => {
                *state = EngineState::Running;
                true
            }
            EngineState::Running | EngineState::Suspended => false,
        });
        if !started {
            log::debug!("polling engine already running");
            return Ok(false);
        }

        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);
        runtime.spawn(run(
            Arc::clone(&self.ctx),
            Arc::clone(&self.iteration),
            Arc::clone(&self.state),
            rx,
        ));
        log::info!("polling {} every {:?}", self.ctx.endpoint, self.ctx.interval);
        Ok(true)
    }

    /// Requests the task to stop before its next request.
    ///
    /// A sleeping task exits immediately; a task with a request in flight
    /// finishes that iteration first. Does nothing if no task is running.
    pub fn stop(&self) {
        let shutdown = self.shutdown_slot();
        let stopping = self.state.send_if_modified(|state| {
            if *state == EngineState::Running {
                *state = EngineState::Suspended;
                true
            } else {
                false
            }
        });
        if let Some(tx) = shutdown.as_ref() {
            tx.send_replace(true);
        }
        if stopping {
            log::info!("polling engine stopping");
        }
    }

    /// Waits until no task is running.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        if rx
            .wait_for(|state| matches!(state, EngineState::Idle | EngineState::Terminated))
            .await
            .is_err()
        {
            log::warn!("engine state channel closed");
        }
    }

    /// Runs one iteration now. If the background task is mid-request, waits
    /// for that iteration to finish first.
    pub async fn poll_once(&self) -> String {
        let _iteration = self.iteration.lock().await;
        self.ctx.poll_once().await
    }

    fn shutdown_slot(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.shutdown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    ctx: Arc<PollContext>,
    iteration: Arc<tokio::sync::Mutex<()>>,
    state: Arc<watch::Sender<EngineState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        {
            let _iteration = iteration.lock().await;
            ctx.poll_once().await;
        }
        tokio::select! {
            () = tokio::time::sleep(ctx.interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    state.send_replace(EngineState::Terminated);
    log::info!("polling engine terminated");
}
