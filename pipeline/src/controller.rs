//! Start/stop lifecycle of the capture loop.
//!
//! At most one capture thread owns the camera at a time. `stop` only
//! cancels; the thread finishes its current iteration, releases the device
//! and exits on its own. A later `start` spawns the next generation, whose
//! thread first joins every retiring predecessor before opening the device,
//! so two generations never hold the camera together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureLoop;
use crate::shared::SharedFrameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycleState {
    Stopped,
    Running,
}

/// What a `start`/`stop` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handed to stream consumers; cancelled when the generation they attached
/// to stops.
#[derive(Debug, Clone)]
pub struct StreamTicket {
    pub generation: u64,
    pub token: CancellationToken,
}

struct ActiveLoop {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    generation: u64,
    active: Option<ActiveLoop>,
    /// Threads of stopped generations that may still be releasing the camera.
    retiring: Vec<JoinHandle<()>>,
}

struct Inner {
    capture: Arc<CaptureLoop>,
    shared: Arc<SharedFrameState>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called from a capture thread whose loop ended on its own.
    fn loop_ended(&self, generation: u64) {
        let mut lc = self.lock();
        let current = lc.active.as_ref().is_some_and(|a| a.generation == generation);
        if !current {
            return;
        }
        if let Some(active) = lc.active.take() {
            active.token.cancel();
            lc.retiring.push(active.handle);
        }
        self.running.store(false, Ordering::Release);
        warn!(generation, "capture loop exited, stream state reset to stopped");
    }
}

/// Join retired capture threads that have already exited, logging any that
/// panicked. Returns how many panicked.
fn reap_finished(retiring: &mut Vec<JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    let (finished, running): (Vec<_>, Vec<_>) =
        std::mem::take(retiring).into_iter().partition(|h| h.is_finished());
    for handle in finished {
        if handle.join().is_err() {
            error!("retired capture thread panicked");
            panicked += 1;
        }
    }
    *retiring = running;
    panicked
}

/// Owns the lifecycle state and the shared frame state for one camera.
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<Inner>,
}

impl StreamController {
    pub fn new(capture: CaptureLoop, shared: Arc<SharedFrameState>) -> Self {
        Self {
            inner: Arc::new(Inner {
                capture: Arc::new(capture),
                shared,
                lifecycle: Mutex::new(Lifecycle::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn shared(&self) -> &Arc<SharedFrameState> {
        &self.inner.shared
    }

    pub fn state(&self) -> StreamLifecycleState {
        if self.is_running() {
            StreamLifecycleState::Running
        } else {
            StreamLifecycleState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Spawn a capture loop unless one is already running. Never blocks on
    /// the camera.
    pub fn start(&self) -> Result<Transition, ControllerError> {
        let mut lc = self.inner.lock();
        if lc.active.is_some() {
            debug!(generation = lc.generation, "start requested while running");
            return Ok(Transition::AlreadyRunning);
        }

        let generation = lc.generation + 1;
        let token = CancellationToken::new();
        reap_finished(&mut lc.retiring);
        let predecessors = std::mem::take(&mut lc.retiring);

        let inner = Arc::clone(&self.inner);
        let thread_token = token.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{generation}"))
            .spawn(move || {
                for handle in predecessors {
                    if handle.join().is_err() {
                        error!(generation, "previous capture thread panicked");
                    }
                }
                if thread_token.is_cancelled() {
                    debug!(generation, "stopped before the camera was opened");
                    return;
                }
                if inner.capture.run(&thread_token).is_err() {
                    inner.loop_ended(generation);
                }
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, generation, "failed to spawn capture thread");
                return Err(ControllerError::Spawn(e));
            }
        };

        lc.generation = generation;
        lc.active = Some(ActiveLoop {
            generation,
            token,
            handle,
        });
        self.inner.running.store(true, Ordering::Release);
        info!(generation, "stream started");
        Ok(Transition::Started)
    }

    /// Signal the running loop to stop. Returns without waiting for it.
    pub fn stop(&self) -> Transition {
        let mut lc = self.inner.lock();
        let Some(active) = lc.active.take() else {
            debug!("stop requested while stopped");
            return Transition::AlreadyStopped;
        };
        active.token.cancel();
        lc.retiring.push(active.handle);
        self.inner.running.store(false, Ordering::Release);
        info!(generation = active.generation, "stream stopped");
        Transition::Stopped
    }

    /// Ticket for a new stream consumer, or `None` while stopped.
    pub fn ticket(&self) -> Option<StreamTicket> {
        let lc = self.inner.lock();
        lc.active
            .as_ref()
            .filter(|a| !a.token.is_cancelled())
            .map(|a| StreamTicket {
                generation: a.generation,
                token: a.token.clone(),
            })
    }

    /// Stop and wait up to `timeout` for every capture thread to release
    /// the camera. Returns `false` if some thread was still running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();
        let handles = std::mem::take(&mut self.inner.lock().retiring);
        if handles.is_empty() {
            return true;
        }
        let join = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        });
        match tokio::time::timeout(timeout, join).await {
            Ok(_) => {
                info!("capture threads finished");
                true
            }
            Err(_) => {
                warn!(?timeout, "capture thread still running at shutdown");
                false
            }
        }
    }
}
