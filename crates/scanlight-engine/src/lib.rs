// scanlight-engine/src/lib.rs
// ============================================================
// Capture-scan engine for scanlight
// Owns the camera lifecycle state machine, drives the
// rate-limited sampling loop and routes decode outcomes to
// subscribers.  Public entry point for the presentation layer.
// ------------------------------------------------------------
// Public API:
//   * ScanEngine::new()   – wire gateway + decoder + config
//   * start(device_id) / stop() / scan_static(sample)
//   * on_state_change / subscribe / apply_constraints /
//     toggle_torch / list_devices
// ============================================================

//! scanlight – capture-scan engine
//!
//! The engine coordinates three collaborators: a [`DeviceGateway`]
//! that owns the physical stream, a [`Decoder`] behind the
//! [`DecodeBridge`] seam, and subscribers fed by the
//! [`ResultDispatcher`].  All engine work runs on one logical thread
//! of control: every operation serializes on the engine lock, so the
//! only discipline needed is checking the current state after each
//! suspension point.
//!
//! The sampling loop is a self-perpetuating task: each iteration
//! suspends on a [`TickSource`] yield point, re-checks the capture
//! state (the sole cancellation mechanism), applies the decode-rate
//! throttle and reschedules itself.  A `stop()` arriving while a
//! decode is in flight waits for that attempt to finish; its outcome
//! is dispatched before the stop transition runs, so subscribers never
//! observe an outcome after `Scanning → Ready`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub mod constraints;
pub mod dispatch;
pub mod scheduler;

pub use constraints::ConstraintController;
pub use dispatch::{FeedbackSink, FeedbackState, LogSink, OutcomeSink, ResultDispatcher};
pub use scheduler::{FrameClock, FrameScheduler, ScheduleConfig, TickSource};

pub use scanlight_decode::{
    sample_from_image, Corner, DecodeBridge, DecodeError, DecodeOptions, DecodedItem, Decoder,
    QrDecoder, ScanOutcome, Symbology,
};
pub use scanlight_device::{
    ConstraintSet, ConstraintValue, DeviceError, DeviceGateway, DeviceItem, FrameSample,
    GstGateway, StreamInfo, TORCH,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("device id must not be empty")]
    EmptyDeviceId,
}

/// Camera lifecycle state.  Exactly one value at a time, mutated only
/// through the engine's transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Initializing,
    Ready,
    Starting,
    Scanning,
    Error,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureState::Initializing => "initializing",
            CaptureState::Ready => "ready",
            CaptureState::Starting => "starting",
            CaptureState::Scanning => "scanning",
            CaptureState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Session settings, fixed once scanning starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Decode-attempt cap; the tick cadence is independent of this.
    pub target_rate_hz: f64,
    pub decode_options: DecodeOptions,
    /// Applied at the post-attach handoff, before the loop is armed.
    pub initial_constraints: Option<ConstraintSet>,
    /// How long the hit flash stays lit on the feedback overlay.
    pub feedback_hold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_rate_hz: 12.0,
            decode_options: DecodeOptions::default(),
            initial_constraints: None,
            feedback_hold: Duration::from_millis(1000),
        }
    }
}

struct Inner<G: DeviceGateway, D: Decoder> {
    state: CaptureState,
    // Epoch of the armed session; a stale scheduling chain exits at its
    // next state check, so at most one chain is ever active.
    session: u64,
    gateway: G,
    bridge: DecodeBridge<D>,
    scheduler: FrameScheduler,
    dispatcher: ResultDispatcher,
    constraints: ConstraintController,
    geometry: Option<StreamInfo>,
    on_state: Vec<Box<dyn FnMut(CaptureState) + Send>>,
    target_rate_hz: f64,
    initial_constraints: Option<ConstraintSet>,
}

impl<G: DeviceGateway, D: Decoder> Inner<G, D> {
    /// Every transition notifies hooks exactly once, synchronously,
    /// before any further engine-internal work proceeds.
    fn transition(&mut self, next: CaptureState) {
        debug!(from = %self.state, to = %next, "capture state transition");
        self.state = next;
        for hook in &mut self.on_state {
            hook(next);
        }
    }

    /// Transitions to `next`, then releases the live stream and drops
    /// every piece of session-scoped state: scheduler arm, constraint
    /// set, geometry and presented feedback.  Shared by orderly stops
    /// (`next = Ready`) and session failures (`next = Error`), so no
    /// exit path can leave stale session state behind.
    fn shutdown(&mut self, next: CaptureState) {
        self.transition(next);
        self.gateway.release();
        self.scheduler.disarm();
        self.constraints.reset();
        self.dispatcher.clear();
        self.geometry = None;
    }
}

/// The capture-scan engine.  Cheap to clone; clones share one engine.
pub struct ScanEngine<G: DeviceGateway, D: Decoder, T: TickSource + Clone = FrameClock> {
    inner: Arc<Mutex<Inner<G, D>>>,
    ticks: T,
    feedback: Arc<StdMutex<FeedbackState>>,
}

impl<G: DeviceGateway, D: Decoder, T: TickSource + Clone> Clone for ScanEngine<G, D, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            ticks: self.ticks.clone(),
            feedback: Arc::clone(&self.feedback),
        }
    }
}

impl<G: DeviceGateway, D: Decoder> ScanEngine<G, D, FrameClock> {
    pub fn new(gateway: G, decoder: D, config: EngineConfig) -> Self {
        Self::with_ticks(gateway, decoder, config, FrameClock::default())
    }
}

impl<G: DeviceGateway, D: Decoder, T: TickSource + Clone> ScanEngine<G, D, T> {
    /// Builds the engine with a caller-provided yield point, which is
    /// how tests substitute a deterministic tick source.
    pub fn with_ticks(gateway: G, decoder: D, config: EngineConfig, ticks: T) -> Self {
        let feedback_sink = FeedbackSink::new(config.feedback_hold);
        let feedback = feedback_sink.handle();
        let mut dispatcher = ResultDispatcher::new();
        dispatcher.subscribe(Box::new(feedback_sink));

        let mut inner = Inner {
            state: CaptureState::Initializing,
            session: 0,
            gateway,
            bridge: DecodeBridge::new(decoder, config.decode_options.clone()),
            scheduler: FrameScheduler::new(),
            dispatcher,
            constraints: ConstraintController::new(),
            geometry: None,
            on_state: Vec::new(),
            target_rate_hz: config.target_rate_hz,
            initial_constraints: config.initial_constraints,
        };
        // Engine wired, no device yet.
        inner.transition(CaptureState::Ready);

        Self {
            inner: Arc::new(Mutex::new(inner)),
            ticks,
            feedback,
        }
    }

    /// Registers a state-change hook.  Hooks run synchronously relative
    /// to the transition and are never reordered against it.
    pub async fn on_state_change<F>(&self, hook: F)
    where
        F: FnMut(CaptureState) + Send + 'static,
    {
        self.inner.lock().await.on_state.push(Box::new(hook));
    }

    /// Registers an outcome subscriber behind the built-in feedback sink.
    pub async fn subscribe<S: OutcomeSink + 'static>(&self, sink: S) {
        self.inner.lock().await.dispatcher.subscribe(Box::new(sink));
    }

    /// Starts a capture session on the given device and arms the
    /// sampling loop.  Returns once scanning is armed.
    ///
    /// Calling `start` while already scanning implicitly stops the
    /// prior session first, releasing its stream before the new device
    /// is acquired.
    pub async fn start(&self, device_id: &str) -> Result<(), EngineError> {
        if device_id.is_empty() {
            return Err(EngineError::EmptyDeviceId);
        }
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if inner.state == CaptureState::Scanning {
            debug!(device = device_id, "start while scanning; restarting session");
            inner.shutdown(CaptureState::Ready);
        }
        inner.transition(CaptureState::Starting);

        let granted = match inner.gateway.check_permission().await {
            Ok(granted) => granted,
            Err(e) => {
                inner.transition(CaptureState::Error);
                return Err(e.into());
            }
        };
        if !granted {
            if let Err(e) = inner.gateway.request_permission().await {
                inner.transition(CaptureState::Error);
                return Err(e.into());
            }
        }

        let info = match inner.gateway.acquire(device_id).await {
            Ok(info) => info,
            Err(e) => {
                inner.gateway.release();
                inner.transition(CaptureState::Error);
                return Err(e.into());
            }
        };
        inner.geometry = Some(info);

        // Transient handoff: stream attached and geometry known, loop
        // not yet armed.  Consumers may mount feedback surfaces here;
        // session constraints are pushed now.
        inner.transition(CaptureState::Ready);
        if let Some(initial) = inner.initial_constraints.clone() {
            if let Err(e) = inner.constraints.apply(&mut inner.gateway, &initial) {
                warn!(error = %e, "initial constraints rejected; continuing");
            }
        }

        inner.scheduler.arm(ScheduleConfig::new(inner.target_rate_hz));
        inner.session = inner.session.wrapping_add(1);
        let session = inner.session;
        inner.transition(CaptureState::Scanning);
        drop(guard);

        self.spawn_loop(session);
        Ok(())
    }

    /// Stops the current session.  Idempotent: a no-op unless scanning.
    /// The live stream is released, the scheduler disarmed and presented
    /// feedback retracted before this returns.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;
        if guard.state != CaptureState::Scanning {
            return;
        }
        guard.shutdown(CaptureState::Ready);
    }

    /// One-shot decode of a caller-supplied frame, bypassing the loop.
    /// Does not touch lifecycle state or notify subscribers.
    pub async fn scan_static(&self, sample: &FrameSample) -> ScanOutcome {
        self.inner.lock().await.bridge.decode(sample).await
    }

    /// Lists capture devices, prompting for permission first when it has
    /// not been granted yet (labels are unreadable otherwise).
    pub async fn list_devices(&self) -> Result<Vec<DeviceItem>, EngineError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !inner.gateway.check_permission().await? {
            inner.gateway.request_permission().await?;
        }
        Ok(inner.gateway.enumerate().await?)
    }

    pub async fn apply_constraints(&self, set: &ConstraintSet) -> Result<(), EngineError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner
            .constraints
            .apply(&mut inner.gateway, set)
            .map_err(Into::into)
    }

    /// Flips the torch and pushes the derived constraint to the live
    /// stream.  Returns the new flag value.
    pub async fn toggle_torch(&self) -> Result<bool, EngineError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner
            .constraints
            .toggle_torch(&mut inner.gateway)
            .map_err(Into::into)
    }

    pub async fn torch_enabled(&self) -> bool {
        self.inner.lock().await.constraints.torch_enabled()
    }

    pub async fn torch_supported(&self) -> Result<bool, EngineError> {
        Ok(self.inner.lock().await.gateway.query_capability(TORCH)?)
    }

    pub async fn state(&self) -> CaptureState {
        self.inner.lock().await.state
    }

    /// Negotiated output geometry of the live stream, if any.
    pub async fn geometry(&self) -> Option<StreamInfo> {
        self.inner.lock().await.geometry
    }

    /// Overlay model fed by the built-in feedback sink.  The
    /// presentation layer polls this for regions and flash state.
    pub fn feedback(&self) -> Arc<StdMutex<FeedbackState>> {
        Arc::clone(&self.feedback)
    }

    /// Arms the self-perpetuating sampling chain for `session`.
    ///
    /// Each iteration: suspend on the yield point, re-check state and
    /// session epoch (terminating when either changed), apply the
    /// throttle, then capture → decode → dispatch.  Per-frame failures
    /// dispatch `Failure` and keep the chain alive; a missing capture
    /// surface is an invariant breach and fails the session instead.
    fn spawn_loop(&self, session: u64) {
        let inner = Arc::clone(&self.inner);
        let mut ticks = self.ticks.clone();

        tokio::spawn(async move {
            loop {
                ticks.next_tick().await;

                let mut guard = inner.lock().await;
                if guard.session != session || guard.state != CaptureState::Scanning {
                    break;
                }

                let now = Instant::now();
                if !guard.scheduler.should_attempt(now) {
                    continue;
                }
                guard.scheduler.record_attempt(now);

                let inner_mut = &mut *guard;
                let outcome = match inner_mut.gateway.capture() {
                    Ok(sample) => inner_mut.bridge.decode(&sample).await,
                    Err(DeviceError::SurfaceMissing) => {
                        error!("capture surface missing while scanning");
                        inner_mut.shutdown(CaptureState::Error);
                        break;
                    }
                    Err(e) => ScanOutcome::Failure(e.to_string()),
                };
                inner_mut.dispatcher.dispatch(&outcome);
            }
            debug!(session, "scan chain terminated");
        });
    }
}
