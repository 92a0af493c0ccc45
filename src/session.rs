//! Refresh-paced scheduling loop.
//!
//! One tick runs sample -> classify -> detect -> emit -> render, strictly in
//! sequence on the session thread. Ticks never overlap.
//!
//! The session is responsible for:
//! - pacing ticks to the configured refresh rate
//! - owning the capture source and classifier for its whole lifetime
//! - releasing both on teardown, including a teardown during setup
//!
//! The session MUST NOT:
//! - open or reconnect the game-server channel (it only writes to it)
//! - let a render failure affect detection or emission

use anyhow::{anyhow, bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{ClassifierAdapter, GestureClassifier};
use crate::emit::{Delivery, EmitStats, EventEmitter, OutboundEvent, Protocol};
use crate::frame::FrameSampler;
use crate::gesture::{DetectorConfig, EdgeDecision, EdgeDetector, EdgeState, LabelVocabulary};
use crate::ingest::VideoSource;
use crate::render::{render_guarded, RenderSink};
use crate::transport::Channel;

const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Ticks per second.
    pub refresh_hz: u32,
    pub detector: DetectorConfig,
    pub protocol: Protocol,
    pub vocabulary: LabelVocabulary,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            detector: DetectorConfig::default(),
            protocol: Protocol::default(),
            vocabulary: LabelVocabulary::default(),
        }
    }
}

/// Cloneable stop flag shared with signal handlers and other threads.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on stop. Returns false if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

/// Fixed-interval tick pacing.
///
/// The next deadline is the previous deadline plus one interval. A tick that
/// starts late resynchronizes to "now" instead of bursting to catch up.
#[derive(Clone, Debug)]
pub struct RefreshClock {
    interval: Duration,
    next: Option<Instant>,
}

impl RefreshClock {
    pub fn new(refresh_hz: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / refresh_hz.max(1),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to wait from `now` before the next tick, and schedule the one after.
    pub fn advance(&mut self, now: Instant) -> Duration {
        match self.next {
            Some(deadline) if deadline > now => {
                self.next = Some(deadline + self.interval);
                deadline - now
            }
            _ => {
                self.next = Some(now + self.interval);
                Duration::ZERO
            }
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// A new frame was sampled; false means the tick was a no-op.
    pub sampled: bool,
    pub timestamp: Option<Duration>,
    pub hands: usize,
    pub decision: Option<EdgeDecision>,
    pub deliveries: Vec<(OutboundEvent, Delivery)>,
}

impl TickReport {
    pub fn fired(&self) -> bool {
        self.decision.map(|d| d.fired()).unwrap_or(false)
    }

    pub fn sent(&self) -> usize {
        self.deliveries.iter().filter(|(_, d)| d.is_sent()).count()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub ticks: u64,
    pub frames: u64,
    pub classifier_calls: u64,
    pub shots: u64,
    pub sent: u64,
    pub dropped: u64,
}

pub struct Session {
    refresh_hz: u32,
    sampler: FrameSampler,
    adapter: ClassifierAdapter,
    detector: EdgeDetector,
    emitter: EventEmitter,
    channel: Box<dyn Channel>,
    sink: Box<dyn RenderSink>,
    stop: StopHandle,
    ticks: u64,
    shots: u64,
}

impl Session {
    /// Build a session around an already acquired source.
    pub fn new(
        config: &SessionConfig,
        source: Box<dyn VideoSource>,
        classifier: Option<Box<dyn GestureClassifier>>,
        channel: Box<dyn Channel>,
        sink: Box<dyn RenderSink>,
    ) -> Self {
        Self {
            refresh_hz: config.refresh_hz,
            sampler: FrameSampler::new(source),
            adapter: ClassifierAdapter::new(classifier, config.vocabulary.clone()),
            detector: EdgeDetector::new(config.detector.clone()),
            emitter: EventEmitter::new(config.protocol.clone()),
            channel,
            sink,
            stop: StopHandle::new(),
            ticks: 0,
            shots: 0,
        }
    }

    /// Use an externally owned stop flag.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn edge_state(&self) -> EdgeState {
        self.detector.state()
    }

    pub fn emit_stats(&self) -> EmitStats {
        self.emitter.stats()
    }

    pub fn summary(&self) -> SessionSummary {
        let emitted = self.emitter.stats();
        SessionSummary {
            ticks: self.ticks,
            frames: self.sampler.stats().sampled,
            classifier_calls: self.adapter.calls(),
            shots: self.shots,
            sent: emitted.sent,
            dropped: emitted.dropped,
        }
    }

    /// Run one tick. Without a new frame nothing else happens.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let Some(sample) = self.sampler.sample() else {
            return TickReport::default();
        };

        let observations = self.adapter.classify(&sample);
        let decision = self.detector.observe(&observations);
        if decision.fired() {
            self.shots += 1;
        }
        let deliveries = self.emitter.dispatch(&decision, self.channel.as_ref());
        render_guarded(self.sink.as_mut(), &sample.frame.info(), &observations);

        log::trace!(
            "tick {} t={:?} hands={} {:?}",
            self.ticks,
            sample.timestamp,
            observations.len(),
            decision.transition
        );
        TickReport {
            sampled: true,
            timestamp: Some(sample.timestamp),
            hands: observations.len(),
            decision: Some(decision),
            deliveries,
        }
    }

    /// Tick at the refresh rate until stopped.
    pub fn run(&mut self) {
        let mut clock = RefreshClock::new(self.refresh_hz);
        log::info!(
            "session running at {} Hz (interval {:?})",
            self.refresh_hz,
            clock.interval()
        );
        while !self.stop.is_stopped() {
            let wait = clock.advance(Instant::now());
            if !wait.is_zero() && !self.stop.sleep(wait) {
                break;
            }
            self.tick();
        }
        log::info!("session stopped after {} ticks", self.ticks);
    }

    /// Release the capture source and close the classifier.
    pub fn teardown(mut self) -> SessionSummary {
        self.stop.stop();
        let summary = self.summary();
        self.sampler.release();
        self.adapter.close();
        summary
    }
}

// ----------------------------------------------------------------------------
// Threaded launch
// ----------------------------------------------------------------------------

pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn VideoSource>> + Send>;
/// Receives the session's stop handle so a slow classifier start can be abandoned.
pub type ClassifierFactory =
    Box<dyn FnOnce(&StopHandle) -> Result<Box<dyn GestureClassifier>> + Send>;

/// Everything a session needs, with slow setup steps deferred to the session thread.
pub struct SessionParts {
    pub config: SessionConfig,
    pub open_source: SourceFactory,
    pub create_classifier: ClassifierFactory,
    pub channel: Box<dyn Channel>,
    pub sink: Box<dyn RenderSink>,
}

pub struct SessionHandle {
    stop: StopHandle,
    thread: Option<JoinHandle<Result<SessionSummary>>>,
}

impl SessionHandle {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Wait for the session thread to end on its own.
    pub fn join(mut self) -> Result<SessionSummary> {
        self.join_inner()
    }

    /// Stop the session (or abort its setup) and wait for resources to be released.
    pub fn teardown(mut self) -> Result<SessionSummary> {
        self.stop.stop();
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<SessionSummary> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow!("session thread panicked"))?,
            None => Ok(SessionSummary::default()),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop.stop();
        if let Err(e) = self.join_inner() {
            log::debug!("session ended with error: {:#}", e);
        }
    }
}

/// Start a session on its own thread.
///
/// Setup (camera acquire, classifier creation) happens on that thread. The
/// stop flag is checked after each step, and anything already acquired is
/// released if a stop arrived in the meantime.
pub fn launch(parts: SessionParts) -> Result<SessionHandle> {
    let stop = StopHandle::new();
    let thread = {
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("gesture-session".to_string())
            .spawn(move || run_session(parts, stop))
            .context("spawn session thread")?
    };
    Ok(SessionHandle {
        stop,
        thread: Some(thread),
    })
}

fn run_session(parts: SessionParts, stop: StopHandle) -> Result<SessionSummary> {
    let SessionParts {
        config,
        open_source,
        create_classifier,
        channel,
        sink,
    } = parts;

    let mut source = match open_source().and_then(|mut source| {
        source.acquire()?;
        Ok(source)
    }) {
        Ok(source) => source,
        Err(e) => {
            log::error!("camera unavailable: {:#}", e);
            return Err(e.context("camera unavailable"));
        }
    };
    log::info!("acquired video source {}", source.name());
    if stop.is_stopped() {
        source.release();
        log::info!("stopped during setup; released {}", source.name());
        return Ok(SessionSummary::default());
    }

    let classifier = match create_classifier(&stop).and_then(|mut classifier| {
        classifier.warm_up()?;
        Ok(classifier)
    }) {
        Ok(classifier) => classifier,
        Err(e) if stop.is_stopped() => {
            source.release();
            log::info!("stopped during classifier setup ({:#}); released {}", e, source.name());
            return Ok(SessionSummary::default());
        }
        Err(e) => {
            source.release();
            log::error!("gesture classifier unavailable: {:#}", e);
            return Err(e.context("gesture classifier unavailable"));
        }
    };
    log::info!("gesture classifier {} ready", classifier.name());

    let mut session = Session::new(&config, source, Some(classifier), channel, sink)
        .with_stop_handle(stop.clone());
    if !stop.is_stopped() {
        session.run();
    }
    let summary = session.teardown();
    log::info!(
        "session summary: ticks={} frames={} shots={} sent={} dropped={}",
        summary.ticks,
        summary.frames,
        summary.shots,
        summary.sent,
        summary.dropped
    );
    Ok(summary)
}

/// Validate settings before a session is built from them.
pub fn validate_refresh_hz(refresh_hz: u32) -> Result<()> {
    if !(1..=240).contains(&refresh_hz) {
        bail!("refresh rate must be within 1..=240 Hz, got {}", refresh_hz);
    }
    Ok(())
}
