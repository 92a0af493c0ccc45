use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gesture_bridge::detect::backends::hand_at;
use gesture_bridge::detect::{
    create_classifier, ClassifierBackend, ClassifierOptions, GestureClassifier, Recognition,
};
use gesture_bridge::emit::Protocol;
use gesture_bridge::frame::RawFrame;
use gesture_bridge::gesture::EdgeState;
use gesture_bridge::ingest::{open_source, CaptureSettings, VideoSource};
use gesture_bridge::render::NullSink;
use gesture_bridge::session::{launch, Session, SessionConfig, SessionParts, StopHandle};
use gesture_bridge::transport::{ChannelState, MemoryChannel};

const SHOT_AT_CENTER: &str = r#"{"shoot":true,"position":[0.5,0.5,-0.1]}"#;
const AIM_AT_CENTER: &str = r#"{"shoot":false,"position":[0.5,0.5,-0.1]}"#;

/// Replays fixed frame timestamps, then reports no frame.
struct TimestampSource {
    timestamps: VecDeque<u64>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    fail_acquire: bool,
}

impl TimestampSource {
    fn new(timestamps: &[u64]) -> Self {
        Self {
            timestamps: timestamps.iter().copied().collect(),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            fail_acquire: false,
        }
    }
}

impl VideoSource for TimestampSource {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn acquire(&mut self) -> Result<()> {
        if self.fail_acquire {
            bail!("permission denied");
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn poll_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self
            .timestamps
            .pop_front()
            .map(|ms| RawFrame::new(vec![0u8; 12], 2, 2, Duration::from_millis(ms))))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cycles through labels with a hand at the center; counts calls.
struct LabelClassifier {
    labels: Vec<&'static str>,
    calls: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl LabelClassifier {
    fn new(labels: &[&'static str]) -> Self {
        Self {
            labels: labels.to_vec(),
            calls: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl GestureClassifier for LabelClassifier {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn recognize(&mut self, _: &[u8], _: u32, _: u32, _: u64) -> Result<Recognition> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let label = self.labels[n % self.labels.len()];
        Ok(Recognition::single(label, 0.9, hand_at(0.5, 0.5, -0.1)))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn repeated_timestamp_is_classified_once() {
    let classifier = LabelClassifier::new(&["shooting"]);
    let calls = Arc::clone(&classifier.calls);
    let closed = Arc::clone(&classifier.closed);
    let channel = Arc::new(MemoryChannel::open());
    let mut session = Session::new(
        &SessionConfig::default(),
        Box::new(TimestampSource::new(&[10, 10])),
        Some(Box::new(classifier)),
        Box::new(Arc::clone(&channel)),
        Box::new(NullSink),
    );

    assert!(session.tick().fired());
    let second = session.tick();
    assert!(!second.sampled);
    assert!(second.deliveries.is_empty());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(channel.sent(), vec![SHOT_AT_CENTER.to_string()]);

    session.teardown();
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn closed_channel_drops_events_but_latch_advances() {
    let channel = Arc::new(MemoryChannel::new(ChannelState::Closed));
    let mut session = Session::new(
        &SessionConfig::default(),
        Box::new(TimestampSource::new(&[10, 20, 30])),
        Some(Box::new(LabelClassifier::new(&[
            "resting", "shooting", "shooting",
        ]))),
        Box::new(Arc::clone(&channel)),
        Box::new(NullSink),
    );

    session.tick();
    let fire = session.tick();
    assert!(fire.fired());
    assert!(fire.deliveries.iter().all(|(_, d)| !d.is_sent()));
    assert_eq!(session.edge_state(), EdgeState::Fired);
    assert!(channel.sent().is_empty());

    // Reconnected while the gesture is still held: no replayed shot.
    channel.set_state(ChannelState::Open);
    let held = session.tick();
    assert!(!held.fired());
    assert_eq!(channel.sent(), vec![AIM_AT_CENTER.to_string()]);

    let summary = session.teardown();
    assert_eq!(summary.shots, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.dropped, 2);
}

#[test]
fn ticks_without_hands_emit_nothing_positional() {
    let channel = Arc::new(MemoryChannel::open());
    let mut session = Session::new(
        &SessionConfig::default(),
        Box::new(TimestampSource::new(&[10, 20, 30, 40])),
        None,
        Box::new(Arc::clone(&channel)),
        Box::new(NullSink),
    );
    for _ in 0..4 {
        let report = session.tick();
        assert!(report.sampled);
        assert_eq!(report.hands, 0);
    }
    assert_eq!(session.edge_state(), EdgeState::Armed);
    assert!(channel.sent().is_empty());
}

#[test]
fn presence_protocol_reports_each_sampled_tick() {
    let channel = Arc::new(MemoryChannel::open());
    let config = SessionConfig {
        protocol: Protocol::Presence,
        ..SessionConfig::default()
    };
    let mut session = Session::new(
        &config,
        Box::new(TimestampSource::new(&[10, 20])),
        None,
        Box::new(Arc::clone(&channel)),
        Box::new(NullSink),
    );
    session.tick();
    session.tick();
    session.tick();
    assert_eq!(
        channel.sent(),
        vec![
            r#"{"handPresence":false}"#.to_string(),
            r#"{"handPresence":false}"#.to_string()
        ]
    );
}

#[test]
fn teardown_during_setup_releases_the_camera() {
    let source = TimestampSource::new(&[10, 20, 30]);
    let acquired = Arc::clone(&source.acquired);
    let released = Arc::clone(&source.released);
    let classifier = LabelClassifier::new(&["shooting"]);

    let handle = launch(SessionParts {
        config: SessionConfig::default(),
        open_source: Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        create_classifier: Box::new(move |_: &StopHandle| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Box::new(classifier) as Box<dyn GestureClassifier>)
        }),
        channel: Box::new(MemoryChannel::open()),
        sink: Box::new(NullSink),
    })
    .expect("launch");

    let summary = handle.teardown().expect("teardown");
    assert_eq!(summary.ticks, 0);
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[cfg(unix)]
#[test]
fn teardown_abandons_a_hung_classifier_helper() {
    let model = tempfile::NamedTempFile::new().expect("model file");
    let model_path = model.path().to_path_buf();
    let source = TimestampSource::new(&[10, 20, 30]);
    let acquired = Arc::clone(&source.acquired);
    let released = Arc::clone(&source.released);

    let handle = launch(SessionParts {
        config: SessionConfig::default(),
        open_source: Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        create_classifier: Box::new(move |stop: &StopHandle| {
            create_classifier(
                &model_path,
                &ClassifierOptions::default(),
                &ClassifierBackend::Process {
                    command: vec!["sh".to_string(), "-c".to_string(), "sleep 30".to_string()],
                },
                stop,
            )
        }),
        channel: Box::new(MemoryChannel::open()),
        sink: Box::new(NullSink),
    })
    .expect("launch");

    std::thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    let summary = handle.teardown().expect("teardown");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.ticks, 0);
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn unavailable_camera_never_starts_the_loop() {
    let mut source = TimestampSource::new(&[10]);
    source.fail_acquire = true;
    let factory_called = Arc::new(AtomicBool::new(false));
    let called = Arc::clone(&factory_called);

    let handle = launch(SessionParts {
        config: SessionConfig::default(),
        open_source: Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        create_classifier: Box::new(move |_: &StopHandle| {
            called.store(true, Ordering::SeqCst);
            Ok(Box::new(LabelClassifier::new(&["shooting"])) as Box<dyn GestureClassifier>)
        }),
        channel: Box::new(MemoryChannel::open()),
        sink: Box::new(NullSink),
    })
    .expect("launch");

    assert!(handle.join().is_err());
    assert!(!factory_called.load(Ordering::SeqCst));
}

#[test]
fn launched_session_streams_shots_from_synthetic_camera() {
    let channel = Arc::new(MemoryChannel::open());
    let settings = CaptureSettings {
        device: "stub://test".to_string(),
        target_fps: 100,
        width: 16,
        height: 12,
    };
    let config = SessionConfig {
        refresh_hz: 120,
        ..SessionConfig::default()
    };

    let handle = launch(SessionParts {
        config,
        open_source: Box::new(move || open_source(&settings)),
        create_classifier: Box::new(|_: &StopHandle| {
            Ok(Box::new(LabelClassifier::new(&["resting", "shooting"])) as Box<dyn GestureClassifier>)
        }),
        channel: Box::new(Arc::clone(&channel)),
        sink: Box::new(NullSink),
    })
    .expect("launch");

    let got_shot = wait_until(Duration::from_secs(5), || {
        channel.sent().iter().any(|m| m == SHOT_AT_CENTER)
    });
    let summary = handle.teardown().expect("teardown");
    assert!(got_shot);
    assert!(summary.shots >= 1);
    assert!(summary.frames >= 2);
}
