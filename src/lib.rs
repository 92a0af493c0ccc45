//! Gesture Bridge
//!
//! Turns a live camera feed into discrete "fire" events for a game server.
//!
//! # Architecture
//!
//! Each refresh tick runs one strictly sequential pass:
//!
//! 1. **Sample**: pull the latest frame, skipping frames already seen.
//! 2. **Classify**: hand the frame to the gesture classifier; failures mean "no hands".
//! 3. **Detect**: feed the selected hand's label through the Armed/Fired latch.
//! 4. **Emit**: encode the resulting events and write them if the channel is open.
//! 5. **Render**: optionally draw the landmarks; failures never reach the steps above.
//!
//! A held "shooting" gesture fires exactly once. The latch re-arms only after
//! an explicit "resting" observation.
//!
//! # Module Structure
//!
//! - `frame`: raw frames and the per-tick sampler
//! - `ingest`: capture sources (synthetic, V4L2)
//! - `detect`: classifier boundary and backends
//! - `gesture`: labels, observations, and the edge detector
//! - `emit`: wire protocols and event delivery
//! - `transport`: WebSocket channel to the game server
//! - `render`: landmark overlay sinks
//! - `session`: refresh-paced loop, launch and teardown
//! - `config`: file/env configuration

pub mod config;
pub mod detect;
pub mod emit;
pub mod frame;
pub mod gesture;
pub mod ingest;
pub mod render;
pub mod session;
pub mod transport;
pub mod ui;

pub use config::BridgeConfig;
pub use detect::{create_classifier, ClassifierAdapter, GestureClassifier, Recognition};
pub use emit::{Delivery, EventEmitter, OutboundEvent, Protocol};
pub use frame::{FrameInfo, FrameSample, FrameSampler, RawFrame};
pub use gesture::{
    DetectorConfig, EdgeDecision, EdgeDetector, EdgeState, GestureLabel, HandObservation,
    LabelVocabulary, Landmark, Transition,
};
pub use ingest::{open_source, CaptureSettings, VideoSource};
pub use render::{CanvasSink, NullSink, RenderSink};
pub use session::{launch, Session, SessionConfig, SessionHandle, SessionParts, StopHandle};
pub use transport::{Channel, ChannelState, MemoryChannel, WsChannel};
