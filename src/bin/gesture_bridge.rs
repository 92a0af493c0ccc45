//! gesture_bridge - Drive a game server from hand gestures.
//!
//! This binary:
//! 1. Loads configuration (file, environment, then CLI flags)
//! 2. Starts the WebSocket channel to the game server
//! 3. Launches the capture/classify/detect/emit session on its own thread
//! 4. Stops and releases the camera and classifier on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gesture_bridge::config::parse_backend;
use gesture_bridge::detect::create_classifier;
use gesture_bridge::emit::Protocol;
use gesture_bridge::ingest::open_source;
use gesture_bridge::render::{CanvasSink, NullSink, RenderSink};
use gesture_bridge::session::{launch, SessionParts, StopHandle};
use gesture_bridge::transport::{Channel, ChannelState, MemoryChannel, WsChannel};
use gesture_bridge::ui::{Ui, UiMode};
use gesture_bridge::BridgeConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Turn camera hand gestures into game-server fire events"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "GESTURE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Game server address (ws://host:port/path, host:port, or memory://).
    #[arg(long)]
    server_url: Option<String>,

    /// Camera device path, or stub://<name> for a synthetic feed.
    #[arg(long)]
    camera: Option<String>,

    /// Wire protocol: shoot_flag, message, or presence.
    #[arg(long)]
    protocol: Option<Protocol>,

    /// Classifier backend: stub or process.
    #[arg(long)]
    classifier: Option<String>,

    /// Helper command for the process backend (repeat for each argument).
    #[arg(long = "classifier-arg", value_name = "ARG")]
    classifier_command: Vec<String>,

    /// Gesture model asset passed to the classifier.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Ticks per second.
    #[arg(long)]
    refresh_hz: Option<u32>,

    /// Draw landmarks onto an offscreen canvas.
    #[arg(long)]
    render: bool,

    /// Save the overlay canvas to this PNG periodically (implies --render).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Wait up to this many milliseconds for the game server before starting.
    #[arg(long, default_value_t = 0)]
    wait_connect_ms: u64,

    /// Output mode for startup stages.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = BridgeConfig::from_path(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };
    log::info!(
        "camera={} server={} protocol={} refresh={}Hz landmark={}",
        cfg.camera.device,
        cfg.server.url,
        cfg.protocol.name(),
        cfg.refresh_hz,
        cfg.detector.landmark_index
    );

    let (channel, ws): (Box<dyn Channel>, Option<Arc<WsChannel>>) = if cfg.is_memory_server() {
        log::warn!("memory:// server: events are recorded in-process only");
        (Box::new(MemoryChannel::open()), None)
    } else {
        let ws = Arc::new(WsChannel::connect(cfg.ws_config())?);
        (Box::new(Arc::clone(&ws)), Some(ws))
    };

    if let Some(ws) = &ws {
        if args.wait_connect_ms > 0 {
            let stage = ui.stage("Connect to game server");
            if !ws.wait_for_state(ChannelState::Open, Duration::from_millis(args.wait_connect_ms)) {
                stage.fail();
                log::warn!(
                    "game server {} not reachable yet; events are dropped until it is",
                    ws.endpoint()
                );
            }
        }
    }

    let sink: Box<dyn RenderSink> = if cfg.render.enabled {
        Box::new(CanvasSink::new(cfg.render.canvas.clone()))
    } else {
        Box::new(NullSink)
    };

    let camera = cfg.camera.clone();
    let classifier = cfg.classifier.clone();
    let parts = SessionParts {
        config: cfg.session_config()?,
        open_source: Box::new(move || open_source(&camera)),
        create_classifier: Box::new(move |stop: &StopHandle| {
            create_classifier(
                &classifier.model_path,
                &classifier.options,
                &classifier.backend,
                stop,
            )
        }),
        channel,
        sink,
    };

    let handle = launch(parts)?;
    let stop = handle.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping session...");
        stop.stop();
    })
    .context("install Ctrl-C handler")?;
    log::info!("gesture_bridge running; press Ctrl-C to stop");

    let summary = handle.join();
    if let Some(ws) = ws {
        ws.close();
    }
    let summary = summary?;
    log::info!(
        "done: {} shots, {} events sent, {} dropped over {} frames",
        summary.shots,
        summary.sent,
        summary.dropped,
        summary.frames
    );
    Ok(())
}

fn apply_args(cfg: &mut BridgeConfig, args: &Args) -> Result<()> {
    if let Some(url) = &args.server_url {
        cfg.server.url = url.clone();
    }
    if let Some(camera) = &args.camera {
        cfg.camera.device = camera.clone();
    }
    if let Some(protocol) = &args.protocol {
        cfg.protocol = protocol.clone();
    }
    if let Some(backend) = &args.classifier {
        cfg.classifier.backend = parse_backend(backend, args.classifier_command.clone())?;
    }
    if let Some(model) = &args.model {
        cfg.classifier.model_path = model.clone();
    }
    if let Some(hz) = args.refresh_hz {
        cfg.refresh_hz = hz;
    }
    if args.render || args.snapshot.is_some() {
        cfg.render.enabled = true;
    }
    if let Some(path) = &args.snapshot {
        cfg.render.canvas.snapshot_path = Some(path.clone());
    }
    Ok(())
}
