use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ClassifierBackend, ClassifierOptions, Delegate, RunningMode};
use crate::emit::Protocol;
use crate::gesture::{DetectorConfig, HandSelection, LabelVocabulary};
use crate::ingest::CaptureSettings;
use crate::render::CanvasConfig;
use crate::session::{validate_refresh_hz, SessionConfig};
use crate::transport::{parse_ws_endpoint, WsConfig};

pub const CONFIG_ENV: &str = "GESTURE_BRIDGE_CONFIG";
/// Server URL that routes events to an in-process recorder instead of a socket.
pub const MEMORY_SERVER_URL: &str = "memory://";

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 2_000;
const DEFAULT_MODEL_PATH: &str = "models/gesture_recognizer.task";
const DEFAULT_REFRESH_HZ: u32 = 60;
const DEFAULT_SNAPSHOT_EVERY: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    gestures: Option<GesturesConfigFile>,
    protocol: Option<Protocol>,
    refresh_hz: Option<u32>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    /// 0 disables reconnecting.
    reconnect_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    command: Option<Vec<String>>,
    num_hands: Option<u8>,
    running_mode: Option<RunningMode>,
    delegate: Option<Delegate>,
    ready_timeout_ms: Option<u64>,
    reply_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct GesturesConfigFile {
    shooting: Option<Vec<String>>,
    resting: Option<Vec<String>>,
    landmark: Option<usize>,
    hand_selection: Option<HandSelection>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    enabled: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    snapshot_path: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub server: ServerSettings,
    pub camera: CaptureSettings,
    pub classifier: ClassifierSettings,
    pub shooting_labels: Vec<String>,
    pub resting_labels: Vec<String>,
    pub detector: DetectorConfig,
    pub protocol: Protocol,
    pub refresh_hz: u32,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backend: ClassifierBackend,
    pub model_path: PathBuf,
    pub options: ClassifierOptions,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub enabled: bool,
    pub canvas: CanvasConfig,
}

impl BridgeConfig {
    /// Load from `GESTURE_BRIDGE_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::from_path(config_path.as_deref().map(Path::new))
    }

    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => BridgeConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let server = file.server.unwrap_or_default();
        let server = ServerSettings {
            url: server.url.unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            connect_timeout: Duration::from_millis(
                server.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            reconnect_interval: match server
                .reconnect_interval_ms
                .unwrap_or(DEFAULT_RECONNECT_INTERVAL_MS)
            {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        };

        let defaults = CaptureSettings::default();
        let camera = file.camera.unwrap_or_default();
        let camera = CaptureSettings {
            device: camera.device.unwrap_or(defaults.device),
            target_fps: camera.target_fps.unwrap_or(defaults.target_fps),
            width: camera.width.unwrap_or(defaults.width),
            height: camera.height.unwrap_or(defaults.height),
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let option_defaults = ClassifierOptions::default();
        let classifier = ClassifierSettings {
            backend: parse_backend(
                classifier_file.backend.as_deref().unwrap_or("stub"),
                classifier_file.command.unwrap_or_default(),
            )?,
            model_path: classifier_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            options: ClassifierOptions {
                num_hands: classifier_file
                    .num_hands
                    .unwrap_or(option_defaults.num_hands),
                running_mode: classifier_file
                    .running_mode
                    .unwrap_or(option_defaults.running_mode),
                delegate: classifier_file.delegate.unwrap_or(option_defaults.delegate),
                ready_timeout: classifier_file
                    .ready_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(option_defaults.ready_timeout),
                reply_timeout: classifier_file
                    .reply_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(option_defaults.reply_timeout),
            },
        };

        let gestures = file.gestures.unwrap_or_default();
        let vocabulary = LabelVocabulary::default();
        let detector_defaults = DetectorConfig::default();
        let detector = DetectorConfig {
            landmark_index: gestures
                .landmark
                .unwrap_or(detector_defaults.landmark_index),
            hand_selection: gestures
                .hand_selection
                .unwrap_or(detector_defaults.hand_selection),
            min_confidence: gestures
                .min_confidence
                .unwrap_or(detector_defaults.min_confidence),
        };

        let render_file = file.render.unwrap_or_default();
        let canvas_defaults = CanvasConfig::default();
        let render = RenderSettings {
            enabled: render_file.enabled.unwrap_or(false),
            canvas: CanvasConfig {
                width: render_file.width.unwrap_or(canvas_defaults.width),
                height: render_file.height.unwrap_or(canvas_defaults.height),
                snapshot_path: render_file.snapshot_path,
                snapshot_every: render_file.snapshot_every.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            },
        };

        Ok(Self {
            server,
            camera,
            classifier,
            shooting_labels: gestures
                .shooting
                .unwrap_or_else(|| vocabulary.shooting_labels().to_vec()),
            resting_labels: gestures
                .resting
                .unwrap_or_else(|| vocabulary.resting_labels().to_vec()),
            detector,
            protocol: file.protocol.unwrap_or_default(),
            refresh_hz: file.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            render,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("GESTURE_BRIDGE_SERVER_URL") {
            if !url.trim().is_empty() {
                self.server.url = url.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("GESTURE_BRIDGE_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("GESTURE_BRIDGE_MODEL") {
            if !path.trim().is_empty() {
                self.classifier.model_path = PathBuf::from(path.trim());
            }
        }
        if let Ok(protocol) = std::env::var("GESTURE_BRIDGE_PROTOCOL") {
            if !protocol.trim().is_empty() {
                self.protocol = protocol.parse()?;
            }
        }
        if let Ok(landmark) = std::env::var("GESTURE_BRIDGE_LANDMARK") {
            self.detector.landmark_index = landmark.trim().parse().map_err(|_| {
                anyhow!("GESTURE_BRIDGE_LANDMARK must be a landmark index (0-20)")
            })?;
        }
        if let Ok(hz) = std::env::var("GESTURE_BRIDGE_REFRESH_HZ") {
            self.refresh_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("GESTURE_BRIDGE_REFRESH_HZ must be an integer"))?;
        }
        if let Ok(labels) = std::env::var("GESTURE_BRIDGE_SHOOTING_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.shooting_labels = parsed;
            }
        }
        if let Ok(labels) = std::env::var("GESTURE_BRIDGE_RESTING_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.resting_labels = parsed;
            }
        }
        Ok(())
    }

    /// Check every setting. The binary calls this again after applying CLI flags.
    pub fn validate(&mut self) -> Result<()> {
        let vocabulary = self.vocabulary()?;
        self.shooting_labels = vocabulary.shooting_labels().to_vec();
        self.resting_labels = vocabulary.resting_labels().to_vec();

        self.detector.validate()?;
        self.classifier.options.validate()?;
        validate_refresh_hz(self.refresh_hz)?;

        if self.server.url != MEMORY_SERVER_URL {
            parse_ws_endpoint(&self.server.url)?;
        }
        if self.server.connect_timeout.is_zero() {
            return Err(anyhow!("server connect timeout must be greater than zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.render.canvas.width == 0 || self.render.canvas.height == 0 {
            return Err(anyhow!("render width and height must be greater than zero"));
        }
        match &self.classifier.backend {
            ClassifierBackend::Process { command } if command.is_empty() => {
                return Err(anyhow!("process classifier requires a command"));
            }
            ClassifierBackend::Stub if !is_synthetic_camera(&self.camera.device) => {
                return Err(anyhow!(
                    "camera {} is a real device but the classifier is the scripted stub; \
                     configure the process classifier",
                    self.camera.device
                ));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn vocabulary(&self) -> Result<LabelVocabulary> {
        LabelVocabulary::new(self.shooting_labels.clone(), self.resting_labels.clone())
    }

    pub fn is_memory_server(&self) -> bool {
        self.server.url == MEMORY_SERVER_URL
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            url: self.server.url.clone(),
            connect_timeout: self.server.connect_timeout,
            reconnect_interval: self.server.reconnect_interval,
            ..WsConfig::default()
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            refresh_hz: self.refresh_hz,
            detector: self.detector.clone(),
            protocol: self.protocol.clone(),
            vocabulary: self.vocabulary()?,
        })
    }
}

fn is_synthetic_camera(device: &str) -> bool {
    device.starts_with("stub://")
}

/// Parse a classifier backend name (`stub` or `process`).
pub fn parse_backend(name: &str, command: Vec<String>) -> Result<ClassifierBackend> {
    match name.trim().to_lowercase().as_str() {
        "stub" => Ok(ClassifierBackend::Stub),
        "process" => Ok(ClassifierBackend::Process { command }),
        other => Err(anyhow!(
            "unknown classifier backend '{}' (expected stub or process)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
