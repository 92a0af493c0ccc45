use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use gesture_bridge::config::BridgeConfig;
use gesture_bridge::detect::{ClassifierBackend, Delegate};
use gesture_bridge::emit::Protocol;
use gesture_bridge::gesture::HandSelection;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GESTURE_BRIDGE_CONFIG",
        "GESTURE_BRIDGE_SERVER_URL",
        "GESTURE_BRIDGE_CAMERA",
        "GESTURE_BRIDGE_MODEL",
        "GESTURE_BRIDGE_PROTOCOL",
        "GESTURE_BRIDGE_LANDMARK",
        "GESTURE_BRIDGE_REFRESH_HZ",
        "GESTURE_BRIDGE_SHOOTING_LABELS",
        "GESTURE_BRIDGE_RESTING_LABELS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.server.url, "ws://127.0.0.1:8080");
    assert_eq!(cfg.camera.device, "stub://webcam");
    assert_eq!(cfg.refresh_hz, 60);
    assert_eq!(cfg.detector.landmark_index, 5);
    assert_eq!(cfg.shooting_labels, vec!["shooting".to_string()]);
    assert_eq!(cfg.resting_labels, vec!["resting".to_string()]);
    assert_eq!(cfg.classifier.backend, ClassifierBackend::Stub);
    assert_eq!(cfg.classifier.options.num_hands, 2);
    assert_eq!(cfg.protocol, Protocol::ShootFlag { stream_aim: true });
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "server": {
                "url": "ws://game.local:9000/play",
                "connect_timeout_ms": 500,
                "reconnect_interval_ms": 0
            },
            "camera": {
                "device": "stub://desk",
                "target_fps": 24,
                "width": 320,
                "height": 240
            },
            "classifier": {
                "backend": "process",
                "command": ["python3", "recognize.py"],
                "num_hands": 1,
                "delegate": "gpu"
            },
            "gestures": {
                "shooting": ["Pointing_Up"],
                "resting": ["Open_Palm", "Closed_Fist"],
                "hand_selection": "highest_confidence",
                "min_confidence": 0.6
            },
            "protocol": {"kind": "message", "reset_message": "alive"},
            "refresh_hz": 30
        }"#,
    );

    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    std::env::set_var("GESTURE_BRIDGE_LANDMARK", "8");
    std::env::set_var("GESTURE_BRIDGE_CAMERA", "stub://override");

    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.server.url, "ws://game.local:9000/play");
    assert_eq!(cfg.server.connect_timeout, Duration::from_millis(500));
    assert!(cfg.server.reconnect_interval.is_none());
    assert_eq!(cfg.camera.device, "stub://override");
    assert_eq!(cfg.camera.target_fps, 24);
    assert_eq!(
        cfg.classifier.backend,
        ClassifierBackend::Process {
            command: vec!["python3".to_string(), "recognize.py".to_string()]
        }
    );
    assert_eq!(cfg.classifier.options.num_hands, 1);
    assert_eq!(cfg.classifier.options.delegate, Delegate::Gpu);
    assert_eq!(cfg.shooting_labels, vec!["pointing_up".to_string()]);
    assert_eq!(
        cfg.resting_labels,
        vec!["open_palm".to_string(), "closed_fist".to_string()]
    );
    assert_eq!(cfg.detector.hand_selection, HandSelection::HighestConfidence);
    assert_eq!(cfg.detector.landmark_index, 8);
    assert_eq!(cfg.refresh_hz, 30);
    assert_eq!(
        cfg.protocol,
        Protocol::Message {
            shot_message: "dead".to_string(),
            reset_message: Some("alive".to_string()),
        }
    );

    let session = cfg.session_config().expect("session config");
    assert_eq!(session.refresh_hz, 30);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
refresh_hz = 90

[server]
url = "127.0.0.1:7000"

[protocol]
kind = "presence"

[render]
enabled = true
width = 320
height = 180
"#,
    );
    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    std::env::set_var("GESTURE_BRIDGE_SHOOTING_LABELS", "bang, pew");

    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.refresh_hz, 90);
    assert_eq!(cfg.server.url, "127.0.0.1:7000");
    assert_eq!(cfg.protocol, Protocol::Presence);
    assert!(cfg.render.enabled);
    assert_eq!(cfg.render.canvas.width, 320);
    assert_eq!(cfg.shooting_labels, vec!["bang".to_string(), "pew".to_string()]);

    clear_env();
}

#[test]
fn protocol_env_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GESTURE_BRIDGE_PROTOCOL", "presence");
    std::env::set_var("GESTURE_BRIDGE_SERVER_URL", "memory://");
    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.protocol, Protocol::Presence);
    assert!(cfg.is_memory_server());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("GESTURE_BRIDGE_LANDMARK", "21"),
        ("GESTURE_BRIDGE_LANDMARK", "palm"),
        ("GESTURE_BRIDGE_REFRESH_HZ", "0"),
        ("GESTURE_BRIDGE_REFRESH_HZ", "500"),
        ("GESTURE_BRIDGE_SHOOTING_LABELS", "thumbs up"),
        ("GESTURE_BRIDGE_RESTING_LABELS", "shooting"),
        ("GESTURE_BRIDGE_SERVER_URL", "wss://game.local"),
        ("GESTURE_BRIDGE_PROTOCOL", "carrier_pigeon"),
    ] {
        std::env::set_var(key, value);
        assert!(
            BridgeConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
        std::env::remove_var(key);
    }

    let file = write_config(".json", r#"{"classifier": {"num_hands": 0}}"#);
    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());

    let file = write_config(".json", r#"{"classifier": {"backend": "process"}}"#);
    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());

    let file = write_config(".json", r#"{"gestures": {"min_confidence": 1.5}}"#);
    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());

    let file = write_config(".json", "{ not json");
    std::env::set_var("GESTURE_BRIDGE_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());

    clear_env();
}
