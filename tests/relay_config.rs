use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use camera_relay::config::RelayConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_CAPTURE_DEVICE",
        "RELAY_CAPTURE_TIMEOUT_MS",
        "RELAY_UPLOAD_ENDPOINT",
        "RELAY_DESTINATION",
        "RELAY_UPLOAD_TOKEN_PATH",
        "RELAY_UPLOAD_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelayConfig::load().expect("load defaults");

    assert_eq!(cfg.capture.device, "stub://camera");
    assert_eq!(cfg.capture.timeout, Duration::from_secs(5));
    assert_eq!(cfg.upload.endpoint, "uploads");
    assert_eq!(cfg.upload.destination.as_str(), "test-photo.png");
    assert!(cfg.upload.content_type.is_none());
    assert!(cfg.upload.token_path.is_none());
    assert_eq!(cfg.upload.timeout, Duration::from_secs(30));
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let token_path = file.path().with_extension("token");
    let json = format!(
        r#"{{
            "capture": {{
                "device": "http://10.0.0.7/capture",
                "timeout_ms": 2500
            }},
            "upload": {{
                "endpoint": "https://storage.example.com/v0/b/robot-camera/o",
                "destination": "robots/front.jpg",
                "content_type": "image/jpeg",
                "token_path": "{}",
                "timeout_ms": 10000
            }}
        }}"#,
        token_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_DESTINATION", "robots/rear.jpg");
    std::env::set_var("RELAY_CAPTURE_TIMEOUT_MS", "750");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.capture.device, "http://10.0.0.7/capture");
    assert_eq!(cfg.capture.timeout, Duration::from_millis(750));
    assert_eq!(
        cfg.upload.endpoint,
        "https://storage.example.com/v0/b/robot-camera/o"
    );
    assert_eq!(cfg.upload.destination.as_str(), "robots/rear.jpg");
    assert_eq!(cfg.upload.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(cfg.upload.token_path.unwrap(), token_path);
    assert_eq!(cfg.upload.timeout, Duration::from_secs(10));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [capture]
        device = "stub://porch?len=64"

        [upload]
        endpoint = "file:///var/lib/relay"
        destination = "porch.png"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = RelayConfig::load_from(Some(file.path())).expect("load toml");

    assert_eq!(cfg.capture.device, "stub://porch?len=64");
    assert_eq!(cfg.upload.endpoint, "file:///var/lib/relay");
    assert_eq!(cfg.upload.destination.as_str(), "porch.png");
    assert_eq!(cfg.capture.timeout, Duration::from_secs(5));
}

#[test]
fn empty_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_CAPTURE_DEVICE", "   ");
    std::env::set_var("RELAY_UPLOAD_ENDPOINT", "");

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.capture.device, "stub://camera");
    assert_eq!(cfg.upload.endpoint, "uploads");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_UPLOAD_TIMEOUT_MS", "soon");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_CAPTURE_TIMEOUT_MS", "0");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_DESTINATION", "../escape.png");
    assert!(RelayConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unknown_config_fields() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"upload": {"bucket": "x"}}"#).expect("write");

    let err = RelayConfig::load_from(Some(file.path())).expect_err("unknown field");
    assert!(err.to_string().contains("invalid config file"));
}
