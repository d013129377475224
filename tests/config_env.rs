use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use vigil::queue::OverflowPolicy;
use vigil::VigilConfig;

// Environment variables are process-global; serialize the tests that touch
// them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_STREAM_SOURCE",
        "VIGIL_DB_PATH",
        "VIGIL_FACES_DIR",
        "VIGIL_SNAPSHOT_DIR",
        "VIGIL_TOLERANCE",
        "VIGIL_MOTION_THRESHOLD",
        "VIGIL_QUEUE_CAPACITY",
        "VIGIL_LOG_COOLDOWN_SECS",
        "VIGIL_ALERT_COOLDOWN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = VigilConfig::load().expect("load default config");

    assert_eq!(cfg.stream.source, "stub://patrol");
    assert_eq!(cfg.db_path, "vigil.db");
    assert!((cfg.motion.alpha - 0.1).abs() < 1e-6);
    assert_eq!(cfg.motion.warmup_frames, 5);
    assert!((cfg.recognition.tolerance - 0.6).abs() < 1e-6);
    assert_eq!(cfg.queue.capacity, 64);
    assert!(matches!(cfg.queue.policy, OverflowPolicy::Block { .. }));
    assert_eq!(cfg.sink.drain_timeout, Duration::from_secs(5));

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        db_path = "vigil_prod.db"
        faces_dir = "/var/lib/vigil/faces"
        cache_path = "/var/lib/vigil/faces/signatures.json"

        [stream]
        source = "rtsp://camera-1/main"
        target_fps = 12
        width = 800
        height = 600

        [motion]
        alpha = 0.2
        threshold = 6.0
        reduced_width = 48
        warmup_frames = 10

        [recognition]
        engine = "stub"
        downscale = 0.25
        tolerance = 0.55
        log_cooldown_secs = 60
        alert_cooldown_secs = 120

        [queue]
        capacity = 128
        policy = "drop_oldest"

        [sink]
        snapshot_dir = "/var/lib/vigil/snapshots"
        drain_timeout_secs = 3
        write_retries = 5
        retry_backoff_ms = 50

        [slot]
        stale_after_ms = 1500
        expire_after_ms = 20000

        [capture]
        backoff_base_ms = 100
        backoff_cap_ms = 2000
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_STREAM_SOURCE", "stub://patrol");
    std::env::set_var("VIGIL_QUEUE_CAPACITY", "16");
    std::env::set_var("VIGIL_TOLERANCE", "0.5");

    let cfg = VigilConfig::load().expect("load config");

    // Environment wins over the file.
    assert_eq!(cfg.stream.source, "stub://patrol");
    assert_eq!(cfg.queue.capacity, 16);
    assert!((cfg.recognition.tolerance - 0.5).abs() < 1e-6);

    // File wins over defaults.
    assert_eq!(cfg.db_path, "vigil_prod.db");
    assert_eq!(cfg.faces_dir.to_str().unwrap(), "/var/lib/vigil/faces");
    assert_eq!(cfg.stream.target_fps, 12);
    assert_eq!(cfg.stream.width, 800);
    assert_eq!(cfg.stream.height, 600);
    assert!((cfg.motion.alpha - 0.2).abs() < 1e-6);
    assert!((cfg.motion.threshold - 6.0).abs() < 1e-6);
    assert_eq!(cfg.motion.reduced_width, 48);
    assert_eq!(cfg.motion.warmup_frames, 10);
    assert!((cfg.recognition.downscale - 0.25).abs() < 1e-6);
    assert_eq!(cfg.recognition.log_cooldown, Duration::from_secs(60));
    assert_eq!(cfg.recognition.alert_cooldown, Duration::from_secs(120));
    assert_eq!(cfg.queue.policy, OverflowPolicy::DropOldest);
    assert_eq!(
        cfg.sink.snapshot_dir.to_str().unwrap(),
        "/var/lib/vigil/snapshots"
    );
    assert_eq!(cfg.sink.drain_timeout, Duration::from_secs(3));
    assert_eq!(cfg.sink.write_retries, 5);
    assert_eq!(cfg.sink.retry_backoff, Duration::from_millis(50));
    assert_eq!(cfg.slot.stale_after, Duration::from_millis(1500));
    assert_eq!(cfg.slot.expire_after, Duration::from_millis(20000));
    assert_eq!(cfg.capture.backoff_base, Duration::from_millis(100));
    assert_eq!(cfg.capture.backoff_cap, Duration::from_millis(2000));
    // The capture thread paces itself at the stream's target rate.
    assert_eq!(cfg.capture.target_fps, 12);

    clear_env();
}

#[test]
fn unknown_queue_policy_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [queue]
        policy = "round_robin"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("VIGIL_CONFIG", file.path());

    let err = VigilConfig::load().unwrap_err();
    assert!(err.to_string().contains("round_robin"), "{err}");

    clear_env();
}

#[test]
fn invalid_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [motion]
        alpha = 0.0
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("VIGIL_CONFIG", file.path());

    let err = VigilConfig::load().unwrap_err();
    assert!(err.to_string().contains("alpha"), "{err}");

    clear_env();
}

#[test]
fn malformed_env_number_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_TOLERANCE", "very close");
    let err = VigilConfig::load().unwrap_err();
    assert!(err.to_string().contains("VIGIL_TOLERANCE"), "{err}");

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_CONFIG", "/nonexistent/vigil.toml");
    assert!(VigilConfig::load().is_err());

    clear_env();
}
