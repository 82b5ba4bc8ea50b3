//! Supervisor tests against real OS processes.
//!
//! These tests verify that:
//! 1. Two consecutive start signals leave exactly one live pipeline process
//! 2. A stop signal terminates the pipeline and returns to Idle
//! 3. A pipeline that ignores SIGTERM is killed after the grace period
//! 4. The capture_pipeline binary writes captures and stops writing once stopped
#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use capture_sentinel::{
    CommandLauncher, ConfigLoader, PipelineChild, PipelineLauncher, RunConfig, Signal,
    Supervisor, SupervisorSettings, SupervisorState,
};

const STUB_CONFIG: &str = r#"{
    "source_type": "rtsp",
    "source": {"stream_0": "stub://cam0", "stream_1": "stub://cam1"},
    "display": false,
    "processing_width": 32,
    "processing_height": 24,
    "tiler_width": 32,
    "tiler_height": 24,
    "image_timer": 600,
    "queue_size": 10
}"#;

fn settings(dir: &Path) -> SupervisorSettings {
    let config_path = dir.join("config.json");
    std::fs::write(&config_path, STUB_CONFIG).unwrap();
    SupervisorSettings {
        signal_dir: dir.join("check"),
        config: ConfigLoader::new(config_path),
        poll_interval: Duration::from_millis(10),
        signal_settle: Duration::ZERO,
        respawn_delay: Duration::ZERO,
        terminate_grace: Duration::from_millis(500),
    }
}

/// `sh -c '<script>' <config-json>`: the config lands in $0 and is ignored.
fn shell_launcher(script: &str) -> CommandLauncher {
    CommandLauncher::new("/bin/sh").with_args(["-c", script])
}

fn alive(pid: u32) -> bool {
    // Reaped children disappear from /proc; zombies report state Z.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat.contains(") Z "),
        Err(_) => false,
    }
}

fn running_pid(state: SupervisorState) -> u32 {
    match state {
        SupervisorState::Running { pid } => pid,
        SupervisorState::Idle => panic!("expected a running pipeline"),
    }
}

fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

fn count_files(dir: PathBuf) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn restart_keeps_a_single_live_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut sup = Supervisor::new(settings(dir.path()), shell_launcher("sleep 30"));

    sup.watcher().raise(Signal::Start).unwrap();
    let first = running_pid(sup.step());
    assert!(alive(first));

    std::thread::sleep(Duration::from_secs(1));
    sup.watcher().raise(Signal::Start).unwrap();
    let second = running_pid(sup.step());

    assert_ne!(first, second);
    assert!(!alive(first));
    assert!(alive(second));

    sup.watcher().raise(Signal::Stop).unwrap();
    assert_eq!(sup.step(), SupervisorState::Idle);
    assert!(!alive(second));
}

#[test]
fn self_exit_is_detected_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut sup = Supervisor::new(settings(dir.path()), shell_launcher("exit 3"));

    sup.watcher().raise(Signal::Start).unwrap();
    sup.step();
    let exited = wait_for(Duration::from_secs(5), || sup.step() == SupervisorState::Idle);
    assert!(exited);
    assert_eq!(sup.step(), SupervisorState::Idle);
}

#[test]
fn sigterm_resistant_child_is_killed_after_grace() {
    let config = RunConfig::from_json_str(STUB_CONFIG, true).unwrap();
    let mut launcher = shell_launcher("trap '' TERM; while :; do sleep 0.05; done");
    let mut child = launcher.launch(&config).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    let exit = child.terminate(Duration::from_millis(300)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(exit.signal, Some(9));
    assert!(!alive(child.id()));
}

#[test]
fn pipeline_binary_captures_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("images");
    let launcher = CommandLauncher::new(env!("CARGO_BIN_EXE_capture_pipeline"))
        .with_env("CAPTURE_OUTPUT_DIR", output.to_string_lossy().into_owned())
        .with_env("RUST_LOG", "warn");
    let mut sup = Supervisor::new(settings(dir.path()), launcher);

    sup.watcher().raise(Signal::Start).unwrap();
    let pid = running_pid(sup.step());

    // The first empty frame of the run is a negative capture.
    let negative = output.join("negative/stream_0");
    let captured = wait_for(Duration::from_secs(10), || count_files(negative.clone()) == 1);
    assert!(captured);
    assert!(output.join("positive/stream_1").is_dir());
    assert!(output.join("negative/stream_1").is_dir());

    sup.watcher().raise(Signal::Stop).unwrap();
    assert_eq!(sup.step(), SupervisorState::Idle);
    assert!(!alive(pid));

    let total = || {
        count_files(output.join("positive/stream_0"))
            + count_files(output.join("negative/stream_0"))
    };
    let after_stop = total();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(total(), after_stop);
}
