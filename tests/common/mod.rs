//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use rbtv_dl::ffmpeg::Transcoder;
use tokio::process::Command;

/// Supervisor with a short grace period so kill paths stay quick.
pub fn transcoder() -> Transcoder {
    Transcoder {
        program: PathBuf::from("sh"),
        grace: Duration::from_millis(200),
        chunk_size: 8192,
    }
}

pub fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

/// Polls until `pid` no longer exists. Returns false after `timeout`.
pub async fn wait_until_gone(pid: u32, timeout: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if kill(Pid::from_raw(pid as i32), None::<Signal>).is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Writes an executable stand-in for ffmpeg that runs `body` and records its
/// arguments, one per line, in `<dir>/args.txt`.
pub fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ffmpeg");
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n{}\n",
        dir.join("args.txt").display(),
        body
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
