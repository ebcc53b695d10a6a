use std::io::Write;

use nix::sys::wait::WaitStatus;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::error::WatchBoxError;

/// The single record summarizing one run, written to stdout exactly
/// once. The target's own exit code lives here, never in the watchdog's
/// exit status.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
  #[serde(rename = "timeMS")]
  pub time_ms: u64,
  #[serde(rename = "memoryKB")]
  pub memory_kb: u64,
  #[serde(rename = "TLE")]
  pub tle: bool,
  #[serde(rename = "MLE")]
  pub mle: bool,
}

impl Verdict {
  /// Map the reaped status word: a normal exit keeps its status, a
  /// signal death becomes `128 + signo`, anything else is -1.
  pub fn exit_code_of(status: &WaitStatus) -> i32 {
    match status {
      WaitStatus::Exited(_, code) => *code,
      WaitStatus::Signaled(_, signal, _) => 128 + *signal as i32,
      _ => -1,
    }
  }

  /// Pretty JSON with 4-space indent, terminated by a newline.
  pub fn to_json(&self) -> Result<String, WatchBoxError> {
    let mut out = Vec::with_capacity(256);
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    self.serialize(&mut serializer)?;
    out.write_all(b"\n")?;
    Ok(String::from_utf8_lossy(&out).into_owned())
  }
}
