use std::fs::File;
use std::io::{stdin, Read};
use std::path::Path;

use serde::Deserialize;

use crate::error::WatchBoxError;
use crate::utils::{GidType, MemoryLimitType, TimeLimitType, UidType};

/// One job description, immutable for the run.
///
/// Every key is required; a missing key or malformed JSON is a
/// pre-flight error and no verdict is produced.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
  /// Shell command line, passed verbatim to `/bin/sh -c`.
  pub command: String,
  /// Bytes fed to the target's stdin.
  pub stdin: String,
  /// Wall-clock deadline in milliseconds, 0 disables it.
  #[serde(rename = "timeoutMS")]
  pub timeout_ms: TimeLimitType,
  /// Memory cap in megabytes, 0 disables it.
  #[serde(rename = "memoryLimitMB")]
  pub memory_limit_mb: MemoryLimitType,
  /// Credentials the target assumes before exec.
  pub uid: UidType,
  pub gid: GidType,
}

impl JobSpec {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<JobSpec, WatchBoxError> {
    let file = File::open(path.as_ref()).map_err(|err| {
      WatchBoxError::job(format!(
        "failed to open {}: {}",
        path.as_ref().to_string_lossy(),
        err
      ))
    })?;
    Ok(serde_json::from_reader(file)?)
  }

  pub fn from_stdin() -> Result<JobSpec, WatchBoxError> {
    let mut text = String::new();
    stdin()
      .read_to_string(&mut text)
      .map_err(|err| WatchBoxError::job(format!("failed to read stdin: {}", err)))?;
    Ok(serde_json::from_str(&text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"{
    "command": "/bin/echo hello",
    "stdin": "",
    "timeoutMS": 1000,
    "memoryLimitMB": 64,
    "uid": 1000,
    "gid": 1000
  }"#;

  #[test]
  fn it_parses_a_full_job() {
    let job: JobSpec = serde_json::from_str(FULL).unwrap();
    assert_eq!(job.command, "/bin/echo hello");
    assert_eq!(job.stdin, "");
    assert_eq!(job.timeout_ms, 1000);
    assert_eq!(job.memory_limit_mb, 64);
    assert_eq!(job.uid, 1000);
    assert_eq!(job.gid, 1000);
  }

  #[test]
  fn it_rejects_a_missing_key() {
    let text = r#"{ "command": "true", "stdin": "", "timeoutMS": 0, "uid": 0, "gid": 0 }"#;
    let err = serde_json::from_str::<JobSpec>(text).unwrap_err();
    assert!(err.to_string().contains("memoryLimitMB"));
  }

  #[test]
  fn it_rejects_malformed_json() {
    assert!(serde_json::from_str::<JobSpec>("{ not json").is_err());
  }

  #[test]
  fn it_reports_missing_files() {
    let err = JobSpec::from_path("/nonexistent/job.json").unwrap_err();
    assert!(format!("{}", err).starts_with("WatchBox Job Error"));
  }
}
