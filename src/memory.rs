use std::env;
use std::fs::read_to_string;
use std::path::PathBuf;

use log::warn;

/// Default cgroup-v2 memory counter. The host is expected to start the
/// watchdog inside a cgroup whose counter reflects the target.
const MEMORY_CURRENT: &str = "/sys/fs/cgroup/memory.current";

/// Environment variable overriding the counter path.
pub const MEMORY_PATH_ENV: &str = "WATCHBOX_CGROUP_MEMORY";

/// Reads the current memory usage in bytes from the host counter.
///
/// A host without the counter gets a degraded monitor: samples are
/// `None`, the recorded peak stays zero and MLE never fires.
pub struct MemorySampler {
  path: PathBuf,
  missing_warned: bool,
}

impl MemorySampler {
  pub fn from_env() -> Self {
    let path = env::var(MEMORY_PATH_ENV)
      .map(PathBuf::from)
      .unwrap_or_else(|_| PathBuf::from(MEMORY_CURRENT));
    MemorySampler {
      path,
      missing_warned: false,
    }
  }

  pub fn new(path: PathBuf) -> Self {
    MemorySampler {
      path,
      missing_warned: false,
    }
  }

  /// One sample in bytes. Transient read or parse failures are
  /// swallowed; the first one is logged.
  pub fn sample(&mut self) -> Option<u64> {
    let text = match read_to_string(&self.path) {
      Ok(text) => text,
      Err(err) => {
        if !self.missing_warned {
          warn!(
            "Memory counter {} is unreadable ({}), monitor degraded",
            self.path.display(),
            err
          );
          self.missing_warned = true;
        }
        return None;
      }
    };
    text.trim().parse().ok()
  }
}
