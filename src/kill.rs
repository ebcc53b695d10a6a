use std::fs::{read_dir, read_to_string};

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Kill a process and every descendant, leaves first.
///
/// The target runs under `/bin/sh -c`, so pipelines and subshells leave
/// grandchildren holding the capture pipe write ends. Killing only the
/// leader reparents them to init and the drain never reaches EOF.
/// Enumeration races with the tree spawning new members; the target is
/// its own process group leader, so a group-wide SIGKILL afterwards
/// catches anything the walk missed. Every failure here is swallowed:
/// the pid may already be gone, and that is the desired end state.
pub fn kill_tree(pid: Pid) {
  kill_recursive(pid);
  let _ = killpg(pid, Signal::SIGKILL);
}

fn kill_recursive(pid: Pid) {
  for child in child_pids(pid) {
    kill_recursive(child);
  }
  debug!("Kill process #{}", pid);
  let _ = kill(pid, Signal::SIGKILL);
}

/// Zero-signal probe. Only ESRCH proves the process is gone; EPERM
/// means it is alive but owned by someone else.
pub fn is_alive(pid: Pid) -> bool {
  match kill(pid, None) {
    Ok(_) => true,
    Err(errno) => errno != Errno::ESRCH,
  }
}

/// Enumerate direct children of `parent` by scanning `/proc/<pid>/stat`.
fn child_pids(parent: Pid) -> Vec<Pid> {
  let mut children = vec![];
  let entries = match read_dir("/proc") {
    Ok(entries) => entries,
    Err(_) => return children,
  };
  for entry in entries.flatten() {
    let name = entry.file_name();
    let pid = match name.to_str().and_then(|name| name.parse::<i32>().ok()) {
      Some(pid) => pid,
      None => continue,
    };
    let stat = match read_to_string(entry.path().join("stat")) {
      Ok(stat) => stat,
      Err(_) => continue,
    };
    if stat_ppid(&stat) == Some(parent.as_raw()) {
      children.push(Pid::from_raw(pid));
    }
  }
  children
}

/// Parse the ppid field of a `/proc/<pid>/stat` line.
///
/// The comm field may contain spaces and parentheses, so fields are
/// split only after the last `)`.
fn stat_ppid(stat: &str) -> Option<i32> {
  let rest = &stat[stat.rfind(')')? + 1..];
  let mut fields = rest.split_ascii_whitespace();
  let _state = fields.next()?;
  fields.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_parses_ppid_from_stat() {
    let stat = "1234 (cat) R 42 1234 1234 0 -1 4194304 95 0 0 0 0 0 0 0 20\n";
    assert_eq!(stat_ppid(stat), Some(42));
  }

  #[test]
  fn it_parses_ppid_with_hostile_comm() {
    let stat = "77 (a b) c) Z 9 77 77 0 -1 4194304 0 0 0 0 0 0 0 0 20\n";
    assert_eq!(stat_ppid(stat), Some(9));
  }

  #[test]
  fn it_rejects_garbage_stat() {
    assert_eq!(stat_ppid("no parens here"), None);
    assert_eq!(stat_ppid("1 (x"), None);
  }

  #[test]
  fn it_probes_own_liveness() {
    assert!(is_alive(Pid::this()));
    assert!(!is_alive(Pid::from_raw(i32::MAX - 1)));
  }
}
