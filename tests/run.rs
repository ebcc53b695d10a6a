use std::fs::{read_dir, read_to_string};
use std::time::Instant;

use log::info;
use nix::unistd::{Gid, Uid};

use watchbox::{run, CaptureBuffer, JobSpec, CAPTURE_CAPACITY};

mod common;

fn job(command: &str) -> JobSpec {
  JobSpec {
    command: command.to_string(),
    stdin: String::new(),
    timeout_ms: 1000,
    // The cap stays disabled here: the watchdog may share its cgroup
    // with the whole test run, so an armed cap would fire spuriously.
    memory_limit_mb: 0,
    uid: Uid::current().as_raw(),
    gid: Gid::current().as_raw(),
  }
}

/// Count live processes whose command line contains `needle`.
fn count_procs_matching(needle: &str) -> usize {
  let mut count = 0;
  for entry in read_dir("/proc").unwrap().flatten() {
    let name = entry.file_name();
    if name.to_str().map_or(true, |name| name.parse::<u32>().is_err()) {
      continue;
    }
    if let Ok(cmdline) = read_to_string(entry.path().join("cmdline")) {
      if cmdline.replace('\0', " ").contains(needle) {
        count += 1;
      }
    }
  }
  count
}

#[test]
fn it_should_run_clean_exit() {
  common::setup();

  let verdict = run(&job("/bin/echo hello")).unwrap();

  info!("Clean exit verdict: {:?}", verdict);
  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "hello\n");
  assert_eq!(verdict.stderr, "");
  assert!(!verdict.tle);
  assert!(!verdict.mle);
  assert!(verdict.time_ms < 1000);
}

#[test]
fn it_should_report_nonzero_exit() {
  common::setup();

  let verdict = run(&job("exit 7")).unwrap();

  assert_eq!(verdict.exit_code, 7);
  assert!(!verdict.tle);
  assert!(!verdict.mle);
}

#[test]
fn it_should_report_signal_death() {
  common::setup();

  let verdict = run(&job("kill -SEGV $$")).unwrap();

  assert_eq!(verdict.exit_code, 128 + 11);
  assert!(!verdict.tle);
}

#[test]
fn it_should_kill_on_deadline() {
  common::setup();

  let mut spec = job("sleep 10");
  spec.timeout_ms = 200;

  let clock = Instant::now();
  let verdict = run(&spec).unwrap();

  info!("Deadline verdict: {:?}", verdict);
  assert!(verdict.tle);
  assert_eq!(verdict.exit_code, 128 + 9);
  assert!(verdict.time_ms >= 200);
  assert!(clock.elapsed().as_millis() < 5000, "run did not converge");
}

#[test]
fn it_should_converge_on_shell_pipelines() {
  common::setup();

  // The pipeline leaves a grandchild holding the stdout write end; the
  // run only converges if the whole tree is killed and reaped.
  let mut spec = job("sleep 737 | cat");
  spec.timeout_ms = 200;

  let clock = Instant::now();
  let verdict = run(&spec).unwrap();

  assert!(verdict.tle);
  assert!(verdict.time_ms >= 200);
  assert!(clock.elapsed().as_millis() < 5000, "pipeline kept the pipe open");
  assert_eq!(count_procs_matching("sleep 737"), 0);
}

#[test]
fn it_should_truncate_runaway_stdout() {
  common::setup();

  let mut spec = job("yes");
  spec.timeout_ms = 5000;

  let verdict = run(&spec).unwrap();

  let marker = CaptureBuffer::new("stdout").marker();
  info!("Overflow verdict: {} stdout bytes", verdict.stdout.len());
  assert!(verdict.stdout.ends_with(&marker));
  assert!(verdict.stdout.len() <= CAPTURE_CAPACITY);
  assert!(!verdict.tle, "overflow should end the run before the deadline");
  assert!(verdict.time_ms < 5000);
}

#[test]
fn it_should_truncate_runaway_stderr() {
  common::setup();

  let mut spec = job("yes error 1>&2");
  spec.timeout_ms = 5000;

  let verdict = run(&spec).unwrap();

  let marker = CaptureBuffer::new("stderr").marker();
  assert!(verdict.stderr.ends_with(&marker));
  assert!(verdict.stderr.len() <= CAPTURE_CAPACITY);
  assert!(verdict.time_ms < 5000);
}

#[test]
fn it_should_deliver_stdin() {
  common::setup();

  let mut spec = job("/bin/cat");
  spec.stdin = "abc\n".to_string();

  let verdict = run(&spec).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "abc\n");
  assert!(!verdict.tle);
}

#[test]
fn it_should_capture_both_streams() {
  common::setup();

  let verdict = run(&job("echo out; echo err 1>&2")).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "out\n");
  assert_eq!(verdict.stderr, "err\n");
}

#[test]
fn it_should_run_without_a_deadline() {
  common::setup();

  let mut spec = job("/bin/echo unlimited");
  spec.timeout_ms = 0;

  let verdict = run(&spec).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "unlimited\n");
  assert!(!verdict.tle);
}
