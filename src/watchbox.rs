use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use nix::errno::Errno;
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, close, dup2, execvp, fork, pipe, setgid, setpgid, setuid, ForkResult};
use nix::unistd::{Gid, Pid, Uid};

use crate::buffer::CaptureBuffer;
use crate::error::WatchBoxError;
use crate::job::JobSpec;
use crate::kill::{is_alive, kill_tree};
use crate::memory::MemorySampler;
use crate::pipe::{WatchBoxPipe, WatchBoxReadPipe, PIPE_CHUNK};
use crate::utils::into_c_string;
use crate::verdict::Verdict;

/// Memory sampling and pipe pump cadence.
const MONITOR_TICK: Duration = Duration::from_millis(10);

/// Deadline check cadence.
const DEADLINE_TICK: Duration = Duration::from_millis(50);

/// Capture state handed back by the monitor thread at join time.
struct Captured {
  stdout_pipe: WatchBoxReadPipe,
  stderr_pipe: WatchBoxReadPipe,
  stdout: CaptureBuffer,
  stderr: CaptureBuffer,
}

/// Supervise one job: fork the target group, enforce the limits, reap
/// everything and compose the verdict.
///
/// Failures before the fork are pre-flight errors; after a successful
/// fork this always produces a verdict, because the caller has no other
/// way to learn what happened to the target.
pub fn run(job: &JobSpec) -> Result<Verdict, WatchBoxError> {
  let stdout_pipe = WatchBoxPipe::new()?;
  let stderr_pipe = WatchBoxPipe::new()?;

  match unsafe { fork() } {
    Ok(ForkResult::Parent { child, .. }) => {
      let stdout_pipe = stdout_pipe.read()?;
      let stderr_pipe = stderr_pipe.read()?;

      supervise(job, child, stdout_pipe, stderr_pipe)
    }
    Ok(ForkResult::Child) => {
      // Nothing down here returns. Diagnostics go to the redirected
      // stderr, which the parent captures into the verdict.
      exec_target(job, stdout_pipe, stderr_pipe);
    }
    Err(errno) => Err(WatchBoxError::fork(format!("fork failed: {}", errno))),
  }
}

/// Parent arm: monitors, reap, drain, verdict.
fn supervise(
  job: &JobSpec,
  target: Pid,
  stdout_pipe: WatchBoxReadPipe,
  stderr_pipe: WatchBoxReadPipe,
) -> Result<Verdict, WatchBoxError> {
  info!("Target process #{} is forked", target);

  let start = Instant::now();
  let finished = Arc::new(AtomicBool::new(false));
  let peak_memory = Arc::new(AtomicU64::new(0));
  let memory_cap_bytes = job.memory_limit_mb * 1024 * 1024;

  let monitor = spawn_monitor(
    target,
    stdout_pipe,
    stderr_pipe,
    finished.clone(),
    peak_memory.clone(),
    memory_cap_bytes,
  );
  let deadline = spawn_deadline(target, start, job.timeout_ms, finished.clone());

  let status = loop {
    match waitpid(target, None) {
      Ok(status) => break status,
      Err(Errno::EINTR) => continue,
      Err(errno) => {
        error!("Wait for target #{} failed: {}", target, errno);
        kill_tree(target);
        break WaitStatus::StillAlive;
      }
    }
  };
  finished.store(true, Ordering::SeqCst);

  match status {
    WaitStatus::Exited(pid, code) => {
      info!("Target process #{} exited with status {}", pid, code)
    }
    WaitStatus::Signaled(pid, signal, _) => {
      info!("Target process #{} is signaled by {}", pid, signal)
    }
    _ => error!("Target process #{} stopped in an unexpected way", target),
  }

  let mut captured = monitor.join().expect("Monitor thread should not panic");
  deadline.join().expect("Deadline thread should not panic");

  // Residual output buffered between the last pump tick and the exit.
  captured.stdout_pipe.drain_into(&mut captured.stdout);
  captured.stderr_pipe.drain_into(&mut captured.stderr);
  captured.stdout_pipe.close()?;
  captured.stderr_pipe.close()?;

  let time_ms = start.elapsed().as_millis() as u64;
  let peak_bytes = peak_memory.load(Ordering::SeqCst);

  let verdict = Verdict {
    exit_code: Verdict::exit_code_of(&status),
    stdout: captured.stdout.into_string(),
    stderr: captured.stderr.into_string(),
    time_ms,
    memory_kb: peak_bytes / 1024,
    tle: job.timeout_ms > 0 && time_ms >= job.timeout_ms,
    mle: memory_cap_bytes > 0 && peak_bytes >= memory_cap_bytes,
  };
  info!(
    "Job finished: exit_code {}, time {} ms, memory {} KB, TLE {}, MLE {}",
    verdict.exit_code, verdict.time_ms, verdict.memory_kb, verdict.tle, verdict.mle
  );
  Ok(verdict)
}

/// The folded pump + resource monitor: every tick, sample the memory
/// counter and drain one chunk from each capture pipe. Exits when the
/// latch is set, when a memory cap trip killed the tree, or when a
/// buffer overflowed (the deadline thread's liveness check then makes
/// the run converge).
fn spawn_monitor(
  target: Pid,
  stdout_pipe: WatchBoxReadPipe,
  stderr_pipe: WatchBoxReadPipe,
  finished: Arc<AtomicBool>,
  peak_memory: Arc<AtomicU64>,
  memory_cap_bytes: u64,
) -> JoinHandle<Captured> {
  thread::spawn(move || {
    let mut sampler = MemorySampler::from_env();
    let mut captured = Captured {
      stdout_pipe,
      stderr_pipe,
      stdout: CaptureBuffer::new("stdout"),
      stderr: CaptureBuffer::new("stderr"),
    };
    let mut chunk = [0u8; PIPE_CHUNK];

    while !finished.load(Ordering::SeqCst) {
      if let Some(sample) = sampler.sample() {
        peak_memory.fetch_max(sample, Ordering::SeqCst);
        if memory_cap_bytes > 0 && sample > memory_cap_bytes {
          info!(
            "Target #{} uses {} bytes, over the cap of {} bytes",
            target, sample, memory_cap_bytes
          );
          finished.store(true, Ordering::SeqCst);
          kill_tree(target);
          break;
        }
      }

      if let Some(count) = captured.stdout_pipe.poll_read(&mut chunk) {
        captured.stdout.append(&chunk[..count]);
        if captured.stdout.truncated() {
          info!("Target #{} stdout overflowed the capture", target);
          finished.store(true, Ordering::SeqCst);
          break;
        }
      }

      if let Some(count) = captured.stderr_pipe.poll_read(&mut chunk) {
        captured.stderr.append(&chunk[..count]);
        if captured.stderr.truncated() {
          info!("Target #{} stderr overflowed the capture", target);
          finished.store(true, Ordering::SeqCst);
          break;
        }
      }

      thread::sleep(MONITOR_TICK);
    }

    captured
  })
}

/// Wall-clock deadline. A zero timeout disables the deadline check, but
/// the thread still runs for the final liveness sweep: whoever set the
/// latch (deadline, memory cap, output overflow), anything still alive
/// under the target is killed here.
fn spawn_deadline(
  target: Pid,
  start: Instant,
  timeout_ms: u64,
  finished: Arc<AtomicBool>,
) -> JoinHandle<()> {
  thread::spawn(move || {
    while !finished.load(Ordering::SeqCst) {
      if timeout_ms > 0 && start.elapsed().as_millis() as u64 >= timeout_ms {
        info!("Target #{} hit the {} ms deadline", target, timeout_ms);
        finished.store(true, Ordering::SeqCst);
        kill_tree(target);
        break;
      }
      thread::sleep(DEADLINE_TICK);
    }
    if is_alive(target) {
      debug!("Target #{} is still alive after the latch, killing again", target);
      kill_tree(target);
    }
  })
}

/// Child arm: redirect the captures, become a process group leader,
/// drop privileges, wire the stdin writer and exec the shell. Never
/// returns; every failure exits non-zero, which the parent reports as
/// the verdict's exit code.
fn exec_target(job: &JobSpec, stdout_pipe: WatchBoxPipe, stderr_pipe: WatchBoxPipe) -> ! {
  if stdout_pipe.redirect_write(STDOUT_FILENO).is_err()
    || stderr_pipe.redirect_write(STDERR_FILENO).is_err()
  {
    unsafe { libc::_exit(1) };
  }

  // Own group, so a group-wide SIGKILL can reach the whole shell subtree.
  if let Err(err) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
    eprintln!("setpgid failed: {}", err);
    unsafe { libc::_exit(1) };
  }

  // Group first: setuid would drop the right to change groups.
  if let Err(err) = setgid(Gid::from_raw(job.gid)) {
    eprintln!("setgid failed: {}", err);
    unsafe { libc::_exit(1) };
  }
  if let Err(err) = setuid(Uid::from_raw(job.uid)) {
    eprintln!("setuid failed: {}", err);
    unsafe { libc::_exit(1) };
  }

  if let Err(err) = deliver_stdin(job.stdin.as_bytes()) {
    eprintln!("stdin setup failed: {}", err);
    unsafe { libc::_exit(1) };
  }

  // The runtime ignores SIGPIPE and an ignored disposition survives
  // exec. The target tree expects the default (a pipeline like
  // `yes | head -1` ends `yes` with 128+13); the stdin writer was
  // forked above and keeps the ignored disposition for its EPIPE exit.
  if let Err(err) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
    eprintln!("reset SIGPIPE failed: {}", err);
    unsafe { libc::_exit(1) };
  }

  let program = into_c_string("/bin/sh");
  let args = [
    into_c_string("sh"),
    into_c_string("-c"),
    into_c_string(&job.command),
  ];
  let result = execvp(&program, &args);
  if let Err(err) = result {
    eprintln!("exec /bin/sh failed: {}", err);
  }
  unsafe { libc::_exit(1) };
}

/// Fork the stdin writer and take its read end as fd 0.
///
/// The writer pushes the whole payload through a pipe, tolerating short
/// writes and EINTR. When the target exits without consuming its stdin
/// the writer sees EPIPE and quits silently; that is a normal outcome,
/// not a diagnostic.
fn deliver_stdin(payload: &[u8]) -> nix::Result<()> {
  let (stdin_read, stdin_write) = pipe()?;

  let writer = unsafe { fork() }?;
  match writer {
    ForkResult::Child => {
      let _ = close(stdin_read);
      let mut remaining = payload;
      while !remaining.is_empty() {
        match unistd::write(stdin_write, remaining) {
          Ok(written) => remaining = &remaining[written..],
          Err(Errno::EINTR) => continue,
          Err(Errno::EPIPE) => unsafe { libc::_exit(0) },
          Err(err) => {
            eprintln!("write to stdin pipe failed: {}", err);
            unsafe { libc::_exit(1) };
          }
        }
      }
      let _ = close(stdin_write);
      unsafe { libc::_exit(0) };
    }
    ForkResult::Parent { .. } => {
      close(stdin_write)?;
      dup2(stdin_read, STDIN_FILENO)?;
      close(stdin_read)?;
      Ok(())
    }
  }
}
