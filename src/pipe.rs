use std::os::unix::prelude::RawFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{self, close, dup2, pipe};

use crate::buffer::CaptureBuffer;
use crate::error::WatchBoxError;

/// One read per pump tick, matching the capture capacity.
pub const PIPE_CHUNK: usize = 4096;

/// A capture pipe for one of the target's output streams.
///
/// Created before the fork; the child arm redirects the write end onto
/// its stdout or stderr, the parent arm keeps the read end.
pub struct WatchBoxPipe(RawFd, RawFd);

pub struct WatchBoxReadPipe(RawFd);

impl WatchBoxPipe {
  pub fn new() -> Result<Self, WatchBoxError> {
    let result = pipe()?;
    Ok(WatchBoxPipe(result.0, result.1))
  }

  /// Parent arm: drop the write end, keep reading.
  pub fn read(self) -> Result<WatchBoxReadPipe, WatchBoxError> {
    close(self.1)?;
    Ok(WatchBoxReadPipe(self.0))
  }

  /// Child arm: wire the write end onto `fd` and drop both originals.
  pub fn redirect_write(self, fd: RawFd) -> nix::Result<()> {
    dup2(self.1, fd)?;
    close(self.0)?;
    close(self.1)?;
    Ok(())
  }
}

impl WatchBoxReadPipe {
  /// One non-blocking pump tick: poll with zero timeout, then read at
  /// most one chunk. `None` means nothing readable right now; hiccups
  /// are swallowed because the pump must outlive them.
  pub fn poll_read(&self, buf: &mut [u8]) -> Option<usize> {
    let mut fds = [PollFd::new(self.0, PollFlags::POLLIN)];
    match poll(&mut fds, 0) {
      Ok(n) if n > 0 => {
        let readable = fds[0]
          .revents()
          .map_or(false, |revents| revents.contains(PollFlags::POLLIN));
        if readable {
          unistd::read(self.0, buf).ok().filter(|count| *count > 0)
        } else {
          None
        }
      }
      _ => None,
    }
  }

  /// Blocking reads until EOF, emptying whatever the kernel buffered
  /// between the last pump tick and the target's death. Stops early
  /// once the buffer has overflowed.
  pub fn drain_into(&self, buf: &mut CaptureBuffer) {
    let mut chunk = [0u8; PIPE_CHUNK];
    loop {
      match unistd::read(self.0, &mut chunk) {
        Ok(0) => break,
        Ok(count) => {
          buf.append(&chunk[..count]);
          if buf.truncated() {
            break;
          }
        }
        Err(Errno::EINTR) => continue,
        Err(_) => break,
      }
    }
  }

  pub fn close(self) -> Result<(), WatchBoxError> {
    Ok(())
  }
}

impl Drop for WatchBoxReadPipe {
  fn drop(&mut self) {
    let _ = close(self.0);
  }
}
