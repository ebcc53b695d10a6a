use std::ffi::CString;

use flexi_logger::DeferredNow;
use log::Record;
use nix::libc::{gid_t, uid_t};

pub type TimeLimitType = u64;

pub type MemoryLimitType = u64;

pub type UidType = uid_t;

pub type GidType = gid_t;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Job finished with exit code 0```
#[allow(unused)]
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

pub(crate) fn into_c_string(string: &str) -> CString {
  CString::new(string).expect("Convert &str to CString should work")
}
