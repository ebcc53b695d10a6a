pub use buffer::{CaptureBuffer, CAPTURE_CAPACITY};
pub use error::{WatchBoxError, WatchBoxExit};
pub use job::JobSpec;
pub use memory::MEMORY_PATH_ENV;
pub use verdict::Verdict;
pub use watchbox::run;

mod buffer;
mod error;
mod job;
mod kill;
mod memory;
mod pipe;
mod utils;
mod verdict;
mod watchbox;
