/// Capacity of each captured stream.
pub const CAPTURE_CAPACITY: usize = 4096;

/// Length of the original prefix kept when a buffer overflows.
const TRUNCATE_PREFIX: usize = 100;

/// Append-only byte buffer with a hard capacity.
///
/// Children may print gigabytes; the capture must not. Once an append
/// would push the contents past the capacity, the buffer is replaced by
/// the first bytes of what was already captured plus a marker line, and
/// every later append is ignored.
pub struct CaptureBuffer {
  label: &'static str,
  capacity: usize,
  data: Vec<u8>,
  truncated: bool,
}

impl CaptureBuffer {
  pub fn new(label: &'static str) -> Self {
    Self::with_capacity(label, CAPTURE_CAPACITY)
  }

  pub fn with_capacity(label: &'static str, capacity: usize) -> Self {
    CaptureBuffer {
      label,
      capacity,
      data: Vec::with_capacity(capacity.min(CAPTURE_CAPACITY)),
      truncated: false,
    }
  }

  /// Append a chunk, truncating on overflow.
  ///
  /// The overflowing chunk itself is discarded: the kept prefix comes
  /// from bytes that were committed before the overflow.
  pub fn append(&mut self, chunk: &[u8]) {
    if self.truncated {
      return;
    }
    if self.data.len() + chunk.len() > self.capacity {
      self.truncate();
    } else {
      self.data.extend_from_slice(chunk);
    }
  }

  fn truncate(&mut self) {
    self.data.truncate(TRUNCATE_PREFIX);
    self.data.extend_from_slice(self.marker().as_bytes());
    self.truncated = true;
  }

  pub fn truncated(&self) -> bool {
    self.truncated
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  /// Marker appended after the kept prefix on overflow.
  pub fn marker(&self) -> String {
    format!(
      "...\n{} is too long. capacity({}bytes) exceeded\n",
      self.label, self.capacity
    )
  }

  /// Recover the captured bytes as text. The prefix cut may split a
  /// multi-byte character, so invalid sequences are replaced rather
  /// than rejected.
  pub fn into_string(self) -> String {
    String::from_utf8_lossy(&self.data).into_owned()
  }
}
