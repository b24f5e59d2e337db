use std::borrow::Cow;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Lowercases a raw input line and strips every `http://` / `https://`
/// occurrence, wherever it appears. Returns `None` for lines that end up empty.
pub fn normalize(line: &str) -> Option<String> {
    let mut target = line.trim().to_lowercase();

    // Stripping can join the halves of a scheme, so repeat until nothing is left.
    while SCHEMES.iter().any(|scheme| target.contains(scheme)) {
        target = SCHEMES
            .iter()
            .fold(target, |acc, scheme| acc.replace(scheme, ""));
    }

    let target = target.trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// Lazy, single-pass sequence of normalized targets read from a line source.
///
/// Duplicate lines are not collapsed: each one is handed out again. Lines are
/// read as raw bytes, so invalid UTF-8 is replaced rather than ending the input.
pub struct Targets<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> Targets<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next non-blank target, or `None` once the input is exhausted.
    pub async fn next_target(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf);
            if matches!(line, Cow::Owned(_)) {
                debug!(line = %line.trim_end(), "input line is not valid UTF-8");
            }
            if let Some(target) = normalize(&line) {
                return Ok(Some(target));
            }
        }
    }
}
