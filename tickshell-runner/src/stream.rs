//! Bounded line reads over child pipes, async and blocking.
//!
//! The line terminator (`\n` or `\r\n`) is stripped. A final line without a
//! terminator is still returned before [`ReadLineResult::Eof`].

use std::io::{self, BufRead};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Result of a bounded line read. The line bytes are left in the caller's
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLineResult {
    Line,
    /// The line exceeded the limit; the buffer holds its first bytes.
    Truncated,
    Eof,
}

/// Append the part of `available` that belongs to the current line.
/// Returns how many bytes to consume and whether the line ended.
fn take_chunk(buf: &mut Vec<u8>, available: &[u8], max_len: usize, truncated: &mut bool) -> (usize, bool) {
    let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
        Some(pos) => (&available[..pos], pos + 1, true),
        None => (available, available.len(), false),
    };

    let room = max_len.saturating_sub(buf.len());
    if chunk.len() > room {
        *truncated = true;
        buf.extend_from_slice(&chunk[..room]);
    } else {
        buf.extend_from_slice(chunk);
    }
    (consumed, complete)
}

fn finish(buf: &mut Vec<u8>, truncated: bool) -> ReadLineResult {
    if !truncated && buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if truncated {
        ReadLineResult::Truncated
    } else {
        ReadLineResult::Line
    }
}

/// Read a line with a size limit, preventing unbounded memory growth.
pub async fn read_line_with_limit<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<ReadLineResult> {
    buf.clear();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if read_any {
                finish(buf, truncated)
            } else {
                ReadLineResult::Eof
            });
        }

        read_any = true;
        let (consumed, complete) = take_chunk(buf, available, max_len, &mut truncated);
        reader.consume(consumed);
        if complete {
            return Ok(finish(buf, truncated));
        }
    }
}

/// Blocking counterpart of [`read_line_with_limit`].
pub fn read_line_with_limit_blocking<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<ReadLineResult> {
    buf.clear();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            return Ok(if read_any {
                finish(buf, truncated)
            } else {
                ReadLineResult::Eof
            });
        }

        read_any = true;
        let (consumed, complete) = take_chunk(buf, available, max_len, &mut truncated);
        reader.consume(consumed);
        if complete {
            return Ok(finish(buf, truncated));
        }
    }
}

/// Decides which stderr lines are kept.
///
/// Blank lines are never kept. With `stop_at_blank_line` the first one also
/// rejects everything after it; callers keep reading so the pipe still drains.
#[derive(Debug, Clone, Copy)]
pub struct StderrFilter {
    stop_at_blank_line: bool,
    stopped: bool,
}

impl StderrFilter {
    pub const fn new(stop_at_blank_line: bool) -> Self {
        Self {
            stop_at_blank_line,
            stopped: false,
        }
    }

    pub fn keep(&mut self, line: &[u8]) -> bool {
        if self.stopped {
            return false;
        }
        if line.is_empty() {
            if self.stop_at_blank_line {
                trace!("blank stderr line; ignoring the rest of stderr");
                self.stopped = true;
            }
            return false;
        }
        true
    }
}
