//! Splits byte streams into newline-delimited JSON-RPC messages (C4 Framer).
//!
//! Relies on `AsyncBufReadExt::lines()`-style reading to handle partial
//! reads (it never yields a line until a newline has been seen), so the
//! Framer's own job is just the parse-or-passthrough branch per line. Frame
//! errors are never fatal: a line that fails to parse as JSON is handed back
//! as a raw line so the forwarder can pass it through unchanged (this is how
//! a server's non-JSON stdout diagnostics survive the proxy transparently).

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One framed unit read from a byte stream.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A line that parsed as JSON.
    Json(Value),
    /// A line that did not parse as JSON, to be passed through verbatim.
    Raw(String),
}

/// Parse a single already-extracted line. Blank lines are handled by the
/// caller before reaching here (dropped, per `spec.md` §4.1).
pub fn frame_line(line: &str) -> Frame {
    match serde_json::from_str::<Value>(line) {
        Ok(v) => Frame::Json(v),
        Err(_) => Frame::Raw(line.to_string()),
    }
}

/// Read the next non-blank frame from `reader`. Returns `Ok(None)` on EOF.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Frame>> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(frame_line(&line)));
    }
}
