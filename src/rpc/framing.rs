// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Newline-delimited JSON framing.
//!
//! Child processes write protocol messages to stdout one JSON object per
//! line. Reads from the pipe do not respect line boundaries, so the
//! [`FrameReader`] keeps the unterminated tail of the previous chunk and
//! only parses complete lines. Lines that are not JSON objects are dropped:
//! some servers print banners or diagnostics on stdout.

use serde_json::Value;
use tracing::{trace, warn};

/// Upper bound for an unterminated frame.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental newline-delimited JSON decoder.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    dropped_lines: u64,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete message it finishes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            if self.buffer.len() > MAX_FRAME_BYTES {
                warn!(
                    buffered = self.buffer.len(),
                    "Discarding oversized unterminated frame"
                );
                self.buffer.clear();
                self.dropped_lines += 1;
            }
            return Vec::new();
        };

        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        let mut messages = Vec::new();
        for line in complete.split(|b| *b == b'\n') {
            let line = trim_line(line);
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Value>(line) {
                Ok(value) if value.is_object() => messages.push(value),
                _ => {
                    self.dropped_lines += 1;
                    trace!(
                        line = %String::from_utf8_lossy(line),
                        "Ignoring non-protocol output line"
                    );
                }
            }
        }

        messages
    }

    /// Bytes waiting for a terminating newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines that were not protocol messages.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}
