// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Append-only output log kept per entity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Default number of entries retained per entity.
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// Which stream a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    /// Child standard output.
    Stdout,
    /// Child standard error.
    Stderr,
    /// Lifecycle notes written by the supervisor itself.
    System,
}

impl std::fmt::Display for StreamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Position in the log, starting at 1.
    pub seq: u64,
    /// Never earlier than the previous entry's timestamp.
    pub timestamp: DateTime<Utc>,
    pub stream: StreamTag,
    pub text: String,
}

#[derive(Debug)]
struct LogInner {
    entries: VecDeque<OutputEntry>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Bounded append-only log. Once full, the oldest entries are evicted.
#[derive(Debug)]
pub struct OutputLog {
    capacity: usize,
    inner: RwLock<LogInner>,
}

impl OutputLog {
    /// Create a log that retains at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(LogInner {
                entries: VecDeque::new(),
                next_seq: 1,
                last_timestamp: None,
            }),
        }
    }

    /// Append an entry and return it.
    pub async fn append(&self, stream: StreamTag, text: impl Into<String>) -> OutputEntry {
        let mut inner = self.inner.write().await;

        let now = Utc::now();
        let timestamp = match inner.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let entry = OutputEntry {
            seq: inner.next_seq,
            timestamp,
            stream,
            text: text.into(),
        };

        inner.next_seq += 1;
        inner.last_timestamp = Some(timestamp);
        inner.entries.push_back(entry.clone());
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }

        entry
    }

    /// Entries with a sequence number greater than `seq`.
    pub async fn since(&self, seq: u64) -> Vec<OutputEntry> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    /// The last `n` entries.
    pub async fn tail(&self, n: usize) -> Vec<OutputEntry> {
        let inner = self.inner.read().await;
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether nothing has been retained.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Turns raw stream chunks into text without splitting characters.
///
/// A multibyte character cut by a read boundary is held back until the rest
/// of it arrives. Bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, keeping an incomplete trailing character for later.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let cut = incomplete_tail_start(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..cut]).into_owned();
        self.pending.drain(..cut);
        text
    }

    /// Whatever is still held back, e.g. when the stream ends.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Index where a trailing, not yet complete UTF-8 sequence begins, or
/// `bytes.len()` when the buffer ends on a character boundary.
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}
