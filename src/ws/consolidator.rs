//! Transcript consolidation.
//!
//! The upstream engine streams text as many small, often-overlapping
//! fragments. Rather than flooding the client with near-duplicates, each
//! fragment is buffered and a debounce timer is restarted; once the stream
//! goes quiet (or a turn completes), the best single candidate is emitted.
//! This trades up to one debounce interval of latency for coherence.

use crate::config::ConsolidatorConfig;
use tokio::time::{Duration, Instant, sleep_until};

/// One buffered transcript fragment.
#[derive(Debug, Clone)]
pub struct TranscriptChunk {
    pub text: String,
    pub received_at: Instant,
    /// Length in chars, cached because it drives candidate selection.
    pub chars: usize,
}

/// Debounces and dedups streamed transcript fragments into single messages.
///
/// Pure state machine: the caller owns the clock and the debounce timer.
/// `observe` buffers a fragment and reports whether the timer must restart;
/// `flush` picks and dedups the candidate. Forced flushes (turn completion,
/// session close) simply call `flush` without waiting for the timer.
pub struct TranscriptConsolidator {
    config: ConsolidatorConfig,
    buffer: Vec<TranscriptChunk>,
    last_emitted: String,
}

impl TranscriptConsolidator {
    pub fn new(config: ConsolidatorConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            last_emitted: String::new(),
        }
    }

    /// Records a fragment. Returns true when it was buffered and the caller
    /// should restart the debounce timer; fragments below the minimum length
    /// are dropped without disturbing a pending timer.
    pub fn observe(&mut self, text: &str, now: Instant) -> bool {
        let text = text.trim();
        let chars = text.chars().count();
        if chars < self.config.min_fragment_chars {
            return false;
        }

        self.buffer.push(TranscriptChunk {
            text: text.to_string(),
            received_at: now,
            chars,
        });
        let window = self.config.window;
        self.buffer
            .retain(|chunk| now.duration_since(chunk.received_at) < window);
        true
    }

    /// Picks the best candidate from the buffer, dedups it against the last
    /// emission, and clears the buffer. Returns the transcript to send, if any.
    ///
    /// The candidate is the longest fragment, except that a more recent long
    /// fragment wins when it comes within `freshness_ratio` of the longest
    /// one's length: a near-maximal fresh fragment beats a stale maximum.
    pub fn flush(&mut self) -> Option<String> {
        let Some(mut candidate) = self.buffer.iter().max_by_key(|c| c.chars) else {
            return None;
        };

        let recent_long = self
            .buffer
            .iter()
            .filter(|c| c.chars > self.config.long_fragment_chars)
            .max_by_key(|c| c.received_at);
        if let Some(recent) = recent_long {
            if recent.chars as f64 >= candidate.chars as f64 * self.config.freshness_ratio {
                candidate = recent;
            }
        }

        let text = candidate.text.clone();
        self.buffer.clear();

        // A candidate equal to, or textually contained in, the last emission
        // is a replay of something the client already saw.
        if text == self.last_emitted
            || (!self.last_emitted.is_empty() && self.last_emitted.contains(&text))
        {
            return None;
        }

        self.last_emitted = text.clone();
        Some(text)
    }

    #[cfg(test)]
    pub(crate) fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Owned handle for the single consolidation timer a session may hold.
///
/// Arming replaces any pending deadline, so at most one is ever in flight;
/// `fired` pends forever while idle, which makes it safe to poll in a select
/// loop alongside the event stream.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn idle() -> Self {
        Self { deadline: None }
    }

    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline elapses; pends forever while idle.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
