//! Accumulates the transcribed speech segments of one conversational turn.

use shared::BufferSegment;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Ordered, thread-safe list of segments.
///
/// Insertion order is chronological order: the segment list sits behind one
/// lock, so `append` calls from the caller thread and the capture path are
/// serialized in call order.
#[derive(Debug, Default)]
pub struct RequestBuffer {
    segments: Mutex<Vec<BufferSegment>>,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn segments(&self) -> MutexGuard<'_, Vec<BufferSegment>> {
        self.segments.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, text: impl Into<String>, is_interrupt: bool) {
        let segment = BufferSegment::new(text, is_interrupt);
        let mut segments = self.segments();
        debug!(
            "Buffered segment #{} (interrupt: {}): '{}'",
            segments.len() + 1,
            is_interrupt,
            segment.text()
        );
        segments.push(segment);
    }

    /// Non-empty segment texts joined by single spaces, oldest first.
    pub fn combined_text(&self) -> String {
        self.segments()
            .iter()
            .map(|s| s.text().trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn clear(&self) {
        self.segments().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.segments().is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments().len()
    }

    pub fn snapshot(&self) -> Vec<BufferSegment> {
        self.segments().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_combined_text_in_call_order() {
        let buffer = RequestBuffer::new();
        buffer.append("Research BSI", false);
        buffer.append("in Austin", true);
        assert_eq!(buffer.combined_text(), "Research BSI in Austin");
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_combined_text_skips_empty_segments() {
        let buffer = RequestBuffer::new();
        buffer.append("", false);
        buffer.append("book a table", false);
        buffer.append("   ", true);
        buffer.append("for two", true);
        assert_eq!(buffer.combined_text(), "book a table for two");
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_combined_text_is_idempotent() {
        let buffer = RequestBuffer::new();
        buffer.append("hello", false);
        assert_eq!(buffer.combined_text(), buffer.combined_text());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_clear_and_is_empty() {
        let buffer = RequestBuffer::new();
        assert!(buffer.is_empty());
        buffer.append("x", false);
        assert!(!buffer.is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.combined_text(), "");
    }

    #[test]
    fn test_snapshot_preserves_interrupt_flags() {
        let buffer = RequestBuffer::new();
        buffer.append("first", false);
        buffer.append("second", true);
        let segments = buffer.snapshot();
        assert!(!segments[0].is_interrupt());
        assert!(segments[1].is_interrupt());
        assert!(segments[0].timestamp() <= segments[1].timestamp());
    }

    #[test]
    fn test_order_follows_calls_across_threads() {
        let buffer = Arc::new(RequestBuffer::new());
        buffer.append("Research BSI", false);

        let remote = Arc::clone(&buffer);
        thread::spawn(move || remote.append("in Austin", true))
            .join()
            .unwrap();
        buffer.append("please", false);

        assert_eq!(buffer.combined_text(), "Research BSI in Austin please");
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let buffer = Arc::new(RequestBuffer::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..25 {
                        buffer.append(format!("{t}-{i}"), t % 2 == 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 100);
    }
}
