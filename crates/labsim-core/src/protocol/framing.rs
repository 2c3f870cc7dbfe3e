//! Message framing: turning a byte stream into discrete messages.
//!
//! # Framing disciplines
//!
//! Two disciplines cover every simulated instrument:
//!
//! - **Raw chunks** ([`Framing::Raw`]): every read of available bytes is one
//!   message.  Nothing is buffered between reads.  Binary detector protocols
//!   use this.
//!
//! - **Delimited lines** ([`Framing::Line`]): bytes accumulate in a buffer
//!   until the configured terminator is seen.  The bytes before the
//!   terminator form the message; the terminator itself is never part of it.
//!   Empty messages are discarded.
//!
//! # Special messages
//!
//! Some instruments accept an out-of-band control token that is *not*
//! followed by a terminator, for example a bare `S` sent mid-acquisition to
//! stop it.  A [`LineFramer`] configured with special messages checks the
//! accumulation buffer after every byte: as soon as the buffer equals one of
//! the special messages verbatim, it is emitted and the buffer resets.
//!
//! Because that check has to happen after *every* byte, the framer works
//! byte-at-a-time.  When the terminator is the plain `\n` and there are no
//! special messages, the caller may take the fast path reported by
//! [`LineFramer::is_fast_path`] and read whole lines from a buffered reader
//! instead.  Both paths emit the same messages for the same input.

use std::collections::BTreeSet;

/// Default maximum size of one raw-chunk message.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// How a device's byte stream is split into messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Framing {
    /// Terminator-delimited messages, with optional special messages.
    #[default]
    Line,
    /// Every successful read (up to `chunk_size` bytes) is one message.
    Raw { chunk_size: usize },
}

impl Framing {
    /// Raw framing with [`DEFAULT_CHUNK_SIZE`].
    pub fn raw() -> Self {
        Framing::Raw {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Accumulating state machine for delimited framing.
///
/// Feed bytes with [`push_byte`](Self::push_byte) or [`push`](Self::push);
/// complete messages come back in arrival order.  Whatever is left in the
/// buffer when the stream ends is the caller's to discard.
///
/// # Examples
///
/// ```rust
/// use labsim_core::protocol::LineFramer;
///
/// let mut framer = LineFramer::new(b"\r".to_vec(), [b"S".to_vec()]);
/// assert_eq!(framer.push(b"*IDN?\rS"), vec![b"*IDN?".to_vec(), b"S".to_vec()]);
/// assert!(framer.pending().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct LineFramer {
    terminator: Vec<u8>,
    special_messages: BTreeSet<Vec<u8>>,
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Creates a framer splitting on `terminator` and recognising
    /// `special_messages`.
    ///
    /// An empty terminator disables terminator splitting; only special
    /// messages are then emitted.  Empty special messages are ignored since
    /// they could never be matched after appending a byte.
    pub fn new(
        terminator: impl Into<Vec<u8>>,
        special_messages: impl IntoIterator<Item = Vec<u8>>,
    ) -> Self {
        Self {
            terminator: terminator.into(),
            special_messages: special_messages
                .into_iter()
                .filter(|m| !m.is_empty())
                .collect(),
            buffer: Vec::new(),
        }
    }

    /// Returns the configured terminator.
    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Returns `true` when lines may be read in natural `\n`-delimited units
    /// instead of byte-at-a-time.
    pub fn is_fast_path(&self) -> bool {
        self.terminator == b"\n" && self.special_messages.is_empty()
    }

    /// Appends one byte and returns the message it completes, if any.
    pub fn push_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.buffer.push(byte);

        if self.special_messages.contains(&self.buffer) {
            return Some(std::mem::take(&mut self.buffer));
        }

        if self.terminator.is_empty() || !self.buffer.ends_with(&self.terminator) {
            return None;
        }

        let end = self.buffer.len() - self.terminator.len();
        self.buffer.truncate(end);
        let message = std::mem::take(&mut self.buffer);
        if message.is_empty() {
            None
        } else {
            Some(message)
        }
    }

    /// Appends a batch of bytes and returns every message completed by it,
    /// in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Bytes received since the last emitted message.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discards any partially accumulated message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn newline_framer() -> LineFramer {
        LineFramer::new(b"\n".to_vec(), Vec::new())
    }

    /// Reference split: terminator-separated segments, empties dropped,
    /// unterminated trailing remainder excluded.
    fn reference_split(input: &[u8], terminator: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i + terminator.len() <= input.len() {
            if &input[i..i + terminator.len()] == terminator {
                if i > start {
                    out.push(input[start..i].to_vec());
                }
                i += terminator.len();
                start = i;
            } else {
                i += 1;
            }
        }
        out
    }

    #[test]
    fn test_two_messages_in_one_batch_emitted_in_order() {
        // Arrange
        let mut framer = newline_framer();

        // Act
        let messages = framer.push(b"A\nB\n");

        // Assert
        assert_eq!(messages, vec![b"A".to_vec(), b"B".to_vec()]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_terminator_is_stripped_from_message() {
        let mut framer = newline_framer();
        assert_eq!(framer.push(b"PING\n"), vec![b"PING".to_vec()]);
    }

    #[test]
    fn test_empty_segments_are_discarded() {
        let mut framer = newline_framer();
        assert_eq!(framer.push(b"\n\nX\n\n"), vec![b"X".to_vec()]);
    }

    #[test]
    fn test_trailing_partial_message_stays_pending() {
        // Arrange
        let mut framer = newline_framer();

        // Act
        let messages = framer.push(b"ONE\nTW");

        // Assert
        assert_eq!(messages, vec![b"ONE".to_vec()]);
        assert_eq!(framer.pending(), b"TW");
    }

    #[test]
    fn test_reset_discards_pending_bytes() {
        let mut framer = newline_framer();
        framer.push(b"partial");
        framer.reset();
        assert!(framer.pending().is_empty());
        assert_eq!(framer.push(b"next\n"), vec![b"next".to_vec()]);
    }

    #[test]
    fn test_special_message_emitted_without_terminator() {
        // Arrange
        let mut framer = LineFramer::new(b"\r".to_vec(), [b"S".to_vec()]);

        // Act
        let messages = framer.push(b"S");

        // Assert
        assert_eq!(messages, vec![b"S".to_vec()]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_special_message_only_matches_whole_buffer() {
        // Arrange: "ACQ S" contains S but the buffer is never exactly "S".
        let mut framer = LineFramer::new(b"\r".to_vec(), [b"S".to_vec()]);

        // Act
        let messages = framer.push(b"AS\r");

        // Assert
        assert_eq!(messages, vec![b"AS".to_vec()]);
    }

    #[test]
    fn test_multi_byte_special_message() {
        let mut framer = LineFramer::new(b"\r".to_vec(), [b"STOP".to_vec()]);
        assert_eq!(framer.push(b"STOPGO\r"), vec![b"STOP".to_vec(), b"GO".to_vec()]);
    }

    #[test]
    fn test_multi_byte_terminator() {
        let mut framer = LineFramer::new(b"\r\n".to_vec(), Vec::new());
        assert_eq!(
            framer.push(b"a\rb\r\nc\r\n"),
            vec![b"a\rb".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn test_fast_path_only_for_plain_newline() {
        assert!(newline_framer().is_fast_path());
        assert!(!LineFramer::new(b"\r".to_vec(), Vec::new()).is_fast_path());
        assert!(!LineFramer::new(b"\n".to_vec(), [b"S".to_vec()]).is_fast_path());
    }

    #[test]
    fn test_empty_special_messages_are_ignored() {
        let framer = LineFramer::new(b"\n".to_vec(), [Vec::new()]);
        assert!(framer.is_fast_path());
    }

    #[test]
    fn test_chunking_invariance_matches_reference_split() {
        // Arrange
        let input: &[u8] = b"alpha\r\n\r\nbeta\r\ngam\rma\r\ndelta";
        let terminator = b"\r\n";
        let expected = reference_split(input, terminator);

        // Act / Assert: every chunk size yields the same messages.
        for chunk_size in 1..=input.len() {
            let mut framer = LineFramer::new(terminator.to_vec(), Vec::new());
            let got: Vec<Vec<u8>> = input
                .chunks(chunk_size)
                .flat_map(|chunk| framer.push(chunk))
                .collect();
            assert_eq!(got, expected, "chunk size {chunk_size}");
            assert_eq!(framer.pending(), b"delta");
        }
    }

    #[test]
    fn test_raw_framing_default_chunk_size() {
        assert_eq!(
            Framing::raw(),
            Framing::Raw {
                chunk_size: DEFAULT_CHUNK_SIZE
            }
        );
        assert_eq!(Framing::default(), Framing::Line);
    }
}
