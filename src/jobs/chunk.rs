//! Offset/limit slicing of a finished job's serialized payload.
//!
//! All positions are counted in `char`s, so a chunk boundary never splits a
//! UTF-8 sequence and concatenating chunks reproduces the payload exactly.

use std::sync::Arc;

/// Largest chunk a single result call will return.
pub const HARD_MAX_LIMIT: usize = 262_144;

/// Serialized job result. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    text: Arc<str>,
    char_len: usize,
}

impl Payload {
    pub fn new(text: String) -> Self {
        let char_len = text.chars().count();
        Self {
            text: Arc::from(text),
            char_len,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in chars
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    fn byte_offset(&self, char_idx: usize) -> usize {
        if self.text.len() == self.char_len {
            return char_idx.min(self.text.len());
        }
        self.text
            .char_indices()
            .nth(char_idx)
            .map(|(b, _)| b)
            .unwrap_or(self.text.len())
    }

    /// `len` chars starting at char `start`, truncated at the end of the payload
    pub fn slice_chars(&self, start: usize, len: usize) -> &str {
        let begin = self.byte_offset(start);
        let end = self.byte_offset(start.saturating_add(len));
        &self.text[begin..end]
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// A clamped window into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub offset: usize,
    /// Effective limit: `[1, min(requested, max_limit, total_chars - offset)]`
    pub limit: usize,
    pub total_chars: usize,
    pub next_offset: usize,
    pub done: bool,
}

impl ChunkWindow {
    /// Clamp a request against a payload of `total_chars`.
    ///
    /// `offset` lands in `[0, total_chars]` and `limit` in
    /// `[1, min(max_limit, total_chars - offset)]`. The returned length is
    /// `min(limit, total_chars - offset)`, so it is zero only at the end.
    pub fn clamp(requested_offset: i64, requested_limit: i64, total_chars: usize, max_limit: usize) -> Self {
        let max_limit = max_limit.clamp(1, HARD_MAX_LIMIT);
        let offset = usize::try_from(requested_offset.max(0))
            .unwrap_or(usize::MAX)
            .min(total_chars);
        let remaining = total_chars - offset;
        let limit = usize::try_from(requested_limit.max(1))
            .unwrap_or(usize::MAX)
            .min(max_limit)
            .min(remaining)
            .max(1);
        let len = limit.min(remaining);
        let next_offset = offset + len;

        Self {
            offset,
            limit,
            total_chars,
            next_offset,
            done: next_offset >= total_chars,
        }
    }

    /// Number of chars this window covers
    pub fn len(&self) -> usize {
        self.next_offset - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice<'a>(&self, payload: &'a Payload) -> &'a str {
        payload.slice_chars(self.offset, self.len())
    }
}
