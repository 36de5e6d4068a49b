//! UTF-8 safe streaming decoder for token-by-token output.
//!
//! When decoding tokens one at a time, a token's bytes may end in the middle
//! of a multi-byte UTF-8 character. [`StreamingDecoder`] buffers incomplete
//! sequences and only emits complete characters; `flush` substitutes U+FFFD
//! for whatever cannot be completed, matching the lossy decode policy of the
//! batch path.

use super::tokenizer::BpeTokenizer;

/// Stateful decoder over a borrowed tokenizer.
///
/// ```ignore
/// let mut decoder = StreamingDecoder::new(&tokenizer);
/// for token_id in token_stream {
///     if let Some(text) = decoder.add_token(token_id) {
///         print!("{text}");
///     }
/// }
/// print!("{}", decoder.flush());
/// ```
pub struct StreamingDecoder<'a> {
    tokenizer: &'a BpeTokenizer,
    buffer: Vec<u8>,
}

impl<'a> StreamingDecoder<'a> {
    /// Create a streaming decoder for the given tokenizer.
    pub fn new(tokenizer: &'a BpeTokenizer) -> Self {
        Self {
            tokenizer,
            buffer: Vec::with_capacity(16),
        }
    }

    /// Add one token and return any newly complete text.
    ///
    /// Unknown ids are skipped; streaming callers cannot do anything useful
    /// with an error mid-stream.
    pub fn add_token(&mut self, token_id: u32) -> Option<String> {
        let bytes = if let Some(b) = self.tokenizer.decoder().get(&token_id) {
            b.as_slice()
        } else if let Some(s) = self.tokenizer.special_tokens_decoder().get(&token_id) {
            s.as_bytes()
        } else {
            return None;
        };

        self.buffer.extend_from_slice(bytes);
        self.extract_complete_utf8()
    }

    /// Add several tokens at once and return any newly complete text.
    pub fn add_tokens(&mut self, token_ids: &[u32]) -> Option<String> {
        for &token_id in token_ids {
            let bytes = if let Some(b) = self.tokenizer.decoder().get(&token_id) {
                b.as_slice()
            } else if let Some(s) = self.tokenizer.special_tokens_decoder().get(&token_id) {
                s.as_bytes()
            } else {
                continue;
            };
            self.buffer.extend_from_slice(bytes);
        }
        self.extract_complete_utf8()
    }

    /// Emit whatever remains, replacing incomplete sequences with U+FFFD.
    pub fn flush(&mut self) -> String {
        if self.buffer.is_empty() {
            return String::new();
        }
        let result = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        result
    }

    /// Discard any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Whether bytes are waiting for completion.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Number of buffered bytes.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Split off the longest prefix of the buffer that is complete UTF-8.
    fn extract_complete_utf8(&mut self) -> Option<String> {
        let valid_len = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid_len == 0 {
            return None;
        }
        let rest = self.buffer.split_off(valid_len);
        let complete = std::mem::replace(&mut self.buffer, rest);
        // The prefix was just validated.
        Some(String::from_utf8(complete).expect("validated prefix"))
    }
}
