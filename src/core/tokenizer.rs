//! BPE tokenizer: regex pre-tokenization, special-token scanning, merge.
//!
//! [`BpeTokenizer`] orchestrates the encode pipeline: scan for allowed
//! special-token literals, split the text between them with the encoding's
//! pre-tokenization pattern, and run each fragment through the byte-pair
//! merge engine. Decoding is the inverse table walk, lossy at the UTF-8
//! layer because callers routinely decode partial streams that split
//! multi-byte characters.
//!
//! The CLIP text-encoder variant rides on the same pipeline through a tagged
//! [`ClipOptions`] configuration: inputs are case-folded and
//! whitespace-collapsed, every fragment gets the space suffix that stands in
//! for SentencePiece's `</w>` marker, and the output is framed with BOS/EOS
//! and padded to a fixed context length.

use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use aho_corasick::{AhoCorasick, MatchKind};
use fancy_regex::Regex;
use lru::LruCache;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use thiserror::Error;

use super::bpe::byte_pair_encode;
use super::vocab::{build_decoder, VocabError};

/// Errors surfaced by tokenizer construction, encoding, and decoding.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Malformed pre-tokenization pattern: {0}")]
    MalformedPattern(#[from] fancy_regex::Error),
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("Special-token matcher build error: {0}")]
    SpecialMatcher(#[from] aho_corasick::BuildError),
    #[error("Unknown token id during decode: {0}")]
    UnknownToken(u32),
    #[error("Unknown encoding name: {0}")]
    UnknownEncoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pre-tokenization pattern for r50k_base and the p50k family (GPT-2/GPT-3).
pub const R50K_BASE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Pre-tokenization pattern for cl100k_base (GPT-4, GPT-3.5-turbo).
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Pre-tokenization pattern for o200k_base (GPT-4o).
pub const O200K_BASE_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n/]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Pre-tokenization pattern for the CLIP text encoder.
///
/// Applied after CLIP's cleanup pass, so the input is already lowercased
/// and whitespace-collapsed; the pattern has no whitespace branch.
pub const CLIP_PATTERN: &str = r"'s|'t|'re|'ve|'m|'ll|'d|\p{L}+|\p{N}|[^\s\p{L}\p{N}]+";

/// Default size of the LRU cache for merged fragments.
const DEFAULT_CACHE_SIZE: usize = 4096;

/// CLIP text-encoder framing configuration.
///
/// `bos`/`eos` are `<|startoftext|>` and `<|endoftext|>`; every encode
/// output is exactly `context_len` ids, padded with `pad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipOptions {
    pub bos: u32,
    pub eos: u32,
    pub pad: u32,
    pub context_len: usize,
}

/// A span of the input between accepted special tokens, or the special
/// token itself.
enum Segment<'t> {
    Text(&'t str),
    Special(u32),
}

/// Byte-pair tokenizer compatible with tiktoken's encodings.
///
/// Immutable after construction and safe to share across threads; the only
/// interior mutability is the fragment cache behind a `Mutex`, which never
/// changes observable output.
pub struct BpeTokenizer {
    encoder: FxHashMap<Vec<u8>, u32>,
    decoder: FxHashMap<u32, Vec<u8>>,
    special_tokens: FxHashMap<String, u32>,
    special_tokens_decoder: FxHashMap<u32, String>,
    special_literals: Vec<String>,
    special_matcher: Option<AhoCorasick>,
    regex: Regex,
    pattern: String,
    clip: Option<ClipOptions>,
    chunk_cache: Mutex<LruCache<u64, Vec<u32>>>,
    cache_size: usize,
}

impl BpeTokenizer {
    /// Create a tokenizer from an encoder map, special tokens, and a
    /// pre-tokenization pattern.
    pub fn new(
        encoder: FxHashMap<Vec<u8>, u32>,
        special_tokens: FxHashMap<String, u32>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::with_options(encoder, special_tokens, pattern, DEFAULT_CACHE_SIZE, None)
    }

    /// Create a CLIP-framed tokenizer.
    ///
    /// See [`ClipOptions`]; encoding lowercases and whitespace-collapses the
    /// input, suffixes every fragment with a space, and frames the output to
    /// `clip.context_len` ids.
    pub fn new_clip(
        encoder: FxHashMap<Vec<u8>, u32>,
        special_tokens: FxHashMap<String, u32>,
        pattern: &str,
        clip: ClipOptions,
    ) -> Result<Self, TokenizerError> {
        Self::with_options(
            encoder,
            special_tokens,
            pattern,
            DEFAULT_CACHE_SIZE,
            Some(clip),
        )
    }

    /// Create a tokenizer with a custom fragment-cache size.
    pub fn with_cache_size(
        encoder: FxHashMap<Vec<u8>, u32>,
        special_tokens: FxHashMap<String, u32>,
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        Self::with_options(encoder, special_tokens, pattern, cache_size, None)
    }

    /// Create a tokenizer with every knob exposed.
    pub fn with_options(
        encoder: FxHashMap<Vec<u8>, u32>,
        special_tokens: FxHashMap<String, u32>,
        pattern: &str,
        cache_size: usize,
        clip: Option<ClipOptions>,
    ) -> Result<Self, TokenizerError> {
        let decoder = build_decoder(&encoder);
        let special_tokens_decoder: FxHashMap<u32, String> = special_tokens
            .iter()
            .map(|(k, v)| (*v, k.clone()))
            .collect();

        let regex = Regex::new(pattern)?;

        // Leftmost-longest keeps the scan deterministic when one literal is
        // a prefix of another (o200k_harmony's <|start|> / <|startoftext|>).
        let special_literals: Vec<String> = special_tokens.keys().cloned().collect();
        let special_matcher = if special_literals.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&special_literals)?,
            )
        };

        let cache_size_nz = NonZeroUsize::new(cache_size.max(1)).expect("max(1) is non-zero");
        let chunk_cache = Mutex::new(LruCache::new(cache_size_nz));

        Ok(Self {
            encoder,
            decoder,
            special_tokens,
            special_tokens_decoder,
            special_literals,
            special_matcher,
            regex,
            pattern: pattern.to_string(),
            clip,
            chunk_cache,
            cache_size,
        })
    }

    /// Encode text to token ids, treating no special-token literal as
    /// special: literals appearing in the input are tokenized byte-wise
    /// like any other text.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_with_allowed(text, &FxHashSet::default())
    }

    /// Encode text with every special-token literal accepted.
    pub fn encode_with_special(&self, text: &str) -> Vec<u32> {
        let allowed: FxHashSet<&str> = self.special_tokens.keys().map(String::as_str).collect();
        self.encode_with_allowed(text, &allowed)
    }

    /// Encode text, accepting exactly the special-token literals in
    /// `allowed`.
    ///
    /// A literal found in the text but absent from `allowed` is left to the
    /// regular pipeline; the scan resumes one character past the rejected
    /// match start, so an overlapping allowed literal is still found.
    pub fn encode_with_allowed(&self, text: &str, allowed: &FxHashSet<&str>) -> Vec<u32> {
        let mut out = Vec::new();
        match &self.clip {
            Some(clip) => {
                let cleaned = clip_clean(text);
                self.encode_segments(&cleaned, allowed, true, &mut out);
                let mut framed = Vec::with_capacity(clip.context_len);
                framed.push(clip.bos);
                framed.append(&mut out);
                framed.push(clip.eos);
                framed.truncate(clip.context_len);
                framed.resize(clip.context_len, clip.pad);
                framed
            }
            None => {
                self.encode_segments(text, allowed, false, &mut out);
                out
            }
        }
    }

    /// Batch encode in parallel. Per-text output is identical to
    /// [`encode`](Self::encode).
    pub fn encode_batch(&self, texts: &[String]) -> Vec<Vec<u32>> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    /// Batch encode in parallel with every special accepted.
    pub fn encode_batch_with_special(&self, texts: &[String]) -> Vec<Vec<u32>> {
        texts
            .par_iter()
            .map(|text| self.encode_with_special(text))
            .collect()
    }

    /// Decode token ids to bytes.
    ///
    /// Fails with [`TokenizerError::UnknownToken`] on an id in neither
    /// decoder table. For CLIP tokenizers the padding id is stripped first.
    pub fn decode_bytes(&self, tokens: &[u32]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            if let Some(clip) = &self.clip {
                if token == clip.pad {
                    continue;
                }
            }
            if let Some(bytes) = self.decoder.get(&token) {
                result.extend_from_slice(bytes);
            } else if let Some(special) = self.special_tokens_decoder.get(&token) {
                result.extend_from_slice(special.as_bytes());
            } else {
                return Err(TokenizerError::UnknownToken(token));
            }
        }
        Ok(result)
    }

    /// Decode token ids to text.
    ///
    /// Invalid UTF-8 byte sequences become U+FFFD rather than an error:
    /// partial token streams often split multi-byte characters, and the
    /// reference implementations decode them the same way.
    pub fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(match String::from_utf8_lossy(&bytes) {
            Cow::Borrowed(s) => s.to_string(),
            Cow::Owned(s) => s,
        })
    }

    /// Batch decode in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<u32>]) -> Result<Vec<String>, TokenizerError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Total id range of the vocabulary: `max_id + 1` across regular and
    /// special tokens.
    pub fn vocab_size(&self) -> usize {
        let max_decoder_id = self.decoder.keys().max().copied().unwrap_or(0);
        let max_special_id = self.special_tokens.values().max().copied().unwrap_or(0);
        (max_decoder_id.max(max_special_id) + 1) as usize
    }

    /// The special-token table (literal -> id).
    pub fn special_tokens(&self) -> &FxHashMap<String, u32> {
        &self.special_tokens
    }

    /// The encoder map (token bytes -> id).
    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, u32> {
        &self.encoder
    }

    /// The decoder map (id -> token bytes).
    pub fn decoder(&self) -> &FxHashMap<u32, Vec<u8>> {
        &self.decoder
    }

    /// The special-token decoder map (id -> literal).
    pub fn special_tokens_decoder(&self) -> &FxHashMap<u32, String> {
        &self.special_tokens_decoder
    }

    /// The CLIP framing configuration, if this is a CLIP tokenizer.
    pub fn clip_options(&self) -> Option<&ClipOptions> {
        self.clip.as_ref()
    }

    /// Drop every cached fragment.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.chunk_cache.lock() {
            cache.clear();
        }
    }

    /// Number of fragments currently cached.
    pub fn cache_len(&self) -> usize {
        self.chunk_cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Tokenize the text between accepted specials and interleave the
    /// accepted special ids, in input order.
    fn encode_segments(
        &self,
        text: &str,
        allowed: &FxHashSet<&str>,
        word_suffix: bool,
        out: &mut Vec<u32>,
    ) {
        for segment in self.split_on_specials(text, allowed) {
            match segment {
                Segment::Special(rank) => out.push(rank),
                Segment::Text(chunk) => {
                    let bytes = chunk.as_bytes();
                    for (start, end) in self.fragment_spans(chunk) {
                        if word_suffix {
                            let mut piece = Vec::with_capacity(end - start + 1);
                            piece.extend_from_slice(&bytes[start..end]);
                            piece.push(b' ');
                            out.extend(self.encode_piece(&piece));
                        } else {
                            out.extend(self.encode_piece(&bytes[start..end]));
                        }
                    }
                }
            }
        }
    }

    /// Scan for special-token literals, accepting only those in `allowed`.
    ///
    /// A rejected match advances the scan cursor one character past its
    /// start; the rejected text stays inside the surrounding plain segment.
    fn split_on_specials<'t>(&self, text: &'t str, allowed: &FxHashSet<&str>) -> Vec<Segment<'t>> {
        let Some(matcher) = &self.special_matcher else {
            return vec![Segment::Text(text)];
        };
        if allowed.is_empty() {
            return vec![Segment::Text(text)];
        }

        let mut segments = Vec::new();
        let mut seg_start = 0;
        let mut scan_from = 0;
        while let Some(m) = matcher.find(&text[scan_from..]) {
            let start = scan_from + m.start();
            let end = scan_from + m.end();
            let literal = &text[start..end];
            if allowed.contains(literal) {
                if start > seg_start {
                    segments.push(Segment::Text(&text[seg_start..start]));
                }
                segments.push(Segment::Special(self.special_tokens[literal]));
                seg_start = end;
                scan_from = end;
            } else {
                let step = text[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
                scan_from = start + step;
            }
        }
        if seg_start < text.len() {
            segments.push(Segment::Text(&text[seg_start..]));
        }
        segments
    }

    /// Non-overlapping pre-tokenization matches as byte offsets.
    ///
    /// Unmatched regions simply yield no fragments; that is not an error.
    fn fragment_spans(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .filter_map(|m| m.ok())
            .map(|m| (m.start(), m.end()))
            .collect()
    }

    /// Merge one fragment, with whole-piece fast path and LRU caching.
    fn encode_piece(&self, piece: &[u8]) -> Vec<u32> {
        if let Some(&rank) = self.encoder.get(piece) {
            return vec![rank];
        }

        let hash = Self::hash_slice(piece);
        if let Ok(mut cache) = self.chunk_cache.lock() {
            if let Some(cached) = cache.get(&hash) {
                return cached.clone();
            }
        }

        let result = byte_pair_encode(piece, &self.encoder);

        if let Ok(mut cache) = self.chunk_cache.lock() {
            cache.put(hash, result.clone());
        }

        result
    }

    #[inline]
    fn hash_slice(slice: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        slice.hash(&mut hasher);
        hasher.finish()
    }
}

impl Clone for BpeTokenizer {
    fn clone(&self) -> Self {
        // Fresh, empty cache; caches are never shared between clones.
        let cache_size_nz = NonZeroUsize::new(self.cache_size.max(1)).expect("non-zero");
        let chunk_cache = Mutex::new(LruCache::new(cache_size_nz));

        let special_matcher = if self.special_literals.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&self.special_literals)
                    .expect("literals already built once"),
            )
        };

        Self {
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
            special_tokens: self.special_tokens.clone(),
            special_tokens_decoder: self.special_tokens_decoder.clone(),
            special_literals: self.special_literals.clone(),
            special_matcher,
            regex: self.regex.clone(),
            pattern: self.pattern.clone(),
            clip: self.clip,
            chunk_cache,
            cache_size: self.cache_size,
        }
    }
}

/// CLIP input cleanup: lowercase, collapse ASCII whitespace runs to a
/// single space, trim.
fn clip_clean(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut pending_space = false;
    for ch in lower.chars() {
        if ch.is_ascii_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_tokenizer() -> BpeTokenizer {
        let mut encoder = FxHashMap::default();
        for b in 0u8..=255 {
            encoder.insert(vec![b], b as u32);
        }
        encoder.insert(b"Hello".to_vec(), 300);
        encoder.insert(b" World".to_vec(), 301);

        let mut special_tokens = FxHashMap::default();
        special_tokens.insert("<|endoftext|>".to_string(), 50256);
        special_tokens.insert("<|fim_prefix|>".to_string(), 50281);

        BpeTokenizer::new(encoder, special_tokens, R50K_BASE_PATTERN).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let tokenizer = make_test_tokenizer();
        let text = "Hello World";
        let tokens = tokenizer.encode(text);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_empty_input() {
        let tokenizer = make_test_tokenizer();
        assert!(tokenizer.encode("").is_empty());
    }

    #[test]
    fn test_whole_fragment_fast_path() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(tokenizer.encode("Hello World"), vec![300, 301]);
    }

    #[test]
    fn test_specials_ignored_by_default() {
        let tokenizer = make_test_tokenizer();
        let tokens = tokenizer.encode("<|endoftext|>");
        assert!(!tokens.contains(&50256));
        assert_eq!(tokenizer.decode(&tokens).unwrap(), "<|endoftext|>");
    }

    #[test]
    fn test_encode_with_special() {
        let tokenizer = make_test_tokenizer();
        let tokens = tokenizer.encode_with_special("Hello<|endoftext|>");
        assert_eq!(*tokens.last().unwrap(), 50256);
        assert!(tokens.contains(&300));
    }

    #[test]
    fn test_allowed_subset_rejects_others() {
        let tokenizer = make_test_tokenizer();
        let allowed: FxHashSet<&str> = ["<|endoftext|>"].into_iter().collect();
        let tokens = tokenizer.encode_with_allowed("<|fim_prefix|><|endoftext|>", &allowed);
        assert!(!tokens.contains(&50281));
        assert_eq!(*tokens.last().unwrap(), 50256);
        assert_eq!(
            tokenizer.decode(&tokens).unwrap(),
            "<|fim_prefix|><|endoftext|>"
        );
    }

    #[test]
    fn test_rejected_match_rescans_overlap() {
        // The scan must resume just past a rejected match start, so an
        // allowed literal beginning inside the rejected span is still found.
        let mut encoder = FxHashMap::default();
        for b in 0u8..=255 {
            encoder.insert(vec![b], b as u32);
        }
        let mut special_tokens = FxHashMap::default();
        special_tokens.insert("ab".to_string(), 1000);
        special_tokens.insert("ba".to_string(), 1001);
        let tokenizer = BpeTokenizer::new(encoder, special_tokens, R50K_BASE_PATTERN).unwrap();

        let allowed: FxHashSet<&str> = ["ba"].into_iter().collect();
        // Leftmost match is "ab" (rejected); rescanning from 'b' finds "ba".
        let tokens = tokenizer.encode_with_allowed("aba", &allowed);
        assert_eq!(tokens, vec![b'a' as u32, 1001]);
    }

    #[test]
    fn test_unknown_token_fails_decode() {
        let tokenizer = make_test_tokenizer();
        assert!(matches!(
            tokenizer.decode(&[999_999]),
            Err(TokenizerError::UnknownToken(999_999))
        ));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let tokenizer = make_test_tokenizer();
        // 0xE4 alone is an invalid UTF-8 sequence.
        let text = tokenizer.decode(&[0xE4]).unwrap();
        assert_eq!(text, "\u{FFFD}");
    }

    #[test]
    fn test_batch_encode_matches_single() {
        let tokenizer = make_test_tokenizer();
        let texts = vec!["Hello".to_string(), "Hello World".to_string()];
        let batch = tokenizer.encode_batch(&texts);
        assert_eq!(batch[0], tokenizer.encode("Hello"));
        assert_eq!(batch[1], tokenizer.encode("Hello World"));

        let decoded = tokenizer.decode_batch(&batch).unwrap();
        assert_eq!(decoded, texts);
    }

    #[test]
    fn test_cache_is_transparent() {
        let tokenizer = make_test_tokenizer();
        let cold = tokenizer.encode("abcabc");
        let warm = tokenizer.encode("abcabc");
        assert_eq!(cold, warm);
        assert!(tokenizer.cache_len() > 0);
        tokenizer.clear_cache();
        assert_eq!(tokenizer.cache_len(), 0);
    }

    #[test]
    fn test_clone_shares_no_cache() {
        let tokenizer = make_test_tokenizer();
        tokenizer.encode("abcabc");
        let cloned = tokenizer.clone();
        assert_eq!(cloned.cache_len(), 0);
        assert_eq!(cloned.encode("Hello World"), vec![300, 301]);
    }

    #[test]
    fn test_malformed_pattern() {
        let result = BpeTokenizer::new(
            FxHashMap::default(),
            FxHashMap::default(),
            r"(unclosed",
        );
        assert!(matches!(result, Err(TokenizerError::MalformedPattern(_))));
    }

    #[test]
    fn test_clip_clean() {
        assert_eq!(clip_clean("  Hello \t\n WORLD  "), "hello world");
        assert_eq!(clip_clean(""), "");
        assert_eq!(clip_clean("   \t\n"), "");
    }
}
