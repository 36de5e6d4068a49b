//! SentencePiece-compatible Unigram segmentation.
//!
//! A Unigram model scores every vocabulary piece with a log-probability;
//! encoding finds the segmentation that maximizes the score sum via Viterbi
//! best-path search over a code-point trie. Characters no piece covers fall
//! back to SentencePiece's `<0xHH>` byte pieces, but only where no
//! vocabulary piece reaches: a piece match always beats byte fallback, no
//! matter how bad its score.
//!
//! Normalization mirrors the SentencePiece defaults: whitespace runs
//! collapse to a single space, the text is trimmed, a dummy-prefix space is
//! inserted so word-initial pieces match their post-space forms, and every
//! ASCII space becomes the meta symbol `▁` (U+2581). Decoding inverts all
//! of it.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::hex::parse_byte_piece;
use super::loader::ByteLoader;
use super::sentencepiece::{ModelParseError, ModelPiece, PieceKind, SentencePieceModel};

/// SentencePiece's stand-in for an original space.
const META_SYMBOL: char = '\u{2581}';

/// Errors surfaced by Unigram loading and decoding.
#[derive(Error, Debug)]
pub enum UnigramError {
    #[error("Model parse error: {0}")]
    Model(#[from] ModelParseError),
    #[error("Unknown token id during decode: {0}")]
    UnknownToken(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Load a SentencePiece model through the byte loader and build a Unigram
/// tokenizer from it.
pub fn load_sentencepiece<L>(loader: &L, url: &str) -> Result<Unigram, UnigramError>
where
    L: ByteLoader + ?Sized,
{
    let data = loader.fetch(url)?;
    Unigram::from_binary(&data)
}

#[derive(Default)]
struct TrieNode {
    children: FxHashMap<char, TrieNode>,
    token: Option<(u32, f32)>,
}

/// Prefix index of pieces keyed by code-point; terminal nodes carry
/// `(id, score)`.
#[derive(Default)]
struct PieceTrie {
    root: TrieNode,
}

impl PieceTrie {
    fn insert(&mut self, piece: &str, id: u32, score: f32) {
        let mut node = &mut self.root;
        for ch in piece.chars() {
            node = node.children.entry(ch).or_default();
        }
        // One terminal per distinct piece string; the first (lowest) id wins.
        if node.token.is_none() {
            node.token = Some((id, score));
        }
    }

    /// Walk from `start`, yielding `(end_index, id, score)` for every piece
    /// that matches. Stops at the first code-point with no child, so the
    /// walk is bounded by the longest piece.
    fn matches_at(&self, chars: &[char], start: usize, out: &mut Vec<(usize, u32, f32)>) {
        let mut node = &self.root;
        for (offset, ch) in chars[start..].iter().enumerate() {
            match node.children.get(ch) {
                Some(child) => {
                    node = child;
                    if let Some((id, score)) = node.token {
                        out.push((start + offset + 1, id, score));
                    }
                }
                None => break,
            }
        }
    }
}

/// Unigram tokenizer built from a SentencePiece model.
///
/// Immutable after construction; safe to share across threads.
pub struct Unigram {
    pieces: Vec<ModelPiece>,
    trie: PieceTrie,
    byte_fallback: [Option<u32>; 256],
    unk_id: u32,
    bos_id: i32,
    eos_id: i32,
    add_dummy_prefix: bool,
    remove_extra_whitespaces: bool,
}

impl Unigram {
    /// Build a tokenizer from a serialized SentencePiece `ModelProto`.
    pub fn from_binary(data: &[u8]) -> Result<Self, UnigramError> {
        Ok(Self::from_model(SentencePieceModel::from_binary(data)?))
    }

    /// Build a tokenizer from an already-decoded model record.
    pub fn from_model(model: SentencePieceModel) -> Self {
        let mut trie = PieceTrie::default();
        let mut byte_fallback: [Option<u32>; 256] = [None; 256];

        for (id, piece) in model.pieces.iter().enumerate() {
            let id = id as u32;
            match piece.kind {
                PieceKind::Normal | PieceKind::UserDefined => {
                    trie.insert(&piece.piece, id, piece.score);
                }
                PieceKind::Byte => {
                    if let Some(b) = parse_byte_piece(&piece.piece) {
                        byte_fallback[b as usize].get_or_insert(id);
                    }
                }
                // Control/Unknown/Unused never match text but stay
                // resolvable through the piece table during decode.
                PieceKind::Control | PieceKind::Unknown | PieceKind::Unused => {}
            }
        }

        Self {
            pieces: model.pieces,
            trie,
            byte_fallback,
            unk_id: model.trainer.unk_id.max(0) as u32,
            bos_id: model.trainer.bos_id,
            eos_id: model.trainer.eos_id,
            add_dummy_prefix: model.normalizer.add_dummy_prefix,
            remove_extra_whitespaces: model.normalizer.remove_extra_whitespaces,
        }
    }

    /// Encode text to piece ids.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let normalized = self.normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = normalized.chars().collect();
        self.viterbi(&chars)
    }

    /// Decode piece ids back to text.
    ///
    /// Runs of byte pieces are gathered and UTF-8-decoded as one block so
    /// multi-byte characters split across `<0xHH>` pieces come back whole.
    pub fn decode(&self, ids: &[u32]) -> Result<String, UnigramError> {
        let mut out = String::new();
        let mut byte_run: Vec<u8> = Vec::new();

        for &id in ids {
            let piece = self
                .pieces
                .get(id as usize)
                .ok_or(UnigramError::UnknownToken(id))?;
            if piece.kind == PieceKind::Byte {
                if let Some(b) = parse_byte_piece(&piece.piece) {
                    byte_run.push(b);
                    continue;
                }
            }
            flush_byte_run(&mut out, &mut byte_run);
            out.push_str(&piece.piece);
        }
        flush_byte_run(&mut out, &mut byte_run);

        let text = out.replace(META_SYMBOL, " ");
        if self.add_dummy_prefix {
            if let Some(stripped) = text.strip_prefix(' ') {
                return Ok(stripped.to_string());
            }
        }
        Ok(text)
    }

    /// Apply the model's normalizer: optional whitespace collapse and trim,
    /// optional dummy prefix, then space -> `▁`.
    pub fn normalize(&self, text: &str) -> String {
        let base = if self.remove_extra_whitespaces {
            collapse_whitespace(text)
        } else {
            text.to_string()
        };
        if base.is_empty() {
            return base;
        }
        let mut out = String::with_capacity(base.len() + META_SYMBOL.len_utf8());
        if self.add_dummy_prefix {
            out.push(META_SYMBOL);
        }
        for ch in base.chars() {
            out.push(if ch == ' ' { META_SYMBOL } else { ch });
        }
        out
    }

    /// Number of pieces in the model.
    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    /// The unknown-piece string, if the model defines one.
    pub fn unk_token(&self) -> Option<&str> {
        self.piece_str(self.unk_id as i32)
    }

    /// The beginning-of-sequence piece string, if enabled.
    pub fn bos_token(&self) -> Option<&str> {
        self.piece_str(self.bos_id)
    }

    /// The end-of-sequence piece string, if enabled.
    pub fn eos_token(&self) -> Option<&str> {
        self.piece_str(self.eos_id)
    }

    /// Id of the unknown piece.
    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    fn piece_str(&self, id: i32) -> Option<&str> {
        if id < 0 {
            return None;
        }
        self.pieces.get(id as usize).map(|p| p.piece.as_str())
    }

    /// Viterbi best-path over piece matches and byte fallbacks.
    ///
    /// `best[pos]` is the maximum score sum of any segmentation of
    /// `chars[..pos]`; `prev[pos]` records the last step arriving there.
    /// Fallback steps carry score 0 and are taken only when no vocabulary
    /// piece ends at `pos`, so piece matches always win.
    fn viterbi(&self, chars: &[char]) -> Vec<u32> {
        let n = chars.len();
        let mut best = vec![f64::NEG_INFINITY; n + 1];
        best[0] = 0.0;
        let mut prev: Vec<Option<(usize, Vec<u32>)>> = Vec::with_capacity(n + 1);
        prev.resize_with(n + 1, || None);

        let mut matches = Vec::new();
        for i in 0..n {
            if best[i] == f64::NEG_INFINITY {
                continue;
            }
            matches.clear();
            self.trie.matches_at(chars, i, &mut matches);
            for &(end, id, score) in &matches {
                let candidate = best[i] + f64::from(score);
                if candidate > best[end] {
                    best[end] = candidate;
                    prev[end] = Some((i, vec![id]));
                }
            }
            if prev[i + 1].is_none() {
                best[i + 1] = best[i];
                prev[i + 1] = Some((i, self.byte_tokens(chars[i])));
            }
        }

        // Backtrack. With byte fallback in play every position is reachable;
        // a hole would mean the loop above never visited `pos`. Mirror the
        // reference and fall back per byte for the preceding code-point.
        let mut reversed = Vec::with_capacity(n);
        let mut pos = n;
        while pos > 0 {
            match prev[pos].take() {
                Some((start, ids)) => {
                    reversed.extend(ids.into_iter().rev());
                    pos = start;
                }
                None => {
                    reversed.extend(self.byte_tokens(chars[pos - 1]).into_iter().rev());
                    pos -= 1;
                }
            }
        }
        reversed.reverse();
        reversed
    }

    /// Byte-fallback ids for one code-point, `unk_id` for bytes the model
    /// has no piece for.
    fn byte_tokens(&self, ch: char) -> Vec<u32> {
        let mut buf = [0u8; 4];
        ch.encode_utf8(&mut buf)
            .as_bytes()
            .iter()
            .map(|&b| self.byte_fallback[b as usize].unwrap_or(self.unk_id))
            .collect()
    }
}

fn flush_byte_run(out: &mut String, run: &mut Vec<u8>) {
    if !run.is_empty() {
        out.push_str(&String::from_utf8_lossy(run));
        run.clear();
    }
}

/// Replace runs of Unicode whitespace with a single ASCII space and trim
/// both ends.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending = true;
        } else {
            if pending && !out.is_empty() {
                out.push(' ');
            }
            pending = false;
            out.push(ch);
        }
    }
    out
}
