//! Vocabulary loaders.
//!
//! Two on-disk formats feed the BPE engine:
//!
//! # Tiktoken format
//!
//! UTF-8 text, one record per non-empty line: a base64-encoded token byte
//! sequence, a space, and a decimal rank. Lower ranks merge earlier.
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! # open_clip merge file
//!
//! A gzip-compressed text file: a header line, then 48,894 usable merge
//! lines of the form `first SPACE second`. Tokens are spelled in GPT-2's
//! byte-to-unicode alphabet with `</w>` marking end-of-word; the loader maps
//! them back to raw bytes, rewriting `</w>` to a trailing space (0x20). The
//! seed vocabulary is 256 single-byte entries plus 256 space-suffixed
//! entries, so the finished table has 512 + 48,894 = 49,406 ranks.

use std::io::Read;

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Number of merge lines in the open_clip vocabulary file.
const CLIP_MERGE_LINES: usize = 48_894;

/// Errors that can occur while loading a vocabulary.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("Duplicate rank in vocabulary: {0}")]
    DuplicateRank(u32),
    #[error("Duplicate token bytes in vocabulary")]
    DuplicateToken,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Load a tiktoken BPE vocabulary from raw bytes.
///
/// Blank lines are ignored. A malformed line, a repeated byte sequence, or a
/// repeated rank is an error: rank tables must be bijective.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, u32>, VocabError> {
    let mut encoder = FxHashMap::default();
    let mut seen_ranks = FxHashSet::default();

    for line in data.split(|&b| b == b'\n') {
        let line = match line.strip_suffix(b"\r") {
            Some(stripped) => stripped,
            None => line,
        };
        if line.is_empty() {
            continue;
        }

        let space_pos = line
            .iter()
            .rposition(|&b| b == b' ')
            .ok_or_else(|| VocabError::ParseError("missing space separator".to_string()))?;

        let token = STANDARD.decode(&line[..space_pos])?;

        let rank_str = std::str::from_utf8(&line[space_pos + 1..])
            .map_err(|_| VocabError::ParseError("invalid UTF-8 in rank".to_string()))?;
        let rank: u32 = rank_str
            .trim()
            .parse()
            .map_err(|_| VocabError::ParseError(format!("invalid rank: {rank_str}")))?;

        if !seen_ranks.insert(rank) {
            return Err(VocabError::DuplicateRank(rank));
        }
        if encoder.insert(token, rank).is_some() {
            return Err(VocabError::DuplicateToken);
        }
    }

    Ok(encoder)
}

/// Build a decoder map (rank -> bytes) from an encoder map (bytes -> rank).
pub fn build_decoder(encoder: &FxHashMap<Vec<u8>, u32>) -> FxHashMap<u32, Vec<u8>> {
    encoder.iter().map(|(k, v)| (*v, k.clone())).collect()
}

/// The 188 bytes GPT-2's `bytes_to_unicode` maps to themselves.
fn printable_bytes() -> impl Iterator<Item = u8> {
    (33u8..=126).chain(161..=172).chain(174..=255)
}

/// Rank-to-byte order of the CLIP seed vocabulary: the printable set in
/// range order, then the 68 remapped bytes in byte order.
fn clip_rank_to_byte() -> Vec<u8> {
    let printable: FxHashSet<u8> = printable_bytes().collect();
    let mut order: Vec<u8> = printable_bytes().collect();
    order.extend((0u8..=255).filter(|b| !printable.contains(b)));
    order
}

/// Inverse of GPT-2's `bytes_to_unicode`: merge-file character -> raw byte.
///
/// Printable bytes appear as the Latin-1 character with the same value;
/// the remapped bytes appear as synthetic code-points `U+0100 + n` in
/// enumeration order.
fn clip_char_to_byte() -> FxHashMap<char, u8> {
    let printable: FxHashSet<u8> = printable_bytes().collect();
    let mut map = FxHashMap::default();
    for b in printable_bytes() {
        map.insert(char::from(b), b);
    }
    for (n, b) in (0u8..=255).filter(|b| !printable.contains(b)).enumerate() {
        let ch = char::from_u32(256 + n as u32).expect("BMP code-point");
        map.insert(ch, b);
    }
    map
}

/// Load the open_clip `bpe_simple_vocab_16e6.txt.gz` merge file into a
/// byte-keyed rank table.
pub fn load_clip_vocab(gzip_data: &[u8]) -> Result<FxHashMap<Vec<u8>, u32>, VocabError> {
    let mut text = String::new();
    GzDecoder::new(gzip_data).read_to_string(&mut text)?;

    let char_to_byte = clip_char_to_byte();
    let mut encoder = FxHashMap::default();

    for (rank, b) in clip_rank_to_byte().into_iter().enumerate() {
        encoder.insert(vec![b], rank as u32);
        encoder.insert(vec![b, b' '], 256 + rank as u32);
    }

    let mut lines = text.lines().filter(|l| !l.is_empty());
    lines
        .next()
        .ok_or_else(|| VocabError::ParseError("empty CLIP vocabulary".to_string()))?;

    let mut rank = encoder.len() as u32;
    let mut merges = 0usize;
    for line in lines.take(CLIP_MERGE_LINES) {
        let (first, second) = line
            .split_once(' ')
            .ok_or_else(|| VocabError::ParseError(format!("bad merge line: {line:?}")))?;
        let mut bytes = clip_merge_token_bytes(first, &char_to_byte)?;
        bytes.extend(clip_merge_token_bytes(second, &char_to_byte)?);
        if encoder.insert(bytes, rank).is_some() {
            return Err(VocabError::DuplicateToken);
        }
        rank += 1;
        merges += 1;
    }
    if merges != CLIP_MERGE_LINES {
        return Err(VocabError::ParseError(format!(
            "expected {CLIP_MERGE_LINES} merge lines, found {merges}"
        )));
    }

    Ok(encoder)
}

/// Map one merge-file token back to raw bytes, rewriting a trailing `</w>`
/// to the space byte.
fn clip_merge_token_bytes(
    token: &str,
    char_to_byte: &FxHashMap<char, u8>,
) -> Result<Vec<u8>, VocabError> {
    let (stem, end_of_word) = match token.strip_suffix("</w>") {
        Some(stem) => (stem, true),
        None => (token, false),
    };
    let mut bytes = Vec::with_capacity(stem.len() + usize::from(end_of_word));
    for ch in stem.chars() {
        let b = char_to_byte
            .get(&ch)
            .ok_or_else(|| VocabError::ParseError(format!("character {ch:?} outside the byte alphabet")))?;
        bytes.push(*b);
    }
    if end_of_word {
        bytes.push(b' ');
    }
    Ok(bytes)
}
