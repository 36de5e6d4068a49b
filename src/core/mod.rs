//! Core tokenization engines.
//!
//! This module contains the two tokenizer families and their supporting
//! pieces:
//!
//! - [`BpeTokenizer`]: tiktoken-compatible byte-pair encoder with regex
//!   pre-tokenization, special-token scanning and an LRU chunk cache; a
//!   tagged CLIP configuration adds the text-encoder framing rules
//! - [`bpe`]: the low-level byte-pair merge engine
//! - [`vocab`]: vocabulary loaders for the tiktoken text format and the
//!   open_clip gzip merge file
//! - [`pretrained`]: the catalog of published encodings and their
//!   special-token tables
//! - [`Unigram`]: SentencePiece-compatible Viterbi segmenter over a
//!   code-point trie, with byte fallback
//! - [`sentencepiece`]: minimal decoder for the SentencePiece model file
//! - [`StreamingDecoder`]: UTF-8 safe decoder for token-by-token output
//!
//! Constructed tokenizers are immutable and safe to share across threads;
//! the only interior mutability is the chunk cache behind a `Mutex`.

pub mod bpe;
pub mod hex;
mod loader;
pub mod pretrained;
pub mod sentencepiece;
mod streaming;
mod tokenizer;
mod unigram;
pub mod vocab;

pub use bpe::byte_pair_encode;
pub use loader::{ByteLoader, FileLoader};
pub use pretrained::{get_bpe, EncodingKind};
pub use sentencepiece::{ModelParseError, ModelPiece, PieceKind, SentencePieceModel};
pub use streaming::StreamingDecoder;
pub use tokenizer::{
    BpeTokenizer, ClipOptions, TokenizerError, CL100K_BASE_PATTERN, CLIP_PATTERN,
    O200K_BASE_PATTERN, R50K_BASE_PATTERN,
};
pub use unigram::{load_sentencepiece, Unigram, UnigramError};
pub use vocab::{build_decoder, load_clip_vocab, load_tiktoken_bpe, VocabError};
