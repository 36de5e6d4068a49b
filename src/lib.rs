//! Slivr - tokenizer suite for LLM and multimodal pipelines.
//!
//! Two engines, both bit-exact against their references:
//!
//! - **BPE** compatible with OpenAI's tiktoken vocabularies (the
//!   r50k/p50k/cl100k/o200k families) plus the CLIP text-encoder variant
//!   (case folding, space-suffixed word markers, BOS/EOS framing padded to a
//!   fixed context of 77).
//! - **Unigram** segmentation compatible with SentencePiece model files, via
//!   Viterbi best-path search with byte fallback.
//!
//! Vocabulary bytes come in through the [`ByteLoader`] boundary; the crate
//! itself never talks to the network.

pub mod core;

pub use core::{
    byte_pair_encode, get_bpe, load_sentencepiece, BpeTokenizer, ByteLoader, ClipOptions,
    EncodingKind, FileLoader, ModelParseError, ModelPiece, PieceKind, SentencePieceModel,
    StreamingDecoder, TokenizerError, Unigram, UnigramError, VocabError, CL100K_BASE_PATTERN,
    CLIP_PATTERN, O200K_BASE_PATTERN, R50K_BASE_PATTERN,
};
