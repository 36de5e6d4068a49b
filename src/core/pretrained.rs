//! Catalog of published encodings.
//!
//! Maps the public encoding names to their vocabulary location,
//! pre-tokenization pattern, and special-token table. Vocabulary bytes come
//! in through the [`ByteLoader`] boundary; nothing here talks to the
//! network.
//!
//! # Example
//!
//! ```no_run
//! use slivr::{get_bpe, FileLoader};
//!
//! let loader = FileLoader::new("vocabs");
//! let enc = get_bpe("cl100k_base", &loader).unwrap();
//! let ids = enc.encode("hello world");
//! ```

use rustc_hash::FxHashMap;

use super::loader::ByteLoader;
use super::tokenizer::{
    BpeTokenizer, ClipOptions, TokenizerError, CL100K_BASE_PATTERN, CLIP_PATTERN,
    O200K_BASE_PATTERN, R50K_BASE_PATTERN,
};
use super::vocab::{load_clip_vocab, load_tiktoken_bpe};

/// CLIP's fixed text-encoder context length.
pub const CLIP_CONTEXT_LEN: usize = 77;

/// The published encodings this crate knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingKind {
    /// CLIP text encoder (open_clip vocabulary, 49,406 ranks + BOS/EOS).
    Clip,
    /// OpenAI r50k_base (GPT-2, GPT-3).
    R50kBase,
    /// OpenAI p50k_base (Codex-era models).
    P50kBase,
    /// p50k_base plus the FIM special tokens.
    P50kEdit,
    /// OpenAI cl100k_base (GPT-4, GPT-3.5-turbo).
    Cl100kBase,
    /// OpenAI o200k_base (GPT-4o).
    O200kBase,
    /// o200k_base ranks with the harmony chat-format special tokens.
    O200kHarmony,
}

impl EncodingKind {
    /// Parse an encoding name. Returns `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "clip" => Some(Self::Clip),
            "r50k_base" => Some(Self::R50kBase),
            "p50k_base" => Some(Self::P50kBase),
            "p50k_edit" => Some(Self::P50kEdit),
            "cl100k_base" => Some(Self::Cl100kBase),
            "o200k_base" => Some(Self::O200kBase),
            "o200k_harmony" => Some(Self::O200kHarmony),
            _ => None,
        }
    }

    /// The canonical name of this encoding.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::R50kBase => "r50k_base",
            Self::P50kBase => "p50k_base",
            Self::P50kEdit => "p50k_edit",
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
            Self::O200kHarmony => "o200k_harmony",
        }
    }

    /// All recognized encoding names.
    pub fn supported_names() -> &'static [&'static str] {
        &[
            "clip",
            "r50k_base",
            "p50k_base",
            "p50k_edit",
            "cl100k_base",
            "o200k_base",
            "o200k_harmony",
        ]
    }

    /// Where the vocabulary bytes live. Handed to the [`ByteLoader`];
    /// several encodings share one file.
    pub fn vocab_url(&self) -> &'static str {
        match self {
            Self::Clip => "https://github.com/openai/CLIP/raw/main/clip/bpe_simple_vocab_16e6.txt.gz",
            Self::R50kBase => {
                "https://openaipublic.blob.core.windows.net/encodings/r50k_base.tiktoken"
            }
            Self::P50kBase | Self::P50kEdit => {
                "https://openaipublic.blob.core.windows.net/encodings/p50k_base.tiktoken"
            }
            Self::Cl100kBase => {
                "https://openaipublic.blob.core.windows.net/encodings/cl100k_base.tiktoken"
            }
            Self::O200kBase | Self::O200kHarmony => {
                "https://openaipublic.blob.core.windows.net/encodings/o200k_base.tiktoken"
            }
        }
    }

    /// The pre-tokenization pattern for this encoding.
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::Clip => CLIP_PATTERN,
            Self::R50kBase | Self::P50kBase | Self::P50kEdit => R50K_BASE_PATTERN,
            Self::Cl100kBase => CL100K_BASE_PATTERN,
            Self::O200kBase | Self::O200kHarmony => O200K_BASE_PATTERN,
        }
    }
}

/// Construct a tokenizer by encoding name, fetching vocabulary bytes
/// through `loader`.
pub fn get_bpe<L>(name: &str, loader: &L) -> Result<BpeTokenizer, TokenizerError>
where
    L: ByteLoader + ?Sized,
{
    let kind = EncodingKind::from_name(name)
        .ok_or_else(|| TokenizerError::UnknownEncoding(name.to_string()))?;
    let data = loader.fetch(kind.vocab_url())?;
    from_vocab_bytes(kind, &data)
}

/// Construct a tokenizer from already-fetched vocabulary bytes.
pub fn from_vocab_bytes(kind: EncodingKind, data: &[u8]) -> Result<BpeTokenizer, TokenizerError> {
    match kind {
        EncodingKind::Clip => {
            let encoder = load_clip_vocab(data)?;
            // <|startoftext|> sits at |vocab|, <|endoftext|> right after
            // (49,406 and 49,407 for the published file).
            let vocab = encoder.len() as u32;
            let mut special = FxHashMap::default();
            special.insert("<|startoftext|>".to_string(), vocab);
            special.insert("<|endoftext|>".to_string(), vocab + 1);
            let clip = ClipOptions {
                bos: vocab,
                eos: vocab + 1,
                pad: 0,
                context_len: CLIP_CONTEXT_LEN,
            };
            BpeTokenizer::new_clip(encoder, special, CLIP_PATTERN, clip)
        }
        _ => {
            let encoder = load_tiktoken_bpe(data)?;
            BpeTokenizer::new(encoder, special_tokens(kind), kind.pattern())
        }
    }
}

/// The special-token table for a non-CLIP encoding. CLIP's table depends on
/// its vocabulary size and is built in [`from_vocab_bytes`].
pub fn special_tokens(kind: EncodingKind) -> FxHashMap<String, u32> {
    match kind {
        EncodingKind::Clip => FxHashMap::default(),
        EncodingKind::R50kBase | EncodingKind::P50kBase => r50k_special_tokens(),
        EncodingKind::P50kEdit => p50k_edit_special_tokens(),
        EncodingKind::Cl100kBase => cl100k_base_special_tokens(),
        EncodingKind::O200kBase => o200k_base_special_tokens(),
        EncodingKind::O200kHarmony => o200k_harmony_special_tokens(),
    }
}

fn r50k_special_tokens() -> FxHashMap<String, u32> {
    let mut special = FxHashMap::default();
    special.insert("<|endoftext|>".to_string(), 50256);
    special
}

fn p50k_edit_special_tokens() -> FxHashMap<String, u32> {
    let mut special = r50k_special_tokens();
    special.insert("<|fim_prefix|>".to_string(), 50281);
    special.insert("<|fim_middle|>".to_string(), 50282);
    special.insert("<|fim_suffix|>".to_string(), 50283);
    special
}

fn cl100k_base_special_tokens() -> FxHashMap<String, u32> {
    let mut special = FxHashMap::default();
    special.insert("<|endoftext|>".to_string(), 100257);
    special.insert("<|fim_prefix|>".to_string(), 100258);
    special.insert("<|fim_middle|>".to_string(), 100259);
    special.insert("<|fim_suffix|>".to_string(), 100260);
    special.insert("<|endofprompt|>".to_string(), 100276);
    special
}

fn o200k_base_special_tokens() -> FxHashMap<String, u32> {
    let mut special = FxHashMap::default();
    special.insert("<|endoftext|>".to_string(), 199999);
    special.insert("<|endofprompt|>".to_string(), 200018);
    special
}

fn o200k_harmony_special_tokens() -> FxHashMap<String, u32> {
    let mut special = FxHashMap::default();
    special.insert("<|startoftext|>".to_string(), 199998);
    special.insert("<|endoftext|>".to_string(), 199999);
    special.insert("<|return|>".to_string(), 200002);
    special.insert("<|constrain|>".to_string(), 200003);
    special.insert("<|channel|>".to_string(), 200005);
    special.insert("<|start|>".to_string(), 200006);
    special.insert("<|end|>".to_string(), 200007);
    special.insert("<|message|>".to_string(), 200008);
    special.insert("<|call|>".to_string(), 200012);
    for id in [200000, 200001, 200004, 200009, 200010, 200011] {
        special.insert(format!("<|reserved_{id}|>"), id);
    }
    for id in 200013..=201087 {
        special.insert(format!("<|reserved_{id}|>"), id);
    }
    special
}
