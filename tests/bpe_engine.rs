//! Integration tests for the byte-pair merge engine and the BPE pipeline,
//! run against small synthetic vocabularies so the suite stays hermetic.

use rustc_hash::{FxHashMap, FxHashSet};
use slivr::{byte_pair_encode, BpeTokenizer, R50K_BASE_PATTERN};

/// Identity vocabulary: every byte maps to its own value.
fn byte_vocab() -> FxHashMap<Vec<u8>, u32> {
    (0u8..=255).map(|b| (vec![b], b as u32)).collect()
}

#[test]
fn test_tie_break_is_leftmost() {
    // With "ab" and "bc" at equal rank and no "abc" entry, "abc" must merge
    // the leftmost pair: [ab, c], never [a, bc].
    let mut ranks = byte_vocab();
    ranks.insert(b"ab".to_vec(), 500);
    ranks.insert(b"bc".to_vec(), 500);
    assert_eq!(byte_pair_encode(b"abc", &ranks), vec![500, b'c' as u32]);
}

#[test]
fn test_rank_order_beats_position() {
    let mut ranks = byte_vocab();
    ranks.insert(b"ab".to_vec(), 501);
    ranks.insert(b"bc".to_vec(), 500);
    assert_eq!(byte_pair_encode(b"abc", &ranks), vec![b'a' as u32, 500]);
}

#[test]
fn test_cascading_merges() {
    let mut ranks = byte_vocab();
    ranks.insert(b"ab".to_vec(), 256);
    ranks.insert(b"cd".to_vec(), 257);
    ranks.insert(b"abcd".to_vec(), 258);
    assert_eq!(byte_pair_encode(b"abcd", &ranks), vec![258]);
}

#[test]
fn test_repeated_pairs_merge_left_to_right() {
    // "aaaa" with only "aa": equal ranks everywhere, so the leftmost pair
    // merges first and the result is two "aa" tokens.
    let mut ranks = byte_vocab();
    ranks.insert(b"aa".to_vec(), 256);
    assert_eq!(byte_pair_encode(b"aaaa", &ranks), vec![256, 256]);
    // Odd length leaves a single byte at the end.
    assert_eq!(
        byte_pair_encode(b"aaaaa", &ranks),
        vec![256, 256, b'a' as u32]
    );
}

#[test]
fn test_roundtrip_over_byte_vocab() {
    let tokenizer = BpeTokenizer::new(byte_vocab(), FxHashMap::default(), R50K_BASE_PATTERN).unwrap();

    let cases = [
        "Hello, world!",
        "The quick brown fox jumps over the lazy dog.",
        "  leading and trailing  ",
        "tabs\tand\nnewlines\r\n",
        "digits 1234567890 and punct !@#$%",
        "unicode: こんにちは 世界 🦀 ▁",
        "",
    ];
    for text in cases {
        let tokens = tokenizer.encode(text);
        assert_eq!(
            tokenizer.decode(&tokens).unwrap(),
            text,
            "roundtrip failed for {text:?}"
        );
    }
}

#[test]
fn test_roundtrip_with_merges() {
    let mut vocab = byte_vocab();
    vocab.insert(b"he".to_vec(), 256);
    vocab.insert(b"ll".to_vec(), 257);
    vocab.insert(b"hell".to_vec(), 258);
    vocab.insert(b"hello".to_vec(), 259);
    vocab.insert(b" world".to_vec(), 260);
    let tokenizer = BpeTokenizer::new(vocab, FxHashMap::default(), R50K_BASE_PATTERN).unwrap();

    assert_eq!(tokenizer.encode("hello world"), vec![259, 260]);
    assert_eq!(tokenizer.decode(&[259, 260]).unwrap(), "hello world");
}

#[test]
fn test_special_literal_tokenized_bytewise_unless_allowed() {
    let mut special = FxHashMap::default();
    special.insert("<|endoftext|>".to_string(), 50256);
    let tokenizer = BpeTokenizer::new(byte_vocab(), special, R50K_BASE_PATTERN).unwrap();

    let plain = tokenizer.encode("<|endoftext|>");
    assert!(!plain.contains(&50256));
    assert_eq!(tokenizer.decode(&plain).unwrap(), "<|endoftext|>");

    let allowed: FxHashSet<&str> = ["<|endoftext|>"].into_iter().collect();
    assert_eq!(
        tokenizer.encode_with_allowed("<|endoftext|>", &allowed),
        vec![50256]
    );
    assert_eq!(tokenizer.encode_with_special("<|endoftext|>"), vec![50256]);
}

#[test]
fn test_specials_split_the_text_around_them() {
    let mut vocab = byte_vocab();
    // A merge spanning the special boundary must never fire.
    vocab.insert(b"ab".to_vec(), 256);
    let mut special = FxHashMap::default();
    special.insert("<|sep|>".to_string(), 9000);
    let tokenizer = BpeTokenizer::new(vocab, special, R50K_BASE_PATTERN).unwrap();

    let tokens = tokenizer.encode_with_special("a<|sep|>b");
    assert_eq!(tokens, vec![b'a' as u32, 9000, b'b' as u32]);
}

#[test]
fn test_contraction_fragments() {
    // The r50k pattern splits contractions from their stem.
    let tokenizer = BpeTokenizer::new(byte_vocab(), FxHashMap::default(), R50K_BASE_PATTERN).unwrap();
    let tokens = tokenizer.encode("can't");
    assert_eq!(tokenizer.decode(&tokens).unwrap(), "can't");
}
