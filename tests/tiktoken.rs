//! Integration tests for the encoding catalog and, behind `SLIVR_VOCAB_DIR`,
//! bit-exact scenarios against the published tiktoken vocabularies.

use slivr::{get_bpe, BpeTokenizer, FileLoader, TokenizerError};

#[test]
fn test_unknown_encoding_name() {
    let loader = |_url: &str| -> std::io::Result<Vec<u8>> { Ok(Vec::new()) };
    let err = get_bpe("q300k_base", &loader).err().expect("must fail");
    match err {
        TokenizerError::UnknownEncoding(name) => assert_eq!(name, "q300k_base"),
        other => panic!("expected UnknownEncoding, got {other}"),
    }
}

#[test]
fn test_loader_errors_propagate() {
    let loader = |url: &str| -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, url.to_string()))
    };
    assert!(matches!(
        get_bpe("cl100k_base", &loader),
        Err(TokenizerError::Io(_))
    ));
}

#[test]
fn test_malformed_vocabulary_fails_construction() {
    let loader = |_url: &str| -> std::io::Result<Vec<u8>> { Ok(b"not base64!!! 0\n".to_vec()) };
    assert!(matches!(
        get_bpe("r50k_base", &loader),
        Err(TokenizerError::Vocab(_))
    ));
}

#[test]
fn test_catalog_builds_from_synthetic_vocab() {
    // A tiny but well-formed tiktoken payload: all 256 single bytes.
    let mut payload = String::new();
    for b in 0u16..=255 {
        use base64::{engine::general_purpose::STANDARD, Engine};
        payload.push_str(&STANDARD.encode([b as u8]));
        payload.push(' ');
        payload.push_str(&b.to_string());
        payload.push('\n');
    }
    let loader = move |_url: &str| -> std::io::Result<Vec<u8>> { Ok(payload.clone().into_bytes()) };

    let enc = get_bpe("cl100k_base", &loader).unwrap();
    assert_eq!(enc.special_tokens().get("<|endoftext|>"), Some(&100257));
    let tokens = enc.encode("hi");
    assert_eq!(enc.decode(&tokens).unwrap(), "hi");

    let enc = get_bpe("o200k_harmony", &loader).unwrap();
    assert_eq!(enc.special_tokens().get("<|startoftext|>"), Some(&199998));
    assert_eq!(enc.special_tokens().get("<|reserved_201087|>"), Some(&201087));
}

fn reference_tokenizer(name: &str) -> Option<BpeTokenizer> {
    let dir = std::env::var_os("SLIVR_VOCAB_DIR")?;
    Some(get_bpe(name, &FileLoader::new(dir)).unwrap())
}

#[test]
#[ignore = "requires the published .tiktoken files in SLIVR_VOCAB_DIR"]
fn test_r50k_reference_scenarios() {
    let Some(enc) = reference_tokenizer("r50k_base") else {
        eprintln!("SLIVR_VOCAB_DIR not set; skipping");
        return;
    };
    assert_eq!(enc.encode("hello world"), vec![31373, 995]);
    assert_eq!(enc.encode(""), Vec::<u32>::new());
    assert_eq!(enc.decode(&[31373, 995]).unwrap(), "hello world");
    assert_eq!(enc.vocab_size(), 50257);
}

#[test]
#[ignore = "requires the published .tiktoken files in SLIVR_VOCAB_DIR"]
fn test_p50k_reference_scenarios() {
    let Some(enc) = reference_tokenizer("p50k_base") else {
        eprintln!("SLIVR_VOCAB_DIR not set; skipping");
        return;
    };
    assert_eq!(enc.encode("hello world"), vec![31373, 995]);
    assert_eq!(enc.encode(""), Vec::<u32>::new());
}

#[test]
#[ignore = "requires the published .tiktoken files in SLIVR_VOCAB_DIR"]
fn test_cl100k_reference_roundtrip() {
    let Some(enc) = reference_tokenizer("cl100k_base") else {
        eprintln!("SLIVR_VOCAB_DIR not set; skipping");
        return;
    };
    for text in [
        "hello world",
        "Hello, world! I'm a tokenizer.",
        "числа and 数字 and 🦀",
        "    indented\n\tcode\n",
        "1234567890",
    ] {
        let tokens = enc.encode(text);
        assert_eq!(enc.decode(&tokens).unwrap(), text, "roundtrip for {text:?}");
    }

    let with_special = enc.encode_with_special("hi<|endoftext|>");
    assert_eq!(with_special.last(), Some(&100257));
}

#[test]
#[ignore = "requires the published .tiktoken files in SLIVR_VOCAB_DIR"]
fn test_o200k_reference_roundtrip() {
    let Some(enc) = reference_tokenizer("o200k_base") else {
        eprintln!("SLIVR_VOCAB_DIR not set; skipping");
        return;
    };
    for text in ["hello world", "It's o200k's turn", "a/b/c /path/to/file\n"] {
        let tokens = enc.encode(text);
        assert_eq!(enc.decode(&tokens).unwrap(), text, "roundtrip for {text:?}");
    }
}
