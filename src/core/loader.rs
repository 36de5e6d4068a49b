//! The bytes-by-URL loader boundary.
//!
//! Vocabularies and SentencePiece models are published as files; how their
//! bytes arrive (HTTP client, cache, bundle) is the host application's
//! business. The crate only asks for a [`ByteLoader`], and I/O failures
//! propagate unwrapped.

use std::io;
use std::path::PathBuf;

/// Fetches the bytes behind a URL.
///
/// Implementations may download, read from a cache, or serve embedded data.
/// Closures of the right shape work directly:
///
/// ```
/// use slivr::ByteLoader;
///
/// let loader = |url: &str| -> std::io::Result<Vec<u8>> {
///     Err(std::io::Error::new(std::io::ErrorKind::NotFound, url.to_string()))
/// };
/// assert!(loader.fetch("https://example.com/vocab").is_err());
/// ```
pub trait ByteLoader {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>>;
}

impl<F> ByteLoader for F
where
    F: Fn(&str) -> io::Result<Vec<u8>>,
{
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        self(url)
    }
}

/// Serves URLs from a local directory by final path segment.
///
/// `https://…/cl100k_base.tiktoken` resolves to
/// `<root>/cl100k_base.tiktoken`. Useful for tests and offline setups where
/// the published files are pre-downloaded.
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ByteLoader for FileLoader {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("no file name in {url:?}"))
            })?;
        std::fs::read(self.root.join(file_name))
    }
}
