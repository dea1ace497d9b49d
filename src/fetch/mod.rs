//! Byte transport seam
//!
//! Fetching tile bytes is an external concern: the engine only needs
//! `url -> bytes`. [`FileFetcher`] covers local and UNC paths out of the box;
//! hosts plug their own [`TileFetcher`] for http(s). Fetch runs on blocking
//! worker threads, so implementations are free to block.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported url scheme for {0}")]
    UnsupportedScheme(String),
    #[error("fetch {url} failed: {source}")]
    Io {
        url: String,
        source: std::io::Error,
    },
    #[error("not found: {0}")]
    NotFound(String),
}

/// Byte fetcher for tile and tileset URLs.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Filesystem fetcher.
///
/// Accepts `file:///absolute/path`, UNC-style `file://host/share/path`, and
/// plain filesystem paths. Rejects http(s) URLs; those need a host-provided
/// fetcher.
pub struct FileFetcher;

impl TileFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("http") {
            return Err(FetchError::UnsupportedScheme(url.to_string()));
        }
        let path = if let Some(rest) = url.strip_prefix("file:///") {
            // file:///C:/data on Windows, file:///home/data elsewhere
            if rest.as_bytes().get(1) == Some(&b':') {
                rest.to_string()
            } else {
                format!("/{}", rest)
            }
        } else if let Some(rest) = url.strip_prefix("file://") {
            // Shared-folder path: file://host/share -> //host/share
            format!("//{}", rest)
        } else {
            url.to_string()
        };
        std::fs::read(&path).map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })
    }
}

/// Preloaded url -> bytes map for tests and tooling.
#[derive(Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(url.into(), bytes);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl TileFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// Everything up to and including the last `/` of a URL; empty when the URL
/// has no path separator.
pub fn base_url(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) => url[..=idx].to_string(),
        None => String::new(),
    }
}

/// Last path segment with any query string stripped.
pub fn file_name(url: &str) -> &str {
    let tail = match url.rfind('/') {
        Some(idx) => &url[idx + 1..],
        None => url,
    };
    match tail.find('?') {
        Some(idx) => &tail[..idx],
        None => tail,
    }
}

/// Resolve a relative reference against a base produced by [`base_url`].
pub fn join(base: &str, reference: &str) -> String {
    if reference.contains("://") {
        return reference.to_string();
    }
    format!("{}{}", base, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("http://host/a/b/scene.3mx"), "http://host/a/b/");
        assert_eq!(base_url("Data/root.3mxb"), "Data/");
        assert_eq!(base_url("root.3mxb"), "");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("http://host/a/tile.3mxb"), "tile.3mxb");
        assert_eq!(file_name("http://host/a/tile.3mxb?v=2"), "tile.3mxb");
        assert_eq!(file_name("tile.3mxb"), "tile.3mxb");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("http://host/a/", "Data/root.3mxb"), "http://host/a/Data/root.3mxb");
        assert_eq!(join("http://host/a/", "http://elsewhere/x.3mxb"), "http://elsewhere/x.3mxb");
    }

    #[test]
    fn test_file_fetcher_reads_plain_and_file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"3MXBO").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert_eq!(FileFetcher.fetch(&path).unwrap(), b"3MXBO");
        // file:///tmp/... carries the absolute path after the third slash
        let url = format!("file://{}", path);
        assert_eq!(FileFetcher.fetch(&url).unwrap(), b"3MXBO");
    }

    #[test]
    fn test_file_fetcher_rejects_http() {
        let result = FileFetcher.fetch("http://host/tile.3mxb");
        assert!(matches!(result, Err(FetchError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_file_fetcher_missing_file() {
        let result = FileFetcher.fetch("/definitely/not/here.3mxb");
        assert!(matches!(result, Err(FetchError::Io { .. })));
    }

    #[test]
    fn test_memory_fetcher() {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("mem://a", vec![1, 2, 3]);
        assert_eq!(fetcher.fetch("mem://a").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            fetcher.fetch("mem://b"),
            Err(FetchError::NotFound(_))
        ));
    }
}
