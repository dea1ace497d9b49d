//! Error types for the threemx engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("fetch error: {0}")]
    Fetch(#[from] crate::fetch::FetchError),

    #[error("decode error: {0}")]
    Decode(#[from] crate::format::DecodeError),

    #[error("tileset error: {0}")]
    Tileset(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::format::DecodeError;

    #[test]
    fn test_from_fetch_error() {
        let err: Error = FetchError::NotFound("mem://a.3mxb".to_string()).into();
        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(err.to_string(), "fetch error: not found: mem://a.3mxb");
    }

    #[test]
    fn test_from_decode_error() {
        let err: Error = DecodeError::EmptyHeader.into();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.to_string(), "decode error: zero-length header");
    }
}
