//! Error types for the catalog client, the playlist cache and the controller.

use thiserror::Error;

/// Failures of a single catalog request or of the data it returned.
///
/// These never reach presentation clients: the acquisition pipeline turns
/// them into a fallback activation and a log line.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned code {code}")]
    Api { code: i64 },

    #[error("catalog returned no tracks")]
    EmptyTrackList,

    #[error("no tracks left after sanitization")]
    EmptyAfterSanitize,

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    /// True for HTTP 429 responses or the catalog's own rate-limit code.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            CatalogError::Http(e) => e.status().map(|s| s.as_u16()) == Some(429),
            CatalogError::Api { code } => *code == 429 || *code == -460,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("index {index} out of bounds for playlist of {len} tracks")]
    IndexOutOfBounds { index: usize, len: usize },
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_codes() {
        assert!(CatalogError::Api { code: 429 }.is_rate_limit());
        assert!(CatalogError::Api { code: -460 }.is_rate_limit());
        assert!(!CatalogError::Api { code: 404 }.is_rate_limit());
        assert!(!CatalogError::EmptyTrackList.is_rate_limit());
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = PlaybackError::IndexOutOfBounds { index: 9, len: 2 };
        assert_eq!(
            err.to_string(),
            "index 9 out of bounds for playlist of 2 tracks"
        );
    }
}
