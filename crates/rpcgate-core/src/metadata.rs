//! RPC response metadata

use http::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// Metadata errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("invalid metadata value for key {0:?}")]
    InvalidValue(String),
}

/// Header and trailer metadata received from an RPC.
///
/// Created per request and carried alongside the reply so that the response
/// forwarder and the error handler can emit it as HTTP headers and trailers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMetadata {
    pub header: HeaderMap,
    pub trailer: HeaderMap,
}

impl ServerMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header entry
    pub fn append_header(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = parse_entry(key, value)?;
        self.header.append(name, value);
        Ok(())
    }

    /// Append a trailer entry
    pub fn append_trailer(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = parse_entry(key, value)?;
        self.trailer.append(name, value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.trailer.is_empty()
    }
}

fn parse_entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), MetadataError> {
    let name = HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes())
        .map_err(|_| MetadataError::InvalidKey(key.to_string()))?;
    let value =
        HeaderValue::from_str(value).map_err(|_| MetadataError::InvalidValue(key.to_string()))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_entries() {
        let mut md = ServerMetadata::new();
        assert!(md.is_empty());

        md.append_header("X-Request-Id", "abc").unwrap();
        md.append_header("x-request-id", "def").unwrap();
        md.append_trailer("checksum", "42").unwrap();

        let values: Vec<_> = md.header.get_all("x-request-id").iter().collect();
        assert_eq!(values, vec!["abc", "def"]);
        assert_eq!(md.trailer.get("checksum").unwrap(), "42");
    }

    #[test]
    fn test_invalid_key() {
        let mut md = ServerMetadata::new();
        assert_eq!(
            md.append_header("bad key", "v"),
            Err(MetadataError::InvalidKey("bad key".to_string()))
        );
    }
}
