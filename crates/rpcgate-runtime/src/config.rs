//! Gateway configuration

use serde::Deserialize;
use std::time::Duration;

/// Default prefix mapping HTTP headers to RPC metadata and back
pub const METADATA_HEADER_PREFIX: &str = "Grpc-Metadata-";

/// Default prefix for RPC trailers emitted as HTTP trailers
pub const METADATA_TRAILER_PREFIX: &str = "Grpc-Trailer-";

/// Options of the protobuf-aware JSON codec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JsonPbOptions {
    /// Emit `snake_case` proto field names instead of `lowerCamelCase`
    pub use_proto_names: bool,
    /// Emit enum values as numbers instead of names
    pub use_enum_numbers: bool,
    /// Emit fields holding their default value
    pub emit_unpopulated: bool,
    /// Pretty-print with this indent
    pub indent: Option<String>,
    /// Ignore unknown fields when decoding
    pub discard_unknown: bool,
}

impl Default for JsonPbOptions {
    fn default() -> Self {
        Self {
            use_proto_names: true,
            use_enum_numbers: false,
            emit_unpopulated: false,
            indent: None,
            discard_unknown: true,
        }
    }
}

/// Gateway configuration.
///
/// Loadable from any serde source; absent keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Options of the fallback JSON codec
    pub json: JsonPbOptions,
    /// RPC deadline applied when the request has no `Grpc-Timeout`
    pub default_timeout_ms: Option<u64>,
    /// Honour `X-HTTP-Method-Override` on POST requests
    pub method_override: bool,
    /// Prefix of HTTP headers carrying RPC metadata
    pub metadata_header_prefix: String,
    /// Prefix of HTTP trailers carrying RPC trailer metadata
    pub metadata_trailer_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            json: JsonPbOptions::default(),
            default_timeout_ms: None,
            method_override: true,
            metadata_header_prefix: METADATA_HEADER_PREFIX.to_string(),
            metadata_trailer_prefix: METADATA_TRAILER_PREFIX.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the JSON codec options
    pub fn with_json(mut self, json: JsonPbOptions) -> Self {
        self.json = json;
        self
    }

    /// Set the default RPC deadline
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    /// Enable or disable `X-HTTP-Method-Override`
    pub fn with_method_override(mut self, enabled: bool) -> Self {
        self.method_override = enabled;
        self
    }

    /// Default RPC deadline
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert!(config.json.use_proto_names);
        assert!(config.method_override);
        assert_eq!(config.metadata_header_prefix, "Grpc-Metadata-");
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"default_timeout_ms": 1500, "json": {"emit_unpopulated": true}}"#,
        )
        .unwrap();
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.json.emit_unpopulated);
        assert!(config.json.use_proto_names);
        assert_eq!(config.metadata_trailer_prefix, "Grpc-Trailer-");
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::new()
            .with_default_timeout(Duration::from_secs(2))
            .with_method_override(false);
        assert_eq!(config.default_timeout_ms, Some(2000));
        assert!(!config.method_override);
    }
}
