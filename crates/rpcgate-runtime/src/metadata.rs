//! Mapping between HTTP headers and RPC metadata

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use http::header::{AUTHORIZATION, HOST, TE, TRAILER};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue};
use rpcgate_core::ServerMetadata;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

const GRPC_TIMEOUT: &str = "grpc-timeout";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Outgoing metadata and deadline for one RPC
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMetadata {
    pub outgoing: HeaderMap,
    pub timeout: Option<Duration>,
}

/// Build the outgoing RPC metadata for a request.
///
/// Forwards `Authorization` and prefixed metadata headers, records the
/// original host and the peer address, and decodes `Grpc-Timeout`.
pub fn annotate_request(
    parts: &Parts,
    config: &GatewayConfig,
) -> Result<RequestMetadata, GatewayError> {
    let headers = &parts.headers;
    let prefix = config.metadata_header_prefix.to_ascii_lowercase();
    let mut outgoing = HeaderMap::new();

    for (name, value) in headers {
        if name == AUTHORIZATION {
            outgoing.append(AUTHORIZATION, value.clone());
            continue;
        }
        let Some(key) = name.as_str().strip_prefix(prefix.as_str()) else {
            continue;
        };
        match HeaderName::from_bytes(key.as_bytes()) {
            Ok(key) => {
                outgoing.append(key, value.clone());
            }
            Err(_) => debug!(header = %name, "skipping metadata header with empty key"),
        }
    }

    let host = headers
        .get(X_FORWARDED_HOST)
        .or_else(|| headers.get(HOST))
        .cloned()
        .or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        });
    if let Some(host) = host {
        outgoing.insert(X_FORWARDED_HOST, host);
    }

    if let Some(peer) = parts.extensions.get::<SocketAddr>() {
        let ip = peer.ip().to_string();
        let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
            _ => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            outgoing.insert(X_FORWARDED_FOR, value);
        }
    }

    let timeout = match headers.get(GRPC_TIMEOUT) {
        Some(value) => {
            let text = value
                .to_str()
                .map_err(|_| GatewayError::Decode("grpc-timeout is not valid ASCII".to_string()))?;
            Some(decode_timeout(text).map_err(GatewayError::Decode)?)
        }
        None => config.default_timeout(),
    };

    Ok(RequestMetadata { outgoing, timeout })
}

/// Decode a `Grpc-Timeout` value: an integer followed by one of
/// `H M S m u n`
pub fn decode_timeout(value: &str) -> Result<Duration, String> {
    if value.len() < 2 {
        return Err(format!("timeout string is too short: {value:?}"));
    }
    let unit_nanos: u64 = match value.as_bytes()[value.len() - 1] {
        b'H' => 3_600_000_000_000,
        b'M' => 60_000_000_000,
        b'S' => 1_000_000_000,
        b'm' => 1_000_000,
        b'u' => 1_000,
        b'n' => 1,
        _ => return Err(format!("timeout unit is not recognized: {value:?}")),
    };
    let amount: u64 = value[..value.len() - 1]
        .parse()
        .map_err(|err| format!("invalid timeout {value:?}: {err}"))?;
    amount
        .checked_mul(unit_nanos)
        .map(Duration::from_nanos)
        .ok_or_else(|| format!("timeout out of range: {value:?}"))
}

fn prefixed(prefix: &str, key: &HeaderName) -> Option<HeaderName> {
    HeaderName::from_bytes(format!("{prefix}{}", key.as_str()).as_bytes()).ok()
}

/// Emit RPC header metadata as prefixed response headers
pub fn append_header_metadata(headers: &mut HeaderMap, md: &ServerMetadata, config: &GatewayConfig) {
    for (key, value) in &md.header {
        if let Some(name) = prefixed(&config.metadata_header_prefix, key) {
            headers.append(name, value.clone());
        }
    }
}

/// Whether the client asked for HTTP trailers
pub fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(TE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("trailers"))
}

/// Declare the trailers [`trailer_headers`] will produce
pub fn announce_trailers(headers: &mut HeaderMap, md: &ServerMetadata, config: &GatewayConfig) {
    for key in md.trailer.keys() {
        let announced = format!("{}{}", config.metadata_trailer_prefix, key.as_str());
        if let Ok(value) = HeaderValue::from_str(&announced) {
            headers.append(TRAILER, value);
        }
    }
}

/// RPC trailer metadata as prefixed HTTP trailers
pub fn trailer_headers(md: &ServerMetadata, config: &GatewayConfig) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    for (key, value) in &md.trailer {
        if let Some(name) = prefixed(&config.metadata_trailer_prefix, key) {
            trailers.append(name, value.clone());
        }
    }
    trailers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_forwards_authorization_and_prefixed_headers() {
        let req = Request::builder()
            .uri("/v1/books")
            .header("Authorization", "Bearer t")
            .header("Grpc-Metadata-Tenant", "acme")
            .header("Grpc-Metadata-Tenant", "beta")
            .header("Accept", "application/json")
            .body(())
            .unwrap();
        let md = annotate_request(&parts(req), &GatewayConfig::default()).unwrap();

        assert_eq!(md.outgoing["authorization"], "Bearer t");
        let tenants: Vec<_> = md.outgoing.get_all("tenant").iter().collect();
        assert_eq!(tenants, ["acme", "beta"]);
        assert!(md.outgoing.get("accept").is_none());
        assert_eq!(md.timeout, None);
    }

    #[test]
    fn test_forwarded_host_and_for() {
        let mut req = Request::builder()
            .uri("/v1/books")
            .header("Host", "api.example.com")
            .header("X-Forwarded-For", "10.0.0.1")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert("192.168.1.9:51234".parse::<SocketAddr>().unwrap());
        let md = annotate_request(&parts(req), &GatewayConfig::default()).unwrap();

        assert_eq!(md.outgoing["x-forwarded-host"], "api.example.com");
        assert_eq!(md.outgoing["x-forwarded-for"], "10.0.0.1, 192.168.1.9");
    }

    #[test]
    fn test_forwarded_host_from_uri_authority() {
        let req = Request::builder()
            .uri("http://origin.local:8080/v1/books")
            .body(())
            .unwrap();
        let md = annotate_request(&parts(req), &GatewayConfig::default()).unwrap();
        assert_eq!(md.outgoing["x-forwarded-host"], "origin.local:8080");
        assert!(md.outgoing.get("x-forwarded-for").is_none());
    }

    #[test]
    fn test_timeout_header_and_default() {
        let req = Request::builder()
            .uri("/")
            .header("Grpc-Timeout", "150m")
            .body(())
            .unwrap();
        let config = GatewayConfig::default().with_default_timeout(Duration::from_secs(9));
        let md = annotate_request(&parts(req), &config).unwrap();
        assert_eq!(md.timeout, Some(Duration::from_millis(150)));

        let req = Request::builder().uri("/").body(()).unwrap();
        let md = annotate_request(&parts(req), &config).unwrap();
        assert_eq!(md.timeout, Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_malformed_timeout_is_decode_error() {
        let req = Request::builder()
            .uri("/")
            .header("Grpc-Timeout", "10x")
            .body(())
            .unwrap();
        let err = annotate_request(&parts(req), &GatewayConfig::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[test]
    fn test_decode_timeout_units() {
        assert_eq!(decode_timeout("2H"), Ok(Duration::from_secs(7200)));
        assert_eq!(decode_timeout("3M"), Ok(Duration::from_secs(180)));
        assert_eq!(decode_timeout("1S"), Ok(Duration::from_secs(1)));
        assert_eq!(decode_timeout("7u"), Ok(Duration::from_micros(7)));
        assert_eq!(decode_timeout("9n"), Ok(Duration::from_nanos(9)));
        assert!(decode_timeout("S").is_err());
        assert!(decode_timeout("-1S").is_err());
        assert!(decode_timeout("1é").is_err());
    }

    #[test]
    fn test_response_metadata_helpers() {
        let mut md = ServerMetadata::new();
        md.append_header("x-request-id", "abc").unwrap();
        md.append_trailer("checksum", "42").unwrap();
        let config = GatewayConfig::default();

        let mut headers = HeaderMap::new();
        append_header_metadata(&mut headers, &md, &config);
        assert_eq!(headers["grpc-metadata-x-request-id"], "abc");

        announce_trailers(&mut headers, &md, &config);
        assert_eq!(headers["trailer"], "Grpc-Trailer-checksum");

        let trailers = trailer_headers(&md, &config);
        assert_eq!(trailers["grpc-trailer-checksum"], "42");
    }

    #[test]
    fn test_accepts_trailers() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_trailers(&headers));
        headers.insert(TE, HeaderValue::from_static("gzip, Trailers"));
        assert!(accepts_trailers(&headers));
    }
}
