use super::{JsonPb, Marshaler};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Request};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Registry key matching any content type
pub const MIME_WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("empty MIME type")]
    EmptyMime,
}

/// Process-wide fallback codec, used when nothing in a registry matches
pub fn default_marshaler() -> Arc<dyn Marshaler> {
    static DEFAULT: OnceLock<Arc<JsonPb>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(JsonPb::default())).clone()
}

#[derive(Debug, Clone, Default)]
struct Entry {
    inbound: Option<Arc<dyn Marshaler>>,
    outbound: Option<Arc<dyn Marshaler>>,
}

/// Inbound and outbound codecs keyed by MIME type
#[derive(Debug, Clone, Default)]
pub struct MarshalerRegistry {
    entries: HashMap<String, Entry>,
}

impl MarshalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both directions for `mime`, replacing any existing entry
    pub fn add(
        &mut self,
        mime: &str,
        inbound: Arc<dyn Marshaler>,
        outbound: Arc<dyn Marshaler>,
    ) -> Result<(), RegistryError> {
        check(mime)?;
        self.entries.insert(
            mime.to_string(),
            Entry {
                inbound: Some(inbound),
                outbound: Some(outbound),
            },
        );
        Ok(())
    }

    /// Set the inbound codec for `mime`, keeping its outbound one
    pub fn add_inbound(
        &mut self,
        mime: &str,
        inbound: Arc<dyn Marshaler>,
    ) -> Result<(), RegistryError> {
        check(mime)?;
        self.entries.entry(mime.to_string()).or_default().inbound = Some(inbound);
        Ok(())
    }

    /// Set the outbound codec for `mime`, keeping its inbound one. The key
    /// is stored in canonical header case.
    pub fn add_outbound(
        &mut self,
        mime: &str,
        outbound: Arc<dyn Marshaler>,
    ) -> Result<(), RegistryError> {
        check(mime)?;
        self.entries.entry(canonical_key(mime)).or_default().outbound = Some(outbound);
        Ok(())
    }

    pub fn contains(&self, mime: &str) -> bool {
        self.entries.contains_key(mime)
    }

    /// Pick the (inbound, outbound) pair for a set of request headers.
    ///
    /// `Content-Type` values are tried in header order, then `*`; each side
    /// takes the first entry providing it and falls back to
    /// [`default_marshaler`].
    pub fn for_headers(&self, headers: &HeaderMap) -> (Arc<dyn Marshaler>, Arc<dyn Marshaler>) {
        let mut inbound = None;
        let mut outbound = None;

        let content_types = headers
            .get_all(CONTENT_TYPE)
            .iter()
            .filter_map(|value| value.to_str().ok());
        for mime in content_types.chain(std::iter::once(MIME_WILDCARD)) {
            if let Some(entry) = self.entries.get(mime) {
                if inbound.is_none() {
                    inbound = entry.inbound.clone();
                }
                if outbound.is_none() {
                    outbound = entry.outbound.clone();
                }
            }
            if inbound.is_some() && outbound.is_some() {
                break;
            }
        }

        (
            inbound.unwrap_or_else(default_marshaler),
            outbound.unwrap_or_else(default_marshaler),
        )
    }

    pub fn for_request<B>(&self, request: &Request<B>) -> (Arc<dyn Marshaler>, Arc<dyn Marshaler>) {
        self.for_headers(request.headers())
    }
}

fn check(mime: &str) -> Result<(), RegistryError> {
    if mime.is_empty() {
        return Err(RegistryError::EmptyMime);
    }
    Ok(())
}

/// `content-type` -> `Content-Type`. Keys holding anything but header
/// token characters are returned unchanged.
fn canonical_key(key: &str) -> String {
    let is_token = key.bytes().all(|b| {
        b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
    });
    if !is_token {
        return key.to_string();
    }

    let mut upper = true;
    key.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}
