//! Request multiplexer
//!
//! Routes are matched per HTTP method in registration order; the first
//! matching pattern wins. A path that only matches under another method
//! is answered with 405, anything else with 404.

use crate::body::{boxed_request, BoxError, RequestBody, ResponseBody};
use crate::config::GatewayConfig;
use crate::error::{
    default_error_handler, default_stream_error_handler, ErrorContext, ErrorHandler, GatewayError,
    StreamErrorHandler,
};
use crate::marshal::{JsonPb, Marshaler, MarshalerRegistry, RegistryError, MIME_WILDCARD};
use crate::pattern::{PathParams, Pattern};
use bytes::Bytes;
use http::request::Parts;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use percent_encoding::percent_decode_str;
use rpcgate_core::{BoxFuture, ServerMetadata, Status};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::{ready, Future};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

const X_HTTP_METHOD_OVERRIDE: &str = "x-http-method-override";

/// Future returned by a route handler
pub type HandlerFuture = BoxFuture<'static, Response<ResponseBody>>;

/// Route handler: the request, its captured path variables and the shared
/// gateway state
pub type HandlerFn =
    Arc<dyn Fn(Request<RequestBody>, PathParams, Arc<GatewayState>) -> HandlerFuture + Send + Sync>;

/// Immutable state shared by every handler of a mux
pub struct GatewayState {
    marshalers: MarshalerRegistry,
    config: GatewayConfig,
    error_handler: ErrorHandler,
    stream_error_handler: StreamErrorHandler,
}

impl GatewayState {
    pub fn marshalers(&self) -> &MarshalerRegistry {
        &self.marshalers
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Render `err` through the configured error handler
    pub fn render_error(
        &self,
        request: &Parts,
        marshaler: &dyn Marshaler,
        metadata: &ServerMetadata,
        err: &GatewayError,
    ) -> Response<ResponseBody> {
        debug!(error = %err, path = request.uri.path(), "request failed");
        let ctx = ErrorContext {
            request,
            marshaler,
            metadata,
            config: &self.config,
        };
        (self.error_handler)(&ctx, err)
    }

    /// Status to place in the final chunk of a failed stream
    pub fn stream_error(&self, status: Status) -> Status {
        (self.stream_error_handler)(status)
    }
}

/// Builder for [`ServeMux`]
pub struct ServeMuxBuilder {
    config: GatewayConfig,
    marshalers: MarshalerRegistry,
    error_handler: Option<ErrorHandler>,
    stream_error_handler: Option<StreamErrorHandler>,
    registry_error: Option<RegistryError>,
}

impl ServeMuxBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            marshalers: MarshalerRegistry::new(),
            error_handler: None,
            stream_error_handler: None,
            registry_error: None,
        }
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `marshaler` in both directions for `mime` (`*` for any)
    pub fn marshaler(mut self, mime: &str, marshaler: Arc<dyn Marshaler>) -> Self {
        let result = self.marshalers.add(mime, marshaler.clone(), marshaler);
        self.record(result)
    }

    /// Use `marshaler` to decode request bodies of type `mime`
    pub fn inbound_marshaler(mut self, mime: &str, marshaler: Arc<dyn Marshaler>) -> Self {
        let result = self.marshalers.add_inbound(mime, marshaler);
        self.record(result)
    }

    /// Use `marshaler` to encode responses to requests of type `mime`
    pub fn outbound_marshaler(mut self, mime: &str, marshaler: Arc<dyn Marshaler>) -> Self {
        let result = self.marshalers.add_outbound(mime, marshaler);
        self.record(result)
    }

    fn record(mut self, result: Result<(), RegistryError>) -> Self {
        if let Err(err) = result {
            self.registry_error.get_or_insert(err);
        }
        self
    }

    /// Replace the HTTP error renderer
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ErrorContext<'_>, &GatewayError) -> Response<ResponseBody> + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the mapping of mid-stream errors
    pub fn stream_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Status) -> Status + Send + Sync + 'static,
    {
        self.stream_error_handler = Some(Arc::new(handler));
        self
    }

    /// Build the mux. Without a `*` entry, JSON configured from
    /// [`GatewayConfig::json`] handles every content type.
    pub fn build(self) -> Result<ServeMux, GatewayError> {
        if let Some(err) = self.registry_error {
            return Err(err.into());
        }

        let mut marshalers = self.marshalers;
        if !marshalers.contains(MIME_WILDCARD) {
            let json: Arc<dyn Marshaler> = Arc::new(JsonPb::new(self.config.json.clone()));
            marshalers.add(MIME_WILDCARD, json.clone(), json)?;
        }

        let state = GatewayState {
            marshalers,
            config: self.config,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(default_error_handler) as ErrorHandler),
            stream_error_handler: self
                .stream_error_handler
                .unwrap_or_else(|| Arc::new(default_stream_error_handler) as StreamErrorHandler),
        };
        Ok(ServeMux {
            handlers: HashMap::new(),
            state: Arc::new(state),
        })
    }
}

impl Default for ServeMuxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Route {
    pattern: Pattern,
    handler: HandlerFn,
}

/// HTTP request multiplexer
pub struct ServeMux {
    handlers: HashMap<Method, Vec<Route>>,
    state: Arc<GatewayState>,
}

impl ServeMux {
    pub fn builder() -> ServeMuxBuilder {
        ServeMuxBuilder::new()
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Register a handler for `method` requests matching `pattern`.
    ///
    /// A pattern registered twice for the same method is never reached
    /// the second time.
    pub fn handle<F, Fut>(&mut self, method: Method, pattern: Pattern, handler: F)
    where
        F: Fn(Request<RequestBody>, PathParams, Arc<GatewayState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response<ResponseBody>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(
            move |req: Request<RequestBody>, params: PathParams, state: Arc<GatewayState>| {
                Box::pin(handler(req, params, state)) as HandlerFuture
            },
        );
        self.handlers
            .entry(method)
            .or_default()
            .push(Route { pattern, handler });
    }

    /// Route one request
    pub fn serve<B>(&self, request: Request<B>) -> HandlerFuture
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = request.into_parts();

        if self.state.config.method_override && parts.method == Method::POST {
            let overridden = parts
                .headers
                .get(X_HTTP_METHOD_OVERRIDE)
                .and_then(|value| Method::from_bytes(value.as_bytes()).ok());
            if let Some(method) = overridden {
                parts.method = method;
            }
        }

        let Some(path) = parts.uri.path().strip_prefix('/') else {
            return self.routing_error(
                &parts,
                StatusCode::BAD_REQUEST,
                Status::invalid_argument("Bad Request"),
            );
        };

        let mut raw: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };
        let mut verb = "";
        if let Some(last) = raw.last_mut() {
            match last.rfind(':') {
                Some(0) => {
                    return self.routing_error(
                        &parts,
                        StatusCode::NOT_FOUND,
                        Status::not_found("Not Found"),
                    )
                }
                Some(idx) => {
                    verb = &last[idx + 1..];
                    *last = &last[..idx];
                }
                None => {}
            }
        }
        let decoded: Option<Vec<String>> = raw.iter().map(|c| decode_component(c)).collect();
        let (Some(components), Some(verb)) = (decoded, decode_component(verb)) else {
            return self.routing_error(
                &parts,
                StatusCode::BAD_REQUEST,
                Status::invalid_argument("Bad Request"),
            );
        };

        if let Some(routes) = self.handlers.get(&parts.method) {
            for route in routes {
                if let Ok(params) = route.pattern.match_path(&components, &verb) {
                    let request = Request::from_parts(parts, boxed_request(body));
                    return (route.handler)(request, params, Arc::clone(&self.state));
                }
            }
        }

        let elsewhere = self
            .handlers
            .iter()
            .filter(|(method, _)| **method != parts.method)
            .flat_map(|(_, routes)| routes)
            .any(|route| route.pattern.match_path(&components, &verb).is_ok());
        if elsewhere {
            return self.routing_error(
                &parts,
                StatusCode::METHOD_NOT_ALLOWED,
                Status::unimplemented("Method Not Allowed"),
            );
        }
        self.routing_error(&parts, StatusCode::NOT_FOUND, Status::not_found("Not Found"))
    }

    fn routing_error(&self, parts: &Parts, status: StatusCode, source: Status) -> HandlerFuture {
        let (_, outbound) = self.state.marshalers.for_headers(&parts.headers);
        let err = GatewayError::HttpStatus { status, source };
        let response =
            self.state
                .render_error(parts, outbound.as_ref(), &ServerMetadata::default(), &err);
        Box::pin(ready(response))
    }

    /// Wrap the mux as a [`tower::Service`]
    pub fn into_service(self) -> MuxService {
        MuxService {
            mux: Arc::new(self),
        }
    }
}

/// `None` when the decoded bytes are not UTF-8
fn decode_component(component: &str) -> Option<String> {
    percent_decode_str(component)
        .decode_utf8()
        .ok()
        .map(|c| c.into_owned())
}

/// [`ServeMux`] as a cloneable [`tower::Service`]
#[derive(Clone)]
pub struct MuxService {
    mux: Arc<ServeMux>,
}

impl MuxService {
    pub fn new(mux: Arc<ServeMux>) -> Self {
        Self { mux }
    }
}

impl<B> tower::Service<Request<B>> for MuxService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let response = self.mux.serve(request);
        Box::pin(async move { Ok(response.await) })
    }
}
