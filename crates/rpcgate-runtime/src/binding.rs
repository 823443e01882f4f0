//! Descriptor-driven REST to RPC bindings.
//!
//! A [`RouteMapping`] ties one RPC method to one or more HTTP bindings.
//! Registering it on a [`ServeMux`] installs a handler per binding that
//! builds the request message from the path, query and body, invokes the
//! method through an [`RpcChannel`] and forwards the reply.

use crate::body::{RequestBody, ResponseBody};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::fieldmask::field_mask_from_request_body;
use crate::forward::{forward_response_message, forward_response_stream};
use crate::marshal::{MarshalError, Marshaler};
use crate::metadata::annotate_request;
use crate::mux::{GatewayState, ServeMux, ServeMuxBuilder};
use crate::pattern::{PathParams, Pattern};
use crate::populate::{
    find_field, populate_path_parameters, populate_query_parameters, FieldPathFilter,
    PopulateError, QueryValues,
};
use crate::template::Template;
use bytes::Bytes;
use futures_util::StreamExt;
use http::request::Parts;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor, Value,
};
use rpcgate_core::{Code, ResponseStream, RpcCall, RpcChannel, RpcFailure, ServerMetadata, Status};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const UPDATE_MASK_FIELD: &str = "update_mask";
const FIELD_MASK_TYPE: &str = "google.protobuf.FieldMask";

/// Which part of the request message the HTTP body fills
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodySelector {
    /// No body; every field not bound by the path comes from the query
    #[default]
    None,
    /// `body: "*"`: the body is the whole request message
    Whole,
    /// The body is the message field at this dotted path
    Field(String),
}

/// One HTTP rule of an RPC method
#[derive(Debug, Clone)]
pub struct HttpBinding {
    pub method: Method,
    pub template: Template,
    pub body: BodySelector,
    /// Message field forwarded in place of the whole response
    pub response_body: Option<String>,
}

impl HttpBinding {
    /// Create a binding, parsing `template`
    pub fn new(method: Method, template: &str) -> GatewayResult<Self> {
        Ok(Self {
            method,
            template: Template::parse(template)?,
            body: BodySelector::None,
            response_body: None,
        })
    }

    pub fn get(template: &str) -> GatewayResult<Self> {
        Self::new(Method::GET, template)
    }

    pub fn post(template: &str) -> GatewayResult<Self> {
        Self::new(Method::POST, template)
    }

    pub fn put(template: &str) -> GatewayResult<Self> {
        Self::new(Method::PUT, template)
    }

    pub fn patch(template: &str) -> GatewayResult<Self> {
        Self::new(Method::PATCH, template)
    }

    pub fn delete(template: &str) -> GatewayResult<Self> {
        Self::new(Method::DELETE, template)
    }

    pub fn with_body(mut self, body: BodySelector) -> Self {
        self.body = body;
        self
    }

    pub fn with_response_body(mut self, field: impl Into<String>) -> Self {
        self.response_body = Some(field.into());
        self
    }
}

/// Route mapping from REST to one RPC method
#[derive(Debug, Clone)]
pub struct RouteMapping {
    pub rpc: MethodDescriptor,
    pub bindings: Vec<HttpBinding>,
}

impl RouteMapping {
    pub fn new(rpc: MethodDescriptor) -> Self {
        Self {
            rpc,
            bindings: Vec::new(),
        }
    }

    /// Add an HTTP binding
    pub fn add_binding(mut self, binding: HttpBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}

/// Resolve a dotted path to the chain of fields it names
fn resolve_path(desc: &MessageDescriptor, path: &str) -> GatewayResult<Vec<FieldDescriptor>> {
    let mut fields = Vec::new();
    let mut current = desc.clone();
    let mut components = path.split('.').peekable();
    while let Some(name) = components.next() {
        let field = find_field(&current, name).ok_or_else(|| {
            GatewayError::Binding(format!(
                "no field {name:?} in {} (path {path:?})",
                current.full_name()
            ))
        })?;
        if components.peek().is_some() {
            current = match field.kind() {
                Kind::Message(child) if !field.is_list() && !field.is_map() => child,
                _ => {
                    return Err(GatewayError::Binding(format!(
                        "{name:?} in path {path:?} is not a singular message"
                    )))
                }
            };
        }
        fields.push(field);
    }
    Ok(fields)
}

fn require_message_field(fields: &[FieldDescriptor], path: &str) -> GatewayResult<()> {
    match fields.last() {
        Some(field)
            if field.kind().as_message().is_some() && !field.is_list() && !field.is_map() =>
        {
            Ok(())
        }
        _ => Err(GatewayError::Binding(format!(
            "{path:?} must name a singular message field"
        ))),
    }
}

#[derive(Debug)]
enum ResolvedBody {
    None,
    Whole,
    Field(Vec<FieldDescriptor>),
}

/// A binding checked against its method's descriptors
#[derive(Debug)]
struct Route {
    rpc: MethodDescriptor,
    body: ResolvedBody,
    response_body: Option<FieldDescriptor>,
    /// Fields already bound by the path or body
    filter: FieldPathFilter,
    /// Request field to fill from the body of a PATCH
    update_mask: Option<FieldDescriptor>,
}

impl Route {
    fn resolve(rpc: &MethodDescriptor, binding: &HttpBinding) -> GatewayResult<(Pattern, Self)> {
        let input = rpc.input();
        let mut filter = FieldPathFilter::new();

        for var in binding.template.field_paths() {
            resolve_path(&input, var)?;
            filter.insert(var);
        }

        let body = match &binding.body {
            BodySelector::None => ResolvedBody::None,
            BodySelector::Whole => ResolvedBody::Whole,
            BodySelector::Field(path) => {
                let fields = resolve_path(&input, path)?;
                require_message_field(&fields, path)?;
                filter.insert(path);
                ResolvedBody::Field(fields)
            }
        };

        let response_body = match &binding.response_body {
            Some(path) => {
                let field = rpc.output().get_field_by_name(path).ok_or_else(|| {
                    GatewayError::Binding(format!(
                        "no response field {path:?} in {}",
                        rpc.output().full_name()
                    ))
                })?;
                require_message_field(std::slice::from_ref(&field), path)?;
                Some(field)
            }
            None => None,
        };

        let patch_field = binding.method == Method::PATCH && matches!(body, ResolvedBody::Field(_));
        let update_mask = if patch_field {
            input.get_field_by_name(UPDATE_MASK_FIELD).filter(|field| {
                !field.is_list()
                    && matches!(field.kind(), Kind::Message(m) if m.full_name() == FIELD_MASK_TYPE)
            })
        } else {
            None
        };

        let pattern = binding.template.to_pattern()?;
        let route = Self {
            rpc: rpc.clone(),
            body,
            response_body,
            filter,
            update_mask,
        };
        Ok((pattern, route))
    }
}

impl ServeMux {
    /// Install a handler for every binding of `mapping`.
    ///
    /// Client-streaming and bidirectional methods are rejected, as are
    /// bindings referring to fields the method's messages do not have.
    pub fn register(
        &mut self,
        mapping: RouteMapping,
        channel: Arc<dyn RpcChannel>,
    ) -> GatewayResult<()> {
        if mapping.rpc.is_client_streaming() {
            return Err(GatewayError::Unsupported(format!(
                "client streaming method {}",
                mapping.rpc.full_name()
            )));
        }

        let mut routes = Vec::with_capacity(mapping.bindings.len());
        for binding in &mapping.bindings {
            let (pattern, route) = Route::resolve(&mapping.rpc, binding)?;
            routes.push((binding.method.clone(), pattern, route));
        }

        for (method, pattern, route) in routes {
            info!(
                rpc = mapping.rpc.full_name(),
                method = %method,
                pattern = %pattern,
                "registered route"
            );
            let route = Arc::new(route);
            let channel = Arc::clone(&channel);
            self.handle(method, pattern, move |req, params, state| {
                handle(Arc::clone(&route), Arc::clone(&channel), req, params, state)
            });
        }
        Ok(())
    }
}

/// Error while serving one request, with any metadata the backend sent
struct Failure {
    error: GatewayError,
    metadata: ServerMetadata,
}

impl From<GatewayError> for Failure {
    fn from(error: GatewayError) -> Self {
        Self {
            error,
            metadata: ServerMetadata::default(),
        }
    }
}

impl From<PopulateError> for Failure {
    fn from(err: PopulateError) -> Self {
        GatewayError::Populate(err).into()
    }
}

impl From<RpcFailure> for Failure {
    fn from(failure: RpcFailure) -> Self {
        Self {
            error: GatewayError::Rpc(failure.status),
            metadata: failure.metadata,
        }
    }
}

async fn handle(
    route: Arc<Route>,
    channel: Arc<dyn RpcChannel>,
    request: Request<RequestBody>,
    params: PathParams,
    state: Arc<GatewayState>,
) -> Response<ResponseBody> {
    let (parts, body) = request.into_parts();
    let (inbound, outbound) = state.marshalers().for_headers(&parts.headers);

    let result = transcode(
        &route,
        channel.as_ref(),
        state.config(),
        &parts,
        body,
        &params,
        inbound.as_ref(),
    )
    .await;
    let reply = match result {
        Ok(reply) => reply,
        Err(failure) => {
            return state.render_error(&parts, outbound.as_ref(), &failure.metadata, &failure.error)
        }
    };

    match reply {
        Reply::Unary { message, metadata } => {
            forward_response_message(&state, &parts, outbound.as_ref(), &metadata, &message)
        }
        Reply::Stream { header, stream } => {
            forward_response_stream(Arc::clone(&state), outbound, header, stream)
        }
    }
}

enum Reply {
    Unary {
        message: DynamicMessage,
        metadata: ServerMetadata,
    },
    Stream {
        header: http::HeaderMap,
        stream: ResponseStream,
    },
}

async fn transcode(
    route: &Route,
    channel: &dyn RpcChannel,
    config: &GatewayConfig,
    parts: &Parts,
    body: RequestBody,
    params: &PathParams,
    inbound: &dyn Marshaler,
) -> Result<Reply, Failure> {
    let metadata = annotate_request(parts, config)?;
    let mut message = DynamicMessage::new(route.rpc.input());

    let body = match route.body {
        ResolvedBody::None => Bytes::new(),
        _ => body
            .collect()
            .await
            .map_err(|err| GatewayError::Decode(format!("reading request body: {err}")))?
            .to_bytes(),
    };

    match &route.body {
        ResolvedBody::None => {}
        ResolvedBody::Whole => decode_body(inbound, &body, &mut message)?,
        ResolvedBody::Field(path) => {
            let target = sub_message_mut(&mut message, path).ok_or_else(|| {
                GatewayError::Binding("body field is not a message".to_string())
            })?;
            decode_body(inbound, &body, target)?;
        }
    }

    populate_path_parameters(&mut message, params)?;
    if !matches!(route.body, ResolvedBody::Whole) {
        let query = QueryValues::from_uri(&parts.uri);
        populate_query_parameters(&mut message, &query, &route.filter)?;
    }

    if let (Some(mask_field), ResolvedBody::Field(path)) = (&route.update_mask, &route.body) {
        if mask_is_empty(&message, mask_field) {
            let desc = match path.last().map(|field| field.kind()) {
                Some(Kind::Message(desc)) => desc,
                _ => {
                    let err = GatewayError::Binding("body field is not a message".to_string());
                    return Err(err.into());
                }
            };
            let mask = field_mask_from_request_body(&body, &desc)?;
            debug!(paths = ?mask.paths, "update mask derived from body");
            set_mask(&mut message, mask_field, mask.paths);
        }
    }

    let call = RpcCall {
        method: route.rpc.clone(),
        message,
        metadata: metadata.outgoing,
        timeout: metadata.timeout,
    };

    if route.rpc.is_server_streaming() {
        let reply = with_deadline(metadata.timeout, channel.server_streaming(call)).await?;
        let stream = match route.response_body.clone() {
            Some(field) => reply
                .stream
                .map(move |item| item.map(|message| extract(&message, &field)))
                .boxed(),
            None => reply.stream,
        };
        return Ok(Reply::Stream {
            header: reply.header,
            stream,
        });
    }

    let reply = with_deadline(metadata.timeout, channel.unary(call)).await?;
    let message = match &route.response_body {
        Some(field) => extract(&reply.message, field),
        None => reply.message,
    };
    Ok(Reply::Unary {
        message,
        metadata: reply.metadata,
    })
}

async fn with_deadline<T, F>(timeout: Option<Duration>, call: F) -> Result<T, RpcFailure>
where
    F: std::future::Future<Output = Result<T, RpcFailure>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(Status::new(Code::DEADLINE_EXCEEDED, "context deadline exceeded").into())
        }),
        None => call.await,
    }
}

fn decode_body(
    inbound: &dyn Marshaler,
    body: &[u8],
    message: &mut DynamicMessage,
) -> Result<(), GatewayError> {
    let mut decoder = inbound.new_decoder(Box::new(Cursor::new(body)));
    match decoder.decode(message) {
        Ok(()) | Err(MarshalError::Eof) => Ok(()),
        Err(err) => Err(GatewayError::Decode(err.to_string())),
    }
}

fn sub_message_mut<'a>(
    message: &'a mut DynamicMessage,
    path: &[FieldDescriptor],
) -> Option<&'a mut DynamicMessage> {
    let Some((field, rest)) = path.split_first() else {
        return Some(message);
    };
    match message.get_field_mut(field) {
        Value::Message(child) => sub_message_mut(child, rest),
        _ => None,
    }
}

fn mask_is_empty(message: &DynamicMessage, field: &FieldDescriptor) -> bool {
    match message.get_field(field).as_message() {
        Some(mask) => mask
            .get_field_by_name("paths")
            .map_or(true, |paths| paths.as_list().map_or(true, |list| list.is_empty())),
        None => true,
    }
}

fn set_mask(message: &mut DynamicMessage, field: &FieldDescriptor, paths: Vec<String>) {
    if let Kind::Message(desc) = field.kind() {
        let mut mask = DynamicMessage::new(desc);
        mask.set_field_by_name(
            "paths",
            Value::List(paths.into_iter().map(Value::String).collect()),
        );
        message.set_field(field, Value::Message(mask));
    }
}

/// The message held by `field`, or its empty default
fn extract(message: &DynamicMessage, field: &FieldDescriptor) -> DynamicMessage {
    match message.get_field(field).as_message() {
        Some(inner) => inner.clone(),
        None => match field.kind() {
            Kind::Message(desc) => DynamicMessage::new(desc),
            _ => message.clone(),
        },
    }
}

/// Builds a [`ServeMux`] serving a set of route mappings over one channel
pub struct GatewayBuilder {
    channel: Arc<dyn RpcChannel>,
    mux: ServeMuxBuilder,
    routes: Vec<RouteMapping>,
}

impl GatewayBuilder {
    pub fn new(channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            channel,
            mux: ServeMuxBuilder::new(),
            routes: Vec::new(),
        }
    }

    /// Configure the underlying mux: marshalers, error handlers, options
    pub fn mux(mut self, configure: impl FnOnce(ServeMuxBuilder) -> ServeMuxBuilder) -> Self {
        self.mux = configure(self.mux);
        self
    }

    pub fn route(mut self, mapping: RouteMapping) -> Self {
        self.routes.push(mapping);
        self
    }

    pub fn routes(mut self, mappings: impl IntoIterator<Item = RouteMapping>) -> Self {
        self.routes.extend(mappings);
        self
    }

    pub fn build(self) -> GatewayResult<ServeMux> {
        let mut mux = self.mux.build()?;
        for mapping in self.routes {
            mux.register(mapping, Arc::clone(&self.channel))?;
        }
        Ok(mux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcgate_proto::library_method;

    fn resolve(rpc: &str, binding: HttpBinding) -> GatewayResult<Route> {
        Route::resolve(&library_method(rpc), &binding).map(|(_, route)| route)
    }

    #[test]
    fn test_path_and_body_fields_are_filtered() {
        let binding = HttpBinding::post("/v1/{parent=shelves/*}/books")
            .unwrap()
            .with_body(BodySelector::Field("book".to_string()));
        let route = resolve("CreateBook", binding).unwrap();

        assert!(route.filter.matches(&["parent"]));
        assert!(route.filter.matches(&["book", "title"]));
        assert!(!route.filter.matches(&["request_id"]));
        assert!(matches!(route.body, ResolvedBody::Field(ref fields) if fields.len() == 1));
        assert!(route.update_mask.is_none());
    }

    #[test]
    fn test_patch_with_field_body_fills_update_mask() {
        let binding = HttpBinding::patch("/v1/{book.name=books/*}")
            .unwrap()
            .with_body(BodySelector::Field("book".to_string()));
        let route = resolve("UpdateBook", binding).unwrap();
        assert_eq!(
            route.update_mask.map(|field| field.name().to_string()),
            Some("update_mask".to_string())
        );

        let whole = HttpBinding::patch("/v1/{book.name=books/*}")
            .unwrap()
            .with_body(BodySelector::Whole);
        assert!(resolve("UpdateBook", whole).unwrap().update_mask.is_none());
    }

    #[test]
    fn test_nested_path_through_scalar_is_rejected() {
        let binding = HttpBinding::get("/v1/{name.part=books/*}").unwrap();
        let err = resolve("GetBook", binding).unwrap_err();
        assert!(matches!(err, GatewayError::Binding(_)), "{err}");
    }

    #[test]
    fn test_client_streaming_is_rejected() {
        let mut mux = ServeMux::builder().build().unwrap();
        let mapping = RouteMapping::new(library_method("Upload"))
            .add_binding(HttpBinding::post("/v1/uploads").unwrap());

        struct Unreachable;
        impl RpcChannel for Unreachable {
            fn unary(
                &self,
                _call: RpcCall,
            ) -> rpcgate_core::BoxFuture<'static, Result<rpcgate_core::UnaryReply, RpcFailure>>
            {
                unreachable!()
            }

            fn server_streaming(
                &self,
                _call: RpcCall,
            ) -> rpcgate_core::BoxFuture<'static, Result<rpcgate_core::StreamingReply, RpcFailure>>
            {
                unreachable!()
            }
        }

        let err = mux.register(mapping, Arc::new(Unreachable)).unwrap_err();
        assert!(matches!(err, GatewayError::Unsupported(_)));
    }
}
