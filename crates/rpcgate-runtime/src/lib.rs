//! HTTP/JSON to RPC transcoding runtime.
//!
//! This crate turns REST requests into calls on an [`rpcgate_core::RpcChannel`]
//! and writes the replies back as HTTP. It provides:
//! - URL template compilation and a stack-machine path matcher
//! - A request multiplexer with 404/405 distinction and verb suffixes
//! - Content-type negotiated marshalers (JSON, form, XML, raw bodies)
//! - Population of request messages from path, query and body values
//! - Unary and chunked streaming response forwarding
//! - Error rendering with RPC status to HTTP status mapping

pub mod binding;
pub mod body;
pub mod config;
pub mod error;
pub mod fieldmask;
pub mod forward;
pub mod marshal;
pub mod metadata;
pub mod mux;
pub mod pattern;
pub mod populate;
pub mod server;
pub mod template;

pub use binding::{BodySelector, GatewayBuilder, HttpBinding, RouteMapping};
pub use config::{GatewayConfig, JsonPbOptions};
pub use error::{
    default_error_handler, default_stream_error_handler, http_status_from_code, ErrorContext,
    GatewayError, GatewayResult,
};
pub use fieldmask::field_mask_from_request_body;
pub use forward::{forward_response_message, forward_response_stream};
pub use marshal::{
    FormUrlEncoded, HttpBodyMarshaler, JsonBuiltin, JsonPb, Marshaler, MarshalerRegistry,
    XmlMarshaler, MIME_WILDCARD,
};
pub use metadata::{annotate_request, RequestMetadata};
pub use mux::{GatewayState, MuxService, ServeMux, ServeMuxBuilder};
pub use pattern::{PathParams, Pattern};
pub use populate::{
    populate_field_from_path, populate_path_parameters, populate_query_parameters,
    FieldPathFilter, PopulateError, QueryValues,
};
pub use server::GatewayServer;
pub use template::Template;
