//! The RPC transport boundary.
//!
//! The gateway never speaks a wire protocol itself. It hands a decoded
//! request message to an [`RpcChannel`] and gets back either a reply with
//! its metadata, or a structured [`Status`].
//!
//! Dropping a returned future or [`ResponseStream`] cancels the call; the
//! gateway relies on this to propagate client disconnects.

use crate::metadata::ServerMetadata;
use crate::status::Status;
use futures_util::Stream;
use http::HeaderMap;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Messages of a server-streaming call. `None` is the end-of-stream sentinel.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send>>;

/// A single outgoing call
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// Method being invoked
    pub method: MethodDescriptor,
    /// Request message, an instance of `method.input()`
    pub message: DynamicMessage,
    /// Outgoing request metadata
    pub metadata: HeaderMap,
    /// Deadline relative to the start of the call
    pub timeout: Option<Duration>,
}

/// Successful unary reply
#[derive(Debug, Clone)]
pub struct UnaryReply {
    pub message: DynamicMessage,
    pub metadata: ServerMetadata,
}

impl UnaryReply {
    pub fn new(message: DynamicMessage) -> Self {
        Self {
            message,
            metadata: ServerMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ServerMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Established server stream
pub struct StreamingReply {
    /// Header metadata, available before the first message
    pub header: HeaderMap,
    pub stream: ResponseStream,
}

impl StreamingReply {
    pub fn new(stream: ResponseStream) -> Self {
        Self {
            header: HeaderMap::new(),
            stream,
        }
    }
}

/// Failed call, with whatever metadata the server sent before failing
#[derive(Debug, Clone)]
pub struct RpcFailure {
    pub status: Status,
    pub metadata: ServerMetadata,
}

impl From<Status> for RpcFailure {
    fn from(status: Status) -> Self {
        Self {
            status,
            metadata: ServerMetadata::default(),
        }
    }
}

/// Client side of an RPC transport
pub trait RpcChannel: Send + Sync + 'static {
    /// Invoke a unary method
    fn unary(&self, call: RpcCall) -> BoxFuture<'static, Result<UnaryReply, RpcFailure>>;

    /// Invoke a server-streaming method
    fn server_streaming(
        &self,
        call: RpcCall,
    ) -> BoxFuture<'static, Result<StreamingReply, RpcFailure>>;
}
