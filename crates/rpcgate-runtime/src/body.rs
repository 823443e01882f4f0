//! Request and response body types

use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use std::convert::Infallible;

/// Boxed error type for request bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of a request handed to a route handler
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Body of every response the gateway produces
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Box any request body
pub fn boxed_request<B>(body: B) -> RequestBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// Response body holding a single buffer
pub fn full(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into()).boxed_unsync()
}

/// Empty response body
pub fn empty() -> ResponseBody {
    Empty::new().boxed_unsync()
}

/// Response body holding a single buffer followed by HTTP trailers
pub fn with_trailers(data: Bytes, trailers: HeaderMap) -> ResponseBody {
    let frames = [Frame::data(data), Frame::trailers(trailers)];
    StreamBody::new(futures_util::stream::iter(frames.map(Ok::<_, Infallible>))).boxed_unsync()
}
