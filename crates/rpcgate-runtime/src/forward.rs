//! Writing RPC replies as HTTP responses

use crate::body::{full, with_trailers, ResponseBody};
use crate::error::GatewayError;
use crate::marshal::{MarshalError, Marshaler, Payload, StreamChunk};
use crate::metadata::{accepts_trailers, announce_trailers, append_header_metadata, trailer_headers};
use crate::mux::GatewayState;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, TRANSFER_ENCODING};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use prost_reflect::DynamicMessage;
use rpcgate_core::{ResponseStream, ServerMetadata, Status};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

fn content_type_value(content_type: &str) -> HeaderValue {
    HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static("application/json"))
}

/// Write a unary reply: status 200, the marshaled message, backend header
/// metadata and, when the client sent `TE: trailers`, backend trailers.
///
/// A marshaling failure is rendered through the error handler instead.
pub fn forward_response_message(
    state: &GatewayState,
    request: &Parts,
    marshaler: &dyn Marshaler,
    metadata: &ServerMetadata,
    message: &DynamicMessage,
) -> Response<ResponseBody> {
    let payload = Payload::Message(message);
    let buf = match marshaler.marshal(payload) {
        Ok(buf) => buf,
        Err(err) => {
            error!(error = %err, "failed to marshal response");
            return state.render_error(request, marshaler, metadata, &GatewayError::Marshal(err));
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        content_type_value(&marshaler.content_type_for(payload)),
    );
    append_header_metadata(&mut headers, metadata, state.config());

    let body = if accepts_trailers(&request.headers) && !metadata.trailer.is_empty() {
        announce_trailers(&mut headers, metadata, state.config());
        with_trailers(buf, trailer_headers(metadata, state.config()))
    } else {
        full(buf)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}

/// One chunk followed by the codec's delimiter
fn encode_chunk(marshaler: &dyn Marshaler, chunk: StreamChunk<'_>) -> Result<Bytes, MarshalError> {
    let buf = marshaler.marshal(Payload::StreamChunk(chunk))?;
    let delimiter = marshaler.delimiter();
    let mut out = BytesMut::with_capacity(buf.len() + delimiter.len());
    out.extend_from_slice(&buf);
    out.extend_from_slice(delimiter);
    Ok(out.freeze())
}

/// Write a server stream.
///
/// Headers go out immediately with status 200. Each message then becomes
/// one `{"result": ...}` chunk, or its raw bytes when the codec passes
/// bodies through. A stream error becomes a final `{"error": ...}` chunk.
/// Chunks are handed to the connection one body frame at a time, in
/// receive order.
pub fn forward_response_stream(
    state: Arc<GatewayState>,
    marshaler: Arc<dyn Marshaler>,
    header: HeaderMap,
    mut stream: ResponseStream,
) -> Response<ResponseBody> {
    let metadata = ServerMetadata {
        header,
        trailer: HeaderMap::new(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(CONTENT_TYPE, content_type_value(marshaler.content_type()));
    append_header_metadata(&mut headers, &metadata, state.config());

    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let (encoded, last) = match item {
                Ok(message) => match marshaler.raw_body(&message) {
                    Some(raw) => (Ok(raw), false),
                    None => (encode_chunk(&*marshaler, StreamChunk::Result(&message)), false),
                },
                Err(status) => {
                    let status = state.stream_error(status);
                    (encode_chunk(&*marshaler, StreamChunk::Error(&status)), true)
                }
            };

            let (chunk, last) = match encoded {
                Ok(chunk) => (chunk, last),
                Err(err) => {
                    error!(error = %err, "failed to marshal response chunk");
                    let status = state.stream_error(Status::internal(err.to_string()));
                    match encode_chunk(&*marshaler, StreamChunk::Error(&status)) {
                        Ok(chunk) => (chunk, true),
                        Err(err) => {
                            error!(error = %err, "failed to marshal an error");
                            break;
                        }
                    }
                }
            };

            if tx.send(Ok(Frame::data(chunk))).await.is_err() {
                let err = GatewayError::TransportWrite("client went away".to_string());
                warn!(error = %err, "failed to send response chunk");
                break;
            }
            if last {
                break;
            }
        }
    });

    let body = StreamBody::new(ReceiverStream::new(rx)).boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}
