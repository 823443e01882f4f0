//! Wire-format codecs.
//!
//! A [`Marshaler`] turns request bodies into messages and messages, error
//! statuses or stream chunks into response bodies. One inbound and one
//! outbound marshaler are picked per request by the [`MarshalerRegistry`].

mod form;
mod httpbody;
mod json;
mod registry;
mod xml;

pub use form::FormUrlEncoded;
pub use httpbody::{http_body_parts, HttpBodyMarshaler};
pub use json::{JsonBuiltin, JsonPb};
pub use registry::{default_marshaler, MarshalerRegistry, RegistryError, MIME_WILDCARD};
pub use xml::XmlMarshaler;

use crate::populate::PopulateError;
use bytes::Bytes;
use prost_reflect::DynamicMessage;
use rpcgate_core::Status;
use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xml: {0}")]
    Xml(String),

    #[error(transparent)]
    Populate(#[from] PopulateError),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The decoder has no more values
    #[error("end of input")]
    Eof,
}

/// One element of a server stream
#[derive(Debug, Clone, Copy)]
pub enum StreamChunk<'a> {
    Result(&'a DynamicMessage),
    Error(&'a Status),
}

/// Anything a marshaler may be asked to encode
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Message(&'a DynamicMessage),
    Status(&'a Status),
    StreamChunk(StreamChunk<'a>),
}

/// Reads successive messages from a byte stream
pub trait Decoder {
    /// Decode the next value into `message`. Returns [`MarshalError::Eof`]
    /// when the input is exhausted.
    fn decode(&mut self, message: &mut DynamicMessage) -> Result<(), MarshalError>;
}

/// Writes successive payloads to a byte stream
pub trait Encoder {
    fn encode(&mut self, payload: Payload<'_>) -> Result<(), MarshalError>;
}

/// A wire-format codec
pub trait Marshaler: Send + Sync + fmt::Debug {
    /// Encode a payload
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError>;

    /// Decode `data` into `message`
    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError>;

    /// Decoder reading from `reader`
    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a>;

    /// Encoder writing to `writer`
    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a>;

    /// Content type of encoded output
    fn content_type(&self) -> &'static str;

    /// Content type for a specific payload
    fn content_type_for(&self, payload: Payload<'_>) -> Cow<'static, str> {
        let _ = payload;
        Cow::Borrowed(self.content_type())
    }

    /// Written after every chunk of a streamed response
    fn delimiter(&self) -> &'static [u8] {
        b"\n"
    }

    /// Raw bytes to emit for `message` in place of an encoded chunk, for
    /// codecs that pass bodies through untouched
    fn raw_body(&self, message: &DynamicMessage) -> Option<Bytes> {
        let _ = message;
        None
    }
}

/// Decoder over a buffered whole-body codec: yields one value, then `Eof`
struct OneShotDecoder<'a, M: ?Sized> {
    marshaler: &'a M,
    reader: Option<Box<dyn Read + 'a>>,
}

impl<'a, M: Marshaler + ?Sized> OneShotDecoder<'a, M> {
    fn new(marshaler: &'a M, reader: Box<dyn Read + 'a>) -> Self {
        Self {
            marshaler,
            reader: Some(reader),
        }
    }
}

impl<M: Marshaler + ?Sized> Decoder for OneShotDecoder<'_, M> {
    fn decode(&mut self, message: &mut DynamicMessage) -> Result<(), MarshalError> {
        let mut reader = self.reader.take().ok_or(MarshalError::Eof)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if data.is_empty() {
            return Err(MarshalError::Eof);
        }
        self.marshaler.unmarshal(&data, message)
    }
}

/// Encoder writing each marshaled payload followed by the delimiter
struct DelimitedEncoder<'a, M: ?Sized> {
    marshaler: &'a M,
    writer: Box<dyn Write + 'a>,
}

impl<M: Marshaler + ?Sized> Encoder for DelimitedEncoder<'_, M> {
    fn encode(&mut self, payload: Payload<'_>) -> Result<(), MarshalError> {
        let buf = self.marshaler.marshal(payload)?;
        self.writer.write_all(&buf)?;
        self.writer.write_all(self.marshaler.delimiter())?;
        Ok(())
    }
}
