use super::{DelimitedEncoder, Decoder, Encoder, JsonPb, MarshalError, Marshaler, Payload, StreamChunk};
use bytes::Bytes;
use prost_reflect::{DynamicMessage, Kind, ReflectMessage};
use std::borrow::Cow;
use std::io::{Read, Write};

/// Content type and data of a raw-body carrier.
///
/// A carrier is any message with a singular string `content_type` field
/// and a singular bytes `data` field, such as `google.api.HttpBody`.
pub fn http_body_parts(message: &DynamicMessage) -> Option<(String, Bytes)> {
    let desc = message.descriptor();
    let content_type = desc.get_field_by_name("content_type")?;
    let data = desc.get_field_by_name("data")?;
    if content_type.is_list()
        || data.is_list()
        || !matches!(content_type.kind(), Kind::String)
        || !matches!(data.kind(), Kind::Bytes)
    {
        return None;
    }

    let content_type = message.get_field(&content_type).as_str()?.to_string();
    let data = message.get_field(&data).as_bytes()?.clone();
    Some((content_type, data))
}

/// Writes raw-body carriers verbatim with their own content type and
/// everything else as JSON
#[derive(Debug, Clone, Default)]
pub struct HttpBodyMarshaler {
    fallback: JsonPb,
}

impl HttpBodyMarshaler {
    pub fn new(fallback: JsonPb) -> Self {
        Self { fallback }
    }
}

fn carried(payload: Payload<'_>) -> Option<&DynamicMessage> {
    match payload {
        Payload::Message(message) | Payload::StreamChunk(StreamChunk::Result(message)) => {
            Some(message)
        }
        _ => None,
    }
}

impl Marshaler for HttpBodyMarshaler {
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        if let Some((_, data)) = carried(payload).and_then(http_body_parts) {
            return Ok(data);
        }
        self.fallback.marshal(payload)
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        self.fallback.unmarshal(data, message)
    }

    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        self.fallback.new_decoder(reader)
    }

    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a> {
        Box::new(DelimitedEncoder {
            marshaler: self,
            writer,
        })
    }

    fn content_type(&self) -> &'static str {
        self.fallback.content_type()
    }

    fn content_type_for(&self, payload: Payload<'_>) -> Cow<'static, str> {
        match carried(payload).and_then(http_body_parts) {
            Some((content_type, _)) => Cow::Owned(content_type),
            None => Cow::Borrowed(self.content_type()),
        }
    }

    fn raw_body(&self, message: &DynamicMessage) -> Option<Bytes> {
        http_body_parts(message).map(|(_, data)| data)
    }
}
