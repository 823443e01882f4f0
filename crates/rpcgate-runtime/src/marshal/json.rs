//! JSON codecs

use super::{DelimitedEncoder, Decoder, Encoder, MarshalError, Marshaler, Payload, StreamChunk};
use crate::config::JsonPbOptions;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage,
    SerializeOptions, Value,
};
use rpcgate_core::{Code, Status};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Deserializer, Serialize, Serializer};
use serde_json::de::IoRead;
use serde_json::ser::PrettyFormatter;
use serde_json::StreamDeserializer;
use std::io::{Read, Write};

const CONTENT_TYPE_JSON: &str = "application/json";
const ANY_TYPE: &str = "google.protobuf.Any";

#[derive(Debug, Clone)]
enum Flavor {
    /// Protobuf JSON mapping
    Proto {
        serialize: SerializeOptions,
        deserialize: DeserializeOptions,
        pool: DescriptorPool,
        emit_unpopulated: bool,
    },
    /// Plain serde mapping with default options
    Builtin,
}

#[derive(Debug, Clone)]
struct JsonCodec {
    flavor: Flavor,
    indent: Option<String>,
}

impl JsonCodec {
    fn write<W: Write>(&self, writer: W, payload: Payload<'_>) -> Result<(), MarshalError> {
        let view = JsonView {
            codec: self,
            payload,
        };
        match &self.indent {
            Some(indent) => {
                let formatter = PrettyFormatter::with_indent(indent.as_bytes());
                view.serialize(&mut serde_json::Serializer::with_formatter(writer, formatter))?
            }
            None => view.serialize(&mut serde_json::Serializer::new(writer))?,
        }
        Ok(())
    }

    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        let mut buf = Vec::new();
        self.write(&mut buf, payload)?;
        Ok(Bytes::from(buf))
    }

    fn to_value(&self, payload: Payload<'_>) -> Result<serde_json::Value, MarshalError> {
        let view = JsonView {
            codec: self,
            payload,
        };
        Ok(serde_json::to_value(view)?)
    }

    fn decode_value<'de, D>(
        &self,
        descriptor: MessageDescriptor,
        deserializer: D,
    ) -> Result<DynamicMessage, D::Error>
    where
        D: Deserializer<'de>,
    {
        match &self.flavor {
            Flavor::Proto { deserialize, .. } => {
                DynamicMessage::deserialize_with_options(descriptor, deserializer, deserialize)
            }
            Flavor::Builtin => DynamicMessage::deserialize(descriptor, deserializer),
        }
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        let mut deserializer = serde_json::Deserializer::from_slice(data);
        let decoded = self.decode_value(message.descriptor(), &mut deserializer)?;
        deserializer.end()?;
        *message = decoded;
        Ok(())
    }

    fn decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        Box::new(JsonDecoder {
            codec: self,
            values: serde_json::Deserializer::from_reader(reader).into_iter(),
        })
    }
}

struct JsonDecoder<'a> {
    codec: &'a JsonCodec,
    values: StreamDeserializer<'a, IoRead<Box<dyn Read + 'a>>, serde_json::Value>,
}

impl Decoder for JsonDecoder<'_> {
    fn decode(&mut self, message: &mut DynamicMessage) -> Result<(), MarshalError> {
        let value = self.values.next().ok_or(MarshalError::Eof)??;
        *message = self.codec.decode_value(message.descriptor(), value)?;
        Ok(())
    }
}

struct JsonView<'a> {
    codec: &'a JsonCodec,
    payload: Payload<'a>,
}

impl Serialize for JsonView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let codec = self.codec;
        match self.payload {
            Payload::Message(message) => MessageView { codec, message }.serialize(serializer),
            Payload::Status(status) => StatusView { codec, status }.serialize(serializer),
            Payload::StreamChunk(chunk) => {
                let mut map = serializer.serialize_map(Some(1))?;
                match chunk {
                    StreamChunk::Result(message) => {
                        map.serialize_entry("result", &MessageView { codec, message })?
                    }
                    StreamChunk::Error(status) => {
                        map.serialize_entry("error", &StatusView { codec, status })?
                    }
                }
                map.end()
            }
        }
    }
}

struct MessageView<'a> {
    codec: &'a JsonCodec,
    message: &'a DynamicMessage,
}

impl Serialize for MessageView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.codec.flavor {
            Flavor::Proto { serialize, .. } => {
                self.message.serialize_with_options(serializer, serialize)
            }
            Flavor::Builtin => self.message.serialize(serializer),
        }
    }
}

/// `{"code", "message", "details"}`, omitting empty members unless the
/// codec emits unpopulated fields
struct StatusView<'a> {
    codec: &'a JsonCodec,
    status: &'a Status,
}

impl Serialize for StatusView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let status = self.status;
        let emit_all = matches!(
            self.codec.flavor,
            Flavor::Proto {
                emit_unpopulated: true,
                ..
            }
        );

        let mut map = serializer.serialize_map(None)?;
        if emit_all || status.code() != Code::OK {
            map.serialize_entry("code", &status.code().as_i32())?;
        }
        if emit_all || !status.message().is_empty() {
            map.serialize_entry("message", status.message())?;
        }
        if emit_all || !status.details().is_empty() {
            map.serialize_entry(
                "details",
                &DetailsView {
                    codec: self.codec,
                    details: status.details(),
                },
            )?;
        }
        map.end()
    }
}

struct DetailsView<'a> {
    codec: &'a JsonCodec,
    details: &'a [prost_types::Any],
}

#[derive(Serialize)]
struct RawAny<'a> {
    type_url: &'a str,
    value: String,
}

impl Serialize for DetailsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.details.len()))?;
        for detail in self.details {
            match &self.codec.flavor {
                Flavor::Proto { pool, .. } => {
                    let message = any_message(pool, detail).map_err(S::Error::custom)?;
                    seq.serialize_element(&MessageView {
                        codec: self.codec,
                        message: &message,
                    })?;
                }
                Flavor::Builtin => seq.serialize_element(&RawAny {
                    type_url: &detail.type_url,
                    value: STANDARD.encode(&detail.value),
                })?,
            }
        }
        seq.end()
    }
}

/// Wrap a status detail as a `google.protobuf.Any` message whose payload
/// type is known to `pool`
fn any_message(pool: &DescriptorPool, detail: &prost_types::Any) -> Result<DynamicMessage, String> {
    let descriptor = pool
        .get_message_by_name(ANY_TYPE)
        .ok_or_else(|| format!("descriptor pool has no {ANY_TYPE}"))?;
    let type_name = detail.type_url.rsplit('/').next().unwrap_or_default();
    if pool.get_message_by_name(type_name).is_none() {
        return Err(format!("unable to resolve {:?}", detail.type_url));
    }

    let mut any = DynamicMessage::new(descriptor);
    any.set_field_by_name("type_url", Value::String(detail.type_url.clone()));
    any.set_field_by_name("value", Value::Bytes(detail.value.clone().into()));
    Ok(any)
}

/// JSON codec following the protobuf JSON mapping.
///
/// `Any` values inside error details are resolved through the codec's
/// descriptor pool, which defaults to the global pool.
#[derive(Debug, Clone)]
pub struct JsonPb {
    options: JsonPbOptions,
    codec: JsonCodec,
}

impl JsonPb {
    pub fn new(options: JsonPbOptions) -> Self {
        Self::with_pool(options, DescriptorPool::global())
    }

    /// Resolve `Any` details through `pool`
    pub fn with_pool(options: JsonPbOptions, pool: DescriptorPool) -> Self {
        let serialize = SerializeOptions::new()
            .use_proto_field_name(options.use_proto_names)
            .use_enum_numbers(options.use_enum_numbers)
            .skip_default_fields(!options.emit_unpopulated);
        let deserialize = DeserializeOptions::new().deny_unknown_fields(!options.discard_unknown);
        let codec = JsonCodec {
            flavor: Flavor::Proto {
                serialize,
                deserialize,
                pool,
                emit_unpopulated: options.emit_unpopulated,
            },
            indent: options.indent.clone(),
        };
        Self { options, codec }
    }

    pub fn options(&self) -> &JsonPbOptions {
        &self.options
    }

    /// The JSON tree a payload encodes to
    pub(crate) fn to_value(&self, payload: Payload<'_>) -> Result<serde_json::Value, MarshalError> {
        self.codec.to_value(payload)
    }
}

impl Default for JsonPb {
    fn default() -> Self {
        Self::new(JsonPbOptions::default())
    }
}

impl Marshaler for JsonPb {
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        self.codec.marshal(payload)
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        self.codec.unmarshal(data, message)
    }

    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        self.codec.decoder(reader)
    }

    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a> {
        Box::new(DelimitedEncoder {
            marshaler: self,
            writer,
        })
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }
}

/// JSON codec using plain serde defaults: `lowerCamelCase` names and no
/// resolution of `Any` details
#[derive(Debug, Clone)]
pub struct JsonBuiltin {
    codec: JsonCodec,
}

impl JsonBuiltin {
    pub fn new() -> Self {
        Self {
            codec: JsonCodec {
                flavor: Flavor::Builtin,
                indent: None,
            },
        }
    }
}

impl Default for JsonBuiltin {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaler for JsonBuiltin {
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        self.codec.marshal(payload)
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        self.codec.unmarshal(data, message)
    }

    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        self.codec.decoder(reader)
    }

    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a> {
        Box::new(DelimitedEncoder {
            marshaler: self,
            writer,
        })
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }
}
