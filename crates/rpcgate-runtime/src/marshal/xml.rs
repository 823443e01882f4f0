use super::{DelimitedEncoder, Decoder, Encoder, JsonPb, MarshalError, Marshaler, OneShotDecoder, Payload};
use crate::populate::populate_field_from_path;
use bytes::Bytes;
use prost_reflect::{DynamicMessage, ReflectMessage};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value as Json;
use std::fmt::Display;
use std::io::{Read, Write};

const ROOT: &str = "xml";

/// XML codec.
///
/// Output is the JSON form of the payload laid out as elements under an
/// `<xml>` root, with arrays as repeated elements. Input assigns each leaf
/// element's text to the field at its element path.
#[derive(Debug, Clone, Default)]
pub struct XmlMarshaler {
    json: JsonPb,
}

impl XmlMarshaler {
    pub fn new(json: JsonPb) -> Self {
        Self { json }
    }
}

fn xml_error(err: impl Display) -> MarshalError {
    MarshalError::Xml(err.to_string())
}

fn write_children<W: Write>(writer: &mut Writer<W>, value: &Json) -> Result<(), MarshalError> {
    match value {
        Json::Object(fields) => {
            for (name, value) in fields {
                write_element(writer, name, value)?;
            }
            Ok(())
        }
        Json::Array(items) => {
            for item in items {
                write_element(writer, "item", item)?;
            }
            Ok(())
        }
        Json::Null => Ok(()),
        scalar => write_text(writer, scalar),
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

fn is_name_char(c: char) -> bool {
    is_name_start(c)
        || c.is_ascii_digit()
        || c == '-'
        || c == '.'
        || (!c.is_ascii() && c.is_alphanumeric())
}

/// Whether `name` matches the XML `Name` production, colons excluded
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

fn write_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &Json,
) -> Result<(), MarshalError> {
    if !is_xml_name(name) {
        return Err(MarshalError::Xml(format!("{name:?} is not a valid element name")));
    }
    match value {
        Json::Null => Ok(()),
        Json::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
            Ok(())
        }
        _ => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_error)?;
            write_children(writer, value)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)?;
            Ok(())
        }
    }
}

fn write_text<W: Write>(writer: &mut Writer<W>, value: &Json) -> Result<(), MarshalError> {
    let text = match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    };
    writer
        .write_event(Event::Text(BytesText::new(&text)))
        .map_err(xml_error)?;
    Ok(())
}

/// An element whose end tag has not been read yet
struct Open {
    name: String,
    has_children: bool,
}

impl Marshaler for XmlMarshaler {
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        let value = self.json.to_value(payload)?;
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Start(BytesStart::new(ROOT)))
            .map_err(xml_error)?;
        write_children(&mut writer, &value)?;
        writer
            .write_event(Event::End(BytesEnd::new(ROOT)))
            .map_err(xml_error)?;
        Ok(Bytes::from(writer.into_inner()))
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        *message = DynamicMessage::new(message.descriptor());

        let mut reader = Reader::from_reader(data);
        let mut buf = Vec::new();
        let mut open: Vec<Open> = Vec::new();
        let mut text = String::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(xml_error)? {
                Event::Start(start) => {
                    if let Some(parent) = open.last_mut() {
                        parent.has_children = true;
                    }
                    open.push(Open {
                        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                        has_children: false,
                    });
                    text.clear();
                }
                Event::Empty(_) => {
                    if let Some(parent) = open.last_mut() {
                        parent.has_children = true;
                    }
                }
                Event::Text(content) => text.push_str(&content.unescape().map_err(xml_error)?),
                Event::CData(content) => text.push_str(&String::from_utf8_lossy(&content)),
                Event::End(_) => {
                    let Some(element) = open.pop() else {
                        return Err(MarshalError::Xml("unbalanced end tag".to_string()));
                    };
                    // open[0] is the root
                    if !element.has_children && !open.is_empty() {
                        let mut path: Vec<&str> =
                            open.iter().skip(1).map(|o| o.name.as_str()).collect();
                        path.push(&element.name);
                        populate_field_from_path(message, &path.join("."), text.trim())?;
                    }
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !open.is_empty() {
            return Err(MarshalError::Xml("unexpected end of document".to_string()));
        }
        Ok(())
    }

    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        Box::new(OneShotDecoder::new(self, reader))
    }

    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a> {
        Box::new(DelimitedEncoder {
            marshaler: self,
            writer,
        })
    }

    fn content_type(&self) -> &'static str {
        "application/xml"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::StreamChunk;
    use prost_reflect::{MapKey, Value};
    use rpcgate_core::Status;
    use std::collections::HashMap;

    fn everything() -> DynamicMessage {
        DynamicMessage::new(rpcgate_proto::message("ABitOfEverything"))
    }

    #[test]
    fn test_marshal_message() {
        let mut msg = everything();
        msg.set_field_by_name("uuid", Value::String("a<b".into()));
        msg.set_field_by_name("int32_value", Value::I32(3));
        msg.set_field_by_name(
            "repeated_string_value",
            Value::List(vec![Value::String("x".into()), Value::String("y".into())]),
        );
        let buf = XmlMarshaler::default()
            .marshal(Payload::Message(&msg))
            .unwrap();
        let out = std::str::from_utf8(&buf).unwrap();
        assert!(out.starts_with("<xml>") && out.ends_with("</xml>"));
        assert!(out.contains("<uuid>a&lt;b</uuid>"));
        assert!(out.contains("<int32_value>3</int32_value>"));
        assert!(out.contains(
            "<repeated_string_value>x</repeated_string_value><repeated_string_value>y</repeated_string_value>"
        ));
    }

    #[test]
    fn test_marshal_status_and_chunks() {
        let marshaler = XmlMarshaler::default();
        let status = Status::not_found("gone");
        let buf = marshaler.marshal(Payload::Status(&status)).unwrap();
        assert_eq!(&buf[..], b"<xml><code>5</code><message>gone</message></xml>");

        let buf = marshaler
            .marshal(Payload::StreamChunk(StreamChunk::Error(&status)))
            .unwrap();
        assert_eq!(
            &buf[..],
            b"<xml><error><code>5</code><message>gone</message></error></xml>"
        );
    }

    #[test]
    fn test_map_keys_that_are_not_element_names_fail() {
        let marshaler = XmlMarshaler::default();

        let mut msg = everything();
        msg.set_field_by_name(
            "mapped_enum_value",
            Value::Map(HashMap::from([(MapKey::I32(3), Value::EnumNumber(1))])),
        );
        let err = marshaler.marshal(Payload::Message(&msg)).unwrap_err();
        assert!(matches!(err, MarshalError::Xml(ref reason) if reason.contains("\"3\"")), "{err}");

        let mut msg = everything();
        msg.set_field_by_name(
            "mapped_string_value",
            Value::Map(HashMap::from([(
                MapKey::String("has space".into()),
                Value::String("v".into()),
            )])),
        );
        let err = marshaler.marshal(Payload::Message(&msg)).unwrap_err();
        assert!(matches!(err, MarshalError::Xml(_)), "{err}");

        let mut msg = everything();
        msg.set_field_by_name(
            "mapped_string_value",
            Value::Map(HashMap::from([(
                MapKey::String("colour".into()),
                Value::String("red".into()),
            )])),
        );
        let buf = marshaler.marshal(Payload::Message(&msg)).unwrap();
        assert_eq!(
            &buf[..],
            b"<xml><mapped_string_value><colour>red</colour></mapped_string_value></xml>"
        );
    }

    #[test]
    fn test_element_names() {
        assert!(is_xml_name("single_nested"));
        assert!(is_xml_name("a-1.b"));
        assert!(is_xml_name("größe"));
        assert!(!is_xml_name(""));
        assert!(!is_xml_name("3"));
        assert!(!is_xml_name("-a"));
        assert!(!is_xml_name("has space"));
        assert!(!is_xml_name("@type"));
    }

    #[test]
    fn test_unmarshal_leaf_paths() {
        let mut msg = everything();
        XmlMarshaler::default()
            .unmarshal(
                b"<xml>\n  <uuid>u-1</uuid>\n  <single_nested><name>n &amp; m</name></single_nested>\n  \
                  <repeated_int32_value>1</repeated_int32_value><repeated_int32_value>2</repeated_int32_value>\n</xml>",
                &mut msg,
            )
            .unwrap();

        assert_eq!(msg.get_field_by_name("uuid").unwrap().as_str(), Some("u-1"));
        let nested = msg.get_field_by_name("single_nested").unwrap();
        assert_eq!(
            nested.as_message().unwrap().get_field_by_name("name").unwrap().as_str(),
            Some("n & m")
        );
        let ints = msg.get_field_by_name("repeated_int32_value").unwrap();
        assert_eq!(ints.as_list().unwrap(), [Value::I32(1), Value::I32(2)]);
    }

    #[test]
    fn test_unmarshal_rejects_bad_values() {
        let mut msg = everything();
        let err = XmlMarshaler::default()
            .unmarshal(b"<xml><int32_value>x</int32_value></xml>", &mut msg)
            .unwrap_err();
        assert!(matches!(err, MarshalError::Populate(_)));
    }

    #[test]
    fn test_unmarshal_rejects_truncated_document() {
        let mut msg = everything();
        assert!(XmlMarshaler::default()
            .unmarshal(b"<xml><uuid>x</uuid>", &mut msg)
            .is_err());
    }
}
