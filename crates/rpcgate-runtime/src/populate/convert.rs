//! String to field value conversion

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use prost_reflect::{DynamicMessage, EnumDescriptor, Kind, MapKey, MessageDescriptor, Value};
use std::str::FromStr;

/// Parse `text` as a value of `kind`.
///
/// `Ok(None)` means the field should be left unset (`null` timestamps
/// and durations).
pub(super) fn parse_value(kind: &Kind, text: &str) -> Result<Option<Value>, String> {
    let value = match kind {
        Kind::Bool => Value::Bool(parse_bool(text)?),
        Kind::Enum(desc) => Value::EnumNumber(parse_enum(desc, text)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(parse_num(text)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(parse_num(text)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(parse_num(text)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(parse_num(text)?),
        Kind::Float => Value::F32(parse_num(text)?),
        Kind::Double => Value::F64(parse_num(text)?),
        Kind::String => Value::String(text.to_string()),
        Kind::Bytes => Value::Bytes(parse_bytes(text)?.into()),
        Kind::Message(desc) => return parse_message(desc, text),
    };
    Ok(Some(value))
}

/// Convert a scalar value to a map key
pub(super) fn map_key(value: Value) -> Option<MapKey> {
    match value {
        Value::Bool(v) => Some(MapKey::Bool(v)),
        Value::I32(v) => Some(MapKey::I32(v)),
        Value::I64(v) => Some(MapKey::I64(v)),
        Value::U32(v) => Some(MapKey::U32(v)),
        Value::U64(v) => Some(MapKey::U64(v)),
        Value::String(v) => Some(MapKey::String(v)),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Result<bool, String> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(format!("invalid boolean {text:?}")),
    }
}

fn parse_num<T>(text: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.parse::<T>().map_err(|err| format!("{text:?}: {err}"))
}

fn parse_enum(desc: &EnumDescriptor, text: &str) -> Result<i32, String> {
    if let Some(value) = desc.get_value_by_name(text) {
        return Ok(value.number());
    }
    text.parse::<i32>()
        .ok()
        .and_then(|number| desc.get_value(number))
        .map(|value| value.number())
        .ok_or_else(|| format!("{text:?} is not a valid value"))
}

fn parse_bytes(text: &str) -> Result<Vec<u8>, String> {
    [&URL_SAFE, &URL_SAFE_NO_PAD, &STANDARD, &STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .ok_or_else(|| format!("{text:?} is not valid base64"))
}

fn parse_message(desc: &MessageDescriptor, text: &str) -> Result<Option<Value>, String> {
    let mut message = DynamicMessage::new(desc.clone());
    match desc.full_name() {
        "google.protobuf.Timestamp" => {
            if text == "null" {
                return Ok(None);
            }
            let ts = prost_types::Timestamp::from_str(text)
                .map_err(|err| format!("{text:?}: {err}"))?;
            message.set_field_by_name("seconds", Value::I64(ts.seconds));
            message.set_field_by_name("nanos", Value::I32(ts.nanos));
        }
        "google.protobuf.Duration" => {
            if text == "null" {
                return Ok(None);
            }
            let duration = prost_types::Duration::from_str(text)
                .map_err(|err| format!("{text:?}: {err}"))?;
            message.set_field_by_name("seconds", Value::I64(duration.seconds));
            message.set_field_by_name("nanos", Value::I32(duration.nanos));
        }
        "google.protobuf.FieldMask" => {
            let paths = text.split(',').map(|p| Value::String(p.to_string()));
            message.set_field_by_name("paths", Value::List(paths.collect()));
        }
        "google.protobuf.DoubleValue"
        | "google.protobuf.FloatValue"
        | "google.protobuf.Int64Value"
        | "google.protobuf.UInt64Value"
        | "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value"
        | "google.protobuf.BoolValue"
        | "google.protobuf.StringValue"
        | "google.protobuf.BytesValue" => {
            let field = desc
                .get_field_by_name("value")
                .ok_or_else(|| format!("{} has no value field", desc.full_name()))?;
            if let Some(value) = parse_value(&field.kind(), text)? {
                message.set_field(&field, value);
            }
        }
        "google.protobuf.Struct" | "google.protobuf.Value" | "google.protobuf.ListValue" => {
            let mut deserializer = serde_json::Deserializer::from_str(text);
            message = DynamicMessage::deserialize(desc.clone(), &mut deserializer)
                .and_then(|m| deserializer.end().map(|()| m))
                .map_err(|err| err.to_string())?;
        }
        other => return Err(format!("unsupported message type: {other:?}")),
    }
    Ok(Some(Value::Message(message)))
}
