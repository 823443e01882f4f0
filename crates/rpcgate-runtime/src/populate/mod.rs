//! Assigning URL path, query and body values to request fields.
//!
//! All entry points walk a dotted field path through the message
//! descriptors, creating intermediate messages as they go, then convert
//! the string value(s) according to the leaf field's kind.

mod convert;
mod query;

pub use query::{populate_query_parameters, FieldPathFilter, QueryValues};

use crate::pattern::PathParams;
use convert::{map_key, parse_value};
use prost_reflect::{DynamicMessage, FieldDescriptor, MessageDescriptor, ReflectMessage, Value};
use thiserror::Error;
use tracing::debug;

/// Field population errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PopulateError {
    #[error("no field path")]
    EmptyFieldPath,

    #[error("no value provided for field {0:?}")]
    NoValue(String),

    /// An intermediate path component is repeated or not a message
    #[error("invalid path: {0:?} is not a message")]
    NotAMessage(String),

    #[error("field already set for oneof {0:?}")]
    OneofAlreadySet(String),

    #[error("too many values for field {field:?}: {values}")]
    TooManyValues { field: String, values: String },

    #[error("more than one value provided for key {key:?} in map {field:?}")]
    MapValues { key: String, field: String },

    #[error("parsing field {field:?}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("could not find field {field:?} in {message:?}")]
    UnknownField { field: String, message: String },

    #[error("JSON structure did not match request type")]
    StructureMismatch,

    #[error("only one repeated value is allowed per field_mask")]
    MultipleRepeated,

    #[error("invalid JSON: {0}")]
    Json(String),
}

/// Where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// One captured path variable: lists are comma separated, maps are
    /// left to the query
    Path,
    /// Query parameters and single field assignments: each value is one
    /// list element, maps take `[key, value]`
    Query,
}

/// Assign captured path variables. Variable names are dotted field paths.
pub fn populate_path_parameters(
    message: &mut DynamicMessage,
    params: &PathParams,
) -> Result<(), PopulateError> {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();
    for name in names {
        let path: Vec<&str> = name.split('.').collect();
        populate(message, &path, &[params[name].as_str()], Source::Path)?;
    }
    Ok(())
}

/// Assign a single value to the field at a dotted path
pub fn populate_field_from_path(
    message: &mut DynamicMessage,
    field_path: &str,
    value: &str,
) -> Result<(), PopulateError> {
    let path: Vec<&str> = field_path.split('.').collect();
    populate(message, &path, &[value], Source::Query)
}

/// Look a field up by proto name, then by JSON name
pub(crate) fn find_field(desc: &MessageDescriptor, name: &str) -> Option<FieldDescriptor> {
    desc.get_field_by_name(name)
        .or_else(|| desc.get_field_by_json_name(name))
}

pub(crate) fn populate(
    message: &mut DynamicMessage,
    path: &[&str],
    values: &[&str],
    source: Source,
) -> Result<(), PopulateError> {
    let (name, rest) = path.split_first().ok_or(PopulateError::EmptyFieldPath)?;
    let desc = message.descriptor();
    let Some(field) = find_field(&desc, name) else {
        debug!(
            message = desc.full_name(),
            field = path.join("."),
            "field not found, ignoring"
        );
        return Ok(());
    };

    if !rest.is_empty() {
        if field.is_list() || field.is_map() {
            return Err(PopulateError::NotAMessage(name.to_string()));
        }
        check_oneof(message, &field, true)?;
        return match message.get_field_mut(&field) {
            Value::Message(child) => populate(child, rest, values, source),
            _ => Err(PopulateError::NotAMessage(name.to_string())),
        };
    }

    check_oneof(message, &field, false)?;

    if field.is_map() {
        return match source {
            Source::Path => Ok(()),
            Source::Query => populate_map(message, &field, values),
        };
    }

    if field.is_list() {
        let elements: Vec<&str> = match (source, values) {
            (Source::Path, [value]) => value.split(',').collect(),
            _ => values.to_vec(),
        };
        return populate_list(message, &field, &elements);
    }

    let value = match values {
        [] => return Err(PopulateError::NoValue(field.name().to_string())),
        [value] => *value,
        _ => {
            return Err(PopulateError::TooManyValues {
                field: field.name().to_string(),
                values: values.join(", "),
            })
        }
    };
    if source == Source::Path && value.is_empty() {
        return Err(PopulateError::NoValue(field.name().to_string()));
    }

    match parse_value(&field.kind(), value).map_err(|reason| invalid(&field, reason))? {
        Some(value) => message.set_field(&field, value),
        None => message.clear_field(&field),
    }
    Ok(())
}

/// A oneof member may only be written when no member is set. Walking
/// through an already-set message member is allowed.
fn check_oneof(
    message: &DynamicMessage,
    field: &FieldDescriptor,
    intermediate: bool,
) -> Result<(), PopulateError> {
    let Some(oneof) = field.containing_oneof() else {
        return Ok(());
    };
    // proto3 `optional` fields sit alone in a synthetic oneof
    if field.field_descriptor_proto().proto3_optional() {
        return Ok(());
    }
    let conflict = oneof.fields().any(|member| {
        message.has_field(&member) && !(intermediate && member.number() == field.number())
    });
    if conflict {
        return Err(PopulateError::OneofAlreadySet(oneof.name().to_string()));
    }
    Ok(())
}

fn populate_list(
    message: &mut DynamicMessage,
    field: &FieldDescriptor,
    elements: &[&str],
) -> Result<(), PopulateError> {
    let kind = field.kind();
    let mut parsed = Vec::with_capacity(elements.len());
    for element in elements {
        if let Some(value) = parse_value(&kind, element).map_err(|reason| invalid(field, reason))? {
            parsed.push(value);
        }
    }
    if let Value::List(list) = message.get_field_mut(field) {
        list.extend(parsed);
    }
    Ok(())
}

fn populate_map(
    message: &mut DynamicMessage,
    field: &FieldDescriptor,
    values: &[&str],
) -> Result<(), PopulateError> {
    let [key, value] = values else {
        return Err(PopulateError::MapValues {
            key: values.first().copied().unwrap_or_default().to_string(),
            field: field.full_name().to_string(),
        });
    };
    let prost_reflect::Kind::Message(entry) = field.kind() else {
        return Err(PopulateError::NotAMessage(field.name().to_string()));
    };

    let key = parse_value(&entry.map_entry_key_field().kind(), key)
        .map_err(|reason| invalid(field, reason))?
        .and_then(map_key)
        .ok_or_else(|| invalid(field, format!("{key:?} is not a valid map key")))?;
    let value = parse_value(&entry.map_entry_value_field().kind(), value)
        .map_err(|reason| invalid(field, reason))?;

    if let (Some(value), Value::Map(map)) = (value, message.get_field_mut(field)) {
        map.insert(key, value);
    }
    Ok(())
}

fn invalid(field: &FieldDescriptor, reason: String) -> PopulateError {
    PopulateError::InvalidValue {
        field: field.name().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn everything() -> DynamicMessage {
        DynamicMessage::new(rpcgate_proto::message("ABitOfEverything"))
    }

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_path_scalars() {
        let mut msg = everything();
        populate_path_parameters(
            &mut msg,
            &params(&[
                ("float_value", "1.5"),
                ("bool_value", "true"),
                ("uuid", "6a3d"),
                ("enum_value", "BLUE"),
            ]),
        )
        .unwrap();

        assert_eq!(msg.get_field_by_name("float_value").unwrap().as_f32(), Some(1.5));
        assert_eq!(msg.get_field_by_name("bool_value").unwrap().as_bool(), Some(true));
        assert_eq!(msg.get_field_by_name("uuid").unwrap().as_str(), Some("6a3d"));
        assert_eq!(msg.get_field_by_name("enum_value").unwrap().as_enum_number(), Some(3));
    }

    #[test]
    fn test_path_nested_fields() {
        let mut msg = everything();
        populate_path_parameters(
            &mut msg,
            &params(&[
                ("single_nested.name", "inner"),
                ("single_nested.child.amount", "7"),
            ]),
        )
        .unwrap();

        let nested = msg.get_field_by_name("single_nested").unwrap();
        let nested = nested.as_message().unwrap();
        assert_eq!(nested.get_field_by_name("name").unwrap().as_str(), Some("inner"));
        let child = nested.get_field_by_name("child").unwrap();
        assert_eq!(
            child.as_message().unwrap().get_field_by_name("amount").unwrap().as_u32(),
            Some(7)
        );
    }

    #[test]
    fn test_path_repeated_is_comma_separated() {
        let mut msg = everything();
        populate_path_parameters(&mut msg, &params(&[("repeated_string_value", "a,b,c")]))
            .unwrap();
        let list = msg.get_field_by_name("repeated_string_value").unwrap();
        let list: Vec<_> = list
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(list, ["a", "b", "c"]);
    }

    #[test]
    fn test_json_names() {
        let mut msg = everything();
        populate_field_from_path(&mut msg, "singleNested.name", "x").unwrap();
        let nested = msg.get_field_by_name("single_nested").unwrap();
        assert_eq!(
            nested.as_message().unwrap().get_field_by_name("name").unwrap().as_str(),
            Some("x")
        );
    }

    #[test]
    fn test_unknown_field_ignored() {
        let mut msg = everything();
        populate_field_from_path(&mut msg, "no_such_field", "1").unwrap();
        populate_field_from_path(&mut msg, "single_nested.nope", "1").unwrap();
        assert!(!msg.has_field_by_name("no_such_field"));
    }

    #[test]
    fn test_intermediate_must_be_message() {
        let mut msg = everything();
        let err = populate_field_from_path(&mut msg, "uuid.inner", "x").unwrap_err();
        assert_eq!(err, PopulateError::NotAMessage("uuid".into()));

        let err = populate_field_from_path(&mut msg, "nested.name", "x").unwrap_err();
        assert_eq!(err, PopulateError::NotAMessage("nested".into()));
    }

    #[test]
    fn test_oneof_conflict() {
        let mut msg = everything();
        populate_field_from_path(&mut msg, "oneof_string", "a").unwrap();
        let err = populate_field_from_path(&mut msg, "oneof_int32", "1").unwrap_err();
        assert_eq!(err, PopulateError::OneofAlreadySet("oneof_value".into()));
        assert_eq!(err.to_string(), "field already set for oneof \"oneof_value\"");

        let err = populate_field_from_path(&mut msg, "oneof_nested.name", "b").unwrap_err();
        assert_eq!(err, PopulateError::OneofAlreadySet("oneof_value".into()));
    }

    #[test]
    fn test_path_then_query_oneof_conflict() {
        let mut msg = everything();
        populate_path_parameters(&mut msg, &params(&[("oneof_string", "from-path")])).unwrap();

        let filter: FieldPathFilter = ["oneof_string"].into_iter().collect();
        let err = populate_query_parameters(
            &mut msg,
            &QueryValues::parse(b"oneof_int32=5"),
            &filter,
        )
        .unwrap_err();
        assert_eq!(err, PopulateError::OneofAlreadySet("oneof_value".into()));
        assert_eq!(
            msg.get_field_by_name("oneof_string").unwrap().as_str(),
            Some("from-path")
        );
    }

    #[test]
    fn test_proto3_optional_can_be_written_again() {
        let mut msg = everything();
        populate_path_parameters(&mut msg, &params(&[("optional_string_value", "a")])).unwrap();
        populate_field_from_path(&mut msg, "optional_string_value", "b").unwrap();
        populate_query_parameters(
            &mut msg,
            &QueryValues::parse(b"optional_string_value=c"),
            &FieldPathFilter::new(),
        )
        .unwrap();
        assert_eq!(
            msg.get_field_by_name("optional_string_value").unwrap().as_str(),
            Some("c")
        );
    }

    #[test]
    fn test_oneof_message_member_accepts_several_fields() {
        let mut msg = everything();
        populate_field_from_path(&mut msg, "oneof_nested.name", "a").unwrap();
        populate_field_from_path(&mut msg, "oneof_nested.amount", "2").unwrap();
        let nested = msg.get_field_by_name("oneof_nested").unwrap();
        assert_eq!(
            nested.as_message().unwrap().get_field_by_name("amount").unwrap().as_u32(),
            Some(2)
        );
    }

    #[test]
    fn test_invalid_value() {
        let mut msg = everything();
        let err = populate_field_from_path(&mut msg, "int32_value", "abc").unwrap_err();
        assert!(matches!(err, PopulateError::InvalidValue { ref field, .. } if field == "int32_value"));
    }

    #[test]
    fn test_empty_path_value_rejected() {
        let mut msg = everything();
        let err = populate_path_parameters(&mut msg, &params(&[("uuid", "")])).unwrap_err();
        assert_eq!(err, PopulateError::NoValue("uuid".into()));
    }

    #[test]
    fn test_null_timestamp_clears() {
        let mut msg = everything();
        populate_field_from_path(&mut msg, "timestamp_value", "2024-01-01T00:00:00Z").unwrap();
        assert!(msg.has_field_by_name("timestamp_value"));
        populate_field_from_path(&mut msg, "timestamp_value", "null").unwrap();
        assert!(!msg.has_field_by_name("timestamp_value"));
    }
}
