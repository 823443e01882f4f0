//! Update masks derived from PATCH bodies

use crate::populate::{find_field, PopulateError};
use prost_reflect::{Kind, MessageDescriptor};
use prost_types::FieldMask;
use serde_json::Value;
use std::collections::VecDeque;

struct PathItem<'a> {
    path: Vec<String>,
    node: &'a Value,
    /// Descriptor of the message `node` encodes, `None` below scalar fields
    message: Option<MessageDescriptor>,
}

/// Values of these types are free-form JSON objects; their keys are taken
/// as paths without consulting a descriptor
fn is_dynamic(desc: &MessageDescriptor) -> bool {
    matches!(
        desc.full_name(),
        "google.protobuf.Struct" | "google.protobuf.Value"
    )
}

/// Messages whose JSON form is an object walked field by field
fn is_object_message(desc: &MessageDescriptor) -> bool {
    is_dynamic(desc)
        || desc.full_name() == "google.protobuf.Empty"
        || !desc.full_name().starts_with("google.protobuf.")
}

/// Build a field mask naming every leaf set in a JSON request body.
///
/// Objects are walked breadth first. Keys may use either the proto or the
/// JSON field name; paths always use proto names. Repeated and map fields
/// are not descended into, and at most one of them may appear, placed
/// last. An empty body yields an empty mask.
pub fn field_mask_from_request_body(
    body: &[u8],
    desc: &MessageDescriptor,
) -> Result<FieldMask, PopulateError> {
    let mut mask = FieldMask::default();
    let root = match serde_json::Deserializer::from_slice(body)
        .into_iter::<Value>()
        .next()
    {
        None => return Ok(mask),
        Some(Ok(root)) => root,
        Some(Err(err)) => return Err(PopulateError::Json(err.to_string())),
    };

    let mut queue = VecDeque::from([PathItem {
        path: Vec::new(),
        node: &root,
        message: Some(desc.clone()),
    }]);
    let mut repeated: Option<Vec<String>> = None;

    while let Some(item) = queue.pop_front() {
        let Value::Object(object) = item.node else {
            if !item.path.is_empty() {
                mask.paths.push(item.path.join("."));
            }
            continue;
        };

        for (key, value) in object {
            let Some(message) = &item.message else {
                return Err(PopulateError::StructureMismatch);
            };

            if is_dynamic(message) {
                let mut path = item.path.clone();
                path.push(key.clone());
                queue.push_back(PathItem {
                    path,
                    node: value,
                    message: Some(message.clone()),
                });
                continue;
            }

            let field = find_field(message, key).ok_or_else(|| PopulateError::UnknownField {
                field: key.clone(),
                message: message.full_name().to_string(),
            })?;
            let mut path = item.path.clone();
            path.push(field.name().to_string());

            if field.is_list() || field.is_map() {
                if repeated.is_some() {
                    return Err(PopulateError::MultipleRepeated);
                }
                repeated = Some(path);
                continue;
            }

            let child = match field.kind() {
                Kind::Message(child) if child.full_name() == "google.protobuf.Any" => {
                    mask.paths.push(path.join("."));
                    continue;
                }
                Kind::Message(child) if is_object_message(&child) => Some(child),
                _ => None,
            };
            // Well-known types encode as JSON scalars; an object in their
            // place has no descriptor to check against
            if child.is_none() && value.is_object() {
                return Err(PopulateError::StructureMismatch);
            }
            queue.push_back(PathItem {
                path,
                node: value,
                message: child,
            });
        }
    }

    if let Some(path) = repeated {
        mask.paths.push(path.join("."));
    }
    Ok(mask)
}
