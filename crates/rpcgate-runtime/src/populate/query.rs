use super::{populate, PopulateError, Source};
use http::Uri;
use prost_reflect::DynamicMessage;
use std::collections::HashSet;

/// Decoded query parameters, grouped by key in order of first appearance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryValues {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` string
    pub fn parse(input: &[u8]) -> Self {
        let mut values = Self::new();
        for (key, value) in url::form_urlencoded::parse(input) {
            values.append(key.into_owned(), value.into_owned());
        }
        values
    }

    /// Query parameters of `uri`
    pub fn from_uri(uri: &Uri) -> Self {
        uri.query()
            .map(|query| Self::parse(query.as_bytes()))
            .unwrap_or_default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Field paths already bound by the URL path or the request body.
///
/// A query key is filtered when one of these paths is a component-wise
/// prefix of it, so `nested` filters `nested.name` but not `nested_value`.
#[derive(Debug, Clone, Default)]
pub struct FieldPathFilter {
    paths: HashSet<Vec<String>>,
}

impl FieldPathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dotted field path
    pub fn insert(&mut self, path: &str) {
        if !path.is_empty() {
            self.paths
                .insert(path.split('.').map(str::to_string).collect());
        }
    }

    /// Whether `path` lies under a filtered path. Components are compared
    /// as given and in `snake_case` form.
    pub fn matches(&self, path: &[&str]) -> bool {
        let snake: Vec<String> = path.iter().map(|c| to_snake_case(c)).collect();
        self.paths.iter().any(|filtered| {
            filtered.len() <= path.len()
                && filtered
                    .iter()
                    .zip(path.iter().zip(&snake))
                    .all(|(f, (raw, snake))| f == raw || f == snake)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for FieldPathFilter {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut filter = Self::new();
        for path in iter {
            filter.insert(path);
        }
        filter
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Split `field[key]` into `("field", Some("key"))`
fn split_map_key(key: &str) -> (&str, Option<&str>) {
    if let Some(inner) = key.strip_suffix(']') {
        if let Some(open) = inner.rfind('[') {
            return (&inner[..open], Some(&inner[open + 1..]));
        }
    }
    (key, None)
}

/// Assign query parameters, skipping keys under a `filter` path.
///
/// Keys are dotted field paths. `field[key]=value` assigns a map entry.
pub fn populate_query_parameters(
    message: &mut DynamicMessage,
    values: &QueryValues,
    filter: &FieldPathFilter,
) -> Result<(), PopulateError> {
    for (key, key_values) in values.iter() {
        let (name, map_key) = split_map_key(key);
        let path: Vec<&str> = name.split('.').collect();
        if filter.matches(&path) {
            continue;
        }

        let mut args: Vec<&str> = Vec::with_capacity(key_values.len() + 1);
        args.extend(map_key);
        args.extend(key_values.iter().map(String::as_str));
        populate(message, &path, &args, Source::Query)?;
    }
    Ok(())
}
