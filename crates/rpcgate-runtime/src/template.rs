//! HTTP rule URL templates.
//!
//! Parses templates such as `/v1/{name=shelves/*}/books/{book}:publish` and
//! compiles them into [`Pattern`] opcode programs:
//!
//! ```text
//! Template = "/" Segments [ Verb ]
//! Segments = Segment { "/" Segment }
//! Segment  = "*" | "**" | LITERAL | Variable
//! Variable = "{" FieldPath [ "=" Segments ] "}"
//! FieldPath = IDENT { "." IDENT }
//! Verb     = ":" LITERAL
//! ```

use crate::pattern::{InvalidPattern, OpCode, Pattern, PATTERN_VERSION};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Template syntax errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template must start with '/': {0:?}")]
    MissingLeadingSlash(String),

    #[error("empty segment at offset {0}")]
    EmptySegment(usize),

    #[error("unexpected {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("unterminated variable starting at offset {0}")]
    UnterminatedVariable(usize),

    #[error("nested variable at offset {0}")]
    NestedVariable(usize),

    #[error("invalid field path {0:?}")]
    InvalidFieldPath(String),

    #[error("'**' must be the last segment")]
    DeepWildcardNotLast,

    #[error("variable {0:?} bound more than once")]
    DuplicateVariable(String),

    #[error("empty verb")]
    EmptyVerb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    DeepWildcard,
    Variable {
        field_path: String,
        segments: Vec<Segment>,
    },
}

/// A parsed URL template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
    verb: String,
}

/// Opcode program for [`Pattern::new`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    pub ops: Vec<i32>,
    pub pool: Vec<String>,
    pub verb: String,
}

impl Template {
    /// Parse a template string
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let body = template
            .strip_prefix('/')
            .ok_or_else(|| TemplateError::MissingLeadingSlash(template.to_string()))?;

        let (path, verb) = split_verb(body);
        let verb = match verb {
            Some("") => return Err(TemplateError::EmptyVerb),
            Some(verb) => verb.to_string(),
            None => String::new(),
        };

        let segments = if path.is_empty() {
            Vec::new()
        } else {
            let mut parser = Parser {
                input: path,
                pos: 0,
                // Offsets reported relative to the full template
                base: 1,
            };
            let segments = parser.segments(false)?;
            if let Some(found) = parser.peek() {
                return Err(TemplateError::Unexpected {
                    found,
                    offset: parser.offset(),
                });
            }
            segments
        };

        let template = Self {
            raw: template.to_string(),
            segments,
            verb,
        };
        template.validate()?;
        Ok(template)
    }

    fn validate(&self) -> Result<(), TemplateError> {
        let mut flat = Vec::new();
        flatten(&self.segments, &mut flat);
        if let Some(pos) = flat.iter().position(|s| **s == Segment::DeepWildcard) {
            if pos + 1 != flat.len() {
                return Err(TemplateError::DeepWildcardNotLast);
            }
        }

        let mut seen = Vec::new();
        for name in self.field_paths() {
            if seen.contains(&name) {
                return Err(TemplateError::DuplicateVariable(name.to_string()));
            }
            seen.push(name);
        }
        Ok(())
    }

    /// The template string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Trailing verb, empty if none
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Field paths bound by variables, in template order
    pub fn field_paths(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Variable { field_path, .. } => Some(field_path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Emit the opcode program for this template
    pub fn compile(&self) -> CompiledTemplate {
        let mut compiled = CompiledTemplate {
            ops: Vec::new(),
            pool: Vec::new(),
            verb: self.verb.clone(),
        };
        for segment in &self.segments {
            compiled.emit(segment);
        }
        compiled
    }

    /// Compile straight into a [`Pattern`]
    pub fn to_pattern(&self) -> Result<Pattern, InvalidPattern> {
        let compiled = self.compile();
        Pattern::new(
            PATTERN_VERSION,
            &compiled.ops,
            compiled.pool,
            compiled.verb,
        )
    }
}

impl CompiledTemplate {
    fn emit(&mut self, segment: &Segment) {
        match segment {
            Segment::Literal(literal) => {
                let index = self.intern(literal);
                self.push(OpCode::LitPush, index);
            }
            Segment::Wildcard => self.push(OpCode::Push, 0),
            Segment::DeepWildcard => self.push(OpCode::PushM, 0),
            Segment::Variable {
                field_path,
                segments,
            } => {
                for inner in segments {
                    self.emit(inner);
                }
                self.push(OpCode::ConcatN, segments.len());
                let index = self.intern(field_path);
                self.push(OpCode::Capture, index);
            }
        }
    }

    fn push(&mut self, code: OpCode, operand: usize) {
        // Pools and segment counts are bounded by the template length
        let operand = i32::try_from(operand).unwrap_or(i32::MAX);
        self.ops.extend([code.as_i32(), operand]);
    }

    fn intern(&mut self, value: &str) -> usize {
        match self.pool.iter().position(|s| s == value) {
            Some(index) => index,
            None => {
                self.pool.push(value.to_string());
                self.pool.len() - 1
            }
        }
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn flatten<'a>(segments: &'a [Segment], out: &mut Vec<&'a Segment>) {
    for segment in segments {
        match segment {
            Segment::Variable { segments, .. } => flatten(segments, out),
            other => out.push(other),
        }
    }
}

/// Split off a trailing `:verb`, ignoring colons inside variables or
/// followed by further segments
fn split_verb(body: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut colon = None;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => colon = Some(i),
            '/' if depth == 0 => colon = None,
            _ => {}
        }
    }
    match colon {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    base: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn segments(&mut self, in_variable: bool) -> Result<Vec<Segment>, TemplateError> {
        let mut segments = vec![self.segment(in_variable)?];
        while self.eat('/') {
            segments.push(self.segment(in_variable)?);
        }
        Ok(segments)
    }

    fn segment(&mut self, in_variable: bool) -> Result<Segment, TemplateError> {
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                if self.eat('*') {
                    Ok(Segment::DeepWildcard)
                } else {
                    Ok(Segment::Wildcard)
                }
            }
            Some('{') if in_variable => Err(TemplateError::NestedVariable(self.offset())),
            Some('{') => self.variable(),
            _ => {
                let start = self.pos;
                let len = self.input[start..]
                    .find(|c| matches!(c, '/' | '{' | '}' | '*' | '='))
                    .unwrap_or(self.input.len() - start);
                if len == 0 {
                    return Err(TemplateError::EmptySegment(self.offset()));
                }
                self.pos += len;
                Ok(Segment::Literal(self.input[start..self.pos].to_string()))
            }
        }
    }

    fn variable(&mut self) -> Result<Segment, TemplateError> {
        let start = self.offset();
        self.eat('{');

        let rest = &self.input[self.pos..];
        let len = rest
            .find(|c| matches!(c, '=' | '}'))
            .ok_or(TemplateError::UnterminatedVariable(start))?;
        let field_path = rest[..len].to_string();
        let valid = field_path.split('.').all(|ident| {
            !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        if !valid {
            return Err(TemplateError::InvalidFieldPath(field_path));
        }
        self.pos += len;

        let segments = if self.eat('=') {
            self.segments(true)?
        } else {
            vec![Segment::Wildcard]
        };

        if !self.eat('}') {
            return match self.peek() {
                Some(found) => Err(TemplateError::Unexpected {
                    found,
                    offset: self.offset(),
                }),
                None => Err(TemplateError::UnterminatedVariable(start)),
            };
        }

        Ok(Segment::Variable {
            field_path,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(codes: &[(OpCode, i32)]) -> Vec<i32> {
        codes
            .iter()
            .flat_map(|(code, operand)| [code.as_i32(), *operand])
            .collect()
    }

    #[test]
    fn test_compile_literals() {
        let compiled = Template::parse("/v1/users").unwrap().compile();
        assert_eq!(
            compiled.ops,
            ops(&[(OpCode::LitPush, 0), (OpCode::LitPush, 1)])
        );
        assert_eq!(compiled.pool, vec!["v1", "users"]);
        assert_eq!(compiled.verb, "");
    }

    #[test]
    fn test_compile_variable_shorthand() {
        let compiled = Template::parse("/v1/users/{id}").unwrap().compile();
        assert_eq!(
            compiled.ops,
            ops(&[
                (OpCode::LitPush, 0),
                (OpCode::LitPush, 1),
                (OpCode::Push, 0),
                (OpCode::ConcatN, 1),
                (OpCode::Capture, 2),
            ])
        );
        assert_eq!(compiled.pool, vec!["v1", "users", "id"]);
    }

    #[test]
    fn test_compile_nested_segments_and_verb() {
        let template = Template::parse("/v1/{name=shelves/*/books/*}:publish").unwrap();
        assert_eq!(template.verb(), "publish");
        assert_eq!(template.field_paths(), vec!["name"]);

        let compiled = template.compile();
        assert_eq!(
            compiled.ops,
            ops(&[
                (OpCode::LitPush, 0),
                (OpCode::LitPush, 1),
                (OpCode::Push, 0),
                (OpCode::LitPush, 2),
                (OpCode::Push, 0),
                (OpCode::ConcatN, 4),
                (OpCode::Capture, 3),
            ])
        );
        assert_eq!(compiled.pool, vec!["v1", "shelves", "books", "name"]);
    }

    #[test]
    fn test_compile_deep_wildcard() {
        let compiled = Template::parse("/v1/{path=files/**}").unwrap().compile();
        assert_eq!(
            compiled.ops,
            ops(&[
                (OpCode::LitPush, 0),
                (OpCode::LitPush, 1),
                (OpCode::PushM, 0),
                (OpCode::ConcatN, 2),
                (OpCode::Capture, 2),
            ])
        );
    }

    #[test]
    fn test_root_template() {
        let pattern = Template::parse("/").unwrap().to_pattern().unwrap();
        let empty: [&str; 0] = [];
        assert!(pattern.match_path(&empty, "").is_ok());
    }

    #[test]
    fn test_pattern_round_trip() {
        for raw in [
            "/v1/{name=shelves/*}",
            "/v1/{name=shelves/*/books/*}:get",
            "/v1/users/{id=*}/posts/{post.id=*}",
            "/v1/*/{rest=**}",
        ] {
            let pattern = Template::parse(raw).unwrap().to_pattern().unwrap();
            assert_eq!(pattern.to_string(), raw);
        }
    }

    #[test]
    fn test_pattern_match() {
        let pattern = Template::parse("/v1/{name=shelves/*}/books/{book.id}")
            .unwrap()
            .to_pattern()
            .unwrap();
        let params = pattern
            .match_path(&["v1", "shelves", "s1", "books", "b2"], "")
            .unwrap();
        assert_eq!(params["name"], "shelves/s1");
        assert_eq!(params["book.id"], "b2");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Template::parse("v1/users"),
            Err(TemplateError::MissingLeadingSlash("v1/users".to_string()))
        );
        assert_eq!(
            Template::parse("/v1//users"),
            Err(TemplateError::EmptySegment(4))
        );
        assert_eq!(
            Template::parse("/v1/{name=a/{id}}"),
            Err(TemplateError::NestedVariable(12))
        );
        assert_eq!(
            Template::parse("/v1/{name"),
            Err(TemplateError::UnterminatedVariable(4))
        );
        assert_eq!(
            Template::parse("/v1/{na-me}"),
            Err(TemplateError::InvalidFieldPath("na-me".to_string()))
        );
        assert_eq!(
            Template::parse("/v1/**/tail"),
            Err(TemplateError::DeepWildcardNotLast)
        );
        assert_eq!(
            Template::parse("/v1/{id}/{id}"),
            Err(TemplateError::DuplicateVariable("id".to_string()))
        );
        assert_eq!(Template::parse("/v1/users:"), Err(TemplateError::EmptyVerb));
    }

    #[test]
    fn test_colon_inside_path_is_literal() {
        let template = Template::parse("/v1/a:b/c").unwrap();
        assert_eq!(template.verb(), "");
        assert_eq!(template.compile().pool, vec!["v1", "a:b", "c"]);
    }
}
