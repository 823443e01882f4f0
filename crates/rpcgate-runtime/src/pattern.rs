//! Compiled path patterns.
//!
//! A [`Pattern`] is a small stack program: every opcode consumes path
//! segments or rearranges the evaluation stack, and `CAPTURE` binds the top
//! of the stack to a variable. Programs are validated once when compiled and
//! matched many times, concurrently, without further checks.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The only supported opcode encoding version
pub const PATTERN_VERSION: i32 = 1;

/// Variable bindings produced by a successful match
pub type PathParams = HashMap<String, String>;

/// Pattern opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Does nothing
    Nop,
    /// Push the next segment
    Push,
    /// Push the next segment, which must equal `pool[operand]`
    LitPush,
    /// Push all remaining segments joined with `/`
    PushM,
    /// Pop `operand` items, join them with `/` and push the result
    ConcatN,
    /// Pop one item and bind it to the variable named `pool[operand]`
    Capture,
}

impl OpCode {
    /// Decode a raw opcode
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(OpCode::Nop),
            1 => Some(OpCode::Push),
            2 => Some(OpCode::LitPush),
            3 => Some(OpCode::PushM),
            4 => Some(OpCode::ConcatN),
            5 => Some(OpCode::Capture),
            _ => None,
        }
    }

    /// Raw opcode value
    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Nop => 0,
            OpCode::Push => 1,
            OpCode::LitPush => 2,
            OpCode::PushM => 3,
            OpCode::ConcatN => 4,
            OpCode::Capture => 5,
        }
    }
}

/// Reasons a pattern program is rejected at compile time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPattern {
    #[error("unsupported pattern version {0}")]
    UnsupportedVersion(i32),

    #[error("odd number of opcode words: {0}")]
    OddLength(usize),

    #[error("unknown opcode {code} at op {index}")]
    UnknownOpCode { index: usize, code: i32 },

    #[error("operand {operand} of op {index} is outside the pool of {pool_len} entries")]
    OperandOutOfBounds {
        index: usize,
        operand: i32,
        pool_len: usize,
    },

    #[error("concat size {operand} of op {index} must be positive")]
    NonPositiveConcat { index: usize, operand: i32 },

    #[error("stack underflow at op {index}")]
    StackUnderflow { index: usize },
}

/// The request path does not match a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("path does not match the pattern")]
pub struct NotMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Op {
    code: OpCode,
    operand: usize,
}

/// A compiled URL template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    ops: Vec<Op>,
    pool: Vec<String>,
    vars: Vec<String>,
    stack_size: usize,
    verb: String,
}

impl Pattern {
    /// Compile an opcode program.
    ///
    /// `ops` is a flat list of `(opcode, operand)` pairs. Operands of
    /// `LIT_PUSH` and `CAPTURE` index into `pool`. The program is executed
    /// symbolically to reject bad operands and stack underflows, and to size
    /// the evaluation stack.
    pub fn new(
        version: i32,
        ops: &[i32],
        pool: Vec<String>,
        verb: impl Into<String>,
    ) -> Result<Self, InvalidPattern> {
        if version != PATTERN_VERSION {
            return Err(InvalidPattern::UnsupportedVersion(version));
        }
        if ops.len() % 2 != 0 {
            return Err(InvalidPattern::OddLength(ops.len()));
        }

        let mut typed_ops = Vec::with_capacity(ops.len() / 2);
        let mut vars = Vec::new();
        let mut depth: usize = 0;
        let mut max_depth: usize = 0;

        for (index, pair) in ops.chunks_exact(2).enumerate() {
            let (raw_code, operand) = (pair[0], pair[1]);
            let code = OpCode::from_i32(raw_code).ok_or(InvalidPattern::UnknownOpCode {
                index,
                code: raw_code,
            })?;

            let pool_index = || -> Result<usize, InvalidPattern> {
                usize::try_from(operand)
                    .ok()
                    .filter(|i| *i < pool.len())
                    .ok_or(InvalidPattern::OperandOutOfBounds {
                        index,
                        operand,
                        pool_len: pool.len(),
                    })
            };

            let op = match code {
                OpCode::Nop => continue,
                OpCode::Push | OpCode::PushM => {
                    depth += 1;
                    Op { code, operand: 0 }
                }
                OpCode::LitPush => {
                    let literal = pool_index()?;
                    depth += 1;
                    Op {
                        code,
                        operand: literal,
                    }
                }
                OpCode::ConcatN => {
                    let n = usize::try_from(operand)
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(InvalidPattern::NonPositiveConcat { index, operand })?;
                    depth = depth
                        .checked_sub(n)
                        .ok_or(InvalidPattern::StackUnderflow { index })?;
                    depth += 1;
                    Op { code, operand: n }
                }
                OpCode::Capture => {
                    let name = pool_index()?;
                    depth = depth
                        .checked_sub(1)
                        .ok_or(InvalidPattern::StackUnderflow { index })?;
                    vars.push(pool[name].clone());
                    // Rewritten to index the capture slots, not the pool
                    Op {
                        code,
                        operand: vars.len() - 1,
                    }
                }
            };

            max_depth = max_depth.max(depth);
            typed_ops.push(op);
        }

        Ok(Self {
            ops: typed_ops,
            pool,
            vars,
            stack_size: max_depth,
            verb: verb.into(),
        })
    }

    /// Match path segments and a verb against this pattern
    pub fn match_path<S: AsRef<str>>(
        &self,
        components: &[S],
        verb: &str,
    ) -> Result<PathParams, NotMatch> {
        if self.verb != verb {
            return Err(NotMatch);
        }

        let mut pos = 0;
        let mut stack: Vec<Cow<'_, str>> = Vec::with_capacity(self.stack_size);
        let mut captured: Vec<Option<Cow<'_, str>>> = vec![None; self.vars.len()];

        for op in &self.ops {
            match op.code {
                OpCode::Nop => {}
                OpCode::Push | OpCode::LitPush => {
                    let component = components.get(pos).ok_or(NotMatch)?.as_ref();
                    if op.code == OpCode::LitPush && self.pool[op.operand] != component {
                        return Err(NotMatch);
                    }
                    stack.push(Cow::Borrowed(component));
                    pos += 1;
                }
                OpCode::PushM => {
                    let rest = components.get(pos..).unwrap_or_default();
                    stack.push(Cow::Owned(join(rest)));
                    pos = components.len();
                }
                OpCode::ConcatN => {
                    let start = stack.len() - op.operand;
                    let joined = join(stack.drain(start..));
                    stack.push(Cow::Owned(joined));
                }
                OpCode::Capture => {
                    captured[op.operand] = stack.pop();
                }
            }
        }

        if pos < components.len() {
            return Err(NotMatch);
        }

        Ok(self
            .vars
            .iter()
            .zip(captured)
            .filter_map(|(name, value)| Some((name.clone(), value?.into_owned())))
            .collect())
    }

    /// Trailing verb, empty if the pattern has none
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Captured variable names, in capture order
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Maximum evaluation stack depth
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

fn join<I, T>(parts: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut out = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(part.as_ref());
    }
    out
}

impl fmt::Display for Pattern {
    /// Renders the template this pattern was compiled from
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack: Vec<String> = Vec::with_capacity(self.stack_size);
        for op in &self.ops {
            match op.code {
                OpCode::Nop => {}
                OpCode::Push => stack.push("*".to_string()),
                OpCode::LitPush => stack.push(self.pool[op.operand].clone()),
                OpCode::PushM => stack.push("**".to_string()),
                OpCode::ConcatN => {
                    let start = stack.len() - op.operand;
                    let joined = join(stack.drain(start..));
                    stack.push(joined);
                }
                OpCode::Capture => {
                    if let Some(top) = stack.last_mut() {
                        *top = format!("{{{}={}}}", self.vars[op.operand], top);
                    }
                }
            }
        }

        write!(f, "/{}", join(&stack))?;
        if !self.verb.is_empty() {
            write!(f, ":{}", self.verb)?;
        }
        Ok(())
    }
}
