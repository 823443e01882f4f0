//! RPC status codes

use std::fmt;

/// Canonical RPC status code.
///
/// The raw wire value is kept so that codes outside the canonical set can
/// travel through the gateway and still be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(i32);

impl Code {
    pub const OK: Code = Code(0);
    pub const CANCELLED: Code = Code(1);
    pub const UNKNOWN: Code = Code(2);
    pub const INVALID_ARGUMENT: Code = Code(3);
    pub const DEADLINE_EXCEEDED: Code = Code(4);
    pub const NOT_FOUND: Code = Code(5);
    pub const ALREADY_EXISTS: Code = Code(6);
    pub const PERMISSION_DENIED: Code = Code(7);
    pub const RESOURCE_EXHAUSTED: Code = Code(8);
    pub const FAILED_PRECONDITION: Code = Code(9);
    pub const ABORTED: Code = Code(10);
    pub const OUT_OF_RANGE: Code = Code(11);
    pub const UNIMPLEMENTED: Code = Code(12);
    pub const INTERNAL: Code = Code(13);
    pub const UNAVAILABLE: Code = Code(14);
    pub const DATA_LOSS: Code = Code(15);
    pub const UNAUTHENTICATED: Code = Code(16);

    /// Wrap a raw wire value
    pub const fn from_i32(value: i32) -> Self {
        Code(value)
    }

    /// Raw wire value
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Canonical name, or `None` for codes outside the canonical set
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "OK",
            1 => "Canceled",
            2 => "Unknown",
            3 => "InvalidArgument",
            4 => "DeadlineExceeded",
            5 => "NotFound",
            6 => "AlreadyExists",
            7 => "PermissionDenied",
            8 => "ResourceExhausted",
            9 => "FailedPrecondition",
            10 => "Aborted",
            11 => "OutOfRange",
            12 => "Unimplemented",
            13 => "Internal",
            14 => "Unavailable",
            15 => "DataLoss",
            16 => "Unauthenticated",
            _ => return None,
        };
        Some(name)
    }

    /// Whether this is one of the canonical codes
    pub fn is_known(self) -> bool {
        self.name().is_some()
    }
}

impl From<i32> for Code {
    fn from(value: i32) -> Self {
        Code(value)
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Code({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(Code::NOT_FOUND.as_i32(), 5);
        assert_eq!(Code::from(16), Code::UNAUTHENTICATED);
        assert!(Code::DATA_LOSS.is_known());
        assert_eq!(Code::INVALID_ARGUMENT.to_string(), "InvalidArgument");
    }

    #[test]
    fn test_unknown_code_display() {
        let code = Code::from_i32(42);
        assert!(!code.is_known());
        assert_eq!(code.to_string(), "Code(42)");
    }
}
