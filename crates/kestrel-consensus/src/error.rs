use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed wire bytes.
    Parse,
    /// A declared count or length exceeds what the bytes can hold.
    Oversize,
    /// An output value or value sum is outside the money range.
    Value,
    /// A previous-output reference is null or duplicated within one tx.
    PrevOut,
    /// Coinbase structure violation.
    Coinbase,
    /// Compact target outside the allowed range.
    Target,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Parse => "parse",
            ErrorCode::Oversize => "oversize",
            ErrorCode::Value => "value",
            ErrorCode::PrevOut => "prev-out",
            ErrorCode::Coinbase => "coinbase",
            ErrorCode::Target => "target",
        }
    }
}

/// A consensus-level rejection. Every value of this type is a peer fault:
/// I/O and environment failures never take this form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusError {
    pub code: ErrorCode,
    pub msg: &'static str,
}

impl ConsensusError {
    pub fn new(code: ErrorCode, msg: &'static str) -> Self {
        Self { code, msg }
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{}", self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code.as_str(), self.msg)
        }
    }
}

impl std::error::Error for ConsensusError {}
