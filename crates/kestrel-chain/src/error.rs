use core::fmt;

/// Diagnostic classes reported through the error sink. `BadBlock` is always
/// a peer fault; `IoError` and `CorruptStore` are always ours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagKind {
    Duplicate,
    BadBlock,
    CacheFull,
    IoError,
    CorruptStore,
}

impl DiagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagKind::Duplicate => "duplicate",
            DiagKind::BadBlock => "bad-block",
            DiagKind::CacheFull => "cache-full",
            DiagKind::IoError => "io-error",
            DiagKind::CorruptStore => "corrupt-store",
        }
    }
}

/// Injected diagnostic callback. Informational only: implementations must
/// not reach back into the validator.
pub type DiagSink = Box<dyn Fn(DiagKind, &str)>;

/// Default sink forwarding to the `log` facade.
pub fn log_sink() -> DiagSink {
    Box::new(|kind, msg| match kind {
        DiagKind::IoError | DiagKind::CorruptStore => log::error!("{}: {}", kind.as_str(), msg),
        DiagKind::BadBlock | DiagKind::CacheFull => log::warn!("{}: {}", kind.as_str(), msg),
        DiagKind::Duplicate => log::debug!("{}: {}", kind.as_str(), msg),
    })
}

/// Environment failures. Consensus rejections never take this form; they are
/// statuses, not errors.
#[derive(Debug)]
pub enum ChainError {
    /// A read, write or sync against the data directory failed.
    Io(std::io::Error),
    /// Stored bytes did not decode: short record, bad length, bad layout.
    Corrupt(String),
    /// The signature-verification backend failed.
    Verifier(String),
}

impl ChainError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        ChainError::Corrupt(msg.into())
    }

    pub fn kind(&self) -> DiagKind {
        match self {
            ChainError::Io(_) | ChainError::Verifier(_) => DiagKind::IoError,
            ChainError::Corrupt(_) => DiagKind::CorruptStore,
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Io(e) => write!(f, "io: {e}"),
            ChainError::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
            ChainError::Verifier(msg) => write!(f, "verifier: {msg}"),
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        ChainError::Io(e)
    }
}

impl std::error::Error for ChainError {}
