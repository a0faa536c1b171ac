//! Error taxonomy for the bridge
//!
//! Every failure that can reach a script is one of the five kinds below.
//! Lower layers return the specific type; the dispatcher folds them into a
//! [`ScriptError`] carrying the script traceback before handing them to the
//! engine.

use crate::encoding::TypeTag;
use std::fmt;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Malformed type-encoding input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed type encoding {encoding:?} at offset {offset}: {reason}")]
pub struct ParseError {
    /// The full encoding that failed
    pub encoding: String,

    /// Byte offset of the first malformed type
    pub offset: usize,

    /// What was wrong at that offset
    pub reason: String,
}

/// Script value incompatible with the requested native type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// Script value's runtime type does not fit the tag
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Requested native type
        expected: TypeTag,
        /// Type name of the script value
        got: &'static str,
    },

    /// The tag has no native storage the marshaller can fill
    #[error("Unsupported native type: {0}")]
    Unsupported(TypeTag),

    /// Wrong number of script arguments for the signature
    #[error("Argument count mismatch: expected {expected}, got {got}")]
    ArityMismatch {
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// A script string bound for a C string contains NUL
    #[error("String contains an interior NUL byte at {0}")]
    InteriorNul(usize),

    /// A native buffer is shorter than the tag's size
    #[error("Native buffer too short: need {need} bytes, have {have}")]
    BufferTooShort {
        /// Bytes required
        need: usize,
        /// Bytes available
        have: usize,
    },

    /// The tag's native size exceeds what the marshaller will allocate
    #[error("Native value of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge {
        /// Size the tag asks for
        size: usize,
        /// Largest supported size
        limit: usize,
    },

    /// The host runtime refused to create an object for a script primitive
    #[error("Host runtime cannot represent a {0} as an object")]
    Unboxable(&'static str),
}

/// Why a method lookup produced no usable selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No selector matches the base name
    Missing,
    /// Several selectors match and no type flag picks one
    Ambiguous,
    /// Type flags were given but no candidate matches them
    NoFlagMatch,
}

/// One selector considered during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Host selector name
    pub selector: String,

    /// Method type encoding
    pub encoding: String,

    /// Call name with type flags that would select this candidate
    pub call_name: String,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] (call as {})", self.selector, self.encoding, self.call_name)
    }
}

/// No selector, or more than one, matched a script call name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    /// Receiver description (class name)
    pub receiver: String,

    /// Script call name as written
    pub name: String,

    /// Failure kind
    pub kind: NotFoundKind,

    /// Every candidate that was considered and rejected
    pub candidates: Vec<Candidate>,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NotFoundKind::Missing => {
                write!(f, "No method named '{}' on {}", self.name, self.receiver)?
            }
            NotFoundKind::Ambiguous => write!(
                f,
                "Ambiguous call '{}' on {}; add a type flag",
                self.name, self.receiver
            )?,
            NotFoundKind::NoFlagMatch => write!(
                f,
                "No method named '{}' on {} matches the given type flags",
                self.name, self.receiver
            )?,
        }
        if !self.candidates.is_empty() {
            f.write_str("; candidates: ")?;
            for (i, c) in self.candidates.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for NotFoundError {}

/// Operation on a finalized or otherwise invalid proxy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid proxy for host object {address:#x}: {reason}")]
pub struct InvalidProxyError {
    /// Address of the host reference the proxy used to hold
    pub address: usize,

    /// Why the proxy is invalid
    pub reason: &'static str,
}

/// Kind of failure carried by a [`ScriptError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed type encoding
    Parse,
    /// Value conversion failed
    Conversion,
    /// Method resolution failed
    NotFound,
    /// Stale proxy
    InvalidProxy,
    /// The host runtime raised during the call
    Host,
    /// Error raised by script code
    Script,
}

/// Error surfaced to script code: message plus captured traceback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Failure kind
    pub kind: ErrorKind,

    /// Human-readable message
    pub message: String,

    /// Rejected candidates, for resolution failures
    pub candidates: Vec<Candidate>,

    /// Script call stack at the point of failure
    pub traceback: String,
}

impl ScriptError {
    /// Create an error with no traceback
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            candidates: Vec::new(),
            traceback: String::new(),
        }
    }

    /// Error raised by script code itself
    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Script, message)
    }

    /// Attach a traceback
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if !self.traceback.is_empty() {
            write!(f, "\n{}", self.traceback)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Any bridge failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Malformed type encoding
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Conversion failure
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Resolution failure
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Stale proxy
    #[error(transparent)]
    InvalidProxy(#[from] InvalidProxyError),

    /// Host failure or script-raised error
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl BridgeError {
    /// Kind of this error as seen by scripts
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Parse(_) => ErrorKind::Parse,
            BridgeError::Conversion(_) => ErrorKind::Conversion,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::InvalidProxy(_) => ErrorKind::InvalidProxy,
            BridgeError::Script(e) => e.kind,
        }
    }

    /// Fold into a script error, attaching `traceback` unless one is
    /// already present
    pub fn into_script_error(self, traceback: &str) -> ScriptError {
        let kind = self.kind();
        let mut err = match self {
            BridgeError::Script(e) => e,
            BridgeError::NotFound(e) => {
                let candidates = e.candidates.clone();
                let mut err = ScriptError::new(kind, e.to_string());
                err.candidates = candidates;
                err
            }
            other => ScriptError::new(kind, other.to_string()),
        };
        if err.traceback.is_empty() {
            err.traceback = traceback.to_string();
        }
        err
    }
}
