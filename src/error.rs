use std::collections::BTreeMap;
use thiserror::Error;

use crate::encryption::CryptError;
use crate::ObjectId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing or damaged PDF header")]
    Header,
    #[error("missing or damaged trailer dictionary")]
    Trailer,
    #[error("cross-reference error: {0}")]
    Xref(#[from] XrefError),
    #[error("could not parse an object at byte offset {offset}")]
    Parse { offset: usize },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("offset {0} is outside the file")]
    Offset(usize),

    #[error("expected a {expected}, found a {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("dictionary has no /{0} entry")]
    DictKey(String),
    #[error("object {0:?} is not present")]
    ObjectNotFound(ObjectId),
    #[error("object {0:?} does not match the indirect header at its offset")]
    ObjectIdMismatch(ObjectId),
    #[error("reference chain exceeds the resolution limit")]
    ReferenceLimit,

    #[error("stream filter /{0} is not supported")]
    UnsupportedFilter(String),
    #[error("stream decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("encryption error: {0}")]
    Encryption(#[from] CryptError),

    #[error("{feature} requires PDF {required} but the document declares {declared}")]
    VersionTooLow {
        feature: &'static str,
        required: &'static str,
        declared: String,
    },
    #[error("placeholder value needs {needed} bytes but only {capacity} were reserved")]
    PlaceholderCapacity { capacity: usize, needed: usize },
    #[error("placeholder was never filled before close")]
    PlaceholderUnfilled,
    #[error("writer is already closed")]
    WriterClosed,
    #[error("object number space is exhausted")]
    AllocatorExhausted,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("page index {0} is out of range")]
    PageNotFound(u32),
    #[error("could not decode content stream")]
    ContentDecode,
    #[error("could not decode text string")]
    TextStringDecode,
}

#[derive(Error, Debug)]
pub enum XrefError {
    #[error("could not parse the cross-reference section")]
    Parse,
    #[error("startxref was not found or is damaged")]
    Start,
    #[error("a /Prev offset points outside the file")]
    PrevStart,
    #[error("an /XRefStm offset points outside the file")]
    StreamStart,
    #[error("entry for object {0} disagrees with its generation")]
    Generation(u32),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("zlib stream is damaged")]
    Flate,
    #[error("LZW stream is damaged")]
    Lzw,
    #[error("ASCII85: {0}")]
    Ascii85(&'static str),
    #[error("ASCIIHex: {0}")]
    AsciiHex(&'static str),
    #[error("run-length data ends inside a run")]
    RunLength,
    #[error("CCITT fax data is damaged")]
    Ccitt,
    #[error("predictor: {0}")]
    Predictor(&'static str),
    #[error("filter chain exceeds the nesting limit")]
    TooDeep,
}

/// Coarse classification used by the reader's error-handling policy.
///
/// Every [`Error`] maps onto exactly one kind; the policy maps kinds onto
/// [`ErrorAction`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    MalformedSyntax,
    MalformedXref,
    MalformedObject,
    WrongType,
    InvalidReference,
    UnsupportedFilter,
    VersionTooLow,
    Encryption,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Header | Error::Trailer | Error::Parse { .. } | Error::Syntax(_) | Error::Offset(_) => {
                ErrorKind::MalformedSyntax
            }
            Error::Xref(_) => ErrorKind::MalformedXref,
            Error::ObjectType { .. } | Error::DictKey(_) => ErrorKind::WrongType,
            Error::ObjectNotFound(_) | Error::ObjectIdMismatch(_) | Error::ReferenceLimit => {
                ErrorKind::InvalidReference
            }
            Error::UnsupportedFilter(_) => ErrorKind::UnsupportedFilter,
            Error::Decode(_) | Error::ContentDecode | Error::TextStringDecode => ErrorKind::MalformedObject,
            Error::Encryption(_) => ErrorKind::Encryption,
            Error::VersionTooLow { .. } => ErrorKind::VersionTooLow,
            Error::PlaceholderCapacity { .. }
            | Error::PlaceholderUnfilled
            | Error::WriterClosed
            | Error::AllocatorExhausted
            | Error::InvalidInput(_)
            | Error::PageNotFound(_) => ErrorKind::MalformedObject,
        }
    }
}

/// What the reader does when it meets an error of a given kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorAction {
    /// Collect a warning record and continue with a best-effort value.
    Report,
    /// Log through the `log` crate and continue.
    Warn,
    /// Propagate the error to the caller.
    #[default]
    Fatal,
}

/// Per-kind error policy consulted by the reader.
#[derive(Debug, Clone, Default)]
pub struct ErrorPolicy {
    actions: BTreeMap<ErrorKind, ErrorAction>,
}

impl ErrorPolicy {
    /// Everything is fatal. This is the default.
    pub fn strict() -> Self {
        ErrorPolicy::default()
    }

    /// Malformed-file conditions are reported and repaired where possible;
    /// IO and encryption errors stay fatal.
    pub fn lenient() -> Self {
        let mut policy = ErrorPolicy::default();
        for kind in [
            ErrorKind::MalformedSyntax,
            ErrorKind::MalformedXref,
            ErrorKind::MalformedObject,
            ErrorKind::WrongType,
            ErrorKind::InvalidReference,
            ErrorKind::UnsupportedFilter,
        ] {
            policy.actions.insert(kind, ErrorAction::Report);
        }
        policy
    }

    pub fn set(mut self, kind: ErrorKind, action: ErrorAction) -> Self {
        self.actions.insert(kind, action);
        self
    }

    pub fn action(&self, kind: ErrorKind) -> ErrorAction {
        self.actions.get(&kind).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_policy_classes() {
        assert_eq!(Error::Header.kind(), ErrorKind::MalformedSyntax);
        assert_eq!(Error::Xref(XrefError::Start).kind(), ErrorKind::MalformedXref);
        assert_eq!(
            Error::ObjectType {
                expected: "Integer",
                found: "Name"
            }
            .kind(),
            ErrorKind::WrongType
        );
        assert_eq!(Error::ObjectNotFound((7, 0)).kind(), ErrorKind::InvalidReference);
    }

    #[test]
    fn policy_defaults_to_fatal() {
        let policy = ErrorPolicy::strict();
        assert_eq!(policy.action(ErrorKind::MalformedXref), ErrorAction::Fatal);

        let policy = ErrorPolicy::lenient().set(ErrorKind::MalformedXref, ErrorAction::Fatal);
        assert_eq!(policy.action(ErrorKind::MalformedXref), ErrorAction::Fatal);
        assert_eq!(policy.action(ErrorKind::WrongType), ErrorAction::Report);
        assert_eq!(policy.action(ErrorKind::Io), ErrorAction::Fatal);
    }
}
