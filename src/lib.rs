#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(clippy::all)]

#[macro_use]
mod object;
pub use crate::object::{
    decode_text_string, text_string, Dictionary, Object, ObjectId, Stream, StringFormat, ABSENT_REF,
};

mod error;
pub use crate::error::{DecodeError, Error, ErrorAction, ErrorKind, ErrorPolicy, Result, XrefError};

mod content;
pub use crate::content::{Content, ContentScanner, Operation};

mod embedder;
pub use crate::embedder::{Embedder, STANDARD_FONTS};

pub mod encryption;
pub use crate::encryption::{CryptError, EncryptionConfig, Permissions, SecurityHandler};

pub mod filters;

mod numtree;
pub use crate::numtree::{NumberTreeBuilder, NumberTreeReader, NumberTreeWriter};

mod objstream;
pub use crate::objstream::{ObjectStream, ObjectStreamBuilder};

pub mod optional_content;
pub use crate::optional_content::{Membership, OptionalContentGroup, VisibilityExpression, VisibilityPolicy};

mod pagetree;
pub use crate::pagetree::{PageTreeReader, PageTreeWriter, INHERITED_ATTRIBUTES};

pub mod parser;

mod reader;
pub use crate::reader::{Reader, Warning};

pub mod widths;
pub use crate::widths::SimpleWidths;

mod writer;
pub use crate::writer::{serialize_object, Placeholder, StreamSink, Writer, WriterOptions};

pub mod xref;
