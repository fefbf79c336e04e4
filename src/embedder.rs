//! The writer-scoped resource embedder: deduplicates repeated embeddings
//! by content fingerprint and applies standard-font trimming.
//!
//! Auto-close bookkeeping lives on the writer itself
//! ([`crate::writer::Writer::auto_close`]); the embedder only decides
//! whether a value object needs to be written at all.

use crate::writer::{serialize_object, Writer};
use crate::{Object, ObjectId, Result};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::io::Write;

/// The 14 fonts every conforming consumer provides by itself.
pub const STANDARD_FONTS: [&[u8]; 14] = [
    b"Courier",
    b"Courier-Bold",
    b"Courier-Oblique",
    b"Courier-BoldOblique",
    b"Helvetica",
    b"Helvetica-Bold",
    b"Helvetica-Oblique",
    b"Helvetica-BoldOblique",
    b"Times-Roman",
    b"Times-Bold",
    b"Times-Italic",
    b"Times-BoldItalic",
    b"Symbol",
    b"ZapfDingbats",
];

/// Content-addressed embedding: the same value object is written once per
/// writer, no matter how many producers hand it in.
#[derive(Default)]
pub struct Embedder {
    seen: BTreeMap<[u8; 16], ObjectId>,
}

impl Embedder {
    pub fn new() -> Embedder {
        Embedder::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Commit `obj` unless an identical object was embedded before; either
    /// way the returned reference identifies it.
    pub fn embed<W: Write>(&mut self, writer: &mut Writer<W>, mut obj: Object) -> Result<ObjectId> {
        if writer.options().trim_standard_fonts {
            trim_standard_font(&mut obj);
        }
        let fingerprint = fingerprint(&obj);
        if let Some(existing) = self.seen.get(&fingerprint) {
            return Ok(*existing);
        }
        let id = writer.add(obj)?;
        self.seen.insert(fingerprint, id);
        Ok(id)
    }

    /// Look up a previously embedded object without writing anything.
    pub fn find(&self, obj: &Object) -> Option<ObjectId> {
        self.seen.get(&fingerprint(obj)).copied()
    }
}

fn fingerprint(obj: &Object) -> [u8; 16] {
    Md5::digest(serialize_object(obj)).into()
}

/// Drop the width and descriptor entries from a simple font dictionary
/// naming one of the standard 14.
fn trim_standard_font(obj: &mut Object) {
    let Object::Dictionary(dict) = obj else { return };
    if !dict.has_type(b"Font") {
        return;
    }
    let is_standard = dict
        .get(b"BaseFont")
        .and_then(Object::as_name)
        .map(|name| STANDARD_FONTS.contains(&name))
        .unwrap_or(false);
    if !is_standard {
        return;
    }
    for key in [b"FirstChar".as_slice(), b"LastChar", b"Widths", b"FontDescriptor"] {
        dict.remove(key);
    }
}
