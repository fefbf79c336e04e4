//! The document reader: a random-access getter over immutable bytes.
//!
//! Objects are parsed on demand and cached by reference. Malformed-file
//! conditions run through the per-kind error policy, which decides between
//! collecting a warning, logging, or failing the call.

use crate::encryption::SecurityHandler;
use crate::error::{ErrorAction, ErrorKind, ErrorPolicy, XrefError};
use crate::objstream::ObjectStream;
use crate::parser;
use crate::xref::{decode_xref_stream, Xref, XrefEntry, XrefType};
use crate::{Dictionary, Error, Object, ObjectId, Result, Stream};
use log::warn;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How far a reference chain may run before we call it a cycle.
const MAX_RESOLVE_DEPTH: usize = 32;

/// A collected report-class error.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug)]
pub struct Reader {
    buf: Vec<u8>,
    version: String,
    xref: Xref,
    trailer: Dictionary,
    startxref: usize,
    policy: ErrorPolicy,
    encryption: Option<SecurityHandler>,
    encrypt_ref: Option<ObjectId>,
    cache: RefCell<BTreeMap<ObjectId, Object>>,
    containers: RefCell<BTreeMap<u32, Arc<ObjectStream>>>,
    warnings: RefCell<Vec<Warning>>,
}

impl Reader {
    /// Load a document with the default (strict) policy.
    pub fn open(bytes: Vec<u8>) -> Result<Reader> {
        Reader::open_with_policy(bytes, ErrorPolicy::strict())
    }

    pub fn open_with_policy(bytes: Vec<u8>, policy: ErrorPolicy) -> Result<Reader> {
        let mut reader = Reader {
            buf: bytes,
            version: String::new(),
            xref: Xref::new(0, XrefType::Table),
            trailer: Dictionary::new(),
            startxref: 0,
            policy,
            encryption: None,
            encrypt_ref: None,
            cache: RefCell::new(BTreeMap::new()),
            containers: RefCell::new(BTreeMap::new()),
            warnings: RefCell::new(Vec::new()),
        };
        reader.load()?;
        if reader.is_encrypted() && reader.encryption.is_none() {
            // The empty user password opens a surprising share of encrypted
            // files; callers retry with `authenticate` otherwise.
            let _ = reader.authenticate("");
        }
        Ok(reader)
    }

    /// Open and authenticate in one step.
    pub fn open_encrypted(bytes: Vec<u8>, policy: ErrorPolicy, password: &str) -> Result<Reader> {
        let mut reader = Reader::open_with_policy(bytes, policy)?;
        if reader.encryption.is_none() {
            reader.authenticate(password)?;
        }
        Ok(reader)
    }

    fn load(&mut self) -> Result<()> {
        match parser::header(&self.buf) {
            Some(version) => self.version = version,
            None => {
                self.note(ErrorKind::MalformedSyntax, "missing %PDF header", Error::Header)?;
                self.version = "1.4".to_string();
            }
        }

        if let Err(err) = self.load_xref_chain() {
            self.note(ErrorKind::MalformedXref, "cross-reference chain is unreadable", err)?;
            self.rebuild_from_markers()?;
        }

        let have = self.xref.max_id() + 1;
        if self.xref.size != have {
            warn!("trailer Size is {}, correcting to {}", self.xref.size, have);
            self.xref.size = have;
        }
        Ok(())
    }

    fn load_xref_chain(&mut self) -> Result<()> {
        let startxref = self.find_startxref()?;
        self.startxref = startxref;

        let mut queue = vec![startxref];
        let mut seen = BTreeSet::new();
        let mut latest = true;
        while let Some(offset) = queue.pop() {
            if !seen.insert(offset) {
                // A Prev loop; everything reachable is already loaded.
                break;
            }
            if offset >= self.buf.len() {
                return Err(Error::Xref(XrefError::PrevStart));
            }

            let (section, mut trailer) = self.read_xref_section(offset)?;
            if latest {
                self.xref = section;
                self.trailer = trailer.clone();
                latest = false;
            } else {
                self.xref.merge_older(section);
            }

            // LIFO queue: push Prev first so a hybrid file's XRefStm merges
            // ahead of the older revisions it supplements.
            if let Some(prev) = trailer.remove(b"Prev").and_then(|v| v.as_i64().ok()) {
                queue.push(usize::try_from(prev).map_err(|_| Error::Xref(XrefError::PrevStart))?);
            }
            if let Some(stm) = trailer.remove(b"XRefStm").and_then(|v| v.as_i64().ok()) {
                queue.push(usize::try_from(stm).map_err(|_| Error::Xref(XrefError::StreamStart))?);
            }
        }
        Ok(())
    }

    fn read_xref_section(&self, offset: usize) -> Result<(Xref, Dictionary)> {
        let input = &self.buf[offset..];
        if input.trim_ascii_start().starts_with(b"xref") {
            return parser::xref_and_trailer(input.trim_ascii_start());
        }
        // The stream form: an ordinary indirect object carrying Type /XRef.
        let (_, object) = parser::indirect_object(&self.buf, offset, None, &|_| None)?;
        match object {
            Object::Stream(stream) => decode_xref_stream(stream),
            _ => Err(Error::Xref(XrefError::Parse)),
        }
    }

    fn find_startxref(&self) -> Result<usize> {
        let window = 2048.min(self.buf.len());
        let tail = &self.buf[self.buf.len() - window..];
        let at = parser::find_subslice(tail, b"startxref").ok_or(Error::Xref(XrefError::Start))?;
        // Take the last occurrence inside the window.
        let mut last = at;
        while let Some(next) = parser::find_subslice(&tail[last + 1..], b"startxref") {
            last += 1 + next;
        }
        let value = parser::xref_start(&tail[last..]).ok_or(Error::Xref(XrefError::Start))?;
        let offset = usize::try_from(value).map_err(|_| Error::Xref(XrefError::Start))?;
        if offset >= self.buf.len() {
            return Err(Error::Xref(XrefError::Start));
        }
        Ok(offset)
    }

    /// Rebuild the table by scanning for `N G obj` markers. Later
    /// definitions win, matching incremental-update semantics.
    fn rebuild_from_markers(&mut self) -> Result<()> {
        let markers = parser::scan_object_markers(&self.buf);
        if markers.is_empty() {
            return Err(Error::Xref(XrefError::Parse));
        }
        self.xref = Xref::new(0, XrefType::Table);
        for ((number, generation), offset) in markers {
            self.xref.insert(
                number,
                XrefEntry::InUse {
                    offset: offset as u32,
                    generation,
                },
            );
        }
        self.xref.size = self.xref.max_id() + 1;

        // Recover trailer pointers: prefer a parseable trailer dictionary,
        // fall back to hunting for the catalog.
        if let Some(at) = rfind_subslice(&self.buf, b"trailer") {
            if let Ok((_, dict)) = parser::trailer(&self.buf[at..]) {
                self.trailer = dict;
            }
        }
        if !self.trailer.has(b"Root") {
            let ids: Vec<ObjectId> = self
                .xref
                .entries
                .iter()
                .filter_map(|(&id, entry)| match entry {
                    XrefEntry::InUse { generation, .. } => Some((id, *generation)),
                    _ => None,
                })
                .collect();
            for id in ids {
                if let Ok(object) = self.parse_at(id) {
                    if object.as_dict().map(|d| d.has_type(b"Catalog")).unwrap_or(false) {
                        self.trailer.set("Root", id);
                        break;
                    }
                }
            }
        }
        if !self.trailer.has(b"Root") {
            return Err(Error::Trailer);
        }
        Ok(())
    }

    // ----- the getter surface -----------------------------------------

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn startxref(&self) -> usize {
        self.startxref
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Highest object number plus one.
    pub fn size(&self) -> u32 {
        self.xref.size
    }

    pub fn file_id(&self) -> Option<(&[u8], &[u8])> {
        let array = self.trailer.get_opt(b"ID")?.as_array().ok()?;
        match array.as_slice() {
            [first, second] => Some((first.as_string().ok()?, second.as_string().ok()?)),
            _ => None,
        }
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.borrow().clone()
    }

    pub fn is_encrypted(&self) -> bool {
        self.trailer.has(b"Encrypt")
    }

    pub(crate) fn security_handler(&self) -> Option<&SecurityHandler> {
        self.encryption.as_ref()
    }

    /// Validate a password and enable transparent decryption.
    ///
    /// A wrong password is recoverable; call again with another one.
    pub fn authenticate(&mut self, password: &str) -> Result<()> {
        let encrypt_ref = self.trailer.get_opt(b"Encrypt").and_then(|o| o.as_reference().ok());
        let dict = match encrypt_ref {
            Some(id) => {
                let object = self.parse_at(id)?;
                object.as_dict()?.clone()
            }
            None => self.trailer.get(b"Encrypt")?.as_dict()?.clone(),
        };
        let file_id = self.file_id().map(|(first, _)| first.to_vec()).unwrap_or_default();
        let handler = SecurityHandler::from_dict(&dict, &file_id, password)?;
        self.encryption = Some(handler);
        self.encrypt_ref = encrypt_ref;
        self.cache.borrow_mut().clear();
        self.containers.borrow_mut().clear();
        Ok(())
    }

    /// Fetch the current definition of an indirect object.
    pub fn get_object(&self, id: ObjectId) -> Result<Object> {
        if let Some(hit) = self.cache.borrow().get(&id) {
            return Ok(hit.clone());
        }
        let object = match self.xref.get(id.0) {
            Some(XrefEntry::InUse { .. }) => {
                let mut object = self.parse_at(id)?;
                if let Some(handler) = &self.encryption {
                    if Some(id) != self.encrypt_ref {
                        handler.decrypt_object(id, &mut object)?;
                    }
                }
                object
            }
            Some(XrefEntry::Compressed { container, index }) => {
                let (member_id, object) = self.compressed_member(*container, *index)?;
                if member_id != id {
                    return Err(Error::ObjectNotFound(id));
                }
                object
            }
            Some(XrefEntry::Free { .. }) | None => return Err(Error::ObjectNotFound(id)),
        };
        self.cache.borrow_mut().insert(id, object.clone());
        Ok(object)
    }

    fn parse_at(&self, id: ObjectId) -> Result<Object> {
        let offset = match self.xref.get(id.0) {
            Some(XrefEntry::InUse { offset, generation }) if *generation == id.1 => *offset as usize,
            Some(XrefEntry::InUse { .. }) => return Err(Error::Xref(XrefError::Generation(id.0))),
            _ => return Err(Error::ObjectNotFound(id)),
        };
        let resolve_length = |length_ref: ObjectId| -> Option<i64> {
            let entry = self.xref.get(length_ref.0)?;
            let XrefEntry::InUse { offset, .. } = entry else {
                return None;
            };
            let (_, object) = parser::indirect_object(&self.buf, *offset as usize, Some(length_ref), &|_| None).ok()?;
            object.as_i64().ok()
        };
        let (_, object) = parser::indirect_object(&self.buf, offset, Some(id), &resolve_length)?;
        Ok(object)
    }

    fn compressed_member(&self, container: u32, index: u16) -> Result<(ObjectId, Object)> {
        let stream = self.container_stream(container)?;
        let (member_id, object) = stream
            .by_index(index)
            .ok_or(Error::ObjectNotFound((container, 0)))?;
        Ok((member_id, object.clone()))
    }

    fn container_stream(&self, container: u32) -> Result<Arc<ObjectStream>> {
        if let Some(hit) = self.containers.borrow().get(&container) {
            return Ok(hit.clone());
        }
        // The container is itself an uncompressed object; decryption
        // happens at this level, so members stay untouched.
        let object = self.get_object((container, 0))?;
        let stream = object.as_stream()?;
        if !stream.dict.has_type(b"ObjStm") {
            return Err(Error::ObjectType {
                expected: "ObjStm stream",
                found: "Stream",
            });
        }
        let parsed = Arc::new(ObjectStream::parse(stream)?);
        self.containers.borrow_mut().insert(container, parsed.clone());
        Ok(parsed)
    }

    /// Drop one object from the cache.
    pub fn forget(&self, id: ObjectId) {
        self.cache.borrow_mut().remove(&id);
    }

    /// Follow references until the value is not a reference.
    ///
    /// A dangling reference downgrades to `Null` when the policy allows.
    pub fn resolve(&self, object: &Object) -> Result<Object> {
        let mut current = object.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(id) => match self.get_object(id) {
                    Ok(next) => current = next,
                    Err(err @ Error::ObjectNotFound(_)) => {
                        self.note(ErrorKind::InvalidReference, &format!("{} {} R is dangling", id.0, id.1), err)?;
                        return Ok(Object::Null);
                    }
                    Err(err) => return Err(err),
                },
                other => return Ok(other),
            }
        }
        Err(Error::ReferenceLimit)
    }

    pub fn get_dict(&self, object: &Object) -> Result<Dictionary> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_dict().map(Clone::clone), Dictionary::new)
    }

    pub fn get_array(&self, object: &Object) -> Result<Vec<Object>> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_array().map(Clone::clone), Vec::new)
    }

    pub fn get_stream(&self, object: &Object) -> Result<Stream> {
        let resolved = self.resolve(object)?;
        // There is no usable zero value for a stream; policy does not
        // apply here.
        resolved.as_stream().map(Clone::clone)
    }

    pub fn get_integer(&self, object: &Object) -> Result<i64> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_i64(), || 0)
    }

    pub fn get_number(&self, object: &Object) -> Result<f64> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_number(), || 0.0)
    }

    pub fn get_name(&self, object: &Object) -> Result<Vec<u8>> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_name().map(<[u8]>::to_vec), Vec::new)
    }

    pub fn get_string(&self, object: &Object) -> Result<Vec<u8>> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_string().map(<[u8]>::to_vec), Vec::new)
    }

    pub fn get_boolean(&self, object: &Object) -> Result<bool> {
        let resolved = self.resolve(object)?;
        self.typed(resolved.as_bool(), || false)
    }

    fn typed<T>(&self, result: Result<T>, zero: impl FnOnce() -> T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.note(ErrorKind::WrongType, &err.to_string(), err)?;
                Ok(zero())
            }
        }
    }

    /// The declared filter chain applied to a stream body.
    pub fn decode_stream(&self, stream: &Stream, max_depth: usize) -> Result<Vec<u8>> {
        crate::filters::decode_stream(stream, max_depth)
    }

    /// The catalog dictionary (trailer `Root`).
    pub fn catalog(&self) -> Result<Dictionary> {
        self.get_dict(self.trailer.get(b"Root")?)
    }

    /// The info dictionary, when the trailer declares one.
    pub fn info(&self) -> Result<Option<Dictionary>> {
        match self.trailer.get_opt(b"Info") {
            Some(value) => Ok(Some(self.get_dict(value)?)),
            None => Ok(None),
        }
    }

    /// Run the per-kind policy for a recoverable condition: `Report`
    /// collects, `Warn` logs, `Fatal` returns `err`.
    fn note(&self, kind: ErrorKind, message: &str, err: Error) -> Result<()> {
        match self.policy.action(kind) {
            ErrorAction::Report => {
                self.warnings.borrow_mut().push(Warning {
                    kind,
                    message: message.to_string(),
                });
                Ok(())
            }
            ErrorAction::Warn => {
                warn!("{message}");
                Ok(())
            }
            ErrorAction::Fatal => Err(err),
        }
    }

    pub(crate) fn note_public(&self, kind: ErrorKind, message: &str, err: Error) -> Result<()> {
        self.note(kind, message, err)
    }
}

fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).rev().find(|&at| &haystack[at..at + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use crate::writer::{Writer, WriterOptions};

    fn tiny_document() -> Vec<u8> {
        let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
        let pages = writer.alloc();
        let page = writer
            .add(dictionary! {
                "Type" => Object::name("Page"),
                "Parent" => pages,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            })
            .unwrap();
        writer
            .put(
                pages,
                dictionary! {
                    "Type" => Object::name("Pages"),
                    "Kids" => vec![Object::Reference(page)],
                    "Count" => 1,
                },
            )
            .unwrap();
        let catalog = writer
            .add(dictionary! { "Type" => Object::name("Catalog"), "Pages" => pages })
            .unwrap();
        writer.set_root(catalog);
        writer.close().unwrap()
    }

    #[test]
    fn read_back_a_written_document() {
        let reader = Reader::open(tiny_document()).unwrap();
        assert_eq!(reader.version(), "1.4");
        let catalog = reader.catalog().unwrap();
        assert!(catalog.has_type(b"Catalog"));

        let pages = reader.get_dict(catalog.get(b"Pages").unwrap()).unwrap();
        assert_eq!(pages.get(b"Count").unwrap().as_i64().unwrap(), 1);

        let kids = reader.get_array(pages.get(b"Kids").unwrap()).unwrap();
        let page = reader.get_dict(&kids[0]).unwrap();
        let media_box = reader.get_array(page.get(b"MediaBox").unwrap()).unwrap();
        assert_eq!(media_box[2].as_i64().unwrap(), 612);
    }

    #[test]
    fn caching_serves_repeat_lookups() {
        let reader = Reader::open(tiny_document()).unwrap();
        let root = reader.trailer().get(b"Root").unwrap().as_reference().unwrap();
        let first = reader.get_object(root).unwrap();
        let second = reader.get_object(root).unwrap();
        assert_eq!(first, second);
        reader.forget(root);
        assert_eq!(reader.get_object(root).unwrap(), first);
    }

    #[test]
    fn dangling_reference_is_fatal_by_default() {
        let reader = Reader::open(tiny_document()).unwrap();
        let missing = Object::Reference((999, 0));
        assert!(matches!(reader.resolve(&missing), Err(Error::ObjectNotFound(_))));
    }

    #[test]
    fn dangling_reference_downgrades_under_report() {
        let reader = Reader::open_with_policy(tiny_document(), ErrorPolicy::lenient()).unwrap();
        let missing = Object::Reference((999, 0));
        assert!(reader.resolve(&missing).unwrap().is_null());
        assert_eq!(reader.warnings().len(), 1);
        assert_eq!(reader.warnings()[0].kind, ErrorKind::InvalidReference);
    }

    #[test]
    fn wrong_type_downgrades_to_zero_value() {
        let reader = Reader::open_with_policy(tiny_document(), ErrorPolicy::lenient()).unwrap();
        let name = Object::name("NotANumber");
        assert_eq!(reader.get_integer(&name).unwrap(), 0);
        let strict = Reader::open(tiny_document()).unwrap();
        assert!(strict.get_integer(&name).is_err());
    }

    #[test]
    fn damaged_xref_recovers_by_scanning() {
        let mut bytes = tiny_document();
        // Corrupt the startxref offset digits.
        let at = parser::find_subslice(&bytes, b"startxref").unwrap();
        for b in &mut bytes[at + 10..at + 14] {
            *b = b'9';
        }
        assert!(Reader::open(bytes.clone()).is_err());

        let reader = Reader::open_with_policy(bytes, ErrorPolicy::lenient()).unwrap();
        assert!(reader.catalog().unwrap().has_type(b"Catalog"));
    }

    #[test]
    fn resolve_follows_chains_but_not_cycles() {
        let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
        let a = writer.alloc();
        let b = writer.alloc();
        writer.put(a, Object::Reference(b)).unwrap();
        writer.put(b, Object::Integer(12)).unwrap();
        let looped = writer.alloc();
        writer.put(looped, Object::Reference(looped)).unwrap();
        let catalog = writer
            .add(dictionary! { "Type" => Object::name("Catalog") })
            .unwrap();
        writer.set_root(catalog);
        let reader = Reader::open(writer.close().unwrap()).unwrap();

        assert_eq!(reader.get_integer(&Object::Reference(a)).unwrap(), 12);
        assert!(matches!(
            reader.resolve(&Object::Reference(looped)),
            Err(Error::ReferenceLimit)
        ));
    }
}
