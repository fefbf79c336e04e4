//! The append-only document writer and the emitting half of the syntax
//! codec.
//!
//! Objects are serialised at the moment they are committed; the writer only
//! buffers the bytes of the revision it is producing, so placeholder slots
//! can be patched before anything reaches the destination sink.

use crate::encryption::{CryptError, EncryptionConfig, SecurityHandler};
use crate::error::Result;
use crate::filters::Filter;
use crate::objstream::ObjectStreamBuilder;
use crate::xref::{encode_xref_stream, Xref, XrefEntry, XrefType};
use crate::{Dictionary, Error, Object, ObjectId, Stream, StringFormat};
use log::warn;
use rand::RngCore;
use std::io::{self, Write};

/// Options recognised by the writer.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Pretty-print dictionaries and arrays; never encrypt.
    pub human_readable: bool,
    /// Strip descriptor and width entries from the 14 standard fonts.
    pub trim_standard_fonts: bool,
    /// Force the cross-reference stream form. Documents at 1.5 or later
    /// use it by default; below 1.5 the version gate still applies.
    pub prefer_xref_stream: bool,
    /// Encrypt the metadata stream when encryption is on.
    pub encrypt_metadata: bool,
    /// zlib-compress bodies handed to `put` when they carry no filter.
    pub compress_streams: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            human_readable: false,
            trim_standard_fonts: false,
            prefer_xref_stream: false,
            encrypt_metadata: true,
            compress_streams: false,
        }
    }
}

/// A reserved fixed-width ASCII slot in the output.
///
/// Embed [`Placeholder::marker`] inside a value handed to the writer; the
/// slot is patched by [`Writer::set_placeholder`], which must happen
/// before `close`.
#[derive(Debug, Clone, Copy)]
pub struct Placeholder {
    index: usize,
}

impl Placeholder {
    /// The marker object standing in for the future value.
    pub fn marker(&self) -> Object {
        Object::Name(marker_name(self.index))
    }
}

#[derive(Debug)]
struct PlaceholderSlot {
    /// Buffer position once emitted; None until the marker is written out.
    at: Option<usize>,
    capacity: usize,
    filled: bool,
}

/// Marker names are a reserved implementation namespace (`XX_…`) and never
/// reach a finished file.
const MARKER_PREFIX: &[u8] = b"XX_slot";

type CloseHook<W> = Box<dyn FnOnce(&mut Writer<W>) -> Result<()>>;

pub struct Writer<W: Write> {
    dest: Option<W>,
    buf: Vec<u8>,
    version: String,
    next_id: u32,
    xref: Xref,
    trailer: Dictionary,
    options: WriterOptions,
    encryption: Option<SecurityHandler>,
    slots: Vec<PlaceholderSlot>,
    close_hooks: Vec<CloseHook<W>>,
    file_id: [Vec<u8>; 2],
    /// startxref of the revision this one extends.
    prev_startxref: Option<usize>,
    incremental: bool,
}

impl<W: Write> Writer<W> {
    /// Start a fresh document.
    pub fn new(dest: W, version: &str, options: WriterOptions) -> Result<Writer<W>> {
        let mut id0 = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut id0);
        let id1 = id0.clone();
        let mut writer = Writer {
            dest: Some(dest),
            buf: Vec::new(),
            version: version.to_string(),
            next_id: 1,
            xref: Xref::new(1, XrefType::Table),
            trailer: Dictionary::new(),
            options,
            encryption: None,
            slots: Vec::new(),
            close_hooks: Vec::new(),
            file_id: [id0, id1],
            prev_startxref: None,
            incremental: false,
        };
        writer.write_header();
        Ok(writer)
    }

    /// Start a fresh encrypted document.
    pub fn encrypted(dest: W, version: &str, options: WriterOptions, config: &EncryptionConfig) -> Result<Writer<W>> {
        let mut writer = Writer::new(dest, version, options)?;
        if writer.options.human_readable {
            warn!("human-readable output is never encrypted; ignoring the encryption request");
            return Ok(writer);
        }
        if matches!(config, EncryptionConfig::Aes256 { .. }) {
            writer.check_version("AES-256 encryption", "2.0")?;
        }
        let encrypt_metadata = writer.options.encrypt_metadata;
        writer.encryption = Some(SecurityHandler::for_writing(config, &writer.file_id[0], encrypt_metadata)?);
        Ok(writer)
    }

    /// Append a new revision to an existing document.
    ///
    /// The prior bytes are replayed verbatim; the new xref carries `Prev`
    /// and the trailer keeps `ID[0]` while refreshing `ID[1]`.
    pub fn incremental(dest: W, reader: &crate::Reader, options: WriterOptions) -> Result<Writer<W>> {
        let mut id1 = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut id1);
        let id0 = reader.file_id().map(|(first, _)| first.to_vec()).unwrap_or_else(|| {
            let mut fresh = vec![0u8; 16];
            rand::thread_rng().fill_bytes(&mut fresh);
            fresh
        });

        let mut trailer = Dictionary::new();
        for key in [b"Root".as_slice(), b"Info".as_slice()] {
            if let Some(value) = reader.trailer().get_opt(key) {
                trailer.set(key.to_vec(), value.clone());
            }
        }

        let mut writer = Writer {
            dest: Some(dest),
            buf: reader.bytes().to_vec(),
            version: reader.version().to_string(),
            next_id: reader.size(),
            xref: Xref::new(reader.size(), XrefType::Table),
            trailer,
            options,
            encryption: reader.security_handler().cloned(),
            slots: Vec::new(),
            close_hooks: Vec::new(),
            file_id: [id0, id1],
            prev_startxref: Some(reader.startxref()),
            incremental: true,
        };
        if !writer.buf.ends_with(b"\n") {
            writer.buf.push(b'\n');
        }
        Ok(writer)
    }

    fn write_header(&mut self) {
        self.buf.extend_from_slice(b"%PDF-");
        self.buf.extend_from_slice(self.version.as_bytes());
        // Binary marker comment: four bytes above 0x80.
        self.buf.extend_from_slice(b"\n%\xE2\xE3\xCF\xD3\n");
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn set_root(&mut self, id: ObjectId) {
        self.trailer.set("Root", id);
    }

    pub fn set_info(&mut self, id: ObjectId) {
        self.trailer.set("Info", id);
    }

    pub fn root(&self) -> Option<ObjectId> {
        self.trailer.get_opt(b"Root").and_then(|o| o.as_reference().ok())
    }

    pub fn info(&self) -> Option<ObjectId> {
        self.trailer.get_opt(b"Info").and_then(|o| o.as_reference().ok())
    }

    fn version_at_least(&self, major: u32, minor: u32) -> bool {
        let mut parts = self.version.splitn(2, '.');
        let declared_major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let declared_minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (declared_major, declared_minor) >= (major, minor)
    }

    /// Fail unless the declared document version reaches `required`.
    pub fn check_version(&self, feature: &'static str, required: &'static str) -> Result<()> {
        let mut parts = required.splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        if !self.version_at_least(major, minor) {
            return Err(Error::VersionTooLow {
                feature,
                required,
                declared: self.version.clone(),
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.dest.is_none() {
            return Err(Error::WriterClosed);
        }
        Ok(())
    }

    /// Allocate a fresh object number at generation 0. Numbers are never
    /// reused within a revision.
    pub fn alloc(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(u32::MAX);
        (id, 0)
    }

    /// Commit `obj` as the definition of `id`.
    pub fn put<T: Into<Object>>(&mut self, id: ObjectId, obj: T) -> Result<()> {
        self.ensure_open()?;
        if self.next_id == u32::MAX {
            return Err(Error::AllocatorExhausted);
        }
        let mut obj = obj.into();
        if let Object::Stream(stream) = &mut obj {
            if self.options.compress_streams && !stream.is_compressed() {
                stream.compress()?;
            }
        }
        if let Some(handler) = &self.encryption {
            handler.encrypt_object(id, &mut obj)?;
        }
        self.put_plain(id, &obj)
    }

    /// Commit without the encryption stage (xref streams, the encryption
    /// dictionary itself).
    fn put_plain(&mut self, id: ObjectId, obj: &Object) -> Result<()> {
        let offset = self.buf.len() as u32;
        self.xref.insert(
            id.0,
            XrefEntry::InUse {
                offset,
                generation: id.1,
            },
        );
        self.write_int(i64::from(id.0));
        self.buf.push(b' ');
        self.write_int(i64::from(id.1));
        self.buf.extend_from_slice(b" obj\n");
        self.write_object(obj);
        self.buf.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    /// Allocate and commit in one step.
    pub fn add<T: Into<Object>>(&mut self, obj: T) -> Result<ObjectId> {
        let id = self.alloc();
        self.put(id, obj)?;
        Ok(id)
    }

    /// Reserve a fixed-width slot; its marker must be embedded in exactly
    /// one subsequently written object.
    pub fn new_placeholder(&mut self, capacity: usize) -> Placeholder {
        self.slots.push(PlaceholderSlot {
            at: None,
            capacity,
            filled: false,
        });
        Placeholder {
            index: self.slots.len() - 1,
        }
    }

    /// Patch a previously emitted placeholder slot. The serialised value
    /// must fit the reserved capacity.
    pub fn set_placeholder(&mut self, placeholder: Placeholder, value: Object) -> Result<()> {
        let slot = self
            .slots
            .get(placeholder.index)
            .ok_or(Error::InvalidInput("unknown placeholder"))?;
        let at = slot.at.ok_or(Error::InvalidInput("placeholder was never emitted"))?;
        let capacity = slot.capacity;

        let bytes = serialize_object(&value);
        if bytes.len() > capacity {
            return Err(Error::PlaceholderCapacity {
                capacity,
                needed: bytes.len(),
            });
        }
        self.buf[at..at + bytes.len()].copy_from_slice(&bytes);
        self.slots[placeholder.index].filled = true;
        Ok(())
    }

    /// Open a write-only sink for a stream object. The body is filtered
    /// (and encrypted) when the sink is finished; `Length` is backfilled
    /// through a placeholder.
    pub fn open_stream(&mut self, id: ObjectId, mut dict: Dictionary, filters: &[Filter]) -> Result<StreamSink<'_, W>> {
        self.ensure_open()?;
        match filters {
            [] => {}
            [single] => dict.set("Filter", Object::name(single.name())),
            many => dict.set(
                "Filter",
                Object::Array(many.iter().map(|f| Object::name(f.name())).collect()),
            ),
        }
        // DecodeParms in the dictionary drive the encoder too (predictors,
        // LZW early change).
        let probe = Stream {
            dict: dict.clone(),
            content: Vec::new(),
            start_position: None,
        };
        let parms = probe.decode_parms(filters.len());

        let length_slot = self.new_placeholder(10);
        dict.set("Length", length_slot.marker());

        let offset = self.buf.len() as u32;
        self.xref.insert(
            id.0,
            XrefEntry::InUse {
                offset,
                generation: id.1,
            },
        );
        self.write_int(i64::from(id.0));
        self.buf.push(b' ');
        self.write_int(i64::from(id.1));
        self.buf.extend_from_slice(b" obj\n");
        self.write_dictionary(&dict, 0);
        self.buf.extend_from_slice(b"\nstream\n");

        Ok(StreamSink {
            writer: self,
            id,
            chain: filters.iter().copied().zip(parms).collect(),
            length_slot,
            body: Vec::new(),
        })
    }

    /// Pack small direct objects into one object stream, recording
    /// compressed xref entries for each of them.
    pub fn write_compressed(&mut self, ids: &[ObjectId], objects: &[Object]) -> Result<()> {
        self.ensure_open()?;
        self.check_version("object streams", "1.5")?;
        if ids.len() != objects.len() {
            return Err(Error::InvalidInput("ids and objects differ in length"));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let mut builder = ObjectStreamBuilder::new();
        for (id, obj) in ids.iter().zip(objects) {
            builder.push(*id, obj)?;
        }

        let container = self.alloc();
        for (index, id) in ids.iter().enumerate() {
            self.xref.insert(
                id.0,
                XrefEntry::Compressed {
                    container: container.0,
                    index: index as u16,
                },
            );
        }
        // The container holds the participants; its own body is still
        // encrypted (and compressed) like any other stream.
        let stream = builder.finish()?;
        let offset = self.buf.len() as u32;
        self.xref.insert(
            container.0,
            XrefEntry::InUse {
                offset,
                generation: 0,
            },
        );
        let mut obj = Object::Stream(stream);
        if let Some(handler) = &self.encryption {
            handler.encrypt_object(container, &mut obj)?;
        }
        self.write_int(i64::from(container.0));
        self.buf.extend_from_slice(b" 0 obj\n");
        self.write_object(&obj);
        self.buf.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    /// Register a hook that runs at `close`, in reverse registration
    /// order.
    pub fn auto_close(&mut self, hook: CloseHook<W>) {
        self.close_hooks.push(hook);
    }

    /// Finish the revision: run auto-close hooks, verify placeholders,
    /// emit the xref and trailer, and flush everything to the sink.
    pub fn close(mut self) -> Result<W> {
        self.ensure_open()?;

        let mut hooks = std::mem::take(&mut self.close_hooks);
        let mut first_error = None;
        while let Some(hook) = hooks.pop() {
            if let Err(err) = hook(&mut self) {
                warn!("auto-close hook failed: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        if self.slots.iter().any(|slot| slot.at.is_some() && !slot.filled) {
            return Err(Error::PlaceholderUnfilled);
        }

        // The encryption dictionary is written plaintext and referenced
        // from the trailer.
        if let Some(handler) = self.encryption.clone() {
            if !self.trailer.has(b"Encrypt") {
                let id = self.alloc();
                self.put_plain(id, &Object::Dictionary(handler.to_dict()))?;
                self.trailer.set("Encrypt", id);
            }
        }

        self.link_free_list();
        self.xref.size = self.next_id;

        // Documents at 1.5 or later default to the stream form.
        let use_stream = self.options.prefer_xref_stream
            || self.version_at_least(1, 5)
            || self.xref.entries.values().any(XrefEntry::is_compressed);
        let startxref = if use_stream {
            self.check_version("cross-reference streams", "1.5")?;
            self.write_xref_stream()?
        } else {
            self.write_xref_table()?
        };

        self.buf.extend_from_slice(b"startxref\n");
        self.write_int(startxref as i64);
        self.buf.extend_from_slice(b"\n%%EOF\n");

        let mut dest = self.dest.take().ok_or(Error::WriterClosed)?;
        dest.write_all(&self.buf)?;
        dest.flush()?;
        Ok(dest)
    }

    /// Thread unused object numbers into the canonical free list.
    fn link_free_list(&mut self) {
        if self.incremental {
            return;
        }
        let free: Vec<u32> = (1..self.next_id).filter(|id| self.xref.get(*id).is_none()).collect();
        let mut next_free = 0u32;
        for &id in free.iter().rev() {
            self.xref.insert(
                id,
                XrefEntry::Free {
                    next: next_free,
                    generation: 0,
                },
            );
            next_free = id;
        }
        self.xref.insert(
            0,
            XrefEntry::Free {
                next: next_free,
                generation: u16::MAX,
            },
        );
    }

    fn trailer_for_output(&mut self) -> Dictionary {
        let mut trailer = self.trailer.clone();
        trailer.set("Size", i64::from(self.next_id));
        trailer.set(
            "ID",
            vec![
                Object::String(self.file_id[0].clone(), StringFormat::Hexadecimal),
                Object::String(self.file_id[1].clone(), StringFormat::Hexadecimal),
            ],
        );
        if let Some(prev) = self.prev_startxref {
            trailer.set("Prev", prev as i64);
        }
        trailer
    }

    fn write_xref_table(&mut self) -> Result<usize> {
        let startxref = self.buf.len();
        self.buf.extend_from_slice(b"xref\n");

        // Contiguous runs become subsections; a full file is one run.
        let ids: Vec<u32> = self.xref.entries.keys().copied().collect();
        let mut start = 0usize;
        while start < ids.len() {
            let mut end = start + 1;
            while end < ids.len() && ids[end] == ids[end - 1] + 1 {
                end += 1;
            }
            let section = format!("{} {}\n", ids[start], end - start);
            self.buf.extend_from_slice(section.as_bytes());
            for &id in &ids[start..end] {
                let line = match *self.xref.get(id).unwrap_or(&XrefEntry::Free {
                    next: 0,
                    generation: u16::MAX,
                }) {
                    XrefEntry::InUse { offset, generation } => {
                        format!("{offset:010} {generation:05} n \n")
                    }
                    XrefEntry::Free { next, generation } => {
                        format!("{next:010} {generation:05} f \n")
                    }
                    XrefEntry::Compressed { .. } => unreachable!("classic tables cannot hold compressed entries"),
                };
                self.buf.extend_from_slice(line.as_bytes());
            }
            start = end;
        }

        self.buf.extend_from_slice(b"trailer\n");
        let trailer = self.trailer_for_output();
        self.write_dictionary(&trailer, 0);
        self.buf.push(b'\n');
        Ok(startxref)
    }

    fn write_xref_stream(&mut self) -> Result<usize> {
        let id = self.alloc();
        let offset = self.buf.len();
        self.xref.insert(
            id.0,
            XrefEntry::InUse {
                offset: offset as u32,
                generation: 0,
            },
        );
        self.xref.size = self.next_id;

        let (w, index, body) = encode_xref_stream(&self.xref);
        let body = crate::filters::flate_encode(&body);

        let mut dict = self.trailer_for_output();
        dict.set("Type", Object::name("XRef"));
        dict.set("Size", i64::from(self.next_id));
        dict.set("W", w.into_iter().map(Object::Integer).collect::<Vec<_>>());
        dict.set("Index", index.into_iter().map(Object::Integer).collect::<Vec<_>>());
        dict.set("Filter", Object::name("FlateDecode"));
        dict.set("Length", body.len() as i64);

        self.write_int(i64::from(id.0));
        self.buf.extend_from_slice(b" 0 obj\n");
        self.write_dictionary(&dict, 0);
        self.buf.extend_from_slice(b"\nstream\n");
        self.buf.extend_from_slice(&body);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        Ok(offset)
    }

    // ----- emission ---------------------------------------------------

    fn write_int(&mut self, value: i64) {
        let mut fmt = itoa::Buffer::new();
        self.buf.extend_from_slice(fmt.format(value).as_bytes());
    }

    fn write_object(&mut self, obj: &Object) {
        self.write_object_at(obj, 0);
    }

    fn write_object_at(&mut self, obj: &Object, depth: usize) {
        match obj {
            Object::Name(name) if name.starts_with(MARKER_PREFIX) => {
                if let Some(index) = parse_marker(name) {
                    if let Some(slot) = self.slots.get_mut(index) {
                        slot.at = Some(self.buf.len());
                        let capacity = slot.capacity;
                        self.buf.extend(std::iter::repeat(b' ').take(capacity));
                        return;
                    }
                }
                // Not one of ours after all; emit as a plain name.
                write_name(&mut self.buf, name);
            }
            Object::Dictionary(dict) => self.write_dictionary(dict, depth),
            Object::Array(array) => self.write_array(array, depth),
            Object::Stream(stream) => {
                self.write_dictionary(&stream.dict, depth);
                self.buf.extend_from_slice(b"\nstream\n");
                self.buf.extend_from_slice(&stream.content);
                self.buf.extend_from_slice(b"\nendstream");
            }
            other => write_primitive(&mut self.buf, other),
        }
    }

    fn write_array(&mut self, array: &[Object], depth: usize) {
        self.buf.push(b'[');
        let mut first = true;
        for item in array {
            if !first && needs_leading_separator(item) {
                self.buf.push(b' ');
            }
            first = false;
            self.write_object_at(item, depth + 1);
        }
        self.buf.push(b']');
    }

    fn write_dictionary(&mut self, dict: &Dictionary, depth: usize) {
        let human = self.options.human_readable;
        self.buf.extend_from_slice(b"<<");
        for (key, value) in dict.iter() {
            // XX_-prefixed keys are implementation markers, not semantics.
            if key.starts_with(b"XX_") {
                continue;
            }
            if human {
                self.buf.push(b'\n');
                self.buf.extend(std::iter::repeat(b' ').take(2 * (depth + 1)));
            }
            write_name(&mut self.buf, key);
            if needs_leading_separator(value) {
                self.buf.push(b' ');
            }
            self.write_object_at(value, depth + 1);
        }
        if human {
            self.buf.push(b'\n');
            self.buf.extend(std::iter::repeat(b' ').take(2 * depth));
        }
        self.buf.extend_from_slice(b">>");
    }
}

/// Write-only byte sink returned by [`Writer::open_stream`].
pub struct StreamSink<'w, W: Write> {
    writer: &'w mut Writer<W>,
    id: ObjectId,
    chain: Vec<(Filter, Option<Dictionary>)>,
    length_slot: Placeholder,
    body: Vec<u8>,
}

impl<W: Write> io::Write for StreamSink<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> StreamSink<'_, W> {
    /// Encode, encrypt and commit the body, then backfill `Length`.
    pub fn finish(self) -> Result<()> {
        let StreamSink {
            writer,
            id,
            chain,
            length_slot,
            body,
        } = self;

        let mut encoded = crate::filters::encode_chain(&body, &chain)?;
        if let Some(handler) = &writer.encryption {
            encoded = handler
                .encrypt_stream_data(id, &encoded)
                .map_err(Error::Encryption)?;
        }
        let length = encoded.len();
        writer.buf.extend_from_slice(&encoded);
        writer.buf.extend_from_slice(b"\nendstream\nendobj\n");
        writer.set_placeholder(length_slot, Object::Integer(length as i64))
    }
}

impl SecurityHandler {
    /// Encrypt raw stream bytes under the default stream crypt filter.
    pub(crate) fn encrypt_stream_data(&self, id: ObjectId, data: &[u8]) -> std::result::Result<Vec<u8>, CryptError> {
        let mut carrier = Object::Stream(Stream::new(Dictionary::new(), data.to_vec()));
        self.encrypt_object(id, &mut carrier)?;
        match carrier {
            Object::Stream(stream) => Ok(stream.content),
            _ => unreachable!(),
        }
    }
}

fn marker_name(index: usize) -> Vec<u8> {
    let mut name = MARKER_PREFIX.to_vec();
    name.extend_from_slice(index.to_string().as_bytes());
    name
}

fn parse_marker(name: &[u8]) -> Option<usize> {
    std::str::from_utf8(&name[MARKER_PREFIX.len()..])
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Serialise one direct object to canonical bytes: the emitting half of
/// the round-trip contract with [`crate::parser::direct_object`].
pub fn serialize_object(obj: &Object) -> Vec<u8> {
    let mut out = Vec::new();
    write_object_plain(&mut out, obj);
    out
}

fn write_object_plain(out: &mut Vec<u8>, obj: &Object) {
    match obj {
        Object::Array(array) => {
            out.push(b'[');
            let mut first = true;
            for item in array {
                if !first && needs_leading_separator(item) {
                    out.push(b' ');
                }
                first = false;
                write_object_plain(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => {
            out.extend_from_slice(b"<<");
            for (key, value) in dict.iter() {
                if key.starts_with(b"XX_") {
                    continue;
                }
                write_name(out, key);
                if needs_leading_separator(value) {
                    out.push(b' ');
                }
                write_object_plain(out, value);
            }
            out.extend_from_slice(b">>");
        }
        Object::Stream(stream) => {
            write_object_plain(out, &Object::Dictionary(stream.dict.clone()));
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
        }
        other => write_primitive(out, other),
    }
}

fn needs_leading_separator(obj: &Object) -> bool {
    matches!(
        obj,
        Object::Null | Object::Boolean(_) | Object::Integer(_) | Object::Real(_) | Object::Reference(_)
    )
}

fn write_primitive(out: &mut Vec<u8>, obj: &Object) {
    match obj {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(value) => {
            let mut fmt = itoa::Buffer::new();
            out.extend_from_slice(fmt.format(*value).as_bytes());
        }
        Object::Real(value) => write_real(out, *value),
        Object::Name(name) => write_name(out, name),
        Object::String(bytes, format) => write_string(out, bytes, *format),
        Object::Reference(id) => {
            let mut fmt = itoa::Buffer::new();
            out.extend_from_slice(fmt.format(id.0).as_bytes());
            out.push(b' ');
            out.extend_from_slice(fmt.format(id.1).as_bytes());
            out.extend_from_slice(b" R");
        }
        Object::Array(_) | Object::Dictionary(_) | Object::Stream(_) => {
            unreachable!("composites are handled by the callers")
        }
    }
}

/// Reals carry at most five fractional digits, no exponent, and are never
/// NaN or infinite.
fn write_real(out: &mut Vec<u8>, value: f64) {
    let value = if value.is_finite() {
        value
    } else {
        warn!("replacing a non-finite real with 0");
        0.0
    };
    let mut text = format!("{value:.5}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    out.extend_from_slice(text.as_bytes());
}

/// Names escape whitespace, delimiters, `#` and anything outside `!`..`~`.
fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &byte in name {
        if b" \t\n\r\0\x0C()<>[]{}/%#".contains(&byte) || !(b'!'..=b'~').contains(&byte) {
            out.extend_from_slice(format!("#{byte:02X}").as_bytes());
        } else {
            out.push(byte);
        }
    }
}

/// Strings go out in whichever of the two spellings is shorter.
fn write_string(out: &mut Vec<u8>, bytes: &[u8], format: StringFormat) {
    let escapes = bytes
        .iter()
        .filter(|b| matches!(**b, b'(' | b')' | b'\\' | b'\r' | b'\n'))
        .count();
    let literal_len = bytes.len() + escapes + 2;
    let hex_len = bytes.len() * 2 + 2;

    let use_hex = match literal_len.cmp(&hex_len) {
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => format == StringFormat::Hexadecimal,
    };

    if use_hex {
        out.push(b'<');
        for byte in bytes {
            out.extend_from_slice(format!("{byte:02X}").as_bytes());
        }
        out.push(b'>');
    } else {
        out.push(b'(');
        for &byte in bytes {
            match byte {
                b'(' | b')' | b'\\' => {
                    out.push(b'\\');
                    out.push(byte);
                }
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\n' => out.extend_from_slice(b"\\n"),
                _ => out.push(byte),
            }
        }
        out.push(b')');
    }
}
