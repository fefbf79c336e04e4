//! Object streams: streams whose decoded body is a sequence of other
//! (compressed) objects.
//!
//! The body starts with `N` pairs of "object-number byte-offset" integers;
//! `First` is the offset of the first object's bytes. Object streams never
//! hold streams, the encryption dictionary or the catalog.

use crate::{parser, writer, Dictionary, Error, Object, ObjectId, Result, Stream};
use std::str::FromStr;

/// An unpacked object stream. Members keep their stream order, which is
/// what compressed xref entries index by.
#[derive(Debug)]
pub struct ObjectStream {
    entries: Vec<(ObjectId, Object)>,
}

impl ObjectStream {
    /// Decode the stream body and parse every contained object.
    pub fn parse(stream: &Stream) -> Result<ObjectStream> {
        let content = stream.decoded_content()?;
        if content.is_empty() {
            return Ok(ObjectStream { entries: Vec::new() });
        }

        let first = stream.dict.get(b"First").and_then(Object::as_i64)? as usize;
        let count = stream.dict.get(b"N").and_then(Object::as_i64)? as usize;

        let header = content.get(..first).ok_or(Error::Offset(first))?;
        let header = std::str::from_utf8(header).map_err(|_| Error::Syntax("object stream header".into()))?;
        let numbers: Vec<Option<u64>> = header
            .split_whitespace()
            .map(|token| u64::from_str(token).ok())
            .collect();

        let mut entries = Vec::with_capacity(count);
        for chunk in numbers.chunks_exact(2).take(count) {
            let (Some(number), Some(offset)) = (chunk[0], chunk[1]) else {
                continue;
            };
            let at = first + offset as usize;
            let Some(tail) = content.get(at..) else {
                continue;
            };
            if let Some(object) = parser::direct_object(tail) {
                entries.push(((number as u32, 0), object));
            }
        }
        Ok(ObjectStream { entries })
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.entries
            .iter()
            .find(|(member, _)| *member == id)
            .map(|(_, obj)| obj)
    }

    /// The object at `index`, the position compressed xref entries use.
    pub fn by_index(&self, index: u16) -> Option<(ObjectId, &Object)> {
        self.entries.get(usize::from(index)).map(|(id, obj)| (*id, obj))
    }

    pub fn entries(&self) -> &[(ObjectId, Object)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates objects for packing; [`ObjectStreamBuilder::finish`] yields
/// the `ObjStm` stream, Flate-compressed.
#[derive(Default)]
pub struct ObjectStreamBuilder {
    entries: Vec<(u32, Vec<u8>)>,
}

impl ObjectStreamBuilder {
    pub fn new() -> ObjectStreamBuilder {
        ObjectStreamBuilder::default()
    }

    pub fn push(&mut self, id: ObjectId, obj: &Object) -> Result<()> {
        if id.1 != 0 {
            return Err(Error::InvalidInput("compressed objects must be at generation 0"));
        }
        match obj {
            Object::Stream(_) => return Err(Error::InvalidInput("object streams cannot contain streams")),
            Object::Dictionary(dict) if dict.has_type(b"Catalog") => {
                return Err(Error::InvalidInput("the catalog cannot be compressed"));
            }
            _ => {}
        }
        self.entries.push((id.0, writer::serialize_object(obj)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Result<Stream> {
        let mut header = Vec::new();
        let mut body = Vec::new();
        for (number, bytes) in &self.entries {
            header.extend_from_slice(format!("{} {} ", number, body.len()).as_bytes());
            body.extend_from_slice(bytes);
            body.push(b'\n');
        }

        let first = header.len();
        let mut content = header;
        content.extend_from_slice(&body);
        let packed = crate::filters::flate_encode(&content);

        let dict: Dictionary = [
            (b"Type".to_vec(), Object::name("ObjStm")),
            (b"N".to_vec(), Object::Integer(self.entries.len() as i64)),
            (b"First".to_vec(), Object::Integer(first as i64)),
            (b"Filter".to_vec(), Object::name("FlateDecode")),
        ]
        .into_iter()
        .collect();
        Ok(Stream::new(dict, packed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    #[test]
    fn pack_and_unpack() {
        let mut builder = ObjectStreamBuilder::new();
        builder.push((12, 0), &Object::Integer(7)).unwrap();
        builder
            .push((13, 0), &Object::Dictionary(dictionary! { "Kind" => Object::name("Test") }))
            .unwrap();
        builder.push((14, 0), &Object::string_literal("packed")).unwrap();
        let stream = builder.finish().unwrap();
        assert!(stream.dict.has_type(b"ObjStm"));
        assert_eq!(stream.dict.get(b"N").unwrap().as_i64().unwrap(), 3);

        let unpacked = ObjectStream::parse(&stream).unwrap();
        assert_eq!(unpacked.len(), 3);
        assert_eq!(unpacked.get((12, 0)).unwrap().as_i64().unwrap(), 7);
        assert_eq!(
            unpacked.by_index(2).unwrap().1.as_string().unwrap(),
            b"packed"
        );
    }

    #[test]
    fn forbidden_members_are_rejected() {
        let mut builder = ObjectStreamBuilder::new();
        assert!(builder
            .push((5, 0), &Object::Stream(Stream::new(Dictionary::new(), vec![1])))
            .is_err());
        assert!(builder
            .push((6, 0), &Object::Dictionary(dictionary! { "Type" => Object::name("Catalog") }))
            .is_err());
        assert!(builder.push((7, 1), &Object::Integer(1)).is_err());
        assert!(builder.is_empty());
    }

    #[test]
    fn empty_stream_unpacks_to_nothing() {
        let stream = ObjectStreamBuilder::new().finish().unwrap();
        let unpacked = ObjectStream::parse(&stream).unwrap();
        assert!(unpacked.is_empty());
    }
}
