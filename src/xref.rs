//! The logical cross-reference table and its two physical forms.
//!
//! Reading starts from the latest section and walks the `Prev` chain;
//! [`Xref::merge_older`] keeps the later definition for every object
//! number, which is exactly the incremental-update rule.

use crate::error::XrefError;
use crate::{Dictionary, Error, Object, Result, Stream};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefType {
    /// Classic `xref` keyword table.
    Table,
    /// Cross-reference stream (`Type /XRef`).
    Stream,
}

#[derive(Debug, Clone)]
pub struct Xref {
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Highest object number plus one, from the trailer's `Size`.
    pub size: u32,
    pub kind: XrefType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Member of the free list; `generation` is the one a re-use would get.
    Free { next: u32, generation: u16 },
    InUse { offset: u32, generation: u16 },
    /// Lives inside object stream `container` at position `index`.
    Compressed { container: u32, index: u16 },
}

impl Xref {
    pub fn new(size: u32, kind: XrefType) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
            kind,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Fold an older revision's table underneath this one. Entries already
    /// present stay; the later revision always wins.
    pub fn merge_older(&mut self, older: Xref) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl XrefEntry {
    pub fn is_in_use(&self) -> bool {
        matches!(self, XrefEntry::InUse { .. })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, XrefEntry::Compressed { .. })
    }
}

/// Decode a cross-reference stream into the logical table plus the trailer
/// entries carried inline in its dictionary.
pub fn decode_xref_stream(mut stream: Stream) -> Result<(Xref, Dictionary)> {
    stream.decompress()?;
    let mut dict = stream.dict;
    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .map_err(|_| Error::Xref(XrefError::Parse))?;

    let index = match dict.get_opt(b"Index") {
        Some(value) => integer_array(value).map_err(|_| Error::Xref(XrefError::Parse))?,
        None => vec![0, size],
    };
    let widths = dict
        .get(b"W")
        .and_then(integer_array)
        .map_err(|_| Error::Xref(XrefError::Parse))?;
    if widths.len() < 3 || widths.iter().take(3).any(|w| *w < 0 || *w > 8) {
        return Err(Error::Xref(XrefError::Parse));
    }

    let mut field1 = vec![0u8; widths[0] as usize];
    let mut field2 = vec![0u8; widths[1] as usize];
    let mut field3 = vec![0u8; widths[2] as usize];

    let mut xref = Xref::new(size as u32, XrefType::Stream);
    let mut reader = Cursor::new(stream.content);
    for window in index.chunks(2) {
        let &[start, count] = window else {
            return Err(Error::Xref(XrefError::Parse));
        };
        for j in 0..count {
            // A zero-width first field defaults the entry type to in-use.
            let entry_type = if field1.is_empty() {
                1
            } else {
                read_be(&mut reader, &mut field1)?
            };
            let payload2 = read_be(&mut reader, &mut field2)?;
            let payload3 = read_be(&mut reader, &mut field3)?;
            let id = (start + j) as u32;
            match entry_type {
                0 => xref.insert(
                    id,
                    XrefEntry::Free {
                        next: payload2 as u32,
                        generation: payload3 as u16,
                    },
                ),
                1 => xref.insert(
                    id,
                    XrefEntry::InUse {
                        offset: payload2 as u32,
                        generation: payload3 as u16,
                    },
                ),
                2 => xref.insert(
                    id,
                    XrefEntry::Compressed {
                        container: payload2 as u32,
                        index: payload3 as u16,
                    },
                ),
                // Unknown types read as null references and are skipped.
                _ => {}
            }
        }
    }

    dict.remove(b"Length");
    dict.remove(b"W");
    dict.remove(b"Index");
    dict.remove(b"Filter");
    dict.remove(b"DecodeParms");
    dict.remove(b"Type");
    Ok((xref, dict))
}

fn read_be(reader: &mut Cursor<Vec<u8>>, buffer: &mut [u8]) -> Result<u64> {
    if buffer.is_empty() {
        return Ok(0);
    }
    reader.read_exact(buffer).map_err(|_| Error::Xref(XrefError::Parse))?;
    let mut value = 0u64;
    for &byte in buffer.iter() {
        value = (value << 8) | u64::from(byte);
    }
    Ok(value)
}

fn integer_array(value: &Object) -> Result<Vec<i64>> {
    value.as_array()?.iter().map(Object::as_i64).collect()
}

/// Encode the table as a cross-reference stream body, choosing minimal
/// field widths. Returns `(W, Index, body)`; the caller wraps them in the
/// stream dictionary and compresses.
pub fn encode_xref_stream(xref: &Xref) -> (Vec<i64>, Vec<i64>, Vec<u8>) {
    let mut max2 = 0u64;
    let mut max3 = 0u64;
    for entry in xref.entries.values() {
        let (f2, f3) = entry_fields(entry);
        max2 = max2.max(f2);
        max3 = max3.max(f3);
    }
    let w2 = byte_width(max2);
    let w3 = byte_width(max3);

    // Contiguous runs of object numbers become Index subsections.
    let mut index = Vec::new();
    let mut body = Vec::new();
    let mut run_start: Option<(u32, i64)> = None;
    let mut previous: Option<u32> = None;
    for (&id, entry) in &xref.entries {
        match (run_start.as_mut(), previous) {
            (Some((_, count)), Some(prev)) if prev + 1 == id => *count += 1,
            _ => {
                if let Some((start, count)) = run_start.take() {
                    index.push(i64::from(start));
                    index.push(count);
                }
                run_start = Some((id, 1));
            }
        }
        previous = Some(id);

        let (f2, f3) = entry_fields(entry);
        body.push(entry_type(entry));
        push_be(&mut body, f2, w2);
        push_be(&mut body, f3, w3);
    }
    if let Some((start, count)) = run_start {
        index.push(i64::from(start));
        index.push(count);
    }

    (vec![1, w2 as i64, w3 as i64], index, body)
}

fn entry_type(entry: &XrefEntry) -> u8 {
    match entry {
        XrefEntry::Free { .. } => 0,
        XrefEntry::InUse { .. } => 1,
        XrefEntry::Compressed { .. } => 2,
    }
}

fn entry_fields(entry: &XrefEntry) -> (u64, u64) {
    match *entry {
        XrefEntry::Free { next, generation } => (u64::from(next), u64::from(generation)),
        XrefEntry::InUse { offset, generation } => (u64::from(offset), u64::from(generation)),
        XrefEntry::Compressed { container, index } => (u64::from(container), u64::from(index)),
    }
}

fn byte_width(value: u64) -> usize {
    let mut width = 1;
    let mut value = value >> 8;
    while value > 0 {
        width += 1;
        value >>= 8;
    }
    width
}

fn push_be(out: &mut Vec<u8>, value: u64, width: usize) {
    for shift in (0..width).rev() {
        out.push((value >> (shift * 8)) as u8);
    }
}
