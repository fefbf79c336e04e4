use crate::{Error, Result};
use indexmap::IndexMap;
use std::fmt;

/// Object identifier: object number and generation number.
///
/// `(0, 0)` is never a live object; it is the "absent" sentinel.
pub type ObjectId = (u32, u16);

/// The zero reference, used by tree writers to signal an absent subtree.
pub const ABSENT_REF: ObjectId = (0, 0);

/// Basic PDF object types defined in an enum.
#[derive(Clone)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// String objects can be written in two formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// Dictionary object.
///
/// Keys keep their insertion order for serialisation; equality ignores
/// order. Keys beginning with `XX_` are implementation markers and are
/// dropped on emission.
#[derive(Clone, Default)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object: a dictionary plus an opaque byte body.
///
/// Streams only ever appear as indirect objects.
#[derive(Debug, Clone)]
pub struct Stream {
    pub dict: Dictionary,
    pub content: Vec<u8>,
    /// Body position in the source file when the declared `Length` was a
    /// forward reference the parser could not resolve by itself.
    pub start_position: Option<usize>,
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn name<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::Name(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// A reference equal to the zero sentinel counts as absent too.
    pub fn is_absent(&self) -> bool {
        match self {
            Object::Null => true,
            Object::Reference(id) => *id == ABSENT_REF,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(self.type_error("Boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(self.type_error("Integer")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Object::Real(value) => Ok(*value),
            _ => Err(self.type_error("Real")),
        }
    }

    /// Numeric value as a float; integers are widened.
    pub fn as_number(&self) -> Result<f64> {
        match self {
            Object::Integer(value) => Ok(*value as f64),
            Object::Real(value) => Ok(*value),
            _ => Err(self.type_error("Integer or Real")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("Name")),
        }
    }

    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Object::String(bytes, _) => Ok(bytes),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_string_mut(&mut self) -> Result<&mut Vec<u8>> {
        match self {
            Object::String(bytes, _) => Ok(bytes),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("Reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(array) => Ok(array),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Object>> {
        match self {
            Object::Array(array) => Ok(array),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(..) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.variant_name(),
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

macro_rules! from_smaller_ints {
    ($( $int:ty )+) => {
        $(
            impl From<$int> for Object {
                fn from(value: $int) -> Self {
                    Object::Integer(i64::from(value))
                }
            }
        )+
    }
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

impl From<f32> for Object {
    fn from(value: f32) -> Self {
        Object::Real(f64::from(value))
    }
}

impl From<String> for Object {
    fn from(name: String) -> Self {
        Object::Name(name.into_bytes())
    }
}

impl<'a> From<&'a str> for Object {
    fn from(name: &'a str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(IndexMap::new())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn get_opt(&self, key: &[u8]) -> Option<&Object> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type").and_then(Object::as_name).ok() == Some(type_name)
    }

    pub fn get_type(&self) -> Result<&[u8]> {
        self.get(b"Type").and_then(Object::as_name)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, Vec<u8>, Object> {
        self.0.iter_mut()
    }

    /// Merge `other` into `self`; existing keys keep their value.
    pub fn merge_missing(&mut self, other: &Dictionary) {
        for (key, value) in other.iter() {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

// Equality is structural: the string-format hint and a stream's parse-time
// body position are spelling details, not values.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Null, Object::Null) => true,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Real(a), Object::Real(b)) => a == b,
            (Object::Name(a), Object::Name(b)) => a == b,
            (Object::String(a, _), Object::String(b, _)) => a == b,
            (Object::Array(a), Object::Array(b)) => a == b,
            (Object::Dictionary(a), Object::Dictionary(b)) => a == b,
            (Object::Stream(a), Object::Stream(b)) => a == b,
            (Object::Reference(a), Object::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.content == other.content
    }
}

// Order-insensitive equality; XX_ marker keys still participate since they
// are stripped at the emission boundary, not here.
impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }
}

#[macro_export]
macro_rules! dictionary {
    () => {
        $crate::Dictionary::new()
    };
    ($( $key:expr => $value:expr ),+ ,) => {
        dictionary!( $($key => $value),+ )
    };
    ($( $key:expr => $value:expr ),*) => {{
        let mut dict = $crate::Dictionary::new();
        $(
            dict.set($key, $value);
        )*
        dict
    }}
}

impl IntoIterator for Dictionary {
    type Item = (Vec<u8>, Object);
    type IntoIter = indexmap::map::IntoIter<Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, Object)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (key, value) in iter {
            dict.set(key, value);
        }
        dict
    }
}

impl Stream {
    pub fn new(mut dict: Dictionary, content: Vec<u8>) -> Stream {
        dict.set("Length", content.len() as i64);
        Stream {
            dict,
            content,
            start_position: None,
        }
    }

    /// A stream whose body could not be sliced at parse time because its
    /// `Length` was an unresolved forward reference.
    pub fn with_position(dict: Dictionary, position: usize) -> Stream {
        Stream {
            dict,
            content: Vec::new(),
            start_position: Some(position),
        }
    }

    /// The declared filter chain, in decoding order.
    pub fn filters(&self) -> Result<Vec<&[u8]>> {
        let filter = match self.dict.get_opt(b"Filter") {
            Some(filter) => filter,
            None => return Ok(Vec::new()),
        };
        if let Ok(name) = filter.as_name() {
            Ok(vec![name])
        } else if let Ok(names) = filter.as_array() {
            names.iter().map(Object::as_name).collect()
        } else {
            Err(Error::ObjectType {
                expected: "Name or Array",
                found: filter.variant_name(),
            })
        }
    }

    /// `DecodeParms` normalised to one entry per filter.
    pub fn decode_parms(&self, filter_count: usize) -> Vec<Option<Dictionary>> {
        let mut parms = vec![None; filter_count];
        match self.dict.get_opt(b"DecodeParms") {
            Some(Object::Dictionary(dict)) => {
                if let Some(slot) = parms.first_mut() {
                    *slot = Some(dict.clone());
                }
            }
            Some(Object::Array(array)) => {
                for (slot, entry) in parms.iter_mut().zip(array) {
                    if let Object::Dictionary(dict) = entry {
                        *slot = Some(dict.clone());
                    }
                }
            }
            _ => {}
        }
        parms
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.dict.set("Length", content.len() as i64);
        self.content = content;
    }

    /// Replace the body with already-decoded bytes and drop the filter chain.
    pub fn set_plain_content(&mut self, content: Vec<u8>) {
        self.dict.remove(b"DecodeParms");
        self.dict.remove(b"Filter");
        self.set_content(content);
    }

    /// The body with the declared filter chain applied.
    pub fn decoded_content(&self) -> Result<Vec<u8>> {
        crate::filters::decode_stream(self, crate::filters::MAX_FILTER_DEPTH)
    }

    /// Compress the body with zlib when that actually saves space.
    pub fn compress(&mut self) -> Result<()> {
        if self.dict.get_opt(b"Filter").is_none() {
            let compressed = crate::filters::flate_encode(&self.content);
            if compressed.len() + 19 < self.content.len() {
                self.dict.set("Filter", Object::name("FlateDecode"));
                self.set_content(compressed);
            }
        }
        Ok(())
    }

    pub fn decompress(&mut self) -> Result<()> {
        let data = self.decoded_content()?;
        self.set_plain_content(data);
        Ok(())
    }

    pub fn is_compressed(&self) -> bool {
        self.dict.get_opt(b"Filter").is_some()
    }
}

/// Creates a text string object.
///
/// ASCII input is stored verbatim as a literal string; everything else is
/// encoded as UTF-16BE with a BOM and written hexadecimal.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.into(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decodes a text string object.
///
/// The BOM selects UTF-16BE or UTF-8; otherwise bytes are taken as the
/// Latin-1 subset of PDFDocEncoding.
pub fn decode_text_string(obj: &Object) -> Result<String> {
    let bytes = obj.as_string()?;
    if bytes.starts_with(b"\xFE\xFF") {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .map(|pair| {
                if pair.len() == 1 {
                    u16::from_be_bytes([pair[0], 0])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16(&units).map_err(|_| Error::TextStringDecode)
    } else if let Some(rest) = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()) {
        String::from_utf8(rest.to_vec()).map_err(|_| Error::TextStringDecode)
    } else {
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => write!(f, "null"),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Integer(value) => write!(f, "{value}"),
            Object::Real(value) => write!(f, "{value}"),
            Object::Name(name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(bytes, StringFormat::Literal) => {
                write!(f, "({})", String::from_utf8_lossy(bytes))
            }
            Object::String(bytes, StringFormat::Hexadecimal) => {
                write!(f, "<")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                write!(f, ">")
            }
            Object::Array(array) => {
                write!(f, "[")?;
                for (i, item) in array.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, "]")
            }
            Object::Dictionary(dict) => write!(f, "{dict:?}"),
            Object::Stream(stream) => write!(f, "{:?}stream({} bytes)", stream.dict, stream.content.len()),
            Object::Reference(id) => write!(f, "{} {} R", id.0, id.1),
        }
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<<")?;
        for (key, value) in self {
            write!(f, "/{} {:?}", String::from_utf8_lossy(key), value)?;
        }
        write!(f, ">>")
    }
}
