//! Token-level reader for the PDF syntactic surface.
//!
//! Everything here is a plain nom combinator over `&[u8]`; byte offsets are
//! carried by the caller. The emitting half of the codec lives in
//! [`crate::writer`].

use crate::xref::{Xref, XrefEntry, XrefType};
use crate::{Dictionary, Error, Object, ObjectId, Result as CrateResult, Stream, StringFormat};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of};
use nom::character::{is_hex_digit, is_oct_digit};
use nom::combinator::{map, map_opt, map_res, opt, recognize, verify};
use nom::multi::{fold_many0, fold_many1, many0, many0_count};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated, tuple};
use nom::IResult;

pub(crate) type NomResult<'a, O> = IResult<&'a [u8], O>;

/// Maximum nesting of parentheses inside a literal string.
pub const MAX_BRACKET: usize = 100;

#[inline]
fn strip<O>(r: NomResult<O>) -> Option<O> {
    r.ok().map(|(_, o)| o)
}

pub(crate) fn eol(input: &[u8]) -> NomResult<&[u8]> {
    alt((tag(b"\r\n"), tag(b"\n"), tag(b"\r")))(input)
}

pub(crate) fn comment(input: &[u8]) -> NomResult<()> {
    map(
        tuple((tag(b"%"), take_while(|c: u8| !b"\r\n".contains(&c)), eol)),
        |_| (),
    )(input)
}

#[inline]
pub(crate) fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
pub(crate) fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn white_space(input: &[u8]) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ())(input)
}

/// Whitespace including comments; comments count as whitespace everywhere
/// outside strings and stream bodies.
pub(crate) fn space(input: &[u8]) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || (),
        |_, _| (),
    )(input)
}

pub(crate) fn integer(input: &[u8]) -> NomResult<i64> {
    map_res(recognize(pair(opt(one_of("+-")), digit1)), |digits: &[u8]| {
        i64::from_str(str::from_utf8(digits).unwrap_or(""))
    })(input)
}

pub(crate) fn real(input: &[u8]) -> NomResult<f64> {
    map_res(
        recognize(pair(
            opt(one_of("+-")),
            alt((
                map(tuple((digit1, tag(b"."), digit0)), |_| ()),
                map(pair(tag(b"."), digit1), |_| ()),
            )),
        )),
        |digits: &[u8]| f64::from_str(str::from_utf8(digits).unwrap_or("")),
    )(input)
}

fn hex_pair(input: &[u8]) -> NomResult<u8> {
    map_res(
        verify(take(2usize), |h: &[u8]| h.iter().copied().all(is_hex_digit)),
        |h: &[u8]| u8::from_str_radix(str::from_utf8(h).unwrap_or(""), 16),
    )(input)
}

fn oct_char(input: &[u8]) -> NomResult<u8> {
    map_res(
        take_while_m_n(1, 3, is_oct_digit),
        // Overflow past one byte is ignored per the octal-escape rules.
        |digits: &[u8]| u16::from_str_radix(str::from_utf8(digits).unwrap_or(""), 8).map(|v| v as u8),
    )(input)
}

pub(crate) fn name(input: &[u8]) -> NomResult<Vec<u8>> {
    preceded(
        tag(b"/"),
        many0(alt((
            preceded(tag(b"#"), hex_pair),
            map_opt(take(1usize), |c: &[u8]| {
                if c[0] != b'#' && is_regular(c[0]) {
                    Some(c[0])
                } else {
                    None
                }
            }),
        ))),
    )(input)
}

fn escape_sequence(input: &[u8]) -> NomResult<Option<u8>> {
    preceded(
        tag(b"\\"),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(b"n"), |_| Some(b'\n')),
            map(tag(b"r"), |_| Some(b'\r')),
            map(tag(b"t"), |_| Some(b'\t')),
            map(tag(b"b"), |_| Some(b'\x08')),
            map(tag(b"f"), |_| Some(b'\x0C')),
            map(take(1usize), |c: &[u8]| Some(c[0])),
        )),
    )(input)
}

fn inner_literal_string(depth: usize) -> impl Fn(&[u8]) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(|c: u8| !b"()\\\r\n".contains(&c)), Piece::Direct),
                map(escape_sequence, Piece::Escape),
                // A bare end-of-line inside a literal string reads as LF.
                map(eol, |_| Piece::Newline),
                map(nested_literal_string(depth), Piece::Nested),
            )),
            Vec::new,
            |mut out, piece| {
                match piece {
                    Piece::Direct(bytes) => out.extend_from_slice(bytes),
                    Piece::Escape(byte) => out.extend(byte),
                    Piece::Newline => out.push(b'\n'),
                    Piece::Nested(bytes) => out.extend_from_slice(&bytes),
                }
                out
            },
        )(input)
    }
}

enum Piece<'a> {
    Direct(&'a [u8]),
    Escape(Option<u8>),
    Newline,
    Nested(Vec<u8>),
}

fn nested_literal_string(depth: usize) -> impl Fn(&[u8]) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            map(verify(tag(b"("), |_: &[u8]| false), |_| Vec::new())(input)
        } else {
            map(
                delimited(tag(b"("), inner_literal_string(depth - 1), tag(b")")),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )(input)
        }
    }
}

pub(crate) fn literal_string(input: &[u8]) -> NomResult<Vec<u8>> {
    delimited(tag(b"("), inner_literal_string(MAX_BRACKET), tag(b")"))(input)
}

fn hex_digit(input: &[u8]) -> NomResult<u8> {
    map_opt(take(1usize), |c: &[u8]| {
        str::from_utf8(c).ok().and_then(|c| u8::from_str_radix(c, 16).ok())
    })(input)
}

pub(crate) fn hexadecimal_string(input: &[u8]) -> NomResult<Object> {
    map(
        delimited(
            tag(b"<"),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || (Vec::new(), false),
                    |(mut out, high), digit| {
                        if high {
                            if let Some(last) = out.last_mut() {
                                *last |= digit;
                            }
                            (out, false)
                        } else {
                            // Odd-length strings pad a trailing zero.
                            out.push(digit << 4);
                            (out, true)
                        }
                    },
                ),
                white_space,
            ),
            tag(b">"),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    )(input)
}

fn boolean(input: &[u8]) -> NomResult<Object> {
    alt((
        map(tag(b"true"), |_| Object::Boolean(true)),
        map(tag(b"false"), |_| Object::Boolean(false)),
    ))(input)
}

fn null(input: &[u8]) -> NomResult<Object> {
    map(tag(b"null"), |_| Object::Null)(input)
}

fn array(input: &[u8]) -> NomResult<Vec<Object>> {
    delimited(pair(tag(b"["), space), many0(direct_object_spaced), tag(b"]"))(input)
}

pub(crate) fn dictionary(input: &[u8]) -> NomResult<Dictionary> {
    delimited(
        pair(tag(b"<<"), space),
        fold_many0(
            pair(terminated(name, space), direct_object_spaced),
            Dictionary::new,
            |mut dict, (key, value)| {
                dict.set(key, value);
                dict
            },
        ),
        tag(b">>"),
    )(input)
}

fn unsigned_int<I: FromStr>(input: &[u8]) -> NomResult<I> {
    map_res(digit1, |digits: &[u8]| I::from_str(str::from_utf8(digits).unwrap_or("")))(input)
}

pub(crate) fn object_id(input: &[u8]) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space))(input)
}

fn reference(input: &[u8]) -> NomResult<Object> {
    map(terminated(object_id, tag(b"R")), Object::Reference)(input)
}

pub(crate) fn direct_objects(input: &[u8]) -> NomResult<Object> {
    alt((
        null,
        boolean,
        reference,
        map(real, Object::Real),
        map(integer, Object::Integer),
        map(name, Object::Name),
        map(literal_string, Object::string_literal),
        hexadecimal_string,
        map(array, Object::Array),
        map(dictionary, Object::Dictionary),
    ))(input)
}

fn direct_object_spaced(input: &[u8]) -> NomResult<Object> {
    terminated(direct_objects, space)(input)
}

/// Parse one direct object (no stream, no indirect header) from the front
/// of `input`.
pub fn direct_object(input: &[u8]) -> Option<Object> {
    strip(direct_object_spaced(input))
}

/// Resolves a stream's `Length` when the parser meets a forward reference.
pub(crate) type LengthResolver<'r> = dyn Fn(ObjectId) -> Option<i64> + 'r;

fn stream<'a>(input: &'a [u8], resolve_length: &LengthResolver) -> NomResult<'a, Object> {
    let (body, dict) = terminated(
        dictionary,
        tuple((space, tag(b"stream"), opt(tag(b"\r")), tag(b"\n"))),
    )(input)?;

    let declared = dict.get_opt(b"Length").and_then(|value| match value {
        Object::Integer(n) => Some(*n),
        Object::Reference(id) => resolve_length(*id),
        _ => None,
    });

    let body_offset = input.len() - body.len();
    match declared {
        Some(length) if length >= 0 && (length as usize) <= body.len() => {
            let (rest, data) = terminated(take(length as usize), pair(opt(eol), tag(b"endstream")))(body)?;
            let mut stream = Stream::new(dict, data.to_vec());
            stream.start_position = Some(body_offset);
            Ok((rest, Object::Stream(stream)))
        }
        _ => {
            // Unresolvable or broken Length: the body runs to the next
            // endstream keyword, minus one trailing end-of-line.
            let end = find_subslice(body, b"endstream").ok_or_else(|| {
                nom::Err::Failure(nom::error::Error::new(body, nom::error::ErrorKind::TakeUntil))
            })?;
            let mut data = &body[..end];
            if data.ends_with(b"\r\n") {
                data = &data[..data.len() - 2];
            } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
                data = &data[..data.len() - 1];
            }
            let rest = &body[end + b"endstream".len()..];
            let mut stream = Stream::new(dict, data.to_vec());
            stream.start_position = Some(body_offset);
            Ok((rest, Object::Stream(stream)))
        }
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Parse an indirect object (`N G obj … endobj`) at `offset` into `buf`.
pub(crate) fn indirect_object(
    buf: &[u8],
    offset: usize,
    expected_id: Option<ObjectId>,
    resolve_length: &LengthResolver,
) -> CrateResult<(ObjectId, Object)> {
    let input = buf.get(offset..).ok_or(Error::Offset(offset))?;

    let (i, (_, id)) = terminated(tuple((space, object_id)), pair(tag(b"obj"), space))(input)
        .map_err(|_| Error::Parse { offset })?;
    if let Some(expected) = expected_id {
        if id != expected {
            return Err(Error::ObjectIdMismatch(expected));
        }
    }

    let (_, object) = terminated(
        |i| alt((|i| stream(i, resolve_length), direct_objects))(i),
        tuple((space, opt(tag(b"endobj")), space)),
    )(i)
    .map_err(|_| Error::Parse { offset })?;

    // Stream body positions are relative to the object header; lift them to
    // absolute file offsets.
    let object = match object {
        Object::Stream(mut stream) => {
            stream.start_position = stream
                .start_position
                .and_then(|p| p.checked_add(offset + (input.len() - i.len())));
            Object::Stream(stream)
        }
        other => other,
    };

    Ok((id, object))
}

/// `%PDF-M.N` plus any binary-marker comment lines.
pub fn header(input: &[u8]) -> Option<String> {
    strip(map_res(
        delimited(
            tag(b"%PDF-"),
            take_while(|c: u8| !b"\r\n".contains(&c)),
            pair(eol, many0_count(comment)),
        ),
        |version: &[u8]| str::from_utf8(version).map(Into::into),
    )(input))
}

/// Classic cross-reference table.
pub(crate) fn xref_table(input: &[u8]) -> NomResult<Xref> {
    let xref_eol = map(alt((tag(b" \r"), tag(b" \n"), tag(b"\r\n"))), |_| ());
    let entry = pair(
        separated_pair(unsigned_int::<u32>, tag(b" "), unsigned_int::<u32>),
        delimited(tag(b" "), map(one_of("nf"), |k| k == 'n'), xref_eol),
    );
    let section = pair(
        separated_pair(unsigned_int::<usize>, tag(b" "), unsigned_int::<u32>),
        preceded(pair(opt(tag(b" ")), eol), many0(entry)),
    );

    delimited(
        pair(tag(b"xref"), eol),
        fold_many1(
            section,
            || Xref::new(0, XrefType::Table),
            |mut xref, ((start, _count), entries)| {
                for (index, ((field2, field3), in_use)) in entries.into_iter().enumerate() {
                    let id = (start + index) as u32;
                    let entry = if in_use {
                        match u16::try_from(field3) {
                            Ok(generation) => XrefEntry::InUse {
                                offset: field2,
                                generation,
                            },
                            Err(_) => continue,
                        }
                    } else {
                        XrefEntry::Free {
                            next: field2,
                            generation: field3.min(u32::from(u16::MAX)) as u16,
                        }
                    };
                    xref.insert(id, entry);
                }
                xref
            },
        ),
        space,
    )(input)
}

pub(crate) fn trailer(input: &[u8]) -> NomResult<Dictionary> {
    delimited(pair(tag(b"trailer"), space), dictionary, space)(input)
}

/// Classic `xref … trailer <<…>>` section.
pub(crate) fn xref_and_trailer(input: &[u8]) -> CrateResult<(Xref, Dictionary)> {
    let (mut xref, trailer) =
        strip(pair(xref_table, trailer)(input)).ok_or(Error::Xref(crate::error::XrefError::Parse))?;
    xref.size = trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .map_err(|_| Error::Trailer)? as u32;
    Ok((xref, trailer))
}

pub(crate) fn xref_start(input: &[u8]) -> Option<i64> {
    strip(delimited(
        pair(tag(b"startxref"), eol),
        integer,
        tuple((eol, tag(b"%%EOF"), space)),
    )(input))
}

/// Scan the whole buffer for `N G obj` markers.
///
/// Used to rebuild the table when every declared xref section is damaged.
/// Later definitions of the same object number win, matching the
/// incremental-update rule.
pub(crate) fn scan_object_markers(buf: &[u8]) -> Vec<(ObjectId, usize)> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(hit) = find_subslice(&buf[pos..], b"obj") {
        let at = pos + hit;
        pos = at + 3;
        // The keyword must stand alone and terminate `N G obj`.
        if at == 0 || !is_whitespace(buf[at - 1]) {
            continue;
        }
        if buf.get(at + 3).is_some_and(|&c| is_regular(c)) {
            continue;
        }
        let before = &buf[..at];
        let Some((gen, before)) = trailing_number(strip_one_separator(before)) else {
            continue;
        };
        let Some((num, before)) = trailing_number(strip_one_separator(before)) else {
            continue;
        };
        if !before.is_empty() && !is_whitespace(before[before.len() - 1]) {
            continue;
        }
        let (Ok(num), Ok(gen)) = (u32::from_str(num), u16::from_str(gen)) else {
            continue;
        };
        found.push(((num, gen), before.len()));
    }
    found
}

fn strip_one_separator(buf: &[u8]) -> &[u8] {
    match buf.last() {
        Some(&c) if is_whitespace(c) => &buf[..buf.len() - 1],
        _ => buf,
    }
}

fn trailing_number(buf: &[u8]) -> Option<(&str, &[u8])> {
    let end = buf.len();
    let start = buf
        .iter()
        .rposition(|c| !c.is_ascii_digit())
        .map(|p| p + 1)
        .unwrap_or(0);
    if start == end {
        return None;
    }
    str::from_utf8(&buf[start..end]).ok().map(|s| (s, &buf[..start]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete<O>(r: NomResult<O>) -> Option<O> {
        r.ok().and_then(|(rest, o)| rest.is_empty().then_some(o))
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(complete(integer(b"42")), Some(42));
        assert_eq!(complete(integer(b"-7")), Some(-7));
        assert_eq!(complete(real(b"0.12")), Some(0.12));
        assert_eq!(complete(real(b"-.12")), Some(-0.12));
        assert_eq!(complete(real(b"+.5")), Some(0.5));
        assert_eq!(complete(real(b"10.")), Some(10.0));
        // Overflowing integers are malformed, not silently wrapped.
        assert!(complete(integer(b"99999999999999999999")).is_none());
    }

    #[test]
    fn parse_literal_strings() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"()", b""),
            (b"(text())", b"text()"),
            (b"(text\\0\\53\\053\\0053)", b"text\0++\x053"),
            (b"(line\\\ncontinued)", b"linecontinued"),
            (b"(a\r\nb)", b"a\nb"),
            (b"(a\rb)", b"a\nb"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                complete(literal_string(input)).as_deref(),
                Some(*expected),
                "input {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn unterminated_string_is_malformed() {
        assert!(complete(literal_string(b"(no close")).is_none());
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut hostile = vec![b'('; MAX_BRACKET + 2];
        hostile.extend(vec![b')'; MAX_BRACKET + 2]);
        assert!(complete(literal_string(&hostile)).is_none());
    }

    #[test]
    fn parse_hex_strings() {
        match complete(hexadecimal_string(b"<901FA>")) {
            Some(Object::String(s, _)) => assert_eq!(s, b"\x90\x1F\xA0"),
            other => panic!("unexpected {other:?}"),
        }
        match complete(hexadecimal_string(b"<9 01F A>")) {
            Some(Object::String(s, _)) => assert_eq!(s, b"\x90\x1F\xA0"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!(complete(name(b"/ABC#5f")), Some(b"ABC\x5F".to_vec()));
        assert_eq!(complete(name(b"/#cb#ce#cc#e5")), Some(b"\xcb\xce\xcc\xe5".to_vec()));
        // The empty name is legal.
        assert_eq!(complete(name(b"/")), Some(Vec::new()));
    }

    #[test]
    fn parse_dictionary_with_comment() {
        let dict = direct_object(b"<< % page node\n/Type /Page /Rotate 90 >>").unwrap();
        let dict = dict.as_dict().unwrap();
        assert!(dict.has_type(b"Page"));
        assert_eq!(dict.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    }

    #[test]
    fn references_win_over_integers() {
        let obj = direct_object(b"12 0 R ").unwrap();
        assert_eq!(obj.as_reference().unwrap(), (12, 0));
        let obj = direct_object(b"12 0").unwrap();
        assert_eq!(obj.as_i64().unwrap(), 12);
    }

    #[test]
    fn parse_indirect_stream_with_direct_length() {
        let buf = b"7 0 obj\n<< /Length 5 >>\nstream\nhello\nendstream\nendobj\n";
        let (id, obj) = indirect_object(buf, 0, None, &|_| None).unwrap();
        assert_eq!(id, (7, 0));
        assert_eq!(obj.as_stream().unwrap().content, b"hello");
    }

    #[test]
    fn parse_indirect_stream_with_forward_length() {
        let buf = b"7 0 obj << /Length 8 0 R >> stream\nbody\nendstream endobj";
        // Resolver answers the forward reference.
        let (_, obj) = indirect_object(buf, 0, None, &|id| (id == (8, 0)).then_some(4)).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"body");
        // Without an answer the body is sliced at the endstream keyword.
        let (_, obj) = indirect_object(buf, 0, None, &|_| None).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"body");
    }

    #[test]
    fn parse_header_line() {
        assert_eq!(header(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n").as_deref(), Some("1.7"));
        assert!(header(b"PDF-1.7\n").is_none());
    }

    #[test]
    fn parse_classic_xref() {
        let input = b"xref\n0 3\n0000000000 65535 f \n0000000017 00000 n \n0000000081 00000 n \ntrailer\n<< /Size 3 /Root 2 0 R >>\n";
        let (xref, trailer) = xref_and_trailer(input).unwrap();
        assert_eq!(xref.size, 3);
        assert!(matches!(
            xref.get(1),
            Some(XrefEntry::InUse { offset: 17, generation: 0 })
        ));
        assert!(matches!(xref.get(0), Some(XrefEntry::Free { .. })));
        assert_eq!(trailer.get(b"Root").unwrap().as_reference().unwrap(), (2, 0));
    }

    #[test]
    fn parse_startxref() {
        assert_eq!(xref_start(b"startxref\n1234\n%%EOF"), Some(1234));
    }

    #[test]
    fn marker_scan_finds_objects() {
        let buf = b"%PDF-1.4\n1 0 obj\n(a)\nendobj\ntrash 2 0 obj\n(b)\nendobj\n";
        let markers = scan_object_markers(buf);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].0, (1, 0));
        assert_eq!(markers[1].0, (2, 0));
        assert_eq!(&buf[markers[1].1..markers[1].1 + 7], b"2 0 obj");
    }
}
