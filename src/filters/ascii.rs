//! The two reversible textual encodings.

use crate::error::DecodeError;
use crate::Result;

/// `ASCIIHexDecode`: hex digits with optional whitespace, terminated by `>`.
/// An odd digit count pads a trailing zero.
pub fn asciihex_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &byte in data {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() || byte == 0 {
            continue;
        }
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return Err(DecodeError::AsciiHex("invalid hex digit").into()),
        };
        match high.take() {
            None => high = Some(digit),
            Some(h) => output.push((h << 4) | digit),
        }
    }
    if let Some(h) = high {
        output.push(h << 4);
    }
    Ok(output)
}

pub fn asciihex_encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 2 + 1);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 && i % 40 == 0 {
            output.push(b'\n');
        }
        output.push(HEX[(byte >> 4) as usize]);
        output.push(HEX[(byte & 0x0F) as usize]);
    }
    output.push(b'>');
    output
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// `ASCII85Decode`: base-85 groups in `!`..`u`, `z` for an all-zero group,
/// terminated by `~>`.
pub fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let body = match crate::parser::find_subslice(data, b"~>") {
        Some(end) => &data[..end],
        None => {
            log::warn!("ASCII85 stream is missing its ~> marker");
            data
        }
    };

    let mut output = Vec::with_capacity(body.len() * 4 / 5);
    let mut group: u32 = 0;
    let mut count = 0usize;
    for &byte in body {
        if byte == b'z' {
            if count != 0 {
                return Err(DecodeError::Ascii85("z inside a group").into());
            }
            output.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        if !(b'!'..=b'u').contains(&byte) {
            return Err(DecodeError::Ascii85("byte outside the base-85 alphabet").into());
        }
        group = group
            .checked_mul(85)
            .and_then(|g| g.checked_add(u32::from(byte - b'!')))
            .ok_or(DecodeError::Ascii85("group overflows 32 bits"))?;
        count += 1;
        if count == 5 {
            output.extend_from_slice(&group.to_be_bytes());
            group = 0;
            count = 0;
        }
    }

    match count {
        0 => {}
        1 => return Err(DecodeError::Ascii85("single trailing digit").into()),
        _ => {
            // A short final group decodes count-1 bytes, padding with 'u'.
            for _ in count..5 {
                group = group
                    .checked_mul(85)
                    .and_then(|g| g.checked_add(84))
                    .ok_or(DecodeError::Ascii85("group overflows 32 bits"))?;
            }
            output.extend_from_slice(&group.to_be_bytes()[..count - 1]);
        }
    }
    Ok(output)
}

pub fn ascii85_encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 5 / 4 + 2);
    let mut column = 0usize;
    let mut put = |output: &mut Vec<u8>, byte: u8| {
        output.push(byte);
        column += 1;
        if column == 75 {
            output.push(b'\n');
            column = 0;
        }
    };

    for chunk in data.chunks(4) {
        let mut group = 0u32;
        for (i, &byte) in chunk.iter().enumerate() {
            group |= u32::from(byte) << (8 * (3 - i));
        }
        if group == 0 && chunk.len() == 4 {
            put(&mut output, b'z');
            continue;
        }
        let mut digits = [0u8; 5];
        let mut value = group;
        for slot in digits.iter_mut().rev() {
            *slot = (value % 85) as u8 + b'!';
            value /= 85;
        }
        for &digit in digits.iter().take(chunk.len() + 1) {
            put(&mut output, digit);
        }
    }
    output.extend_from_slice(b"~>");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::Error;

    #[test]
    fn hex_decodes_with_whitespace_and_padding() {
        assert_eq!(asciihex_decode(b"90 1f a>").unwrap(), b"\x90\x1F\xA0");
        assert_eq!(asciihex_decode(b"48656C6C6F>").unwrap(), b"Hello");
        assert!(asciihex_decode(b"9X>").is_err());
    }

    #[test]
    fn ascii85_known_group() {
        assert_eq!(ascii85_decode(b"F*2M7~>").unwrap(), b"sure");
        assert_eq!(ascii85_encode(b"sure"), b"F*2M7~>");
    }

    #[test]
    fn ascii85_zero_groups_shorten() {
        let encoded = ascii85_encode(&[0, 0, 0, 0, 1]);
        assert!(encoded.starts_with(b"z"));
        assert_eq!(ascii85_decode(&encoded).unwrap(), vec![0, 0, 0, 0, 1]);
    }

    #[test]
    fn ascii85_overflow_is_detected() {
        assert!(matches!(
            ascii85_decode(b"uuuuu~>"),
            Err(Error::Decode(DecodeError::Ascii85(_)))
        ));
    }

    #[test]
    fn partial_groups_round_trip() {
        for len in 0..9usize {
            let data: Vec<u8> = (0..len as u8).map(|v| v.wrapping_mul(91)).collect();
            assert_eq!(ascii85_decode(&ascii85_encode(&data)).unwrap(), data, "len {len}");
        }
    }
}
