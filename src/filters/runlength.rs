//! `RunLengthDecode`: byte-oriented RLE with 128 as the end-of-data marker.
//!
//! A length byte 0..=127 is followed by that many+1 literal bytes; a length
//! byte 129..=255 repeats the following byte 257-length times.

use crate::error::DecodeError;
use crate::Result;

pub fn runlength_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut pos = 0;
    while pos < data.len() {
        let length = data[pos];
        pos += 1;
        match length {
            0..=127 => {
                let count = length as usize + 1;
                let literal = data.get(pos..pos + count).ok_or(DecodeError::RunLength)?;
                output.extend_from_slice(literal);
                pos += count;
            }
            128 => return Ok(output),
            129..=255 => {
                let &byte = data.get(pos).ok_or(DecodeError::RunLength)?;
                pos += 1;
                output.extend(std::iter::repeat(byte).take(257 - length as usize));
            }
        }
    }
    // Missing end marker; everything decoded cleanly, so accept it.
    log::warn!("run-length data is missing its end marker");
    Ok(output)
}

pub fn runlength_encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 128 + 2);
    let mut pos = 0;
    while pos < data.len() {
        let byte = data[pos];
        let mut run = 1;
        while run < 128 && data.get(pos + run) == Some(&byte) {
            run += 1;
        }
        if run >= 2 {
            output.push((257 - run) as u8);
            output.push(byte);
            pos += run;
            continue;
        }
        // Literal stretch up to the next 2-byte run or the 128-byte cap.
        let mut end = pos + 1;
        while end < data.len() && end - pos < 128 {
            if end + 1 < data.len() && data[end] == data[end + 1] {
                break;
            }
            end += 1;
        }
        output.push((end - pos - 1) as u8);
        output.extend_from_slice(&data[pos..end]);
        pos = end;
    }
    output.push(128);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_and_literals_round_trip() {
        let cases: &[&[u8]] = &[
            b"",
            b"a",
            b"aaaaaaa",
            b"abcdef",
            b"aabbaabbxyzzzzzzzzzzzzq",
            &[0u8; 300],
        ];
        for &data in cases {
            let encoded = runlength_encode(data);
            assert_eq!(runlength_decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn decode_handles_the_end_marker() {
        // Two literals, then EOD, then trailing garbage that must be ignored.
        assert_eq!(runlength_decode(&[1, b'h', b'i', 128, 99]).unwrap(), b"hi");
    }

    #[test]
    fn truncated_run_is_an_error() {
        assert!(runlength_decode(&[5, b'x']).is_err());
        assert!(runlength_decode(&[200]).is_err());
    }
}
