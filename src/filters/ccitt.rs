//! `CCITTFaxDecode`, decode only.
//!
//! Group 4 (`K < 0`) is handled through the `fax` crate; the 1-D and mixed
//! Group 3 variants surface as unsupported. Output is packed one bit per
//! pixel with rows padded to byte boundaries, 0 = black unless `BlackIs1`.

use crate::error::DecodeError;
use crate::{Dictionary, Error, Object, Result};
use fax::decoder::{decode_g4, pels};
use fax::Color;

pub fn decode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let get = |key: &[u8], default: i64| {
        params
            .and_then(|p| p.get_opt(key))
            .and_then(|v| Object::as_i64(v).ok())
            .unwrap_or(default)
    };
    let k = get(b"K", 0);
    if k >= 0 {
        return Err(Error::UnsupportedFilter("CCITTFaxDecode with K >= 0".into()));
    }
    let columns = get(b"Columns", 1728);
    if !(1..=i64::from(u16::MAX)).contains(&columns) {
        return Err(DecodeError::Ccitt.into());
    }
    let columns = columns as u16;
    let rows = get(b"Rows", 0);
    let height = u16::try_from(rows).ok().filter(|r| *r > 0);
    let black_is_one = params
        .and_then(|p| p.get_opt(b"BlackIs1"))
        .and_then(|v| v.as_bool().ok())
        .unwrap_or(false);

    let row_bytes = (columns as usize).div_ceil(8);
    let mut output = Vec::with_capacity(row_bytes * height.map_or(64, usize::from));
    let mut decoded_rows = 0usize;
    let _ = decode_g4(data.iter().copied(), columns, height, |transitions| {
        let mut byte = 0u8;
        let mut filled = 0u8;
        for color in pels(transitions, columns) {
            let bit = match (color, black_is_one) {
                (Color::Black, false) | (Color::White, true) => 0,
                _ => 1,
            };
            byte = (byte << 1) | bit;
            filled += 1;
            if filled == 8 {
                output.push(byte);
                byte = 0;
                filled = 0;
            }
        }
        if filled > 0 {
            output.push(byte << (8 - filled));
        }
        decoded_rows += 1;
    });

    if decoded_rows == 0 || output.len() != decoded_rows * row_bytes {
        return Err(DecodeError::Ccitt.into());
    }
    Ok(output)
}
