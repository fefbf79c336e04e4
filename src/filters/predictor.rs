//! PNG-family and TIFF predictors applied around Flate and LZW.
//!
//! Predicted data is laid out in rows; PNG rows carry a leading row-type
//! byte, TIFF rows are plain horizontal differences.

use crate::error::DecodeError;
use crate::{Dictionary, Object, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RowFilter {
    None = 0,
    Sub = 1,
    Up = 2,
    Avg = 3,
    Paeth = 4,
}

impl RowFilter {
    fn from_u8(value: u8) -> Option<RowFilter> {
        match value {
            0 => Some(RowFilter::None),
            1 => Some(RowFilter::Sub),
            2 => Some(RowFilter::Up),
            3 => Some(RowFilter::Avg),
            4 => Some(RowFilter::Paeth),
            _ => None,
        }
    }
}

struct Layout {
    predictor: i64,
    row_bytes: usize,
    bytes_per_pixel: usize,
}

fn layout(params: Option<&Dictionary>) -> Layout {
    let get = |key: &[u8], default: i64| {
        params
            .and_then(|p| p.get_opt(key))
            .and_then(|v| v.as_i64().ok())
            .unwrap_or(default)
    };
    let predictor = get(b"Predictor", 1);
    let columns = get(b"Columns", 1).max(1) as usize;
    let colors = get(b"Colors", 1).max(1) as usize;
    let bits = get(b"BitsPerComponent", 8).max(1) as usize;
    Layout {
        predictor,
        row_bytes: (columns * colors * bits).div_ceil(8),
        bytes_per_pixel: (colors * bits).div_ceil(8).max(1),
    }
}

/// Reverse the declared predictor after Flate/LZW decoding.
pub fn undo_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let layout = layout(params);
    match layout.predictor {
        1 => Ok(data),
        2 => tiff_undo(data, params, &layout),
        10..=15 => png_decode_frame(&data, &layout),
        _ => Err(DecodeError::Predictor("unknown Predictor value").into()),
    }
}

/// Apply the declared predictor before Flate/LZW encoding.
pub fn apply_predictor(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let layout = layout(params);
    match layout.predictor {
        1 => Ok(data.to_vec()),
        2 => tiff_apply(data.to_vec(), params, &layout),
        10..=15 => png_encode_frame(data, &layout),
        _ => Err(DecodeError::Predictor("unknown Predictor value").into()),
    }
}

fn png_decode_frame(content: &[u8], layout: &Layout) -> Result<Vec<u8>> {
    let stride = layout.row_bytes + 1;
    if layout.row_bytes == 0 || content.len() % stride != 0 {
        return Err(DecodeError::Predictor("frame is not a whole number of rows").into());
    }
    let mut previous = vec![0u8; layout.row_bytes];
    let mut decoded = Vec::with_capacity(content.len());
    for row in content.chunks(stride) {
        let filter = RowFilter::from_u8(row[0]).ok_or(DecodeError::Predictor("invalid row-type byte"))?;
        let mut current = row[1..].to_vec();
        decode_row(filter, layout.bytes_per_pixel, &previous, &mut current);
        decoded.extend_from_slice(&current);
        previous = current;
    }
    Ok(decoded)
}

fn png_encode_frame(content: &[u8], layout: &Layout) -> Result<Vec<u8>> {
    if layout.row_bytes == 0 || content.len() % layout.row_bytes != 0 {
        return Err(DecodeError::Predictor("frame is not a whole number of rows").into());
    }
    // 10 encodes rows unfiltered; 15 ("optimal") settles on Paeth.
    let filter = match layout.predictor {
        10 => RowFilter::None,
        11 => RowFilter::Sub,
        12 => RowFilter::Up,
        13 => RowFilter::Avg,
        _ => RowFilter::Paeth,
    };
    let mut previous = vec![0u8; layout.row_bytes];
    let mut encoded = Vec::with_capacity(content.len() + content.len() / layout.row_bytes);
    for row in content.chunks(layout.row_bytes) {
        let mut current = row.to_vec();
        encode_row(filter, layout.bytes_per_pixel, &previous, &mut current);
        encoded.push(filter as u8);
        encoded.extend_from_slice(&current);
        previous = row.to_vec();
    }
    Ok(encoded)
}

fn tiff_undo(mut data: Vec<u8>, params: Option<&Dictionary>, layout: &Layout) -> Result<Vec<u8>> {
    let colors = tiff_colors(params)?;
    for row in data.chunks_mut(layout.row_bytes.max(1)) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(data)
}

fn tiff_apply(mut data: Vec<u8>, params: Option<&Dictionary>, layout: &Layout) -> Result<Vec<u8>> {
    let colors = tiff_colors(params)?;
    for row in data.chunks_mut(layout.row_bytes.max(1)) {
        for i in (colors..row.len()).rev() {
            row[i] = row[i].wrapping_sub(row[i - colors]);
        }
    }
    Ok(data)
}

fn tiff_colors(params: Option<&Dictionary>) -> Result<usize> {
    let bits = params
        .and_then(|p| p.get_opt(b"BitsPerComponent"))
        .and_then(|v| Object::as_i64(v).ok())
        .unwrap_or(8);
    if bits != 8 {
        return Err(DecodeError::Predictor("TIFF predictor supports 8-bit components only").into());
    }
    Ok(params
        .and_then(|p| p.get_opt(b"Colors"))
        .and_then(|v| Object::as_i64(v).ok())
        .unwrap_or(1)
        .max(1) as usize)
}

fn paeth_predict(left: u8, above: u8, upper_left: u8) -> u8 {
    let estimate = i16::from(left) + i16::from(above) - i16::from(upper_left);
    let dist_left = (estimate - i16::from(left)).abs();
    let dist_above = (estimate - i16::from(above)).abs();
    let dist_upper_left = (estimate - i16::from(upper_left)).abs();
    if dist_left <= dist_above && dist_left <= dist_upper_left {
        left
    } else if dist_above <= dist_upper_left {
        above
    } else {
        upper_left
    }
}

fn decode_row(filter: RowFilter, bpp: usize, previous: &[u8], current: &mut [u8]) {
    let len = current.len();
    match filter {
        RowFilter::None => (),
        RowFilter::Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        RowFilter::Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        RowFilter::Avg => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(previous[i] / 2);
            }
            for i in bpp..len {
                let average = ((i16::from(current[i - bpp]) + i16::from(previous[i])) / 2) as u8;
                current[i] = current[i].wrapping_add(average);
            }
        }
        RowFilter::Paeth => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(paeth_predict(0, previous[i], 0));
            }
            for i in bpp..len {
                current[i] = current[i].wrapping_add(paeth_predict(current[i - bpp], previous[i], previous[i - bpp]));
            }
        }
    }
}

fn encode_row(filter: RowFilter, bpp: usize, previous: &[u8], current: &mut [u8]) {
    let len = current.len();
    match filter {
        RowFilter::None => (),
        RowFilter::Sub => {
            for i in (bpp..len).rev() {
                current[i] = current[i].wrapping_sub(current[i - bpp]);
            }
        }
        RowFilter::Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_sub(previous[i]);
            }
        }
        RowFilter::Avg => {
            for i in (bpp..len).rev() {
                let average = ((i16::from(current[i - bpp]) + i16::from(previous[i])) / 2) as u8;
                current[i] = current[i].wrapping_sub(average);
            }
            for i in 0..bpp {
                current[i] = current[i].wrapping_sub(previous[i] / 2);
            }
        }
        RowFilter::Paeth => {
            for i in (bpp..len).rev() {
                current[i] = current[i].wrapping_sub(paeth_predict(current[i - bpp], previous[i], previous[i - bpp]));
            }
            for i in 0..bpp {
                current[i] = current[i].wrapping_sub(paeth_predict(0, previous[i], 0));
            }
        }
    }
}
