//! Stream filter pipeline.
//!
//! Filters compose as byte-stream transformers: decoding applies the
//! declared chain in order, encoding applies the inverse chain in reverse.
//! DCT, JBIG2 and JPX bodies are opaque and pass through bit-for-bit.

mod ascii;
mod ccitt;
mod predictor;
mod runlength;

pub use ascii::{ascii85_decode, ascii85_encode, asciihex_decode, asciihex_encode};
pub use predictor::{apply_predictor, undo_predictor};
pub use runlength::{runlength_decode, runlength_encode};

use crate::error::DecodeError;
use crate::{Dictionary, Error, Result, Stream};
use log::warn;
use std::io::prelude::*;

/// Filter chains deeper than this are treated as hostile input.
pub const MAX_FILTER_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    Ascii85,
    AsciiHex,
    RunLength,
    CcittFax,
    Dct,
    Jbig2,
    Jpx,
    Crypt,
}

impl Filter {
    pub fn from_name(name: &[u8]) -> Option<Filter> {
        match name {
            b"FlateDecode" | b"Fl" => Some(Filter::Flate),
            b"LZWDecode" | b"LZW" => Some(Filter::Lzw),
            b"ASCII85Decode" | b"A85" => Some(Filter::Ascii85),
            b"ASCIIHexDecode" | b"AHx" => Some(Filter::AsciiHex),
            b"RunLengthDecode" | b"RL" => Some(Filter::RunLength),
            b"CCITTFaxDecode" | b"CCF" => Some(Filter::CcittFax),
            b"DCTDecode" | b"DCT" => Some(Filter::Dct),
            b"JBIG2Decode" => Some(Filter::Jbig2),
            b"JPXDecode" => Some(Filter::Jpx),
            b"Crypt" => Some(Filter::Crypt),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::Flate => "FlateDecode",
            Filter::Lzw => "LZWDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::RunLength => "RunLengthDecode",
            Filter::CcittFax => "CCITTFaxDecode",
            Filter::Dct => "DCTDecode",
            Filter::Jbig2 => "JBIG2Decode",
            Filter::Jpx => "JPXDecode",
            Filter::Crypt => "Crypt",
        }
    }

    /// Image codecs the core carries through untouched.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Filter::Dct | Filter::Jbig2 | Filter::Jpx)
    }
}

/// Apply one filter's decoder.
pub fn decode(data: &[u8], filter: Filter, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    match filter {
        Filter::Flate => {
            let raw = flate_decode(data)?;
            undo_predictor(raw, params)
        }
        Filter::Lzw => {
            let raw = lzw_decode(data, params)?;
            undo_predictor(raw, params)
        }
        Filter::Ascii85 => ascii85_decode(data),
        Filter::AsciiHex => asciihex_decode(data),
        Filter::RunLength => runlength_decode(data),
        Filter::CcittFax => ccitt::decode(data, params),
        Filter::Dct | Filter::Jbig2 | Filter::Jpx => Ok(data.to_vec()),
        Filter::Crypt => Err(Error::UnsupportedFilter("Crypt".into())),
    }
}

/// Apply one filter's encoder.
pub fn encode(data: &[u8], filter: Filter, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    match filter {
        Filter::Flate => {
            let staged = apply_predictor(data, params)?;
            Ok(flate_encode(&staged))
        }
        Filter::Lzw => {
            let staged = apply_predictor(data, params)?;
            lzw_encode(&staged, params)
        }
        Filter::Ascii85 => Ok(ascii85_encode(data)),
        Filter::AsciiHex => Ok(asciihex_encode(data)),
        Filter::RunLength => Ok(runlength_encode(data)),
        Filter::Dct | Filter::Jbig2 | Filter::Jpx => Ok(data.to_vec()),
        Filter::CcittFax | Filter::Crypt => Err(Error::UnsupportedFilter(filter.name().into())),
    }
}

/// Decode a stream body through its whole declared chain.
pub fn decode_stream(stream: &Stream, max_depth: usize) -> Result<Vec<u8>> {
    let names = stream.filters()?;
    if names.len() > max_depth {
        return Err(DecodeError::TooDeep.into());
    }
    let parms = stream.decode_parms(names.len());

    let mut data = stream.content.clone();
    for (name, parm) in names.iter().zip(&parms) {
        let filter = Filter::from_name(name)
            .ok_or_else(|| Error::UnsupportedFilter(String::from_utf8_lossy(name).into_owned()))?;
        data = decode(&data, filter, parm.as_ref())?;
    }
    Ok(data)
}

/// Encode plain bytes into the body a stream with this chain declares.
/// Filters are given in decoding order, as they appear in `Filter`.
pub fn encode_chain(data: &[u8], chain: &[(Filter, Option<Dictionary>)]) -> Result<Vec<u8>> {
    let mut data = data.to_vec();
    for (filter, parm) in chain.iter().rev() {
        data = encode(&data, *filter, parm.as_ref())?;
    }
    Ok(data)
}

pub fn flate_encode(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

pub fn flate_decode(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut decoder = ZlibDecoder::new(data);
    decoder.read_to_end(&mut output).map_err(|err| {
        warn!("flate stream damaged: {err}");
        Error::Decode(DecodeError::Flate)
    })?;
    Ok(output)
}

const LZW_MIN_BITS: u8 = 9;

fn early_change(params: Option<&Dictionary>) -> bool {
    params
        .and_then(|p| p.get_opt(b"EarlyChange"))
        .and_then(|v| v.as_i64().ok())
        .map(|v| v != 0)
        .unwrap_or(true)
}

pub fn lzw_decode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use weezl::{decode::Decoder, BitOrder};

    let mut decoder = if early_change(params) {
        Decoder::with_tiff_size_switch(BitOrder::Msb, LZW_MIN_BITS - 1)
    } else {
        Decoder::new(BitOrder::Msb, LZW_MIN_BITS - 1)
    };
    let mut output = Vec::new();
    let result = decoder.into_stream(&mut output).decode_all(data);
    if let Err(err) = result.status {
        warn!("LZW stream damaged: {err}");
        return Err(DecodeError::Lzw.into());
    }
    Ok(output)
}

pub fn lzw_encode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use weezl::{encode::Encoder, BitOrder};

    let mut encoder = if early_change(params) {
        Encoder::with_tiff_size_switch(BitOrder::Msb, LZW_MIN_BITS - 1)
    } else {
        Encoder::new(BitOrder::Msb, LZW_MIN_BITS - 1)
    };
    let mut output = Vec::new();
    let result = encoder.into_stream(&mut output).encode_all(data);
    if let Err(err) = result.status {
        warn!("LZW encode failed: {err}");
        return Err(DecodeError::Lzw.into());
    }
    Ok(output)
}
