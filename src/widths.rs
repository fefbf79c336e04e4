//! Glyph-width codecs for simple and composite fonts.
//!
//! Simple fonts carry `FirstChar`/`LastChar`/`Widths`. Composite fonts
//! carry a `W` array mixing range records `[first last w]` and explicit
//! records `[first [w0 w1 …]]`; the encoder picks the shortest mix by
//! dynamic programming over the serialised record lengths.

use crate::{writer, Dictionary, Error, Object, Result};
use std::collections::BTreeMap;

/// Width comparisons use this tolerance.
pub const WIDTH_EPSILON: f64 = 1e-6;

/// Explicit records longer than this never pay off against splitting.
const MAX_EXPLICIT_SPAN: usize = 128;

/// `FirstChar`/`LastChar`/`Widths` for a simple font.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleWidths {
    pub first_char: u32,
    pub widths: Vec<f64>,
}

impl SimpleWidths {
    pub fn new(first_char: u32, widths: Vec<f64>) -> SimpleWidths {
        SimpleWidths { first_char, widths }
    }

    pub fn last_char(&self) -> u32 {
        self.first_char + self.widths.len().saturating_sub(1) as u32
    }

    /// Install the three entries into a font dictionary.
    pub fn encode_into(&self, dict: &mut Dictionary) {
        dict.set("FirstChar", i64::from(self.first_char));
        dict.set("LastChar", i64::from(self.last_char()));
        dict.set("Widths", Object::Array(self.widths.iter().map(|w| number(*w)).collect()));
    }

    /// Read the three entries back; `None` when the dictionary carries no
    /// width information (the standard-14 trimmed form).
    pub fn decode(dict: &Dictionary) -> Result<Option<SimpleWidths>> {
        let (Some(first), Some(last), Some(widths)) = (
            dict.get_opt(b"FirstChar"),
            dict.get_opt(b"LastChar"),
            dict.get_opt(b"Widths"),
        ) else {
            return Ok(None);
        };
        let first = first.as_i64()?;
        let last = last.as_i64()?;
        let widths: Vec<f64> = widths.as_array()?.iter().map(Object::as_number).collect::<Result<_>>()?;
        if first < 0 || last < first || widths.len() as i64 != last - first + 1 {
            return Err(Error::InvalidInput("FirstChar/LastChar disagree with Widths"));
        }
        Ok(Some(SimpleWidths {
            first_char: first as u32,
            widths,
        }))
    }
}

fn number(value: f64) -> Object {
    if (value - value.round()).abs() < WIDTH_EPSILON && value.abs() < i64::MAX as f64 {
        Object::Integer(value.round() as i64)
    } else {
        Object::Real(value)
    }
}

fn serialized_len(value: f64) -> usize {
    writer::serialize_object(&number(value)).len()
}

/// Encode a CID → width map as a `W` array. Entries matching
/// `default_width` within the tolerance are dropped.
pub fn encode_composite(widths: &BTreeMap<u32, f64>, default_width: f64) -> Vec<Object> {
    let significant: Vec<(u32, f64)> = widths
        .iter()
        .map(|(cid, width)| (*cid, *width))
        .filter(|(_, width)| (width - default_width).abs() > WIDTH_EPSILON)
        .collect();

    let mut out = Vec::new();
    let mut start = 0;
    while start < significant.len() {
        // A run of consecutive CIDs.
        let mut end = start + 1;
        while end < significant.len() && significant[end].0 == significant[end - 1].0 + 1 {
            end += 1;
        }
        encode_run(&significant[start..end], &mut out);
        start = end;
    }
    out
}

/// Shortest-path DP over one consecutive run.
///
/// `cost[i]` is the minimal serialised length of encoding `run[i..]`;
/// each position chooses between an explicit record over a bounded span
/// and a range record over its equal-width prefix.
fn encode_run(run: &[(u32, f64)], out: &mut Vec<Object>) {
    let n = run.len();
    let id_len = |cid: u32| cid.to_string().len();

    #[derive(Clone, Copy)]
    enum Step {
        Explicit(usize),
        Range(usize),
    }

    let mut cost = vec![usize::MAX; n + 1];
    let mut step = vec![Step::Explicit(1); n];
    cost[n] = 0;

    for i in (0..n).rev() {
        // Explicit record: "first [w0 w1 …] ".
        let mut body = id_len(run[i].0) + 3;
        let limit = (i + MAX_EXPLICIT_SPAN).min(n);
        for j in i + 1..=limit {
            body += serialized_len(run[j - 1].1) + 1;
            let total = body + cost[j];
            if total < cost[i] {
                cost[i] = total;
                step[i] = Step::Explicit(j - i);
            }
        }
        // Range record over the maximal equal-width prefix:
        // "first last w ".
        let mut j = i + 1;
        while j < n && (run[j].1 - run[i].1).abs() <= WIDTH_EPSILON {
            j += 1;
        }
        if j - i >= 2 {
            let total = id_len(run[i].0) + id_len(run[j - 1].0) + serialized_len(run[i].1) + 3 + cost[j];
            if total < cost[i] {
                cost[i] = total;
                step[i] = Step::Range(j - i);
            }
        }
    }

    let mut i = 0;
    while i < n {
        match step[i] {
            Step::Explicit(span) => {
                out.push(Object::Integer(i64::from(run[i].0)));
                out.push(Object::Array(
                    run[i..i + span].iter().map(|(_, width)| number(*width)).collect(),
                ));
                i += span;
            }
            Step::Range(span) => {
                out.push(Object::Integer(i64::from(run[i].0)));
                out.push(Object::Integer(i64::from(run[i + span - 1].0)));
                out.push(number(run[i].1));
                i += span;
            }
        }
    }
}

/// Decode a `W` array back into the CID → width map. Entries equal to
/// `default_width` within the tolerance are omitted from the result.
pub fn decode_composite(w: &[Object], default_width: f64) -> Result<BTreeMap<u32, f64>> {
    let mut out = BTreeMap::new();
    let mut insert = |cid: i64, width: f64| -> Result<()> {
        let cid = u32::try_from(cid).map_err(|_| Error::InvalidInput("negative CID in W array"))?;
        if (width - default_width).abs() > WIDTH_EPSILON {
            out.insert(cid, width);
        }
        Ok(())
    };

    let mut items = w.iter();
    while let Some(first) = items.next() {
        let first = first.as_i64()?;
        match items.next() {
            Some(Object::Array(explicit)) => {
                for (offset, width) in explicit.iter().enumerate() {
                    insert(first + offset as i64, width.as_number()?)?;
                }
            }
            Some(last_obj) => {
                let last = last_obj.as_i64()?;
                let width = items
                    .next()
                    .ok_or(Error::InvalidInput("range record is missing its width"))?
                    .as_number()?;
                if last < first {
                    return Err(Error::InvalidInput("range record runs backwards"));
                }
                for cid in first..=last {
                    insert(cid, width)?;
                }
            }
            None => return Err(Error::InvalidInput("dangling first CID in W array")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(u32, f64)]) -> BTreeMap<u32, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn simple_widths_round_trip() {
        let widths = SimpleWidths::new(32, vec![250.0, 333.0, 408.0, 500.5]);
        let mut dict = Dictionary::new();
        widths.encode_into(&mut dict);
        assert_eq!(dict.get(b"LastChar").unwrap().as_i64().unwrap(), 35);
        assert_eq!(SimpleWidths::decode(&dict).unwrap().unwrap(), widths);

        assert!(SimpleWidths::decode(&Dictionary::new()).unwrap().is_none());

        dict.set("LastChar", 99);
        assert!(SimpleWidths::decode(&dict).is_err());
    }

    #[test]
    fn equal_runs_become_one_range_record() {
        let w = encode_composite(&map(&[(10, 600.0), (11, 600.0), (12, 600.0), (13, 600.0)]), 1000.0);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].as_i64().unwrap(), 10);
        assert_eq!(w[1].as_i64().unwrap(), 13);
        assert_eq!(w[2].as_i64().unwrap(), 600);
    }

    #[test]
    fn varied_runs_become_one_explicit_record() {
        let w = encode_composite(&map(&[(7, 100.0), (8, 200.0), (9, 300.0)]), 1000.0);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].as_i64().unwrap(), 7);
        assert_eq!(w[1].as_array().unwrap().len(), 3);
    }

    #[test]
    fn default_width_entries_vanish() {
        let encoded = encode_composite(&map(&[(1, 1000.0), (2, 500.0), (3, 1000.0 + 1e-9)]), 1000.0);
        let decoded = decode_composite(&encoded, 1000.0).unwrap();
        assert_eq!(decoded, map(&[(2, 500.0)]));
    }

    #[test]
    fn mixed_maps_round_trip() {
        let mut widths = BTreeMap::new();
        // A long equal stretch, a varied stretch, and scattered singles.
        for cid in 100..160 {
            widths.insert(cid, 480.0);
        }
        for cid in 200..212 {
            widths.insert(cid, f64::from(cid) * 1.5);
        }
        widths.insert(500, 123.456);
        widths.insert(1000, 77.0);

        let encoded = encode_composite(&widths, 1000.0);
        let decoded = decode_composite(&encoded, 1000.0).unwrap();
        assert_eq!(decoded.len(), widths.len());
        for (cid, width) in &widths {
            assert!((decoded[cid] - width).abs() <= WIDTH_EPSILON, "cid {cid}");
        }
    }

    #[test]
    fn encoder_prefers_the_shorter_mix() {
        // 20 equal widths bracketed by two odd ones: a range record in the
        // middle beats one giant explicit record.
        let mut widths = BTreeMap::new();
        widths.insert(49, 111.0);
        for cid in 50..70 {
            widths.insert(cid, 555.0);
        }
        widths.insert(70, 999.0);
        let encoded = encode_composite(&widths, 1000.0);
        let text = writer::serialize_object(&Object::Array(encoded.clone()));

        // A single explicit record over the same span, for comparison.
        let explicit: Vec<Object> = vec![
            Object::Integer(49),
            Object::Array((49..=70).map(|cid| number(widths[&cid])).collect()),
        ];
        let baseline = writer::serialize_object(&Object::Array(explicit));
        assert!(text.len() < baseline.len());

        assert_eq!(decode_composite(&encoded, 1000.0).unwrap(), widths);
    }

    #[test]
    fn malformed_w_arrays_are_rejected() {
        assert!(decode_composite(&[Object::Integer(5)], 0.0).is_err());
        assert!(decode_composite(
            &[Object::Integer(5), Object::Integer(3), Object::Integer(100)],
            0.0
        )
        .is_err());
        assert!(decode_composite(&[Object::Integer(5), Object::Integer(9)], 0.0).is_err());
    }
}
