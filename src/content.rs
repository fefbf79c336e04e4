//! The content-stream sub-language: the file-body grammar minus streams
//! and indirect syntax, scanned into (operator, operands) events.
//!
//! The scanner is purely lexical; it attaches no meaning to operators and
//! passes unknown ones through as events.

use crate::{parser, writer, Object, Result, Stream};
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::combinator::map;

/// One operator with the operands that preceded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operator: String,
    pub operands: Vec<Object>,
}

impl Operation {
    pub fn new(operator: &str, operands: Vec<Object>) -> Operation {
        Operation {
            operator: operator.to_string(),
            operands,
        }
    }
}

/// A decoded content stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content {
    pub operations: Vec<Operation>,
}

impl Content {
    /// Scan `data` to the end.
    pub fn decode(data: &[u8]) -> Result<Content> {
        let mut scanner = ContentScanner::new(data);
        let mut operations = Vec::new();
        while let Some(operation) = scanner.next_operation()? {
            operations.push(operation);
        }
        Ok(Content { operations })
    }

    /// Emit the operations back as bytes; scanning the result yields the
    /// same event sequence.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for operation in &self.operations {
            for operand in &operation.operands {
                out.extend_from_slice(&writer::serialize_object(operand));
                out.push(b' ');
            }
            out.extend_from_slice(operation.operator.as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}

impl Stream {
    /// Decode the filter chain, then scan the body.
    pub fn decode_content(&self) -> Result<Content> {
        Content::decode(&self.decoded_content()?)
    }
}

/// Restartable scanner producing one event per operator.
///
/// Malformed operand bytes are skipped without desynchronising the event
/// stream.
pub struct ContentScanner<'a> {
    input: &'a [u8],
    pos: usize,
    operands: Vec<Object>,
}

impl<'a> ContentScanner<'a> {
    pub fn new(input: &'a [u8]) -> ContentScanner<'a> {
        ContentScanner {
            input,
            pos: 0,
            operands: Vec::new(),
        }
    }

    /// Clear the buffer and start over from the first byte.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.operands.clear();
    }

    /// The next (operator, operands) event, or `None` at end of input.
    pub fn next_operation(&mut self) -> Result<Option<Operation>> {
        loop {
            self.skip_space();
            let rest = &self.input[self.pos..];
            if rest.is_empty() {
                if !self.operands.is_empty() {
                    // Trailing operands with no operator; drop them rather
                    // than fabricate an event.
                    log::warn!("content stream ends with {} dangling operands", self.operands.len());
                    self.operands.clear();
                }
                return Ok(None);
            }

            if let Ok((tail, operand)) = operand(rest) {
                self.pos = self.input.len() - tail.len();
                self.operands.push(operand);
                continue;
            }
            if let Ok((tail, operator)) = operator(rest) {
                self.pos = self.input.len() - tail.len();
                return Ok(Some(Operation {
                    operator,
                    operands: std::mem::take(&mut self.operands),
                }));
            }
            // Unparseable byte: skip it and stay in sync.
            self.pos += 1;
        }
    }

    fn skip_space(&mut self) {
        while self.pos < self.input.len() {
            let byte = self.input[self.pos];
            if parser::is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while self.pos < self.input.len() && !b"\r\n".contains(&self.input[self.pos]) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }
}

// Content operands are the direct objects without references.
fn operand(input: &[u8]) -> parser::NomResult<'_, Object> {
    alt((
        keyword_null,
        keyword_bool,
        map(parser::real, Object::Real),
        map(parser::integer, Object::Integer),
        map(parser::name, Object::Name),
        map(parser::literal_string, Object::string_literal),
        parser::hexadecimal_string,
        array,
        map(parser::dictionary, Object::Dictionary),
    ))(input)
}

fn keyword_null(input: &[u8]) -> parser::NomResult<'_, Object> {
    map(nom::bytes::complete::tag(b"null"), |_| Object::Null)(input)
}

fn keyword_bool(input: &[u8]) -> parser::NomResult<'_, Object> {
    alt((
        map(nom::bytes::complete::tag(b"true"), |_| Object::Boolean(true)),
        map(nom::bytes::complete::tag(b"false"), |_| Object::Boolean(false)),
    ))(input)
}

fn array(input: &[u8]) -> parser::NomResult<'_, Object> {
    use nom::bytes::complete::tag;
    use nom::multi::many0;
    use nom::sequence::{delimited, pair, preceded, terminated};

    map(
        delimited(
            pair(tag(b"["), parser::space),
            many0(terminated(operand, parser::space)),
            tag(b"]"),
        ),
        Object::Array,
    )(input)
}

/// Operator names: runs of alphabetics plus `* ' "`.
fn operator(input: &[u8]) -> parser::NomResult<'_, String> {
    map(
        take_while1(|c: u8| c.is_ascii_alphabetic() || b"*'\"".contains(&c)),
        |op: &[u8]| String::from_utf8_lossy(op).into_owned(),
    )(input)
}

impl Content {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    const SAMPLE: &[u8] = b"
2 J
BT
/F1 12 Tf
0 Tc
72.5 712 TD
[(Unencoded streams can be read) 65 (,) ] TJ
T* (encoded streams.) Tj
BDC /OC /Layer1 BDC
ET
q 1 0 0 1 10 20 cm W* n Q
";

    #[test]
    fn scans_operator_events_in_order() {
        let content = Content::decode(SAMPLE).unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(
            operators,
            vec!["J", "BT", "Tf", "Tc", "TD", "TJ", "T*", "Tj", "BDC", "BDC", "ET", "q", "cm", "W*", "n", "Q"]
        );

        let tf = &content.operations[2];
        assert_eq!(tf.operands.len(), 2);
        assert_eq!(tf.operands[0].as_name().unwrap(), b"F1");
        assert_eq!(tf.operands[1].as_i64().unwrap(), 12);

        let tj = &content.operations[5];
        assert_eq!(tj.operands.len(), 1);
        assert_eq!(tj.operands[0].as_array().unwrap().len(), 3);
    }

    #[test]
    fn scanner_is_restartable() {
        let mut scanner = ContentScanner::new(SAMPLE);
        let first = scanner.next_operation().unwrap().unwrap();
        scanner.next_operation().unwrap().unwrap();
        scanner.reset();
        assert_eq!(scanner.next_operation().unwrap().unwrap(), first);
    }

    #[test]
    fn re_encoding_is_idempotent() {
        let content = Content::decode(SAMPLE).unwrap();
        let encoded = content.encode().unwrap();
        let again = Content::decode(&encoded).unwrap();
        assert_eq!(content, again);
    }

    #[test]
    fn comments_read_as_whitespace() {
        let content = Content::decode(b"% setup\n1 0 0 1 0 0 cm % matrix\nq\n").unwrap();
        assert_eq!(content.operations.len(), 2);
        assert_eq!(content.operations[0].operator, "cm");
        assert_eq!(content.operations[0].operands.len(), 6);
    }

    #[test]
    fn malformed_operands_do_not_desynchronise() {
        // An unterminated string swallows itself; the operators around it
        // still come through.
        let content = Content::decode(b"q )( 1 2 ] >> junk#! cm Q\n").unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert!(operators.contains(&"q"));
        assert!(operators.contains(&"cm"));
        assert!(operators.contains(&"Q"));
    }

    #[test]
    fn dictionary_operands_nest() {
        let content = Content::decode(b"/OC << /Type /OCMD /OCGs [1 0 2 0] >> BDC EMC\n").unwrap();
        assert_eq!(content.operations[0].operator, "BDC");
        let dict = content.operations[0].operands[1].as_dict().unwrap();
        assert!(dict.has_type(b"OCMD"));
        let _ = dictionary! {};
    }

    #[test]
    fn empty_input_yields_no_events() {
        assert!(Content::decode(b"").unwrap().is_empty());
        assert!(Content::decode(b"   % only a comment").unwrap().is_empty());
    }
}
