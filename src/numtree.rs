//! Number trees: the page-tree construction keyed by signed integers,
//! used for page labels and structure parent maps.
//!
//! Leaves carry `Nums`, interior nodes carry `Kids`; both carry
//! `Limits = [min, max]` unless they are the root. Children are complete
//! before their parent is written, so no node is ever rewritten.

use crate::error::ErrorKind;
use crate::writer::Writer;
use crate::{dictionary, Dictionary, Error, Object, ObjectId, Reader, Result, ABSENT_REF};
use std::collections::BTreeMap;
use std::io::Write;

const MIN_FAN_OUT: usize = 10;
const MAX_FAN_OUT: usize = 64;
const DEFAULT_FAN_OUT: usize = 32;

/// Streaming writer over a strictly ascending key-value sequence.
pub struct NumberTreeWriter {
    fan_out: usize,
    pending: Vec<(i64, Object)>,
    /// Completed nodes per depth: (reference, min key, max key).
    tails: Vec<Vec<(ObjectId, i64, i64)>>,
    last_key: Option<i64>,
}

impl Default for NumberTreeWriter {
    fn default() -> Self {
        NumberTreeWriter::new(DEFAULT_FAN_OUT)
    }
}

impl NumberTreeWriter {
    pub fn new(fan_out: usize) -> NumberTreeWriter {
        NumberTreeWriter {
            fan_out: fan_out.clamp(MIN_FAN_OUT, MAX_FAN_OUT),
            pending: Vec::new(),
            tails: Vec::new(),
            last_key: None,
        }
    }

    /// Append one entry. Keys must be strictly increasing; duplicates and
    /// regressions are invalid input.
    pub fn write<W: Write, V: Into<Object>>(&mut self, writer: &mut Writer<W>, key: i64, value: V) -> Result<()> {
        if self.last_key.is_some_and(|last| key <= last) {
            return Err(Error::InvalidInput("number tree keys must strictly increase"));
        }
        self.last_key = Some(key);
        self.pending.push((key, value.into()));
        if self.pending.len() == self.fan_out {
            let group = std::mem::take(&mut self.pending);
            self.emit_leaf(writer, group, true)?;
        }
        Ok(())
    }

    fn emit_leaf<W: Write>(
        &mut self,
        writer: &mut Writer<W>,
        group: Vec<(i64, Object)>,
        with_limits: bool,
    ) -> Result<ObjectId> {
        let min = group.first().map(|(k, _)| *k).unwrap_or(0);
        let max = group.last().map(|(k, _)| *k).unwrap_or(0);
        let mut nums = Vec::with_capacity(group.len() * 2);
        for (key, value) in group {
            nums.push(Object::Integer(key));
            nums.push(value);
        }
        let mut dict = dictionary! { "Nums" => nums };
        if with_limits {
            dict.set("Limits", vec![Object::Integer(min), Object::Integer(max)]);
        }
        let id = writer.add(dict)?;
        if with_limits {
            self.push_node(writer, 0, (id, min, max))?;
        }
        Ok(id)
    }

    fn push_node<W: Write>(&mut self, writer: &mut Writer<W>, depth: usize, node: (ObjectId, i64, i64)) -> Result<()> {
        if self.tails.len() <= depth {
            self.tails.push(Vec::new());
        }
        self.tails[depth].push(node);
        if self.tails[depth].len() == self.fan_out {
            let group = std::mem::take(&mut self.tails[depth]);
            let merged = self.emit_interior(writer, group, true)?;
            self.push_node(writer, depth + 1, merged)?;
        }
        Ok(())
    }

    fn emit_interior<W: Write>(
        &mut self,
        writer: &mut Writer<W>,
        group: Vec<(ObjectId, i64, i64)>,
        with_limits: bool,
    ) -> Result<(ObjectId, i64, i64)> {
        let min = group.first().map(|(_, min, _)| *min).unwrap_or(0);
        let max = group.last().map(|(_, _, max)| *max).unwrap_or(0);
        let kids: Vec<Object> = group.iter().map(|(id, ..)| Object::Reference(*id)).collect();
        let mut dict = dictionary! { "Kids" => kids };
        if with_limits {
            dict.set("Limits", vec![Object::Integer(min), Object::Integer(max)]);
        }
        let id = writer.add(dict)?;
        Ok((id, min, max))
    }

    /// Emit the root and return its reference; the zero reference stands
    /// for an empty tree.
    pub fn close<W: Write>(mut self, writer: &mut Writer<W>) -> Result<ObjectId> {
        let nothing_written = self.tails.iter().all(Vec::is_empty);
        if self.pending.is_empty() && nothing_written {
            return Ok(ABSENT_REF);
        }

        // A tree that fits one leaf becomes that leaf, without Limits.
        if nothing_written {
            let group = std::mem::take(&mut self.pending);
            return self.emit_leaf(writer, group, false);
        }

        if !self.pending.is_empty() {
            let group = std::mem::take(&mut self.pending);
            self.emit_leaf(writer, group, true)?;
        }

        let mut depth = 0;
        loop {
            let has_higher = self.tails[depth + 1..].iter().any(|level| !level.is_empty());
            let nodes = std::mem::take(&mut self.tails[depth]);
            if nodes.is_empty() {
                depth += 1;
                continue;
            }
            if has_higher {
                // Nodes at this depth hold later keys than anything already
                // merged above, so the carry appends after them.
                if nodes.len() == 1 {
                    self.tails[depth + 1].push(nodes[0]);
                } else {
                    let merged = self.emit_interior(writer, nodes, true)?;
                    self.tails[depth + 1].push(merged);
                }
                depth += 1;
                continue;
            }
            // Top level: this group becomes the root, which never carries
            // Limits.
            let (id, ..) = self.emit_interior(writer, nodes, false)?;
            return Ok(id);
        }
    }
}

/// Sorts arbitrary insertions before emitting through the streaming
/// writer. Duplicate keys keep the latest value.
#[derive(Default)]
pub struct NumberTreeBuilder {
    entries: BTreeMap<i64, Object>,
}

impl NumberTreeBuilder {
    pub fn new() -> NumberTreeBuilder {
        NumberTreeBuilder::default()
    }

    pub fn insert<V: Into<Object>>(&mut self, key: i64, value: V) {
        self.entries.insert(key, value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write<W: Write>(self, writer: &mut Writer<W>) -> Result<ObjectId> {
        self.write_with_fan_out(writer, DEFAULT_FAN_OUT)
    }

    pub fn write_with_fan_out<W: Write>(self, writer: &mut Writer<W>, fan_out: usize) -> Result<ObjectId> {
        let mut tree = NumberTreeWriter::new(fan_out);
        for (key, value) in self.entries {
            tree.write(writer, key, value)?;
        }
        tree.close(writer)
    }
}

/// Read-side lookup and iteration.
pub struct NumberTreeReader<'r> {
    reader: &'r Reader,
    root: Object,
}

impl<'r> NumberTreeReader<'r> {
    /// `root` may be a reference, a node dictionary, or (for a root that
    /// is a bare leaf) the `Nums` array itself.
    pub fn new(reader: &'r Reader, root: Object) -> NumberTreeReader<'r> {
        NumberTreeReader { reader, root }
    }

    /// Find the value for `key`, descending by `Limits`.
    pub fn lookup(&self, key: i64) -> Result<Option<Object>> {
        if self.root.is_absent() {
            return Ok(None);
        }
        let mut node = self.reader.resolve(&self.root)?;
        let mut hops = 0usize;
        loop {
            hops += 1;
            if hops > 512 {
                return Err(Error::InvalidInput("number tree is too deep"));
            }
            // A bare array is a leaf's Nums.
            let nums = match &node {
                Object::Array(items) => Some(items.clone()),
                Object::Dictionary(dict) => match dict.get_opt(b"Nums") {
                    Some(value) => Some(self.reader.get_array(value)?),
                    None => None,
                },
                _ => {
                    return Err(Error::ObjectType {
                        expected: "Dictionary or Array",
                        found: node.variant_name(),
                    })
                }
            };
            if let Some(nums) = nums {
                for pair in nums.chunks(2) {
                    let [k, value] = pair else { break };
                    if self.reader.get_integer(k)? == key {
                        return Ok(Some(self.reader.resolve(value)?));
                    }
                }
                return Ok(None);
            }

            let dict = node.as_dict()?;
            let kids = self.reader.get_array(dict.get(b"Kids")?)?;
            let mut descend = None;
            for kid in &kids {
                let kid_node = self.reader.resolve(kid)?;
                let (min, max) = self.limits_of(&kid_node)?;
                if (min..=max).contains(&key) {
                    descend = Some(kid_node);
                    break;
                }
            }
            match descend {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
    }

    /// All entries in ascending key order, with the structural invariants
    /// checked along the way.
    pub fn entries(&self) -> Result<Vec<(i64, Object)>> {
        let mut out = Vec::new();
        if self.root.is_absent() {
            return Ok(out);
        }
        let root = self.reader.resolve(&self.root)?;
        self.collect(&root, &mut out, 0)?;
        for window in out.windows(2) {
            if window[0].0 >= window[1].0 {
                let err = Error::InvalidInput("number tree keys are not strictly increasing");
                self.reader
                    .note_public(ErrorKind::MalformedObject, "number tree key order", err)?;
            }
        }
        Ok(out)
    }

    fn collect(&self, node: &Object, out: &mut Vec<(i64, Object)>, depth: usize) -> Result<()> {
        if depth > 512 {
            return Err(Error::InvalidInput("number tree is too deep"));
        }
        let nums = match node {
            Object::Array(items) => Some(items.clone()),
            Object::Dictionary(dict) => match dict.get_opt(b"Nums") {
                Some(value) => Some(self.reader.get_array(value)?),
                None => None,
            },
            _ => {
                return Err(Error::ObjectType {
                    expected: "Dictionary or Array",
                    found: node.variant_name(),
                })
            }
        };
        if let Some(nums) = nums {
            if nums.len() % 2 != 0 {
                let err = Error::InvalidInput("Nums array has an odd length");
                self.reader
                    .note_public(ErrorKind::MalformedObject, "odd Nums length", err)?;
            }
            if let Object::Dictionary(dict) = node {
                self.check_limits(dict, &nums)?;
            }
            for pair in nums.chunks(2) {
                let [key, value] = pair else { break };
                out.push((self.reader.get_integer(key)?, value.clone()));
            }
            return Ok(());
        }

        let dict = node.as_dict()?;
        let kids = self.reader.get_array(dict.get(b"Kids")?)?;
        let mut previous_max: Option<i64> = None;
        for kid in &kids {
            let kid_node = self.reader.resolve(kid)?;
            let (min, max) = self.limits_of(&kid_node)?;
            if previous_max.is_some_and(|prev| min <= prev) {
                let err = Error::InvalidInput("kids are not in ascending key order");
                self.reader
                    .note_public(ErrorKind::MalformedObject, "number tree kid order", err)?;
            }
            previous_max = Some(max);
            self.collect(&kid_node, out, depth + 1)?;
        }
        Ok(())
    }

    fn limits_of(&self, node: &Object) -> Result<(i64, i64)> {
        let dict = node.as_dict()?;
        let limits = self.reader.get_array(dict.get(b"Limits")?)?;
        match limits.as_slice() {
            [min, max] => Ok((self.reader.get_integer(min)?, self.reader.get_integer(max)?)),
            _ => Err(Error::InvalidInput("Limits must hold exactly two keys")),
        }
    }

    fn check_limits(&self, dict: &Dictionary, nums: &[Object]) -> Result<()> {
        let Some(limits) = dict.get_opt(b"Limits") else {
            return Ok(());
        };
        let limits = self.reader.get_array(limits)?;
        let [min, max] = limits.as_slice() else {
            return Err(Error::InvalidInput("Limits must hold exactly two keys"));
        };
        let min = self.reader.get_integer(min)?;
        let max = self.reader.get_integer(max)?;
        let keys: Vec<i64> = nums
            .chunks(2)
            .filter_map(|pair| pair.first())
            .map(|k| self.reader.get_integer(k))
            .collect::<Result<_>>()?;
        if keys.first().is_some_and(|first| *first != min) || keys.last().is_some_and(|last| *last != max) {
            let err = Error::InvalidInput("Limits disagree with the keys in the leaf");
            self.reader
                .note_public(ErrorKind::MalformedObject, "number tree Limits mismatch", err)?;
        }
        Ok(())
    }
}
