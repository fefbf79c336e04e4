//! The page tree: a balanced, streamable tree of page dictionaries keyed
//! by page index.
//!
//! The writer is a single-pass bulk loader. Leaves buffer up to
//! `max_children`; a full group becomes an interior node appended to a
//! per-depth tail, and a full tail merges one level up. No node is ever
//! rewritten, and sibling order follows insertion order.

use crate::error::ErrorKind;
use crate::writer::Writer;
use crate::{dictionary, Dictionary, Error, Object, ObjectId, Reader, Result};
use std::collections::BTreeSet;
use std::io::Write;

/// Attributes a page inherits from its ancestors, nearest ancestor first.
pub const INHERITED_ATTRIBUTES: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MIN_FAN_OUT: usize = 10;
const MAX_FAN_OUT: usize = 64;
const DEFAULT_FAN_OUT: usize = 32;

struct TailLevel {
    /// Parent id handed to children before the parent itself is written.
    parent: Option<ObjectId>,
    nodes: Vec<(ObjectId, i64)>,
}

pub struct PageTreeWriter {
    fan_out: usize,
    root_attributes: Dictionary,
    pending: Vec<(ObjectId, i64)>,
    tails: Vec<TailLevel>,
    pending_parent: Option<ObjectId>,
    total: i64,
}

impl Default for PageTreeWriter {
    fn default() -> Self {
        PageTreeWriter::new(DEFAULT_FAN_OUT)
    }
}

impl PageTreeWriter {
    /// `fan_out` is clamped into 10..=64.
    pub fn new(fan_out: usize) -> PageTreeWriter {
        PageTreeWriter {
            fan_out: fan_out.clamp(MIN_FAN_OUT, MAX_FAN_OUT),
            root_attributes: Dictionary::new(),
            pending: Vec::new(),
            tails: Vec::new(),
            pending_parent: None,
            total: 0,
        }
    }

    /// Attributes merged into the root node at close, where inheritable
    /// entries are shared by every page.
    pub fn with_root_attributes(mut self, attributes: Dictionary) -> Self {
        self.root_attributes = attributes;
        self
    }

    pub fn num_pages(&self) -> i64 {
        self.total
    }

    /// Append one page. Its `Type` and `Parent` entries are filled in; the
    /// returned reference is final immediately.
    pub fn append_page<W: Write>(&mut self, writer: &mut Writer<W>, mut page: Dictionary) -> Result<ObjectId> {
        let parent = match self.pending_parent {
            Some(parent) => parent,
            None => {
                let parent = writer.alloc();
                self.pending_parent = Some(parent);
                parent
            }
        };
        page.set("Type", Object::name("Page"));
        page.set("Parent", parent);

        let id = writer.alloc();
        writer.put(id, page)?;
        self.pending.push((id, 1));
        self.total += 1;

        if self.pending.len() == self.fan_out {
            let group = std::mem::take(&mut self.pending);
            let parent = self.pending_parent.take().ok_or(Error::InvalidInput("group without parent"))?;
            self.emit_node(writer, 0, parent, group)?;
        }
        Ok(id)
    }

    /// Write the interior node `id` over `children` and push it into the
    /// tail one level up, merging recursively when that tail fills.
    fn emit_node<W: Write>(
        &mut self,
        writer: &mut Writer<W>,
        depth: usize,
        id: ObjectId,
        children: Vec<(ObjectId, i64)>,
    ) -> Result<()> {
        if self.tails.len() <= depth {
            self.tails.push(TailLevel {
                parent: None,
                nodes: Vec::new(),
            });
        }
        let parent = match self.tails[depth].parent {
            Some(parent) => parent,
            None => {
                let parent = writer.alloc();
                self.tails[depth].parent = Some(parent);
                parent
            }
        };

        let count: i64 = children.iter().map(|(_, count)| count).sum();
        writer.put(
            id,
            dictionary! {
                "Type" => Object::name("Pages"),
                "Parent" => parent,
                "Kids" => children.iter().map(|(kid, _)| Object::Reference(*kid)).collect::<Vec<_>>(),
                "Count" => count,
            },
        )?;

        self.tails[depth].nodes.push((id, count));
        if self.tails[depth].nodes.len() == self.fan_out {
            let group = std::mem::take(&mut self.tails[depth].nodes);
            let id = self.tails[depth]
                .parent
                .take()
                .ok_or(Error::InvalidInput("tail without parent"))?;
            self.emit_node(writer, depth + 1, id, group)?;
        }
        Ok(())
    }

    /// Collapse every partial group into a single root and return its
    /// reference. An empty tree still produces a root with `Count 0`.
    pub fn close<W: Write>(mut self, writer: &mut Writer<W>) -> Result<ObjectId> {
        // Flush the partial leaf group.
        if !self.pending.is_empty() {
            let group = std::mem::take(&mut self.pending);
            let parent = self
                .pending_parent
                .take()
                .ok_or(Error::InvalidInput("group without parent"))?;
            self.emit_node(writer, 0, parent, group)?;
        }

        let mut depth = 0;
        while depth < self.tails.len() {
            let has_higher = self.tails[depth + 1..].iter().any(|level| !level.nodes.is_empty());
            let level = &mut self.tails[depth];
            if level.nodes.is_empty() {
                depth += 1;
                continue;
            }
            if has_higher || level.nodes.len() > 1 || level.parent.is_none() {
                // Not the top yet: wrap this group and keep cascading.
                let group = std::mem::take(&mut level.nodes);
                let id = match level.parent.take() {
                    Some(id) => id,
                    None => writer.alloc(),
                };
                self.emit_node(writer, depth + 1, id, group)?;
                depth += 1;
                continue;
            }
            // A single completed group at the top: its pre-allocated
            // parent becomes the root.
            let root = level.parent.take().ok_or(Error::InvalidInput("root without id"))?;
            let children = std::mem::take(&mut level.nodes);
            return self.write_root(writer, root, children);
        }

        // No pages at all.
        let root = writer.alloc();
        self.write_root(writer, root, Vec::new())
    }

    fn write_root<W: Write>(
        self,
        writer: &mut Writer<W>,
        root: ObjectId,
        children: Vec<(ObjectId, i64)>,
    ) -> Result<ObjectId> {
        let count: i64 = children.iter().map(|(_, count)| count).sum();
        let mut dict = dictionary! {
            "Type" => Object::name("Pages"),
            "Kids" => children.iter().map(|(kid, _)| Object::Reference(*kid)).collect::<Vec<_>>(),
            "Count" => count,
        };
        for (key, value) in self.root_attributes.iter() {
            dict.set(key.clone(), value.clone());
        }
        writer.put(root, dict)?;
        Ok(root)
    }
}

/// Read-side walker over a page tree.
pub struct PageTreeReader<'r> {
    reader: &'r Reader,
    root: ObjectId,
}

impl<'r> PageTreeReader<'r> {
    pub fn new(reader: &'r Reader, root: ObjectId) -> PageTreeReader<'r> {
        PageTreeReader { reader, root }
    }

    /// Locate the tree root from the catalog's `Pages` entry.
    pub fn from_catalog(reader: &'r Reader) -> Result<PageTreeReader<'r>> {
        let catalog = reader.catalog()?;
        let root = catalog.get(b"Pages")?.as_reference()?;
        Ok(PageTreeReader { reader, root })
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn num_pages(&self) -> Result<i64> {
        let root = self.reader.get_dict(&Object::Reference(self.root))?;
        self.reader.get_integer(root.get(b"Count")?)
    }

    /// The page at `index`, with inherited attributes resolved (the page's
    /// own entries win).
    pub fn get_page(&self, index: i64) -> Result<(ObjectId, Dictionary)> {
        if index < 0 {
            return Err(Error::PageNotFound(0));
        }
        let mut node_id = self.root;
        let mut remaining = index;
        let mut inherited = Dictionary::new();
        let mut hops = 0usize;

        loop {
            hops += 1;
            if hops > 512 {
                return Err(Error::InvalidInput("page tree is too deep"));
            }
            let node = self.reader.get_dict(&Object::Reference(node_id))?;
            collect_inherited(&mut inherited, &node);

            if node.has_type(b"Page") || !node.has(b"Kids") {
                if remaining != 0 {
                    return Err(Error::PageNotFound(index as u32));
                }
                let mut page = node;
                page.merge_missing(&inherited);
                return Ok((node_id, page));
            }

            let declared = self.reader.get_integer(node.get(b"Count")?)?;
            let kids = self.reader.get_array(node.get(b"Kids")?)?;
            if remaining >= declared {
                return Err(Error::PageNotFound(index as u32));
            }

            let mut advanced = false;
            let mut seen: i64 = 0;
            for kid in &kids {
                let kid_id = kid.as_reference()?;
                let kid_count = self.node_count(kid_id)?;
                if remaining < seen + kid_count {
                    remaining -= seen;
                    node_id = kid_id;
                    advanced = true;
                    break;
                }
                seen += kid_count;
            }
            if !advanced {
                // The Count of this node claims more leaves than its kids
                // actually hold.
                let err = Error::InvalidInput("page tree Count disagrees with its kids");
                self.reader
                    .note_public(ErrorKind::MalformedObject, "page tree Count mismatch", err)?;
                return Err(Error::PageNotFound(index as u32));
            }
        }
    }

    fn node_count(&self, id: ObjectId) -> Result<i64> {
        let node = self.reader.get_dict(&Object::Reference(id))?;
        if node.has_type(b"Page") || !node.has(b"Kids") {
            return Ok(1);
        }
        self.reader.get_integer(node.get(b"Count")?)
    }

    /// All leaves in order. `Parent` back-edges are never followed; a
    /// repeated node id fails instead of looping.
    pub fn pages(&self) -> Result<Vec<(ObjectId, Dictionary)>> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::new();
        self.walk(self.root, &Dictionary::new(), &mut visited, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        node_id: ObjectId,
        inherited: &Dictionary,
        visited: &mut BTreeSet<ObjectId>,
        out: &mut Vec<(ObjectId, Dictionary)>,
    ) -> Result<()> {
        if !visited.insert(node_id) {
            return Err(Error::InvalidInput("page tree contains a cycle"));
        }
        let node = self.reader.get_dict(&Object::Reference(node_id))?;
        let mut scope = inherited.clone();
        collect_inherited(&mut scope, &node);

        if node.has_type(b"Page") || !node.has(b"Kids") {
            let mut page = node;
            page.merge_missing(&scope);
            out.push((node_id, page));
            return Ok(());
        }

        let declared = self.reader.get_integer(node.get(b"Count")?)?;
        let kids = self.reader.get_array(node.get(b"Kids")?)?;
        let before = out.len();
        for kid in &kids {
            self.walk(kid.as_reference()?, &scope, visited, out)?;
        }
        let actual = (out.len() - before) as i64;
        if actual != declared {
            let err = Error::InvalidInput("page tree Count disagrees with its kids");
            self.reader
                .note_public(ErrorKind::MalformedObject, "page tree Count mismatch", err)?;
        }
        Ok(())
    }
}

fn collect_inherited(scope: &mut Dictionary, node: &Dictionary) {
    for key in INHERITED_ATTRIBUTES {
        if let Some(value) = node.get_opt(key) {
            // Nearer ancestors were recorded first and keep precedence...
            // and the leaf itself wins over all of them via merge_missing.
            scope.set(key.to_vec(), value.clone());
        }
    }
}
