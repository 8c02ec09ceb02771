use std::collections::BTreeSet;
use std::ops::Range;

use crate::doc::{Mark, MarkKind, Node, NodeKind};

/// The set of mark kinds the host document's schema defines.
///
/// The applicator refuses to run against a document whose schema lacks the
/// annotation kinds it needs; that is the one fatal precondition in the
/// whole pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    marks: BTreeSet<MarkKind>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            marks: BTreeSet::from([
                MarkKind::Bold,
                MarkKind::Italic,
                MarkKind::Strike,
                MarkKind::Link,
                MarkKind::TextStyle,
                MarkKind::Highlight,
                MarkKind::Insertion,
                MarkKind::Deletion,
                MarkKind::FormatChange,
            ]),
        }
    }
}

impl Schema {
    /// A schema with one kind removed. Used to exercise the missing-schema
    /// precondition without inventing a second document model.
    pub fn without(kind: MarkKind) -> Self {
        let mut schema = Self::default();
        schema.marks.remove(&kind);
        schema
    }

    pub fn has_mark(&self, kind: MarkKind) -> bool {
        self.marks.contains(&kind)
    }
}

/// A live rich-text document tree with integer token positions.
///
/// Position addressing follows the host editor convention: every non-leaf
/// node costs one token to enter and one to leave, every character of a
/// text leaf costs one token, and the root's content starts at position 0.
/// All engine operations (extraction index, mapping, mutation) speak this
/// address space.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Node,
    schema: Schema,
}

impl Document {
    /// Build a document from top-level block nodes with the default schema.
    pub fn from_children(children: Vec<Node>) -> Self {
        Self {
            root: Node::with_children(NodeKind::Doc, children),
            schema: Schema::default(),
        }
    }

    pub fn with_schema(children: Vec<Node>, schema: Schema) -> Self {
        Self {
            root: Node::with_children(NodeKind::Doc, children),
            schema,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Total token length of the document content.
    pub fn size(&self) -> usize {
        self.root.content_size()
    }

    /// Depth-first visit of every node below the root, with its position.
    /// Node borrows handed to the callback live as long as the document,
    /// so callers may collect them.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(usize, &'a Node)) {
        fn walk<'a>(node: &'a Node, content_start: usize, f: &mut impl FnMut(usize, &'a Node)) {
            let mut cur = content_start;
            for child in &node.children {
                f(cur, child);
                if !child.is_text() {
                    walk(child, cur + 1, f);
                }
                cur += child.size();
            }
        }
        walk(&self.root, 0, f);
    }

    /// Every text leaf with the token range it occupies, in document order.
    pub fn text_leaves(&self) -> Vec<(Range<usize>, &Node)> {
        let mut leaves = Vec::new();
        self.visit(&mut |pos, node| {
            if node.is_text() {
                leaves.push((pos..pos + node.text_len(), node));
            }
        });
        leaves
    }

    /// Marks active at a position: the leaf containing it, else the leaf
    /// ending exactly there.
    pub fn marks_at(&self, pos: usize) -> Vec<Mark> {
        let leaves = self.text_leaves();
        if let Some((_, leaf)) = leaves
            .iter()
            .find(|(range, _)| range.start <= pos && pos < range.end)
        {
            return leaf.marks.clone();
        }
        leaves
            .iter()
            .find(|(range, _)| range.end == pos)
            .map(|(_, leaf)| leaf.marks.clone())
            .unwrap_or_default()
    }

    /// The text leaf ending exactly at `pos`, if any.
    pub fn node_before(&self, pos: usize) -> Option<Node> {
        self.text_leaves()
            .into_iter()
            .find(|(range, _)| range.end == pos && !range.is_empty())
            .map(|(_, leaf)| leaf.clone())
    }

    /// The text leaf starting exactly at `pos`, if any.
    pub fn node_after(&self, pos: usize) -> Option<Node> {
        self.text_leaves()
            .into_iter()
            .find(|(range, _)| range.start == pos)
            .map(|(_, leaf)| leaf.clone())
    }

    // ---- mutation primitives (crate-internal; all edits go through
    // `Transaction`) -------------------------------------------------------

    /// Add `mark` to every text character in `[from, to)`, splitting leaves
    /// at the boundaries. Out-of-range portions are clamped silently; stale
    /// ranges are expected when positions race ahead of content.
    pub(crate) fn add_mark_range(&mut self, from: usize, to: usize, mark: &Mark) {
        let root = std::mem::replace(&mut self.root, Node::with_children(NodeKind::Doc, vec![]));
        self.root = map_leaves(root, 0, &mut |leaf, start| {
            split_apply(leaf, start, from, to, &mut |piece| {
                piece.marks.retain(|m| m.kind != mark.kind);
                piece.marks.push(mark.clone());
            })
        });
    }

    /// Remove marks of `kind` from every text character in `[from, to)`.
    pub(crate) fn remove_mark_range(&mut self, from: usize, to: usize, kind: MarkKind) {
        let root = std::mem::replace(&mut self.root, Node::with_children(NodeKind::Doc, vec![]));
        self.root = map_leaves(root, 0, &mut |leaf, start| {
            split_apply(leaf, start, from, to, &mut |piece| {
                piece.marks.retain(|m| m.kind != kind);
            })
        });
    }

    /// Delete every text character in `[from, to)`. Containers that fall
    /// entirely inside the range and end up empty are removed with it.
    pub(crate) fn delete_range(&mut self, from: usize, to: usize) {
        fn delete_in(node: &mut Node, content_start: usize, from: usize, to: usize) {
            let mut cur = content_start;
            let mut kept = Vec::with_capacity(node.children.len());
            for mut child in std::mem::take(&mut node.children) {
                let size = child.size();
                let (start, end) = (cur, cur + size);
                cur = end;
                if child.is_text() {
                    let text = child.text.take().unwrap_or_default();
                    let retained: String = text
                        .chars()
                        .enumerate()
                        .filter(|(i, _)| {
                            let pos = start + i;
                            pos < from || pos >= to
                        })
                        .map(|(_, c)| c)
                        .collect();
                    if !retained.is_empty() {
                        child.text = Some(retained);
                        kept.push(child);
                    }
                } else {
                    delete_in(&mut child, start + 1, from, to);
                    let swallowed = from <= start && end <= to && child.children.is_empty();
                    if !swallowed {
                        kept.push(child);
                    }
                }
            }
            node.children = kept;
        }
        delete_in(&mut self.root, 0, from, to);
    }

    /// Splice a text node in at `pos`, splitting an existing leaf when the
    /// position falls inside one. Positions at a container boundary descend
    /// into that container's content.
    pub(crate) fn insert_text_at(&mut self, pos: usize, new_node: Node) {
        fn insert_in(node: &mut Node, content_start: usize, pos: usize, new_node: Node) {
            let mut cur = content_start;
            for i in 0..node.children.len() {
                let size = node.children[i].size();
                let (start, end) = (cur, cur + size);
                cur = end;
                if node.children[i].is_text() {
                    if pos >= start && pos <= end {
                        let offset = pos - start;
                        if offset == 0 {
                            node.children.insert(i, new_node);
                        } else if offset == size {
                            node.children.insert(i + 1, new_node);
                        } else {
                            let leaf = node.children.remove(i);
                            let (head, tail) = split_text_leaf(leaf, offset);
                            node.children.splice(i..i, [head, new_node, tail]);
                        }
                        return;
                    }
                } else if pos >= start && pos < end {
                    let inner = pos.max(start + 1);
                    let mut child = std::mem::replace(&mut node.children[i], Node::text(""));
                    insert_in(&mut child, start + 1, inner, new_node);
                    node.children[i] = child;
                    return;
                }
            }
            // Past the last child: append, descending into a trailing
            // container so text never lands between blocks.
            if let Some(last) = node.children.last_mut() {
                if !last.is_text() {
                    let inner_end = cur - 1;
                    let inner_start = inner_end - last.content_size();
                    let mut child = std::mem::replace(last, Node::text(""));
                    insert_in(&mut child, inner_start, inner_end, new_node);
                    *node.children.last_mut().unwrap() = child;
                    return;
                }
            }
            node.children.push(new_node);
        }
        let pos = pos.min(self.size());
        insert_in(&mut self.root, 0, pos, new_node);
    }
}

/// Rebuild a tree by mapping every text leaf through `f`, which may return
/// several replacement leaves. `f` receives the leaf and its start position.
fn map_leaves(mut node: Node, content_start: usize, f: &mut impl FnMut(Node, usize) -> Vec<Node>) -> Node {
    let mut cur = content_start;
    let mut rebuilt = Vec::with_capacity(node.children.len());
    for child in std::mem::take(&mut node.children) {
        let size = child.size();
        if child.is_text() {
            rebuilt.extend(f(child, cur));
        } else {
            rebuilt.push(map_leaves(child, cur + 1, f));
        }
        cur += size;
    }
    node.children = rebuilt;
    node
}

/// Split `leaf` (starting at `start`) around `[from, to)` and run `apply`
/// on the covered piece. Returns the replacement leaves in order.
fn split_apply(
    leaf: Node,
    start: usize,
    from: usize,
    to: usize,
    apply: &mut impl FnMut(&mut Node),
) -> Vec<Node> {
    let len = leaf.text_len();
    let end = start + len;
    let lo = from.max(start);
    let hi = to.min(end);
    if lo >= hi {
        return vec![leaf];
    }
    let text: Vec<char> = leaf.text.as_deref().unwrap_or("").chars().collect();
    let mut pieces = Vec::new();
    let slices = [
        (0, lo - start, false),
        (lo - start, hi - start, true),
        (hi - start, len, false),
    ];
    for (a, b, covered) in slices {
        if a == b {
            continue;
        }
        let mut piece = Node {
            text: Some(text[a..b].iter().collect()),
            ..leaf.clone()
        };
        if covered {
            apply(&mut piece);
        }
        pieces.push(piece);
    }
    pieces
}

fn split_text_leaf(leaf: Node, offset: usize) -> (Node, Node) {
    let chars: Vec<char> = leaf.text.as_deref().unwrap_or("").chars().collect();
    let head = Node {
        text: Some(chars[..offset].iter().collect()),
        ..leaf.clone()
    };
    let tail = Node {
        text: Some(chars[offset..].iter().collect()),
        ..leaf
    };
    (head, tail)
}
