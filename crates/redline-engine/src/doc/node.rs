use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute bag carried by nodes and marks.
///
/// Kept as a JSON object rather than typed fields because attribute shapes
/// are owned by the host editor schema, not by this engine.
pub type Attrs = Map<String, Value>;

/// Node kinds understood by the extractor and applicator.
///
/// Block kinds contribute newline separators during text extraction; table
/// kinds contribute space separators so adjacent cell text never silently
/// concatenates. `Text` is the only leaf kind that carries content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Doc,
    Paragraph,
    Heading,
    BulletList,
    OrderedList,
    ListItem,
    Blockquote,
    CodeBlock,
    HorizontalRule,
    Table,
    TableRow,
    TableCell,
    Text,
}

impl NodeKind {
    /// Kinds that get a newline separator before their content when
    /// flattening to plain text.
    pub fn is_block_boundary(self) -> bool {
        matches!(
            self,
            NodeKind::Paragraph
                | NodeKind::Heading
                | NodeKind::ListItem
                | NodeKind::Blockquote
                | NodeKind::CodeBlock
                | NodeKind::HorizontalRule
        )
    }

    /// Kinds that get a space separator to keep adjacent cell text apart.
    pub fn is_table_part(self) -> bool {
        matches!(
            self,
            NodeKind::Table | NodeKind::TableRow | NodeKind::TableCell
        )
    }
}

/// Mark kinds: user-visible formatting plus the internal annotation kinds
/// the track-changes layer owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkKind {
    Bold,
    Italic,
    Strike,
    Link,
    TextStyle,
    Highlight,
    Insertion,
    Deletion,
    FormatChange,
}

impl MarkKind {
    /// Internal annotation kinds are never treated as document formatting:
    /// they are excluded from formatting spans and from ghost-text mark
    /// copying.
    pub fn is_annotation(self) -> bool {
        matches!(
            self,
            MarkKind::Insertion | MarkKind::Deletion | MarkKind::FormatChange
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarkKind::Bold => "bold",
            MarkKind::Italic => "italic",
            MarkKind::Strike => "strike",
            MarkKind::Link => "link",
            MarkKind::TextStyle => "text_style",
            MarkKind::Highlight => "highlight",
            MarkKind::Insertion => "insertion",
            MarkKind::Deletion => "deletion",
            MarkKind::FormatChange => "format_change",
        }
    }
}

impl std::fmt::Display for MarkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata tag on a text span: formatting (bold, link, ...) or an
/// internal track-change annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub kind: MarkKind,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Mark {
    pub fn new(kind: MarkKind) -> Self {
        Self {
            kind,
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(kind: MarkKind, attrs: Attrs) -> Self {
        Self { kind, attrs }
    }

    /// Attribute lookup as a string, for the id/href/color keys the engine
    /// reads back out of marks.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Identity key used when comparing formatting between document
    /// versions: kind alone, except links keyed by target and color-bearing
    /// kinds keyed by color.
    pub fn identity_key(&self) -> String {
        match self.kind {
            MarkKind::Link => {
                format!("link:{}", self.attr_str("href").unwrap_or(""))
            }
            MarkKind::TextStyle => {
                format!("text_style:{}", self.attr_str("color").unwrap_or(""))
            }
            MarkKind::Highlight => {
                format!("highlight:{}", self.attr_str("color").unwrap_or(""))
            }
            kind => kind.as_str().to_string(),
        }
    }
}

/// One node of a rich-text document tree.
///
/// Text leaves hold content and marks; every other kind holds children.
/// The shape mirrors the host editor's serialized form
/// `{type, text?, children?, marks?, attrs?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
    #[serde(default, skip_serializing_if = "Attrs::is_empty")]
    pub attrs: Attrs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text,
            text: Some(content.into()),
            marks: Vec::new(),
            attrs: Attrs::new(),
            children: Vec::new(),
        }
    }

    pub fn marked_text(content: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self {
            marks,
            ..Self::text(content)
        }
    }

    pub fn with_children(kind: NodeKind, children: Vec<Node>) -> Self {
        Self {
            kind,
            text: None,
            marks: Vec::new(),
            attrs: Attrs::new(),
            children,
        }
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self::with_children(NodeKind::Paragraph, children)
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }

    /// Character count of a text leaf (token count it occupies).
    pub fn text_len(&self) -> usize {
        self.text.as_deref().map_or(0, |t| t.chars().count())
    }

    /// Token-stream footprint of this node: one token per character for
    /// text leaves, an open and close token around the content for
    /// everything else. The root `Doc` has no tokens of its own.
    pub fn size(&self) -> usize {
        match self.kind {
            NodeKind::Text => self.text_len(),
            NodeKind::Doc => self.content_size(),
            _ => 2 + self.content_size(),
        }
    }

    pub fn content_size(&self) -> usize {
        self.children.iter().map(Node::size).sum()
    }

    /// Whether a mark of the given kind is present on this node.
    pub fn has_mark(&self, kind: MarkKind) -> bool {
        self.marks.iter().any(|m| m.kind == kind)
    }

    pub fn mark(&self, kind: MarkKind) -> Option<&Mark> {
        self.marks.iter().find(|m| m.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_text_leaf_size_is_char_count() {
        let node = Node::text("héllo");
        assert_eq!(node.size(), 5);
        assert_eq!(node.text_len(), 5);
    }

    #[test]
    fn test_block_node_size_adds_open_and_close_tokens() {
        let para = Node::paragraph(vec![Node::text("ab")]);
        assert_eq!(para.size(), 4); // open + "ab" + close
    }

    #[test]
    fn test_doc_root_has_no_own_tokens() {
        let doc = Node::with_children(
            NodeKind::Doc,
            vec![Node::paragraph(vec![Node::text("ab")])],
        );
        assert_eq!(doc.size(), 4);
    }

    #[test]
    fn test_identity_key_plain_kind() {
        let bold = Mark::new(MarkKind::Bold);
        assert_eq!(bold.identity_key(), "bold");
    }

    #[test]
    fn test_identity_key_link_keyed_by_href() {
        let a = Mark::with_attrs(MarkKind::Link, attrs(&[("href", "https://a.example")]));
        let b = Mark::with_attrs(MarkKind::Link, attrs(&[("href", "https://b.example")]));
        assert_ne!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn test_identity_key_text_style_keyed_by_color() {
        let red = Mark::with_attrs(MarkKind::TextStyle, attrs(&[("color", "#f00")]));
        let blue = Mark::with_attrs(MarkKind::TextStyle, attrs(&[("color", "#00f")]));
        assert_ne!(red.identity_key(), blue.identity_key());
        assert_eq!(red.identity_key(), "text_style:#f00");
    }

    #[test]
    fn test_annotation_kinds_are_flagged() {
        assert!(MarkKind::Insertion.is_annotation());
        assert!(MarkKind::Deletion.is_annotation());
        assert!(MarkKind::FormatChange.is_annotation());
        assert!(!MarkKind::Bold.is_annotation());
        assert!(!MarkKind::Link.is_annotation());
    }

    #[test]
    fn test_node_round_trips_through_serde() {
        let node = Node::paragraph(vec![Node::marked_text(
            "hello",
            vec![Mark::new(MarkKind::Bold)],
        )]);
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }
}
