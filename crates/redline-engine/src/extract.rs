//! Text Extractor: flatten a document tree into plain text, optionally
//! recording a reversible char→position index and formatting spans.
//!
//! The index is a decoupled secondary view of the tree: it is rebuilt in
//! full on every comparison pass and never mutated incrementally. All
//! offsets are character offsets (not bytes), matching the diff layer.

use std::ops::Range;

use crate::doc::{Document, Mark, Node};

/// Plain text plus the tree position of every character.
///
/// Invariant: `char_to_pos.len()` equals the character count of `text`;
/// `char_to_pos[i]` is the token position character `i` came from in the
/// tree version the extraction ran on. Synthetic separator characters
/// (block newlines, table spaces) record the boundary node's own position.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub char_to_pos: Vec<usize>,
}

impl ExtractedText {
    pub fn char_len(&self) -> usize {
        self.char_to_pos.len()
    }

    /// Tree position of the character at `offset`, if in range.
    pub fn pos_at(&self, offset: usize) -> Option<usize> {
        self.char_to_pos.get(offset).copied()
    }

    /// Translate a character range into a tree range: the first covered
    /// character's position through one past the last covered character.
    pub fn pos_range(&self, chars: Range<usize>) -> Option<Range<usize>> {
        if chars.is_empty() {
            return None;
        }
        let from = self.pos_at(chars.start)?;
        let to = self.pos_at(chars.end - 1)? + 1;
        Some(from..to)
    }

    /// Literal substring search returning character-offset match ranges.
    /// This is the search primitive deletion anchoring runs against; the
    /// index was built from the live tree, so matches here are matches in
    /// the live document.
    pub fn find(&self, needle: &str) -> Vec<Range<usize>> {
        let hay: Vec<char> = self.text.chars().collect();
        let needle: Vec<char> = needle.chars().collect();
        if needle.is_empty() || needle.len() > hay.len() {
            return Vec::new();
        }
        (0..=hay.len() - needle.len())
            .filter(|&i| hay[i..i + needle.len()] == needle[..])
            .map(|i| i..i + needle.len())
            .collect()
    }
}

/// A contiguous run of identically-marked text in one extraction.
/// Annotation marks are excluded; spans only describe user-visible
/// formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattingSpan {
    pub char_start: usize,
    pub char_end: usize,
    pub marks: Vec<Mark>,
}

/// Flattened text with its formatting spans.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedText {
    pub text: String,
    pub formatting: Vec<FormattingSpan>,
}

/// Flatten to plain text only.
pub fn extract_plain_text(doc: &Document) -> String {
    run_flatten(doc).text
}

/// Flatten with the char→position index.
pub fn extract_with_positions(doc: &Document) -> ExtractedText {
    let out = run_flatten(doc);
    ExtractedText {
        text: out.text,
        char_to_pos: out.char_to_pos,
    }
}

/// Flatten with formatting spans.
pub fn extract_with_formatting(doc: &Document) -> FormattedText {
    let out = run_flatten(doc);
    FormattedText {
        text: out.text,
        formatting: out.spans,
    }
}

/// Flatten with both the position index and formatting spans, in a single
/// traversal. This is what a comparison pass uses for the live side.
pub fn extract_indexed(doc: &Document) -> (ExtractedText, Vec<FormattingSpan>) {
    let out = run_flatten(doc);
    (
        ExtractedText {
            text: out.text,
            char_to_pos: out.char_to_pos,
        },
        out.spans,
    )
}

/// Up to `length` characters immediately preceding `position` in `text`,
/// trimmed. Captured at diff time as the anchor for deletions, whose own
/// content no longer exists in the modified text.
pub fn extract_context(text: &str, position: usize, length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let end = position.min(chars.len());
    let start = end.saturating_sub(length);
    chars[start..end].iter().collect::<String>().trim().to_string()
}

/// The marks lookup formatting comparison uses: the span covering a
/// character offset, if any.
pub fn marks_at_offset(spans: &[FormattingSpan], offset: usize) -> &[Mark] {
    spans
        .iter()
        .find(|s| s.char_start <= offset && offset < s.char_end)
        .map(|s| s.marks.as_slice())
        .unwrap_or(&[])
}

struct Flattened {
    text: String,
    char_to_pos: Vec<usize>,
    spans: Vec<FormattingSpan>,
}

struct Flattener {
    chars: Vec<char>,
    char_to_pos: Vec<usize>,
    spans: Vec<FormattingSpan>,
    // Open span: (char offset it started at, the mark set).
    open: Option<(usize, Vec<Mark>)>,
}

impl Flattener {
    fn push_char(&mut self, c: char, pos: usize) {
        self.chars.push(c);
        self.char_to_pos.push(pos);
    }

    fn close_span(&mut self) {
        if let Some((start, marks)) = self.open.take() {
            self.spans.push(FormattingSpan {
                char_start: start,
                char_end: self.chars.len(),
                marks,
            });
        }
    }

    fn set_marks(&mut self, marks: Vec<Mark>) {
        match &self.open {
            Some((_, open)) if *open == marks => {}
            _ => {
                self.close_span();
                if !marks.is_empty() {
                    self.open = Some((self.chars.len(), marks));
                }
            }
        }
    }

    fn walk(&mut self, node: &Node, content_start: usize) {
        let mut cur = content_start;
        for child in &node.children {
            let child_pos = cur;
            cur += child.size();
            if child.is_text() {
                let marks: Vec<Mark> = child
                    .marks
                    .iter()
                    .filter(|m| !m.kind.is_annotation())
                    .cloned()
                    .collect();
                self.set_marks(marks);
                for (i, c) in child.text.as_deref().unwrap_or("").chars().enumerate() {
                    self.push_char(c, child_pos + i);
                }
                continue;
            }
            if child.kind.is_block_boundary()
                && !self.chars.is_empty()
                && self.chars.last() != Some(&'\n')
            {
                self.set_marks(Vec::new());
                self.push_char('\n', child_pos);
            } else if child.kind.is_table_part()
                && self
                    .chars
                    .last()
                    .is_some_and(|c| !c.is_whitespace())
            {
                self.set_marks(Vec::new());
                self.push_char(' ', child_pos);
            }
            self.walk(child, child_pos + 1);
        }
    }
}

fn run_flatten(doc: &Document) -> Flattened {
    let mut fl = Flattener {
        chars: Vec::new(),
        char_to_pos: Vec::new(),
        spans: Vec::new(),
        open: None,
    };
    fl.walk(doc.root(), 0);
    fl.close_span();
    Flattened {
        text: fl.chars.iter().collect(),
        char_to_pos: fl.char_to_pos,
        spans: fl.spans,
    }
}
