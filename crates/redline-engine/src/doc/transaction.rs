use crate::doc::{Document, Mark, MarkKind, Node};

/// One queued mutation step. Positions are interpreted against the tree as
/// it stands when the step runs, so batches must be ordered so that no step
/// shifts a later step's target (the applicator sorts descending for this).
#[derive(Debug, Clone)]
pub enum Step {
    AddMark {
        from: usize,
        to: usize,
        mark: Mark,
    },
    RemoveMark {
        from: usize,
        to: usize,
        kind: MarkKind,
    },
    InsertText {
        at: usize,
        text: String,
        marks: Vec<Mark>,
    },
    Delete {
        from: usize,
        to: usize,
    },
}

/// The mutation builder: queue steps, commit once.
///
/// Mirrors the host editor's transaction contract: add-mark, insert,
/// delete, and a single dispatch. There is exactly one commit per
/// applicator call; the engine never mutates the tree any other way.
#[derive(Debug, Default)]
pub struct Transaction {
    steps: Vec<Step>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mark(&mut self, from: usize, to: usize, mark: Mark) {
        self.steps.push(Step::AddMark { from, to, mark });
    }

    pub fn remove_mark(&mut self, from: usize, to: usize, kind: MarkKind) {
        self.steps.push(Step::RemoveMark { from, to, kind });
    }

    pub fn insert_text(&mut self, at: usize, text: impl Into<String>, marks: Vec<Mark>) {
        self.steps.push(Step::InsertText {
            at,
            text: text.into(),
            marks,
        });
    }

    pub fn delete(&mut self, from: usize, to: usize) {
        self.steps.push(Step::Delete { from, to });
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Apply every queued step to the document, in queue order.
    pub fn commit(self, doc: &mut Document) {
        for step in self.steps {
            match step {
                Step::AddMark { from, to, mark } => doc.add_mark_range(from, to, &mark),
                Step::RemoveMark { from, to, kind } => doc.remove_mark_range(from, to, kind),
                Step::InsertText { at, text, marks } => {
                    if !text.is_empty() {
                        doc.insert_text_at(at, Node::marked_text(text, marks));
                    }
                }
                Step::Delete { from, to } => doc.delete_range(from, to),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_commit_applies_steps_in_order() {
        let mut doc =
            Document::from_children(vec![Node::paragraph(vec![Node::text("Hello world")])]);
        let mut tx = Transaction::new();
        // Descending positions: mark "world" first, then insert at a lower
        // position so the mark target was still valid when queued.
        tx.add_mark(7, 12, Mark::new(MarkKind::Bold));
        tx.insert_text(7, "brave ", vec![]);
        tx.commit(&mut doc);

        let leaves = doc.text_leaves();
        let texts: Vec<_> = leaves
            .iter()
            .map(|(_, n)| n.text.as_deref().unwrap())
            .collect();
        assert_eq!(texts, vec!["Hello ", "brave ", "world"]);
        // The mark stays on the original "world" leaf even though the
        // insert shifted its position.
        assert!(leaves[2].1.has_mark(MarkKind::Bold));
        assert!(!leaves[1].1.has_mark(MarkKind::Bold));
    }

    #[test]
    fn test_empty_insert_is_dropped() {
        let mut doc = Document::from_children(vec![Node::paragraph(vec![Node::text("ab")])]);
        let before = doc.clone();
        let mut tx = Transaction::new();
        tx.insert_text(1, "", vec![]);
        tx.commit(&mut doc);
        assert_eq!(doc, before);
    }
}
