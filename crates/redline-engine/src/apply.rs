//! Annotation Applicator: turn mapped changes into tree mutations.
//!
//! One call is one build→sort→apply cycle: every change is mapped, the
//! modifications are sorted descending by tree position, and everything is
//! folded into a single transaction with exactly one commit. Descending
//! order is what keeps the batch safe: each mutation shifts positions
//! after it, never before it, so every not-yet-applied target stays valid.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::diff::{Change, ChangeKind, FormatChangeKind, FormattingChange};
use crate::doc::{Attrs, Document, Mark, MarkKind, Transaction};
use crate::error::ApplyError;
use crate::extract::{extract_with_positions, ExtractedText};
use crate::mapping::{map_change, Modification};

/// Attribution carried on every annotation mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackChangeUser {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Outcome of an apply or resolve call: how much of the batch landed, and
/// what went wrong with the rest. Per-change failures live here; they are
/// never raised as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackChangesResult {
    pub success_count: usize,
    pub total_count: usize,
    pub errors: Vec<String>,
}

impl TrackChangesResult {
    pub fn merge(mut self, other: TrackChangesResult) -> TrackChangesResult {
        self.success_count += other.success_count;
        self.total_count += other.total_count;
        self.errors.extend(other.errors);
        self
    }
}

/// Short-lived state for one comparison pass: the live document, the index
/// extracted from it, and the author the annotations are attributed to.
/// Built fresh per pass and discarded afterwards; the index is never
/// reused across passes.
pub struct ReviewSession<'a> {
    pub doc: &'a mut Document,
    pub index: ExtractedText,
    pub user: TrackChangeUser,
}

impl<'a> ReviewSession<'a> {
    pub fn new(doc: &'a mut Document, user: TrackChangeUser) -> Self {
        let index = extract_with_positions(doc);
        Self { doc, index, user }
    }
}

/// Apply content changes as annotations in one batch.
///
/// A missing annotation mark kind in the document schema is the one fatal
/// precondition; everything else degrades per-change into `errors`.
pub fn apply_changes(
    session: &mut ReviewSession<'_>,
    changes: &[Change],
) -> Result<TrackChangesResult, ApplyError> {
    for kind in [MarkKind::Insertion, MarkKind::Deletion] {
        if !session.doc.schema().has_mark(kind) {
            return Err(ApplyError::MissingMarkKind(kind));
        }
    }

    let mut errors = Vec::new();
    let mut modifications: Vec<Modification> = Vec::new();
    for change in changes {
        match map_change(change, &session.index) {
            Ok(modification) => modifications.push(modification),
            Err(err) => {
                warn!("dropping change {}: {err}", change.id);
                errors.push(format!("change {}: {err}", change.id));
            }
        }
    }

    modifications.sort_by(|a, b| b.pm_from.cmp(&a.pm_from));

    let mut tx = Transaction::new();
    for modification in &modifications {
        fold_modification(session, &mut tx, modification);
    }
    debug!(
        "applying {} modifications as {} steps in one batch",
        modifications.len(),
        tx.len()
    );
    tx.commit(session.doc);

    Ok(TrackChangesResult {
        success_count: modifications.len(),
        total_count: changes.len(),
        errors,
    })
}

/// Apply formatting changes as annotations in one batch. Same discipline
/// as content changes; no text is inserted or deleted, so the only
/// position interaction is the shared descending order.
pub fn apply_formatting_changes(
    session: &mut ReviewSession<'_>,
    changes: &[FormattingChange],
) -> Result<TrackChangesResult, ApplyError> {
    if !session.doc.schema().has_mark(MarkKind::FormatChange) {
        return Err(ApplyError::MissingMarkKind(MarkKind::FormatChange));
    }

    let mut errors = Vec::new();
    let mut mapped: Vec<(usize, usize, &FormattingChange)> = Vec::new();
    for change in changes {
        match session.index.pos_range(change.char_start..change.char_end) {
            Some(range) => mapped.push((range.start, range.end, change)),
            None => {
                warn!("dropping formatting change {}: unmappable range", change.id);
                errors.push(format!(
                    "formatting change {}: no tree position for {}..{}",
                    change.id, change.char_start, change.char_end
                ));
            }
        }
    }

    mapped.sort_by(|a, b| b.0.cmp(&a.0));

    let success = mapped.len();
    let mut tx = Transaction::new();
    for (from, to, change) in mapped {
        tx.add_mark(from, to, format_change_mark(change, &session.user));
    }
    tx.commit(session.doc);

    Ok(TrackChangesResult {
        success_count: success,
        total_count: changes.len(),
        errors,
    })
}

fn fold_modification(session: &ReviewSession<'_>, tx: &mut Transaction, m: &Modification) {
    match &m.change.kind {
        ChangeKind::Insertion { .. } => {
            tx.add_mark(
                m.pm_from,
                m.pm_to,
                annotation_mark(MarkKind::Insertion, m.change.id, &session.user),
            );
        }
        ChangeKind::Deletion { .. } => {
            let mut marks = ghost_marks(session.doc, m);
            marks.push(annotation_mark(MarkKind::Deletion, m.change.id, &session.user));
            tx.insert_text(m.pm_from, m.change.content.clone(), marks);
        }
        ChangeKind::Replacement { old_content, .. } => {
            // Insertion mark over the surviving new text, plus a ghost node
            // carrying the old content spliced immediately before it.
            tx.add_mark(
                m.pm_from,
                m.pm_to,
                annotation_mark(MarkKind::Insertion, m.change.id, &session.user),
            );
            let mut marks = ghost_marks(session.doc, m);
            marks.push(annotation_mark(MarkKind::Deletion, m.change.id, &session.user));
            tx.insert_text(m.pm_from, old_content.clone(), marks);
        }
    }
}

/// Formatting for ghost text: copied from real text at the matched context
/// when we have one, else the node just before the anchor, else just after,
/// else whatever is active exactly at the anchor. Annotation marks are
/// excluded at every step.
fn ghost_marks(doc: &Document, m: &Modification) -> Vec<Mark> {
    let marks = if let Some(range) = &m.context_range {
        doc.marks_at(range.end.saturating_sub(1))
    } else if let Some(node) = doc.node_before(m.pm_from) {
        node.marks
    } else if let Some(node) = doc.node_after(m.pm_from) {
        node.marks
    } else {
        doc.marks_at(m.pm_from)
    };
    marks.into_iter().filter(|m| !m.kind.is_annotation()).collect()
}

fn base_attrs(id: Uuid, user: &TrackChangeUser) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("id".into(), json!(id.to_string()));
    attrs.insert("author".into(), json!(user.name));
    attrs.insert("email".into(), json!(user.email));
    if let Some(avatar) = &user.avatar {
        attrs.insert("avatar".into(), json!(avatar));
    }
    attrs.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    attrs
}

fn annotation_mark(kind: MarkKind, id: Uuid, user: &TrackChangeUser) -> Mark {
    Mark::with_attrs(kind, base_attrs(id, user))
}

fn format_change_mark(change: &FormattingChange, user: &TrackChangeUser) -> Mark {
    let mut attrs = base_attrs(change.id, user);
    let change_kind = match change.kind {
        FormatChangeKind::Added => "added",
        FormatChangeKind::Removed => "removed",
        FormatChangeKind::Modified => "modified",
    };
    attrs.insert("change_kind".into(), json!(change_kind));
    attrs.insert("mark_kind".into(), json!(change.mark_kind.as_str()));
    attrs.insert(
        "old_attrs".into(),
        change.old_attrs.clone().map_or(Value::Null, Value::Object),
    );
    attrs.insert(
        "new_attrs".into(),
        change.new_attrs.clone().map_or(Value::Null, Value::Object),
    );
    Mark::with_attrs(MarkKind::FormatChange, attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_changes;
    use crate::doc::{Node, Schema};
    use crate::extract::extract_plain_text;
    use pretty_assertions::assert_eq;

    fn reviewer() -> TrackChangeUser {
        TrackChangeUser {
            name: "Ada Reviewer".into(),
            email: "ada@example.com".into(),
            avatar: None,
        }
    }

    fn doc_from(text: &str) -> Document {
        Document::from_children(vec![Node::paragraph(vec![Node::text(text)])])
    }

    fn marked_leaves(doc: &Document, kind: MarkKind) -> Vec<String> {
        doc.text_leaves()
            .into_iter()
            .filter(|(_, n)| n.has_mark(kind))
            .map(|(_, n)| n.text.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_insertion_gets_mark_without_structural_change() {
        let mut doc = doc_from("Hello beautiful world");
        let changes = compute_changes("Hello world", "Hello beautiful world");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.total_count, 1);
        assert!(result.errors.is_empty());
        // Text unchanged, mark added over "beautiful".
        assert_eq!(extract_plain_text(&doc), "Hello beautiful world");
        assert_eq!(marked_leaves(&doc, MarkKind::Insertion), vec!["beautiful"]);
    }

    #[test]
    fn test_deletion_splices_ghost_text() {
        let mut doc = doc_from("Hello world");
        let changes = compute_changes("Hello beautiful world", "Hello world");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(marked_leaves(&doc, MarkKind::Deletion), vec!["beautiful"]);
        // Ghost text is physically present until resolved.
        assert!(extract_plain_text(&doc).contains("beautiful"));
    }

    #[test]
    fn test_replacement_marks_new_text_and_splices_ghost() {
        let mut doc = doc_from("Hello universe");
        let changes = compute_changes("Hello world", "Hello universe");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(marked_leaves(&doc, MarkKind::Insertion), vec!["universe"]);
        assert_eq!(marked_leaves(&doc, MarkKind::Deletion), vec!["world"]);
        // Ghost precedes the surviving text.
        let text = extract_plain_text(&doc);
        assert!(text.find("world").unwrap() < text.find("universe").unwrap());
    }

    #[test]
    fn test_replacement_halves_share_one_id() {
        let mut doc = doc_from("Hello universe");
        let changes = compute_changes("Hello world", "Hello universe");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        apply_changes(&mut session, &changes).unwrap();

        let id = changes[0].id.to_string();
        let mut annotated = 0;
        doc.visit(&mut |_, node| {
            for kind in [MarkKind::Insertion, MarkKind::Deletion] {
                if let Some(mark) = node.mark(kind) {
                    assert_eq!(mark.attr_str("id"), Some(id.as_str()));
                    annotated += 1;
                }
            }
        });
        assert_eq!(annotated, 2);
    }

    #[test]
    fn test_ghost_copies_formatting_from_context() {
        // "Hello" is bold in the live document; deleting text right after
        // it should produce a bold ghost.
        let mut doc = Document::from_children(vec![Node::paragraph(vec![
            Node::marked_text("Hello ", vec![Mark::new(MarkKind::Bold)]),
            Node::text("world"),
        ])]);
        let changes = compute_changes("Hello bold world", "Hello world");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();
        assert_eq!(result.success_count, 1);

        let ghost = doc
            .text_leaves()
            .into_iter()
            .find(|(_, n)| n.has_mark(MarkKind::Deletion))
            .expect("ghost node present");
        assert!(ghost.1.has_mark(MarkKind::Bold), "ghost marks: {:?}", ghost.1.marks);
    }

    #[test]
    fn test_annotation_attrs_carry_attribution() {
        let mut doc = doc_from("Hello beautiful world");
        let changes = compute_changes("Hello world", "Hello beautiful world");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        apply_changes(&mut session, &changes).unwrap();

        let (_, leaf) = doc
            .text_leaves()
            .into_iter()
            .find(|(_, n)| n.has_mark(MarkKind::Insertion))
            .unwrap();
        let mark = leaf.mark(MarkKind::Insertion).unwrap();
        assert_eq!(mark.attr_str("author"), Some("Ada Reviewer"));
        assert_eq!(mark.attr_str("email"), Some("ada@example.com"));
        assert!(mark.attr_str("timestamp").unwrap().contains('T'));
    }

    #[test]
    fn test_missing_schema_kind_aborts_whole_call() {
        let mut doc = Document::with_schema(
            vec![Node::paragraph(vec![Node::text("Hello beautiful world")])],
            Schema::without(MarkKind::Insertion),
        );
        let before = doc.clone();
        let changes = compute_changes("Hello world", "Hello beautiful world");
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let err = apply_changes(&mut session, &changes).unwrap_err();
        assert_eq!(err, ApplyError::MissingMarkKind(MarkKind::Insertion));
        assert_eq!(doc, before, "aborted call must not mutate the document");
    }

    #[test]
    fn test_unmappable_change_is_skipped_not_fatal() {
        let mut doc = doc_from("Hello beautiful world");
        let mut changes = compute_changes("Hello world", "Hello beautiful world");
        // A second change with offsets far past the end of the text.
        changes.push(Change {
            id: uuid::Uuid::new_v4(),
            content: "stale".into(),
            kind: ChangeKind::Insertion {
                char_start: 500,
                char_end: 505,
            },
        });
        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.total_count, 2);
        assert_eq!(result.errors.len(), 1);
        // The mappable change still landed.
        assert_eq!(marked_leaves(&doc, MarkKind::Insertion), vec!["beautiful"]);
    }

    #[test]
    fn test_formatting_change_applies_overlay_mark() {
        use crate::diff::compute_formatting_changes;
        use crate::extract::extract_with_formatting;

        let original = doc_from("This is Important stuff");
        let mut modified = Document::from_children(vec![Node::paragraph(vec![
            Node::text("This is "),
            Node::marked_text("Important", vec![Mark::new(MarkKind::Bold)]),
            Node::text(" stuff"),
        ])]);

        let orig = extract_with_formatting(&original);
        let modi = extract_with_formatting(&modified);
        let fmt = compute_formatting_changes(&orig.text, &orig.formatting, &modi.text, &modi.formatting);
        assert_eq!(fmt.len(), 1);

        let mut session = ReviewSession::new(&mut modified, reviewer());
        let result = apply_formatting_changes(&mut session, &fmt).unwrap();
        assert_eq!(result.success_count, 1);

        let annotated = marked_leaves(&modified, MarkKind::FormatChange);
        assert_eq!(annotated, vec!["Important"]);
        // Text itself untouched.
        assert_eq!(extract_plain_text(&modified), "This is Important stuff");
    }

    #[test]
    fn test_batch_of_multiple_changes_lands_without_position_corruption() {
        let original = "alpha beta gamma delta epsilon";
        let modified = "alpha bravo gamma delta zeta epsilon";
        let mut doc = doc_from(modified);
        let changes = compute_changes(original, modified);
        assert!(changes.len() >= 2);

        let mut session = ReviewSession::new(&mut doc, reviewer());
        let result = apply_changes(&mut session, &changes).unwrap();
        assert_eq!(result.success_count, changes.len());
        assert!(result.errors.is_empty());
        // Every surviving-text change is marked at exactly its own content.
        for change in &changes {
            if change.char_range().is_some() {
                assert!(
                    marked_leaves(&doc, MarkKind::Insertion)
                        .iter()
                        .any(|t| t == &change.content),
                    "missing mark for {:?}",
                    change.content
                );
            }
        }
    }
}
