//! Resolution Engine: approve or reject a previously-applied change.
//!
//! Ranges are never recomputed from the original diff; positions may have
//! shifted since application (earlier resolutions, other edits). Instead
//! each call runs one full-document scan for annotation marks tagged with
//! the target id and processes what it finds in descending position order.
//! An id with no remaining marks is a no-op, which is what makes
//! resolution idempotent.

use std::ops::Range;

use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::apply::TrackChangesResult;
use crate::doc::{Document, Mark, MarkKind, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    /// Make the change permanent.
    Approve,
    /// Revert the change to its pre-diff state.
    Reject,
}

struct Found {
    range: Range<usize>,
    mark: Mark,
}

/// Approve or reject every annotation carrying `change_id`. A replacement's
/// insertion half and ghost-deletion half share one id and resolve together
/// as one logical action.
pub fn resolve_change(
    doc: &mut Document,
    change_id: Uuid,
    action: ResolveAction,
) -> TrackChangesResult {
    let id = change_id.to_string();
    let mut found: Vec<Found> = Vec::new();
    doc.visit(&mut |pos, node| {
        if !node.is_text() {
            return;
        }
        for mark in &node.marks {
            if mark.kind.is_annotation() && mark.attr_str("id") == Some(id.as_str()) {
                found.push(Found {
                    range: pos..pos + node.text_len(),
                    mark: mark.clone(),
                });
            }
        }
    });

    if found.is_empty() {
        debug!("resolve {change_id}: no remaining marks, nothing to do");
        return TrackChangesResult::default();
    }

    found.sort_by(|a, b| b.range.start.cmp(&a.range.start));

    let total = found.len();
    let mut errors = Vec::new();
    let mut tx = Transaction::new();
    for item in &found {
        match (action, item.mark.kind) {
            (ResolveAction::Approve, MarkKind::Insertion) => {
                tx.remove_mark(item.range.start, item.range.end, MarkKind::Insertion);
            }
            (ResolveAction::Approve, MarkKind::Deletion) => {
                tx.delete(item.range.start, item.range.end);
            }
            (ResolveAction::Approve, MarkKind::FormatChange) => {
                // The live text already carries the new formatting; only
                // the overlay goes away.
                tx.remove_mark(item.range.start, item.range.end, MarkKind::FormatChange);
            }
            (ResolveAction::Reject, MarkKind::Insertion) => {
                tx.delete(item.range.start, item.range.end);
            }
            (ResolveAction::Reject, MarkKind::Deletion) => {
                tx.remove_mark(item.range.start, item.range.end, MarkKind::Deletion);
            }
            (ResolveAction::Reject, MarkKind::FormatChange) => {
                if let Err(message) = reject_format_change(&mut tx, item) {
                    warn!("resolve {change_id}: {message}");
                    errors.push(message);
                }
            }
            (_, kind) => {
                errors.push(format!("unexpected annotation kind '{kind}' for id {id}"));
            }
        }
    }
    let failed = errors.len();
    tx.commit(doc);

    TrackChangesResult {
        success_count: total - failed,
        total_count: total,
        errors,
    }
}

/// Revert a formatting annotation: drop the overlay, then restore the old
/// attribute snapshot it recorded.
fn reject_format_change(tx: &mut Transaction, item: &Found) -> Result<(), String> {
    let (from, to) = (item.range.start, item.range.end);
    tx.remove_mark(from, to, MarkKind::FormatChange);

    let mark_kind: MarkKind = item
        .mark
        .attrs
        .get("mark_kind")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| "format-change mark has no readable mark_kind".to_string())?;
    let old_attrs = match item.mark.attrs.get("old_attrs") {
        Some(Value::Object(map)) => map.clone(),
        _ => Default::default(),
    };

    match item.mark.attr_str("change_kind") {
        Some("added") => {
            tx.remove_mark(from, to, mark_kind);
            Ok(())
        }
        Some("removed") | Some("modified") => {
            tx.add_mark(from, to, Mark::with_attrs(mark_kind, old_attrs));
            Ok(())
        }
        other => Err(format!("format-change mark has unknown change_kind {other:?}")),
    }
}

/// Every distinct change id currently annotated in the document, in
/// document order.
pub fn annotated_change_ids(doc: &Document) -> Vec<Uuid> {
    let mut ids = Vec::new();
    doc.visit(&mut |_, node| {
        for mark in &node.marks {
            if mark.kind.is_annotation() {
                if let Some(id) = mark.attr_str("id").and_then(|s| Uuid::parse_str(s).ok()) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
    });
    ids
}

/// Approve or reject everything: collect the distinct ids first, then
/// resolve each with its own scan, since every resolution shifts what the
/// next scan will find.
pub fn resolve_all(doc: &mut Document, action: ResolveAction) -> TrackChangesResult {
    annotated_change_ids(doc)
        .into_iter()
        .fold(TrackChangesResult::default(), |acc, id| {
            acc.merge(resolve_change(doc, id, action))
        })
}
