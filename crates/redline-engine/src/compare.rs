//! Pipeline front door: extract both snapshots, diff content and
//! formatting, and materialize the results as annotations in the live
//! tree, all in one synchronous pass.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::apply::{
    apply_changes, apply_formatting_changes, ReviewSession, TrackChangeUser, TrackChangesResult,
};
use crate::diff::{
    compute_changes_with, compute_formatting_changes_with, summarize, Change, DiffSummary,
    FormattingChange, CONTEXT_LENGTH, MIN_UNCHANGED_RANGE,
};
use crate::doc::Document;
use crate::error::ApplyError;
use crate::extract::{extract_indexed, extract_with_formatting};

/// Tunables for a comparison pass. The defaults are the documented
/// behavior; the struct exists so hosts can pin them in their own config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Characters of trailing context captured per deletion.
    pub context_length: usize,
    /// Minimum width of an unchanged region considered for formatting diff.
    pub min_unchanged_range: usize,
    /// Treat whitespace-only diff runs as formatting noise, not content.
    pub ignore_whitespace_runs: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            context_length: CONTEXT_LENGTH,
            min_unchanged_range: MIN_UNCHANGED_RANGE,
            ignore_whitespace_runs: true,
        }
    }
}

/// Everything one comparison pass produces. The change lists and summary
/// describe what was found; `result` describes how much of it landed.
#[derive(Debug, Clone)]
pub struct CompareOutcome {
    pub changes: Vec<Change>,
    pub formatting_changes: Vec<FormattingChange>,
    pub summary: DiffSummary,
    pub result: TrackChangesResult,
}

/// Compare an original snapshot against the live document and annotate the
/// live document with the differences.
///
/// Formatting annotations are applied before content annotations: they
/// never insert or delete text, so the shared index stays valid for the
/// content batch that follows.
pub fn compare_documents(
    original: &Document,
    live: &mut Document,
    user: TrackChangeUser,
    options: &CompareOptions,
) -> Result<CompareOutcome, ApplyError> {
    let orig = extract_with_formatting(original);
    let (index, modified_spans) = extract_indexed(live);

    let changes = compute_changes_with(
        &orig.text,
        &index.text,
        options.context_length,
        options.ignore_whitespace_runs,
    );
    let formatting_changes = compute_formatting_changes_with(
        &orig.text,
        &orig.formatting,
        &index.text,
        &modified_spans,
        options.min_unchanged_range,
    );
    let summary = summarize(&changes, &formatting_changes);
    debug!(
        "comparison found {} content and {} formatting changes",
        changes.len(),
        formatting_changes.len()
    );

    let mut session = ReviewSession { doc: live, index, user };
    let result = apply_formatting_changes(&mut session, &formatting_changes)?
        .merge(apply_changes(&mut session, &changes)?);

    Ok(CompareOutcome {
        changes,
        formatting_changes,
        summary,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Mark, MarkKind, Node};
    use crate::extract::extract_plain_text;
    use pretty_assertions::assert_eq;

    fn reviewer() -> TrackChangeUser {
        TrackChangeUser {
            name: "Ada Reviewer".into(),
            email: "ada@example.com".into(),
            avatar: None,
        }
    }

    #[test]
    fn test_full_pass_counts_and_applies() {
        let original = Document::from_children(vec![Node::paragraph(vec![Node::text(
            "Hello world",
        )])]);
        let mut live = Document::from_children(vec![Node::paragraph(vec![Node::text(
            "Hello beautiful world",
        )])]);
        let outcome =
            compare_documents(&original, &mut live, reviewer(), &CompareOptions::default())
                .unwrap();

        assert_eq!(outcome.summary.insertions, 1);
        assert_eq!(outcome.result.success_count, 1);
        assert!(outcome.result.errors.is_empty());
        assert_eq!(extract_plain_text(&live), "Hello beautiful world");
    }

    #[test]
    fn test_identical_documents_produce_empty_outcome() {
        let original =
            Document::from_children(vec![Node::paragraph(vec![Node::text("Same text")])]);
        let mut live = original.clone();
        let outcome =
            compare_documents(&original, &mut live, reviewer(), &CompareOptions::default())
                .unwrap();
        assert_eq!(outcome.changes, vec![]);
        assert_eq!(outcome.summary, DiffSummary::default());
        assert_eq!(outcome.result, TrackChangesResult::default());
    }

    #[test]
    fn test_content_and_formatting_changes_in_one_pass() {
        let original = Document::from_children(vec![Node::paragraph(vec![Node::text(
            "Keep this text as is",
        )])]);
        let mut live = Document::from_children(vec![Node::paragraph(vec![
            Node::marked_text("Keep", vec![Mark::new(MarkKind::Bold)]),
            Node::text(" this text as is now"),
        ])]);
        let outcome =
            compare_documents(&original, &mut live, reviewer(), &CompareOptions::default())
                .unwrap();
        assert_eq!(outcome.summary.insertions, 1);
        assert_eq!(outcome.summary.formatting_changes, 1);
        assert_eq!(outcome.result.success_count, 2);
    }

    #[test]
    fn test_options_round_trip_through_serde() {
        let options = CompareOptions::default();
        let json = serde_json::to_string(&options).unwrap();
        let back: CompareOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
    }
}
