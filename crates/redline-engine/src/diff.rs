//! Diff Engine: character-level comparison of two plain texts, classified
//! into insertions, deletions and replacements with exact modified-text
//! offsets, plus a separate formatting diff over unchanged regions.
//!
//! The LCS itself comes from `similar::TextDiff::from_chars`; run
//! boundaries and tie-breaking are whatever its Myers implementation
//! emits. A short semantic pass absorbs tiny equal runs sandwiched
//! between edits so that `"world" -> "universe"` reads as one replacement
//! instead of shrapnel around the shared `r`.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use uuid::Uuid;

use crate::doc::{Attrs, Mark, MarkKind};
use crate::extract::{extract_context, marks_at_offset, FormattingSpan};

/// Characters of trailing context captured for each deletion.
pub const CONTEXT_LENGTH: usize = 30;
/// Deletions with less context than this cannot be search-anchored.
pub const MIN_DELETION_CONTEXT: usize = 5;
/// Cap on the context actually used for the literal search.
pub const SEARCH_CONTEXT_MAX: usize = 20;
/// Unchanged regions narrower than this are ignored by the formatting diff.
pub const MIN_UNCHANGED_RANGE: usize = 2;
/// Equal runs shorter than this, with edits on both sides, are folded into
/// the surrounding replacement.
const SEMANTIC_EQUAL_MIN: usize = 4;

/// Position payload per change classification. Insertions and replacements
/// address surviving text in the modified snapshot; deletions address the
/// gap their content vanished from, plus the context needed to find it
/// again in the live tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChangeKind {
    Insertion {
        char_start: usize,
        char_end: usize,
    },
    Deletion {
        insert_at: usize,
        context_before: String,
    },
    Replacement {
        char_start: usize,
        char_end: usize,
        old_content: String,
    },
}

/// One content-diff unit. `content` is the surviving text for insertions
/// and replacements, and the removed text for deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub content: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl Change {
    fn new(content: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            kind,
        }
    }

    /// Offset used for application ordering: `char_start` where present,
    /// else the deletion anchor.
    pub fn effective_position(&self) -> usize {
        match self.kind {
            ChangeKind::Insertion { char_start, .. } => char_start,
            ChangeKind::Replacement { char_start, .. } => char_start,
            ChangeKind::Deletion { insert_at, .. } => insert_at,
        }
    }

    /// The modified-text range this change covers, when it covers one.
    pub fn char_range(&self) -> Option<Range<usize>> {
        match self.kind {
            ChangeKind::Insertion {
                char_start,
                char_end,
            }
            | ChangeKind::Replacement {
                char_start,
                char_end,
                ..
            } => Some(char_start..char_end),
            ChangeKind::Deletion { .. } => None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.kind, ChangeKind::Deletion { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatChangeKind {
    Added,
    Removed,
    Modified,
}

/// A formatting difference over text that is otherwise unchanged.
/// Positions are always in modified-text space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattingChange {
    pub id: Uuid,
    pub kind: FormatChangeKind,
    pub mark_kind: MarkKind,
    pub old_attrs: Option<Attrs>,
    pub new_attrs: Option<Attrs>,
    pub char_start: usize,
    pub char_end: usize,
}

/// Simple counts for the caller's review surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub insertions: usize,
    pub deletions: usize,
    pub replacements: usize,
    pub formatting_changes: usize,
}

pub fn summarize(changes: &[Change], formatting: &[FormattingChange]) -> DiffSummary {
    let mut summary = DiffSummary {
        formatting_changes: formatting.len(),
        ..DiffSummary::default()
    };
    for change in changes {
        match change.kind {
            ChangeKind::Insertion { .. } => summary.insertions += 1,
            ChangeKind::Deletion { .. } => summary.deletions += 1,
            ChangeKind::Replacement { .. } => summary.replacements += 1,
        }
    }
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Removed,
    Added,
}

#[derive(Debug, Clone)]
struct Run {
    tag: Tag,
    text: String,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn leading_whitespace(s: &str) -> usize {
    s.chars().take_while(|c| c.is_whitespace()).count()
}

/// Character-level LCS runs, consecutive same-tag characters folded.
fn diff_runs(original: &str, modified: &str) -> Vec<Run> {
    let diff = TextDiff::from_chars(original, modified);
    let mut runs: Vec<Run> = Vec::new();
    for change in diff.iter_all_changes() {
        let tag = match change.tag() {
            ChangeTag::Equal => Tag::Equal,
            ChangeTag::Delete => Tag::Removed,
            ChangeTag::Insert => Tag::Added,
        };
        match runs.last_mut() {
            Some(run) if run.tag == tag => run.text.push_str(change.value()),
            _ => runs.push(Run {
                tag,
                text: change.value().to_string(),
            }),
        }
    }
    cleanup_semantic(runs)
}

/// Fold tiny equal runs that sit between edits into the surrounding edit
/// pair. Within an edit block the removed half always precedes the added
/// half, so downstream replacement collapsing sees one clean pair.
fn cleanup_semantic(runs: Vec<Run>) -> Vec<Run> {
    fn push(out: &mut Vec<Run>, tag: Tag, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = out.last_mut() {
            if last.tag == tag {
                last.text.push_str(text);
                return;
            }
            // Keep removed-before-added inside one edit block.
            if tag == Tag::Removed && last.tag == Tag::Added {
                let idx = out.len() - 1;
                if idx > 0 && out[idx - 1].tag == Tag::Removed {
                    out[idx - 1].text.push_str(text);
                } else {
                    out.insert(idx, Run {
                        tag,
                        text: text.to_string(),
                    });
                }
                return;
            }
        }
        out.push(Run {
            tag,
            text: text.to_string(),
        });
    }

    let mut out: Vec<Run> = Vec::new();
    for (i, run) in runs.iter().enumerate() {
        if run.tag == Tag::Equal
            && char_len(&run.text) < SEMANTIC_EQUAL_MIN
            && out.last().is_some_and(|r| r.tag != Tag::Equal)
            && runs.get(i + 1).is_some_and(|r| r.tag != Tag::Equal)
        {
            // Absorbed into both sides of the surrounding edit.
            push(&mut out, Tag::Removed, &run.text);
            push(&mut out, Tag::Added, &run.text);
            continue;
        }
        push(&mut out, run.tag, &run.text);
    }
    out
}

/// Classify the diff between `original` and `modified` into positioned
/// content changes. Offsets are character offsets in `modified`.
pub fn compute_changes(original: &str, modified: &str) -> Vec<Change> {
    compute_changes_with(original, modified, CONTEXT_LENGTH, true)
}

pub fn compute_changes_with(
    original: &str,
    modified: &str,
    context_length: usize,
    skip_whitespace_runs: bool,
) -> Vec<Change> {
    if original == modified {
        return Vec::new();
    }
    let runs = diff_runs(original, modified);
    let mut changes = Vec::new();
    // Characters of `modified` consumed so far.
    let mut modified_index = 0usize;
    let mut i = 0;
    while i < runs.len() {
        let run = &runs[i];
        match run.tag {
            Tag::Equal => {
                modified_index += char_len(&run.text);
                i += 1;
            }
            Tag::Added => {
                let trimmed = run.text.trim();
                if trimmed.is_empty() && skip_whitespace_runs {
                    // Formatting noise, but it still occupies modified text.
                    modified_index += char_len(&run.text);
                    i += 1;
                    continue;
                }
                let (content, lead) = if trimmed.is_empty() {
                    (run.text.as_str(), 0)
                } else {
                    (trimmed, leading_whitespace(&run.text))
                };
                let char_start = modified_index + lead;
                let char_end = char_start + char_len(content);
                changes.push(Change::new(
                    content,
                    ChangeKind::Insertion {
                        char_start,
                        char_end,
                    },
                ));
                modified_index += char_len(&run.text);
                i += 1;
            }
            Tag::Removed => {
                let removed = run.text.trim();
                if removed.is_empty() && skip_whitespace_runs {
                    i += 1;
                    continue;
                }
                let removed = if removed.is_empty() {
                    run.text.as_str()
                } else {
                    removed
                };
                let next_added = runs
                    .get(i + 1)
                    .filter(|r| r.tag == Tag::Added && !r.text.trim().is_empty());
                if let Some(added) = next_added {
                    let trimmed = added.text.trim();
                    let char_start = modified_index + leading_whitespace(&added.text);
                    let char_end = char_start + char_len(trimmed);
                    changes.push(Change::new(
                        trimmed,
                        ChangeKind::Replacement {
                            char_start,
                            char_end,
                            old_content: removed.to_string(),
                        },
                    ));
                    modified_index += char_len(&added.text);
                    i += 2;
                } else {
                    // Removed text is absent from the modified snapshot:
                    // the anchor offset stays put and we capture what
                    // precedes it for later search-based placement.
                    changes.push(Change::new(
                        removed,
                        ChangeKind::Deletion {
                            insert_at: modified_index,
                            context_before: extract_context(
                                modified,
                                modified_index,
                                context_length,
                            ),
                        },
                    ));
                    i += 1;
                }
            }
        }
    }
    changes
}

/// Regions identical in both texts, from the same run stream the content
/// diff used. Each entry is (offset in original, offset in modified, len).
fn unchanged_ranges(original: &str, modified: &str, min_len: usize) -> Vec<(usize, usize, usize)> {
    let mut ranges = Vec::new();
    let mut orig_index = 0usize;
    let mut mod_index = 0usize;
    for run in diff_runs(original, modified) {
        let len = char_len(&run.text);
        match run.tag {
            Tag::Equal => {
                if len >= min_len {
                    ranges.push((orig_index, mod_index, len));
                }
                orig_index += len;
                mod_index += len;
            }
            Tag::Removed => orig_index += len,
            Tag::Added => mod_index += len,
        }
    }
    ranges
}

/// Diff formatting over text both versions share. Positions are expressed
/// in modified-text space throughout; original-space positions are
/// translated through each range's offset.
pub fn compute_formatting_changes(
    original: &str,
    original_spans: &[FormattingSpan],
    modified: &str,
    modified_spans: &[FormattingSpan],
) -> Vec<FormattingChange> {
    compute_formatting_changes_with(
        original,
        original_spans,
        modified,
        modified_spans,
        MIN_UNCHANGED_RANGE,
    )
}

pub fn compute_formatting_changes_with(
    original: &str,
    original_spans: &[FormattingSpan],
    modified: &str,
    modified_spans: &[FormattingSpan],
    min_unchanged: usize,
) -> Vec<FormattingChange> {
    struct Event {
        kind: FormatChangeKind,
        mark_kind: MarkKind,
        old_attrs: Option<Attrs>,
        new_attrs: Option<Attrs>,
        pos: usize,
    }

    let mut events: Vec<Event> = Vec::new();
    for (orig_start, mod_start, len) in unchanged_ranges(original, modified, min_unchanged) {
        for k in 0..len {
            let orig_marks = marks_at_offset(original_spans, orig_start + k);
            let mod_marks = marks_at_offset(modified_spans, mod_start + k);
            let orig_keys: BTreeMap<String, &Mark> =
                orig_marks.iter().map(|m| (m.identity_key(), m)).collect();
            let mod_keys: BTreeMap<String, &Mark> =
                mod_marks.iter().map(|m| (m.identity_key(), m)).collect();

            let mut only_orig: Vec<&Mark> = orig_keys
                .iter()
                .filter(|(k, _)| !mod_keys.contains_key(*k))
                .map(|(_, m)| *m)
                .collect();
            let mut only_mod: Vec<&Mark> = mod_keys
                .iter()
                .filter(|(k, _)| !orig_keys.contains_key(*k))
                .map(|(_, m)| *m)
                .collect();

            // Same mark kind on both sides with different identity keys is
            // one modification (href swap, color swap), not an unrelated
            // remove + add.
            let mut paired = Vec::new();
            for (oi, old) in only_orig.iter().enumerate() {
                if let Some(ni) = only_mod.iter().position(|new| new.kind == old.kind) {
                    paired.push((oi, ni));
                }
            }
            for &(oi, ni) in paired.iter().rev() {
                let old = only_orig.remove(oi);
                let new = only_mod.remove(ni);
                events.push(Event {
                    kind: FormatChangeKind::Modified,
                    mark_kind: new.kind,
                    old_attrs: Some(old.attrs.clone()),
                    new_attrs: Some(new.attrs.clone()),
                    pos: mod_start + k,
                });
            }
            for old in only_orig {
                events.push(Event {
                    kind: FormatChangeKind::Removed,
                    mark_kind: old.kind,
                    old_attrs: Some(old.attrs.clone()),
                    new_attrs: None,
                    pos: mod_start + k,
                });
            }
            for new in only_mod {
                events.push(Event {
                    kind: FormatChangeKind::Added,
                    mark_kind: new.kind,
                    old_attrs: None,
                    new_attrs: Some(new.attrs.clone()),
                    pos: mod_start + k,
                });
            }
        }
    }

    // Merge adjacent/overlapping entries of identical (kind, mark_kind):
    // sort by position, then fold.
    let mut groups: BTreeMap<(FormatChangeKind, MarkKind), Vec<Event>> = BTreeMap::new();
    for event in events {
        groups
            .entry((event.kind, event.mark_kind))
            .or_default()
            .push(event);
    }

    let mut changes = Vec::new();
    for ((kind, mark_kind), mut group) in groups {
        group.sort_by_key(|e| e.pos);
        let mut iter = group.into_iter();
        let first = iter.next().expect("group is non-empty");
        let mut start = first.pos;
        let mut end = first.pos + 1;
        let mut old_attrs = first.old_attrs;
        let mut new_attrs = first.new_attrs;
        for event in iter {
            if event.pos <= end {
                end = end.max(event.pos + 1);
            } else {
                changes.push(FormattingChange {
                    id: Uuid::new_v4(),
                    kind,
                    mark_kind,
                    old_attrs: old_attrs.take(),
                    new_attrs: new_attrs.take(),
                    char_start: start,
                    char_end: end,
                });
                start = event.pos;
                end = event.pos + 1;
                old_attrs = event.old_attrs;
                new_attrs = event.new_attrs;
            }
        }
        changes.push(FormattingChange {
            id: Uuid::new_v4(),
            kind,
            mark_kind,
            old_attrs,
            new_attrs,
            char_start: start,
            char_end: end,
        });
    }
    changes.sort_by_key(|c| c.char_start);
    changes
}

/// Stable descending sort by effective position. Never mutates its input:
/// every tree mutation shifts positions after it, so applying from highest
/// position to lowest keeps every not-yet-applied target valid.
pub fn sort_changes_for_application(changes: &[Change]) -> Vec<Change> {
    let mut sorted = changes.to_vec();
    sorted.sort_by(|a, b| b.effective_position().cmp(&a.effective_position()));
    sorted
}

/// Whether a deletion captured enough trailing context to be searched for.
pub fn has_sufficient_context(change: &Change) -> bool {
    match &change.kind {
        ChangeKind::Deletion { context_before, .. } => {
            char_len(context_before) >= MIN_DELETION_CONTEXT
        }
        _ => false,
    }
}

/// The trailing `min(max_length, len)` characters of a deletion's context,
/// or `None` when the context is insufficient.
pub fn get_deletion_search_context(change: &Change, max_length: usize) -> Option<String> {
    if !has_sufficient_context(change) {
        return None;
    }
    let ChangeKind::Deletion { context_before, .. } = &change.kind else {
        return None;
    };
    let chars: Vec<char> = context_before.chars().collect();
    let take = max_length.min(chars.len());
    Some(chars[chars.len() - take..].iter().collect())
}
