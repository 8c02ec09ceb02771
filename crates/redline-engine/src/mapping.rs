//! Position Mapper: convert a change's character offsets into tree
//! positions through the extraction index.
//!
//! Insertions and replacements translate directly, since their content
//! survives in the modified text the index was built from. Deletions
//! cannot: their content is absent from that snapshot by definition, so
//! offset math alone has nothing to point at. They get a two-tier strategy
//! instead: search for the trailing context captured at diff time (drawn
//! from surviving text), and only fall back to translating the raw anchor
//! offset.

use std::ops::Range;

use log::warn;

use crate::diff::{get_deletion_search_context, has_sufficient_context, Change, ChangeKind, SEARCH_CONTEXT_MAX};
use crate::error::MapError;
use crate::extract::ExtractedText;

/// A change mapped into tree space, ready for application. Produced once
/// per change per batch, consumed once by the applicator.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub change: Change,
    pub pm_from: usize,
    pub pm_to: usize,
    pub is_deletion: bool,
    /// Tree range of the matched context, kept so the applicator can copy
    /// formatting from real, currently-present text at the anchor.
    pub context_range: Option<Range<usize>>,
}

/// Map one change into tree space against the live document's index.
pub fn map_change(change: &Change, index: &ExtractedText) -> Result<Modification, MapError> {
    match &change.kind {
        ChangeKind::Insertion {
            char_start,
            char_end,
        }
        | ChangeKind::Replacement {
            char_start,
            char_end,
            ..
        } => {
            let pm_from = index
                .pos_at(*char_start)
                .ok_or(MapError::UnmappedOffset { offset: *char_start })?;
            let pm_to = index
                .pos_at(char_end - 1)
                .map(|p| p + 1)
                .ok_or(MapError::UnmappedOffset { offset: char_end - 1 })?;
            Ok(Modification {
                change: change.clone(),
                pm_from,
                pm_to,
                is_deletion: false,
                context_range: None,
            })
        }
        ChangeKind::Deletion { insert_at, .. } => {
            if has_sufficient_context(change) {
                if let Some(mapped) = map_deletion_by_context(change, index, *insert_at) {
                    return Ok(mapped);
                }
                warn!(
                    "deletion context search missed for {:?}, falling back to index translation",
                    change.content
                );
            }
            map_deletion_by_offset(change, index, *insert_at)
        }
    }
}

/// Preferred deletion path: literal search for the trailing context. The
/// true anchor always sits right after the context, so when the needle
/// occurs more than once the match whose end is nearest `insert_at` wins.
fn map_deletion_by_context(
    change: &Change,
    index: &ExtractedText,
    insert_at: usize,
) -> Option<Modification> {
    let needle = get_deletion_search_context(change, SEARCH_CONTEXT_MAX)?;
    let matches = index.find(&needle);
    let best = matches
        .into_iter()
        .min_by_key(|m| m.end.abs_diff(insert_at))?;
    let context_range = index.pos_range(best.clone())?;
    let anchor = context_range.end;
    Some(Modification {
        change: change.clone(),
        pm_from: anchor,
        pm_to: anchor,
        is_deletion: true,
        context_range: Some(context_range),
    })
}

/// Fallback deletion path: translate the anchor offset through the index,
/// or through the slot just before it when the exact slot is absent (an
/// anchor at the very end of the text has no character of its own).
fn map_deletion_by_offset(
    change: &Change,
    index: &ExtractedText,
    insert_at: usize,
) -> Result<Modification, MapError> {
    let anchor = index
        .pos_at(insert_at)
        .or_else(|| {
            insert_at
                .checked_sub(1)
                .and_then(|prev| index.pos_at(prev))
                .map(|p| p + 1)
        })
        .or(if index.char_len() == 0 { Some(0) } else { None })
        .ok_or_else(|| MapError::DeletionAnchorNotFound {
            content: change.content.clone(),
        })?;
    Ok(Modification {
        change: change.clone(),
        pm_from: anchor,
        pm_to: anchor,
        is_deletion: true,
        context_range: None,
    })
}
