use thiserror::Error;

use crate::doc::MarkKind;

/// Fatal preconditions: these abort an entire applicator call with zero
/// successes. Everything else in the pipeline degrades per-change.
#[derive(Debug, Error, PartialEq)]
pub enum ApplyError {
    #[error("document schema is missing required mark kind '{0}'")]
    MissingMarkKind(MarkKind),
}

/// Per-change mapping failures. These are logged, reported through
/// `TrackChangesResult::errors`, and never abort a batch.
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("no tree position for character offset {offset} (index/tree desync)")]
    UnmappedOffset { offset: usize },

    #[error("could not anchor deletion of {content:?}: context search and position fallback both failed")]
    DeletionAnchorNotFound { content: String },
}
