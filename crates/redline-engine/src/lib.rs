pub mod apply;
pub mod compare;
pub mod diff;
pub mod doc;
pub mod error;
pub mod extract;
pub mod mapping;
pub mod resolve;

// Re-export key types for easier usage
pub use apply::{
    apply_changes, apply_formatting_changes, ReviewSession, TrackChangeUser, TrackChangesResult,
};
pub use compare::{compare_documents, CompareOptions, CompareOutcome};
pub use diff::{
    compute_changes, compute_formatting_changes, summarize, Change, ChangeKind, DiffSummary,
    FormatChangeKind, FormattingChange,
};
pub use doc::{Attrs, Document, Mark, MarkKind, Node, NodeKind, Schema, Step, Transaction};
pub use error::{ApplyError, MapError};
pub use extract::{
    extract_plain_text, extract_with_formatting, extract_with_positions, ExtractedText,
    FormattedText, FormattingSpan,
};
pub use mapping::{map_change, Modification};
pub use resolve::{annotated_change_ids, resolve_all, resolve_change, ResolveAction};
