pub mod candidate;
pub mod merged;
pub mod record;

pub use candidate::{Bucket, GroupId, MatchCandidate, MatchGroup, ReviewItem};
pub use merged::{ConflictFlag, MergedContact, ValueProvenance};
pub use record::{
    escape_text, split_unescaped, unescape_text, FieldKind, Param, Property, Record, RecordId,
    SourceId,
};
