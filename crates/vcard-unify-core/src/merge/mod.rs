//! Folding identity groups into merged contacts.

pub mod policy;
pub mod resolver;

pub use policy::{
    FieldCandidate, MostCompletePolicy, PriorityPolicy, SelectionPolicy, SourcePriority,
};
pub use resolver::{merge, MergeResolver, ALTERNATE_PREFIX, CONFLICT_BDAY, SOURCE_PARAM};
