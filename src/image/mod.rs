//! Local image references, glob filters and candidate selection

pub mod glob;
pub mod index;
pub mod reference;

pub use glob::{glob_match, matches_any};
pub use index::{CandidateFilter, Classification, LocalImage, select_candidates};
pub use reference::ImageRef;
