// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

pub mod history;
pub mod matcher;

pub use history::ApcHistory;
pub use matcher::{ApcMatch, ApcMatcher};
