//! Wildcard query compilation and execution.
//!
//! A query is compiled once per archive (dictionaries and IDs are
//! archive-local) into sub-query plans ([`plan`]), then run over the
//! archive's streams ([`grep`]). The byte-level matcher in [`wildcard`]
//! serves both sides.

pub mod grep;
pub mod plan;
pub mod wildcard;

pub use grep::{search_archive, MatchSink};
pub use plan::{Query, SubQuery, VarPredicate};
pub use wildcard::{has_wildcards, wildcard_match};
