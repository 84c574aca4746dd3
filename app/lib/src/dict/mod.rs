//! Append-only dictionaries mapping tokens to fixed-width IDs.
//!
//! An archive carries two: the variable dictionary (distinct token strings)
//! and the log-type dictionary (templates with placeholder bytes). Both are
//! duplicate-eliminating maps assigning IDs densely from 0. IDs are never
//! reused or reordered; a reader's view is immutable between refreshes.
//!
//! On disk a dictionary is an 8-byte entry-count header followed by a
//! compressed stream of `(id: u64, len: u64, bytes)` triples in ID order.
//! The count header is rewritten at each snapshot, so readers only ever see
//! entries up to the writer's last committed point.

mod reader;
mod writer;

pub use reader::{DictionaryReader, LogTypeDictionaryReader};
pub use writer::DictionaryWriter;

use crate::encode::PlaceholderKind;

/// Identifier assigned to a dictionary entry.
pub type DictionaryId = u64;

/// A log-type dictionary entry: the template string plus the ordered
/// placeholder kinds extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTypeEntry {
    template: String,
    placeholders: Vec<PlaceholderKind>,
}

impl LogTypeEntry {
    /// Builds an entry from a template, extracting its placeholder kinds.
    pub fn from_template(template: String) -> Self {
        let placeholders = template
            .bytes()
            .filter_map(PlaceholderKind::from_byte)
            .collect();
        Self {
            template,
            placeholders,
        }
    }

    /// The template text, placeholder bytes included.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder kinds in template order.
    pub fn placeholders(&self) -> &[PlaceholderKind] {
        &self.placeholders
    }

    /// Number of variable slots messages of this log-type carry.
    pub fn num_vars(&self) -> usize {
        self.placeholders.len()
    }
}
