//! Reader half of a dictionary.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::config::Codec;
use crate::dict::{DictionaryId, LogTypeEntry};
use crate::error::{LogPackError, Result};
use crate::io::{open_decompressor, read_u64_le, Decompressor};
use crate::query::wildcard::wildcard_match;

/// Immutable view of a dictionary, reloadable to follow a growing archive.
pub struct DictionaryReader {
    path: PathBuf,
    codec: Codec,
    entries: Vec<String>,
}

impl DictionaryReader {
    /// Loads the dictionary at `path`.
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let mut reader = Self {
            path: path.to_path_buf(),
            codec,
            entries: Vec::new(),
        };
        reader.refresh()?;
        Ok(reader)
    }

    /// Re-reads the dictionary to pick up entries committed since open.
    ///
    /// Dictionaries are append-only, so a refresh can only grow the view.
    pub fn refresh(&mut self) -> Result<()> {
        let mut file = fs::File::open(&self.path)?;
        let count = file.read_u64::<LittleEndian>()?;
        let mut decompressor = open_decompressor(file, self.codec)?;

        let mut entries = Vec::with_capacity(count as usize);
        let mut scratch = Vec::new();
        for expected_id in 0..count {
            scratch.clear();
            decompressor.read_exact(16, &mut scratch).map_err(|e| {
                if e.is_end_of_stream() {
                    LogPackError::corrupt(format!(
                        "dictionary ends at entry {} of {}",
                        expected_id, count
                    ))
                } else {
                    e
                }
            })?;
            let mut pos = 0;
            let id = read_u64_le(&scratch, &mut pos)?;
            let len = read_u64_le(&scratch, &mut pos)? as usize;
            if id != expected_id {
                return Err(LogPackError::corrupt(format!(
                    "dictionary IDs not dense: expected {}, found {}",
                    expected_id, id
                )));
            }
            scratch.clear();
            decompressor.read_exact(len, &mut scratch)?;
            let token = String::from_utf8(scratch.clone())
                .map_err(|_| LogPackError::corrupt("dictionary entry is not UTF-8"))?;
            entries.push(token);
        }
        self.entries = entries;
        Ok(())
    }

    /// Looks up an entry by ID.
    ///
    /// A miss during decode implies a corrupt archive, and is reported as
    /// one.
    pub fn get(&self, id: DictionaryId) -> Result<&str> {
        self.entries
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                LogPackError::corrupt(format!(
                    "dictionary ID {} out of range ({} entries)",
                    id,
                    self.entries.len()
                ))
            })
    }

    /// Number of entries in the current view.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(id, token)` pairs in ID order.
    pub fn entries(&self) -> impl Iterator<Item = (DictionaryId, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, token)| (id as DictionaryId, token.as_str()))
    }

    /// Returns the IDs of all entries matching a wildcard pattern.
    ///
    /// A linear scan; the observable contract is only the returned ID set.
    pub fn search(&self, pattern: &str, case_sensitive: bool) -> HashSet<DictionaryId> {
        self.entries()
            .filter(|(_, token)| {
                wildcard_match(token.as_bytes(), pattern.as_bytes(), case_sensitive)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Reader for the log-type dictionary; caches parsed placeholder lists.
pub struct LogTypeDictionaryReader {
    inner: DictionaryReader,
    parsed: Vec<LogTypeEntry>,
}

impl LogTypeDictionaryReader {
    /// Loads the log-type dictionary at `path`.
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let inner = DictionaryReader::open(path, codec)?;
        let mut reader = Self {
            inner,
            parsed: Vec::new(),
        };
        reader.rebuild_parsed();
        Ok(reader)
    }

    /// Re-reads the dictionary to pick up entries committed since open.
    pub fn refresh(&mut self) -> Result<()> {
        self.inner.refresh()?;
        self.rebuild_parsed();
        Ok(())
    }

    fn rebuild_parsed(&mut self) {
        // Append-only: entries already parsed keep their IDs.
        for (_, template) in self.inner.entries().skip(self.parsed.len()) {
            self.parsed
                .push(LogTypeEntry::from_template(template.to_string()));
        }
    }

    /// Looks up a log-type entry by ID.
    pub fn entry(&self, id: DictionaryId) -> Result<&LogTypeEntry> {
        self.parsed.get(id as usize).ok_or_else(|| {
            LogPackError::corrupt(format!(
                "log-type ID {} out of range ({} entries)",
                id,
                self.parsed.len()
            ))
        })
    }

    /// Iterates `(id, entry)` pairs in ID order.
    pub fn entries(&self) -> impl Iterator<Item = (DictionaryId, &LogTypeEntry)> {
        self.parsed
            .iter()
            .enumerate()
            .map(|(id, entry)| (id as DictionaryId, entry))
    }

    /// Returns the IDs of all templates matching a wildcard pattern.
    ///
    /// The pattern may contain placeholder bytes; `*` and `?` in the
    /// pattern match placeholder bytes like any other, which is how a
    /// query's concrete value in a variable position still reaches
    /// log-types whose placeholder could have produced it.
    pub fn search_templates(
        &self,
        pattern: &[u8],
        case_sensitive: bool,
    ) -> HashSet<DictionaryId> {
        self.entries()
            .filter(|(_, entry)| {
                wildcard_match(entry.template().as_bytes(), pattern, case_sensitive)
            })
            .map(|(id, _)| id)
            .collect()
    }
}
