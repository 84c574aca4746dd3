//! Stream matching: running a compiled query over an archive.
//!
//! The dictionary path prunes segments through the segment indexes, prunes
//! files through the metadata store's timestamp columns, and only then
//! scans message streams. Every candidate is reconstructed and re-verified
//! against the full wildcard before being emitted, so dictionary
//! over-approximation can never produce a false match. The textual
//! fallback path scans every message in the timestamp range.

use log::debug;

use crate::archive::reader::{Archive, EncodedMessage};
use crate::dict::LogTypeEntry;
use crate::error::Result;
use crate::meta::{FileFilter, FileMetadata};
use crate::query::plan::{Query, SubQuery, VarPredicate};

/// Called once per matching message with its file row, message index, and
/// reconstructed text.
pub type MatchSink<'a> = dyn FnMut(&FileMetadata, u64, &str) -> Result<()> + 'a;

/// Runs `query` over `archive`, returning the number of matches emitted.
///
/// Matches are emitted at most once per `(file, message index)` pair.
pub fn search_archive(
    archive: &mut Archive,
    query: &Query,
    on_match: &mut MatchSink<'_>,
) -> Result<u64> {
    let base_filter = FileFilter {
        ts_range: if query.has_ts_range() {
            Some(query.ts_range())
        } else {
            None
        },
        ..Default::default()
    };

    if query.needs_textual_fallback() {
        return textual_scan(archive, query, &base_filter, on_match);
    }
    if query.sub_queries().is_empty() {
        return Ok(0);
    }

    let mut count = 0;
    for segment_id in archive.segment_ids()? {
        let surviving = surviving_sub_queries(archive, query, segment_id);
        if surviving.is_empty() {
            debug!("segment {} pruned by dictionary-ID index", segment_id);
            continue;
        }

        let filter = FileFilter {
            segment_id: Some(segment_id),
            ..base_filter.clone()
        };
        for meta in archive.files(&filter)? {
            let mut reader = archive.file_reader(&meta)?;
            while let Some(message) = reader.next_message(archive.logtype_dict())? {
                if !ts_in_range(query, &message) {
                    continue;
                }
                let entry = archive.logtype_dict().entry(message.logtype_id)?;
                let hit = surviving.iter().any(|&ix| {
                    message_matches(&query.sub_queries()[ix], entry, &message, query)
                });
                if !hit {
                    continue;
                }
                let text = archive.reconstruct_message(&message)?;
                if query.verify_text(&text) {
                    on_match(&meta, message.msg_ix, &text)?;
                    count += 1;
                }
            }
        }
    }
    Ok(count)
}

/// Indices of sub-queries that could match inside `segment_id`, per the
/// segment's log-type and variable ID sets.
fn surviving_sub_queries(archive: &Archive, query: &Query, segment_id: u64) -> Vec<usize> {
    let logtype_ids = archive.segment_logtype_ids(segment_id);
    let var_ids = archive.segment_var_ids(segment_id);
    query
        .sub_queries()
        .iter()
        .enumerate()
        .filter(|(_, sub_query)| match logtype_ids {
            Some(set) => sub_query.logtype_ids.iter().any(|id| set.contains(id)),
            None => true,
        })
        .filter(|(_, sub_query)| match var_ids {
            Some(set) => sub_query.var_predicates.iter().all(|pred| match pred {
                VarPredicate::DictIds(ids) => ids.iter().any(|id| set.contains(id)),
                _ => true,
            }),
            None => true,
        })
        .map(|(ix, _)| ix)
        .collect()
}

/// Tests one message against one sub-query: log-type membership plus the
/// variable predicates as an ordered subsequence of the message's slots.
fn message_matches(
    sub_query: &SubQuery,
    entry: &LogTypeEntry,
    message: &EncodedMessage,
    query: &Query,
) -> bool {
    if !sub_query.logtype_ids.contains(&message.logtype_id) {
        return false;
    }
    let kinds = entry.placeholders();
    let mut var_ix = 0;
    for predicate in &sub_query.var_predicates {
        let mut found = false;
        while var_ix < message.vars.len() {
            let slot = message.vars[var_ix];
            let kind = kinds[var_ix];
            var_ix += 1;
            if predicate.matches(kind, slot, query.case_sensitive()) {
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
    }
    true
}

fn ts_in_range(query: &Query, message: &EncodedMessage) -> bool {
    if !query.has_ts_range() {
        return true;
    }
    let (low, high) = query.ts_range();
    (low..=high).contains(&message.timestamp)
}

/// Fallback path: reconstruct and wildcard-test every message in the
/// timestamp range.
fn textual_scan(
    archive: &mut Archive,
    query: &Query,
    base_filter: &FileFilter,
    on_match: &mut MatchSink<'_>,
) -> Result<u64> {
    debug!("query {:?} running as textual scan", query.raw());
    let mut count = 0;
    for meta in archive.files(base_filter)? {
        let mut reader = archive.file_reader(&meta)?;
        while let Some(message) = reader.next_message(archive.logtype_dict())? {
            if !ts_in_range(query, &message) {
                continue;
            }
            let text = archive.reconstruct_message(&message)?;
            if query.verify_text(&text) {
                on_match(&meta, message.msg_ix, &text)?;
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer;
    use crate::config::{ArchiveWriterConfig, Codec, ReaderConfig};
    use crate::parse::MessageParser;
    use std::io::Cursor;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Compresses each `(path, content)` pair as its own file; a tiny
    /// segment target gives every file its own segment.
    fn build_archive(inputs: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let config = ArchiveWriterConfig::new(dir.path())
            .with_codec(Codec::Zstd(3))
            .with_target_segment_uncompressed_size(1);
        let mut archive = writer::Archive::open(&config).unwrap();
        for (path, content) in inputs {
            let file_id = archive.create_file(
                path,
                writer::group_id_for_path(path),
                Uuid::new_v4(),
                0,
            );
            let mut parser = MessageParser::new();
            let mut reader = Cursor::new(content.as_bytes());
            while let Some(message) = parser.parse_next(&mut reader).unwrap() {
                archive.write_msg(file_id, &message).unwrap();
            }
            archive.close_file(file_id).unwrap();
            archive.mark_file_ready_for_segment(file_id).unwrap();
        }
        let path = archive.path().to_path_buf();
        archive.close().unwrap();
        (dir, path)
    }

    fn run_query(
        archive_path: &std::path::Path,
        pattern: &str,
        case_sensitive: bool,
        ts_range: Option<(i64, i64)>,
    ) -> Vec<String> {
        let mut archive = Archive::open(archive_path, &ReaderConfig::default()).unwrap();
        let query = Query::compile(
            pattern,
            case_sensitive,
            ts_range,
            archive.logtype_dict(),
            archive.var_dict(),
        )
        .unwrap();
        let mut matches = Vec::new();
        search_archive(&mut archive, &query, &mut |_, _, text| {
            matches.push(text.to_string());
            Ok(())
        })
        .unwrap();
        matches
    }

    #[test]
    fn test_exact_query_matches_only_its_segment() {
        let (_dir, path) = build_archive(&[
            ("/logs/a.log", "2015-02-01 01:02:03 connect alpha\n"),
            ("/logs/b.log", "2015-02-01 01:02:04 disconnect beta\n"),
            ("/logs/c.log", "2015-02-01 01:02:05 timeout gamma\n"),
        ]);

        let matches = run_query(&path, "disconnect beta", true, None);
        assert_eq!(matches, vec!["2015-02-01 01:02:04 disconnect beta\n"]);
    }

    #[test]
    fn test_int_var_query() {
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 task 42 done\n2015-02-01 01:02:04 task 17 done\n",
        )]);

        let matches = run_query(&path, "task 42", true, None);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("task 42"));
    }

    #[test]
    fn test_case_insensitive_query() {
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 ERROR disk full\n",
        )]);

        assert!(run_query(&path, "error disk", true, None).is_empty());
        let matches = run_query(&path, "error disk", false, None);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_wildcard_across_boundaries_falls_back_and_finds_all() {
        // "pha*bet" spans the variable "alpha", the template space, and
        // the variable "beta"; only the textual path can see that.
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 alpha beta\n2015-02-01 01:02:04 alpha gamma\n",
        )]);

        let matches = run_query(&path, "pha*bet", true, None);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("alpha beta"));
    }

    #[test]
    fn test_ts_range_restricts_matches() {
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 ping\n2015-02-01 01:02:05 ping\n",
        )]);

        let all = run_query(&path, "ping", true, None);
        assert_eq!(all.len(), 2);

        // Only the second message is in range.
        let bounded = run_query(&path, "ping", true, Some((1_422_752_524_000, i64::MAX)));
        assert_eq!(bounded.len(), 1);
        assert!(bounded[0].contains("01:02:05"));
    }

    #[test]
    fn test_soundness_no_false_matches_from_dictionary_over_approximation() {
        // "1.50" and "1.5" share no packed encoding, but a wildcard query
        // that reaches both spellings must still only emit real substring
        // matches.
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 value 1.50\n2015-02-01 01:02:04 value 1.5\n",
        )]);

        let matches = run_query(&path, "value 1.5", true, None);
        // "value 1.5" is a substring of both lines.
        assert_eq!(matches.len(), 2);

        let matches = run_query(&path, "value 1.50", true, None);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("1.50"));
    }

    #[test]
    fn test_multiline_message_matches_on_continuation() {
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 failure\n    caused by overflow\n",
        )]);

        let matches = run_query(&path, "caused by overflow", true, None);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("failure\n    caused by"));
    }

    #[test]
    fn test_no_matches_is_not_an_error() {
        let (_dir, path) = build_archive(&[(
            "/logs/a.log",
            "2015-02-01 01:02:03 quiet day\n",
        )]);
        assert!(run_query(&path, "loud night", true, None).is_empty());
    }
}
