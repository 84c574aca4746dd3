//! End-to-end search tests: compile against live dictionaries, prune
//! through the segment indexes, verify every emitted match.

use logpack::archive::{reader, writer};
use logpack::config::{ArchiveWriterConfig, ReaderConfig};
use logpack::meta::{FileFilter, GlobalMetadataDb};
use logpack::parse::MessageParser;
use logpack::query::{search_archive, Query};
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

fn compress_file(archive: &mut writer::Archive, orig_path: &str, content: &str) {
    compress_split(archive, orig_path, Uuid::new_v4(), 0, content);
}

fn compress_split(
    archive: &mut writer::Archive,
    orig_path: &str,
    orig_uuid: Uuid,
    split_ix: u64,
    content: &str,
) {
    let file_id = archive.create_file(
        orig_path,
        writer::group_id_for_path(orig_path),
        orig_uuid,
        split_ix,
    );
    let mut parser = MessageParser::new();
    let mut reader = Cursor::new(content.as_bytes());
    while let Some(message) = parser.parse_next(&mut reader).unwrap() {
        archive.write_msg(file_id, &message).unwrap();
    }
    archive.close_file(file_id).unwrap();
    archive.mark_file_ready_for_segment(file_id).unwrap();
}

fn run_query(archive_path: &Path, pattern: &str) -> Vec<String> {
    let mut archive = reader::Archive::open(archive_path, &ReaderConfig::default()).unwrap();
    let query = Query::compile(
        pattern,
        true,
        None,
        archive.logtype_dict(),
        archive.var_dict(),
    )
    .unwrap();
    let mut matches = Vec::new();
    search_archive(&mut archive, &query, &mut |meta, msg_ix, text| {
        matches.push(format!("{}:{}:{}", meta.orig_path, msg_ix, text));
        Ok(())
    })
    .unwrap();
    matches
}

#[test]
fn test_search_prunes_segments_by_dictionary_ids() {
    let dir = TempDir::new().unwrap();
    // One segment per file: distinct log-type shapes per segment.
    let config = ArchiveWriterConfig::new(dir.path())
        .with_target_segment_uncompressed_size(1);
    let mut archive = writer::Archive::open(&config).unwrap();
    // Different token counts give the two files different log-types.
    compress_file(
        &mut archive,
        "/logs/short.log",
        "2015-02-01 01:02:03 request served\n",
    );
    compress_file(
        &mut archive,
        "/logs/long.log",
        "2015-02-01 01:02:04 request denied with prejudice\n",
    );
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    // The archive's segment indexes really are disjoint per segment.
    let archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    let seg0_logtypes = archive.segment_logtype_ids(0).unwrap().clone();
    let seg1_logtypes = archive.segment_logtype_ids(1).unwrap().clone();
    assert!(seg0_logtypes.is_disjoint(&seg1_logtypes));
    drop(archive);

    let matches = run_query(&archive_path, "denied with prejudice");
    assert_eq!(matches.len(), 1);
    assert!(matches[0].starts_with("/logs/long.log:0:"));

    let matches = run_query(&archive_path, "request");
    assert_eq!(matches.len(), 2);
}

#[test]
fn test_query_soundness_every_match_is_textual() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(
        &mut archive,
        "/logs/a.log",
        "2015-02-01 01:02:03 user admin logged in\n\
         2015-02-01 01:02:04 user administrator locked out\n",
    );
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    // "admin log*" must not match the administrator line.
    let matches = run_query(&archive_path, "admin log*");
    assert_eq!(matches.len(), 1);
    assert!(matches[0].contains("admin logged in"));

    // Every emitted line actually contains the queried text.
    for m in run_query(&archive_path, "user admin*") {
        assert!(m.contains("user admin"));
    }
}

#[test]
fn test_wildcard_spanning_boundaries_uses_fallback_and_is_complete() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(
        &mut archive,
        "/logs/a.log",
        "2015-02-01 01:02:03 alpha beta gamma\n\
         2015-02-01 01:02:04 alpha zeta gamma\n",
    );
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    // "lpha*eta" spans two variables and the template space between them.
    let matches = run_query(&archive_path, "lpha*eta");
    assert_eq!(matches.len(), 2); // "beta" and "zeta" both contain "eta"

    let matches = run_query(&archive_path, "lpha*bet");
    assert_eq!(matches.len(), 1);
}

#[test]
fn test_search_across_archives_in_creation_order() {
    let root = TempDir::new().unwrap();
    let creator = Uuid::new_v4();
    let orig_uuid = Uuid::new_v4();

    // One original file split across two archives from the same creator.
    let config_a = ArchiveWriterConfig::new(root.path()).with_creator(creator, 0);
    let mut archive_a = writer::Archive::open(&config_a).unwrap();
    compress_split(
        &mut archive_a,
        "/logs/rolling.log",
        orig_uuid,
        0,
        "2015-02-01 01:02:03 part one\n",
    );
    archive_a.close().unwrap();

    let config_b = ArchiveWriterConfig::new(root.path()).with_creator(creator, 1);
    let mut archive_b = writer::Archive::open(&config_b).unwrap();
    compress_split(
        &mut archive_b,
        "/logs/rolling.log",
        orig_uuid,
        1,
        "2015-02-01 01:02:09 part two\n",
    );
    archive_b.close().unwrap();

    // The global registry orders the archives by creation number.
    let global =
        GlobalMetadataDb::open(&root.path().join("metadata.db")).unwrap();
    let ids = global.archive_ids_for_path("/logs/rolling.log").unwrap();
    assert_eq!(ids, vec![config_a.archive_id, config_b.archive_id]);

    // Concatenating in that order reproduces the original stream.
    let mut out = Vec::new();
    for id in ids {
        let archive_path = root.path().join(id.to_string());
        let mut archive =
            reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
        for row in archive
            .files(&FileFilter {
                orig_path: Some("/logs/rolling.log".to_string()),
                ..Default::default()
            })
            .unwrap()
        {
            archive.decompress_file(&row, &mut out).unwrap();
        }
    }
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "2015-02-01 01:02:03 part one\n2015-02-01 01:02:09 part two\n"
    );
}

#[test]
fn test_timestampless_files_are_searchable() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(&mut archive, "/logs/plain.txt", "needle in here\nnothing else\n");
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let matches = run_query(&archive_path, "needle");
    assert_eq!(matches.len(), 1);
    assert!(matches[0].ends_with("needle in here\n"));
}
