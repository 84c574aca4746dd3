//! End-to-end archive tests: compress, seal, reopen, reconstruct.

use logpack::archive::{reader, writer};
use logpack::config::{ArchiveWriterConfig, Codec, ReaderConfig};
use logpack::meta::FileFilter;
use logpack::parse::MessageParser;
use std::io::Cursor;
use tempfile::TempDir;
use uuid::Uuid;

/// Streams `content` into the archive as one original file.
fn compress_file(archive: &mut writer::Archive, orig_path: &str, content: &str) {
    let file_id = archive.create_file(
        orig_path,
        writer::group_id_for_path(orig_path),
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

/// Reconstructs one original path from an archive, concatenating splits.
fn decompress_path(archive: &mut reader::Archive, orig_path: &str) -> String {
    let rows = archive
        .files(&FileFilter {
            orig_path: Some(orig_path.to_string()),
            ..Default::default()
        })
        .unwrap();
    let mut out = Vec::new();
    for row in &rows {
        archive.decompress_file(row, &mut out).unwrap();
    }
    String::from_utf8(out).unwrap()
}

#[test]
fn test_multi_file_roundtrip() {
    let inputs = [
        (
            "/logs/app.log",
            "2015-02-01T01:02:03.004 hello world 42\n    continuation\n\
             2015-02-01T01:02:05.000 value -00.120 stored\n",
        ),
        ("/logs/notes.txt", "no timestamps here\njust plain text\n"),
        (
            "/logs/access.log",
            "localhost - - [01/Feb/2015:01:02:03 GET /index.html\n\
             localhost - - [01/Feb/2015:01:02:04 GET /favicon.ico\n",
        ),
    ];

    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    for (path, content) in &inputs {
        compress_file(&mut archive, path, content);
    }
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    for (path, content) in &inputs {
        assert_eq!(&decompress_path(&mut archive, path), content, "{}", path);
    }
}

#[test]
fn test_split_file_reassembles_in_split_order() {
    let content = "2015-02-01 01:02:03 first message\n\
                   2015-02-01 01:02:04 second message\n\
                   2015-02-01 01:02:05 third message\n";

    let dir = TempDir::new().unwrap();
    // A split threshold of one byte seals a split after every message.
    let config = ArchiveWriterConfig::new(dir.path()).with_file_split_threshold(1);
    let mut archive = writer::Archive::open(&config).unwrap();

    let orig_uuid = Uuid::new_v4();
    let mut file_id = archive.create_file(
        "/logs/big.log",
        writer::group_id_for_path("/logs/big.log"),
        orig_uuid,
        0,
    );
    let mut parser = MessageParser::new();
    let mut reader = Cursor::new(content.as_bytes());
    while let Some(message) = parser.parse_next(&mut reader).unwrap() {
        archive.write_msg(file_id, &message).unwrap();
        if archive.file_exceeds_split_threshold(file_id) {
            file_id = archive.split_file(file_id).unwrap();
        }
    }
    archive.close_file(file_id).unwrap();
    archive.mark_file_ready_for_segment(file_id).unwrap();
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    let rows = archive
        .files(&FileFilter {
            orig_path: Some("/logs/big.log".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 3);
    for (ix, row) in rows.iter().enumerate() {
        assert_eq!(row.split_ix, ix as u64);
        assert_eq!(row.orig_uuid, orig_uuid);
    }
    // Splits of one file share a group and so cluster in their segment.
    assert_eq!(rows[0].group_id, rows[1].group_id);

    assert_eq!(decompress_path(&mut archive, "/logs/big.log"), content);
}

#[test]
fn test_crash_before_segment_commit_hides_uncommitted_state() {
    let dir = TempDir::new().unwrap();
    // A tiny segment target seals and commits at every mark.
    let config = ArchiveWriterConfig::new(dir.path())
        .with_target_segment_uncompressed_size(1);
    let mut archive = writer::Archive::open(&config).unwrap();
    let archive_path = archive.path().to_path_buf();

    compress_file(
        &mut archive,
        "/logs/committed.log",
        "2015-02-01 01:02:03 committed alpha\n",
    );

    // A second file is written but never marked ready; its data and its
    // dictionary entries must stay invisible.
    let file_id = archive.create_file(
        "/logs/lost.log",
        writer::group_id_for_path("/logs/lost.log"),
        Uuid::new_v4(),
        0,
    );
    let mut parser = MessageParser::new();
    let mut cursor = Cursor::new(&b"2015-02-01 01:02:04 doomed omega\n"[..]);
    while let Some(message) = parser.parse_next(&mut cursor).unwrap() {
        archive.write_msg(file_id, &message).unwrap();
    }
    // Simulated crash: the writer vanishes without close or cleanup.
    std::mem::forget(archive);

    let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    let rows = archive.files(&FileFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].orig_path, "/logs/committed.log");
    assert_eq!(
        decompress_path(&mut archive, "/logs/committed.log"),
        "2015-02-01 01:02:03 committed alpha\n"
    );
    // Only the committed file's tokens are visible.
    assert_eq!(archive.var_dict().len(), 2);
    for (_, token) in archive.var_dict().entries() {
        assert_ne!(token, "omega");
    }
}

#[test]
fn test_reader_follows_growing_archive() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path())
        .with_target_segment_uncompressed_size(1);
    let mut writer_archive = writer::Archive::open(&config).unwrap();
    let archive_path = writer_archive.path().to_path_buf();

    compress_file(
        &mut writer_archive,
        "/logs/first.log",
        "2015-02-01 01:02:03 early bird\n",
    );

    let mut reader_archive =
        reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    assert_eq!(reader_archive.files(&FileFilter::default()).unwrap().len(), 1);

    compress_file(
        &mut writer_archive,
        "/logs/second.log",
        "2015-02-01 01:02:09 late riser\n",
    );

    // Append-only refresh picks up the newly sealed segment.
    reader_archive.refresh_dictionaries().unwrap();
    let rows = reader_archive.files(&FileFilter::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        decompress_path(&mut reader_archive, "/logs/second.log"),
        "2015-02-01 01:02:09 late riser\n"
    );

    writer_archive.close().unwrap();
}

#[test]
fn test_released_file_spills_and_still_roundtrips() {
    let content = "2015-02-01 01:02:03 spilled but intact\n\
                   2015-02-01 01:02:04 second message\n";
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();

    let file_id = archive.create_file(
        "/logs/spill.log",
        writer::group_id_for_path("/logs/spill.log"),
        Uuid::new_v4(),
        0,
    );
    let mut parser = MessageParser::new();
    let mut reader = Cursor::new(content.as_bytes());
    while let Some(message) = parser.parse_next(&mut reader).unwrap() {
        archive.write_msg(file_id, &message).unwrap();
    }
    archive.close_file(file_id).unwrap();
    // Push the buffers to scratch storage before sealing.
    archive.release_file(file_id).unwrap();
    archive.mark_file_ready_for_segment(file_id).unwrap();
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    // Scratch files are cleaned up with the logs directory itself.
    assert!(!archive_path.join("logs").exists());

    let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    assert_eq!(decompress_path(&mut archive, "/logs/spill.log"), content);
}

#[test]
fn test_empty_directories_recreated_on_decompression() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(&mut archive, "/logs/a.log", "content line\n");
    archive
        .add_empty_directories(&["/logs/empty/nested".to_string()])
        .unwrap();
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    let out_dir = TempDir::new().unwrap();
    archive.decompress_empty_directories(out_dir.path()).unwrap();
    assert!(out_dir.path().join("logs/empty/nested").is_dir());
}

#[test]
fn test_passthrough_codec_roundtrip() {
    let content = "2015-02-01 01:02:03 inspectable bytes 7\n";
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path()).with_codec(Codec::Passthrough);
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(&mut archive, "/logs/p.log", content);
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    assert_eq!(decompress_path(&mut archive, "/logs/p.log"), content);
}

#[test]
fn test_header_ts_range_covers_committed_messages() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveWriterConfig::new(dir.path());
    let mut archive = writer::Archive::open(&config).unwrap();
    compress_file(
        &mut archive,
        "/logs/a.log",
        "2015-02-01 01:02:03 lo\n2015-02-01 01:02:07 hi\n",
    );
    let archive_path = archive.path().to_path_buf();
    archive.close().unwrap();

    let archive = reader::Archive::open(&archive_path, &ReaderConfig::default()).unwrap();
    let (begin_ts, end_ts) = archive.header().ts_range();
    assert_eq!(begin_ts, 1_422_752_523_000);
    assert_eq!(end_ts, 1_422_752_527_000);
}
