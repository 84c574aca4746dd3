//! # Logpack
//!
//! Compressed log archive engine with dictionary-based wildcard search.
//!
//! Ordinary log messages repeat in *structure* while their variable values
//! differ. Logpack factors every message into three parallel streams — a
//! log-type dictionary ID, an encoded variable sequence, and a timestamp —
//! and compresses the streams in bounded segments. Searches resolve
//! against the dictionaries first, so most segments are skipped without
//! being decompressed, and any original file can be reconstructed
//! byte-exactly without touching the rest of the archive.
//!
//! ## Compressing
//!
//! ```rust,ignore
//! use logpack::archive::writer::{self, Archive};
//! use logpack::config::ArchiveWriterConfig;
//! use logpack::parse::MessageParser;
//!
//! let config = ArchiveWriterConfig::new("/data/archives");
//! let mut archive = Archive::open(&config)?;
//!
//! let file_id = archive.create_file(
//!     "/var/log/syslog",
//!     writer::group_id_for_path("/var/log/syslog"),
//!     uuid::Uuid::new_v4(),
//!     0,
//! );
//! let mut parser = MessageParser::new();
//! let mut reader = std::io::BufReader::new(std::fs::File::open("/var/log/syslog")?);
//! while let Some(message) = parser.parse_next(&mut reader)? {
//!     archive.write_msg(file_id, &message)?;
//! }
//! archive.close_file(file_id)?;
//! archive.mark_file_ready_for_segment(file_id)?;
//! archive.close()?;
//! ```
//!
//! ## Searching
//!
//! ```rust,ignore
//! use logpack::archive::reader::Archive;
//! use logpack::config::ReaderConfig;
//! use logpack::query::{search_archive, Query};
//!
//! let mut archive = Archive::open(archive_path, &ReaderConfig::default())?;
//! let query = Query::compile(
//!     "connection from 10.0.0.*",
//!     true,
//!     None,
//!     archive.logtype_dict(),
//!     archive.var_dict(),
//! )?;
//! search_archive(&mut archive, &query, &mut |_file, _msg_ix, text| {
//!     print!("{}", text);
//!     Ok(())
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod config;
pub mod dict;
pub mod encode;
pub mod error;
pub mod io;
pub mod meta;
pub mod parse;
pub mod query;
pub mod time;

pub use config::{ArchiveWriterConfig, Codec, ReaderConfig};
pub use error::{LogPackError, Result};
