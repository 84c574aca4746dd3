use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use logpack::archive::{reader, writer, GLOBAL_METADATA_DB_NAME};
use logpack::config::{ArchiveWriterConfig, Codec, ReaderConfig};
use logpack::meta::{FileFilter, GlobalMetadataDb};
use logpack::parse::MessageParser;
use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// Compressed log archive tool: compress log files into searchable
/// archives and extract them back byte-exactly
#[derive(Parser)]
#[command(name = "logpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files or directories into a new archive
    Compress {
        /// Directory the archive is created under
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Target uncompressed segment size in bytes
        #[arg(long, value_name = "BYTES", default_value_t = 256 * 1024 * 1024)]
        target_segment_size: u64,

        /// Compression level; 0 stores streams uncompressed
        #[arg(long, value_name = "LEVEL", default_value_t = 3)]
        compression_level: i32,

        /// Seal a file split once this many bytes are buffered for it
        #[arg(long, value_name = "BYTES", default_value_t = 1024 * 1024 * 1024)]
        split_threshold: u64,

        /// Global metadata DB path (default: <OUTPUT_DIR>/metadata.db)
        #[arg(long, value_name = "FILE")]
        global_metadata_db: Option<PathBuf>,

        /// Files or directories to compress
        #[arg(required = true, value_name = "PATH")]
        inputs: Vec<PathBuf>,
    },

    /// Decompress archives back to their original files
    Decompress {
        /// Archive-root directory (holds archives and the global
        /// metadata DB)
        #[arg(short, long, value_name = "DIR")]
        archives_dir: PathBuf,

        /// Directory reconstructed files are written under
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Original paths to extract; everything when omitted
        #[arg(value_name = "PATH")]
        paths: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Compress {
            output_dir,
            target_segment_size,
            compression_level,
            split_threshold,
            global_metadata_db,
            inputs,
        } => compress_command(
            &output_dir,
            target_segment_size,
            compression_level,
            split_threshold,
            global_metadata_db,
            &inputs,
            cli.quiet,
        ),
        Commands::Decompress {
            archives_dir,
            output_dir,
            paths,
        } => decompress_command(&archives_dir, &output_dir, &paths, cli.quiet),
    }
}

/// Set up logging based on verbosity flags
fn setup_logging(verbose: bool, quiet: bool) {
    let log_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
    debug!("Logging initialized at {} level", log_level);
}

/// Recursively collects regular files and empty directories under `input`.
fn collect_inputs(
    input: &Path,
    files: &mut Vec<PathBuf>,
    empty_dirs: &mut Vec<String>,
) -> Result<()> {
    let metadata = fs::metadata(input)
        .with_context(|| format!("Failed to stat input {}", input.display()))?;
    if metadata.is_file() {
        files.push(input.to_path_buf());
        return Ok(());
    }
    if metadata.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(input)
            .with_context(|| format!("Failed to read directory {}", input.display()))?
            .collect::<std::io::Result<_>>()?;
        if entries.is_empty() {
            empty_dirs.push(input.to_string_lossy().into_owned());
            return Ok(());
        }
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            collect_inputs(&entry.path(), files, empty_dirs)?;
        }
    }
    Ok(())
}

fn compress_command(
    output_dir: &Path,
    target_segment_size: u64,
    compression_level: i32,
    split_threshold: u64,
    global_metadata_db: Option<PathBuf>,
    inputs: &[PathBuf],
    quiet: bool,
) -> Result<()> {
    let start_time = Instant::now();

    let mut files = Vec::new();
    let mut empty_dirs = Vec::new();
    for input in inputs {
        collect_inputs(input, &mut files, &mut empty_dirs)?;
    }
    if files.is_empty() && empty_dirs.is_empty() {
        bail!("No input files found");
    }
    info!(
        "Compressing {} files and {} empty directories",
        files.len(),
        empty_dirs.len()
    );

    let codec = if compression_level == 0 {
        Codec::Passthrough
    } else {
        Codec::Zstd(compression_level)
    };
    let mut config = ArchiveWriterConfig::new(output_dir)
        .with_target_segment_uncompressed_size(target_segment_size)
        .with_file_split_threshold(split_threshold)
        .with_codec(codec);
    if let Some(path) = global_metadata_db {
        config.global_metadata_db_path = path;
    }

    let mut archive = writer::Archive::open(&config)?;
    let archive_path = archive.path().to_path_buf();

    let progress = create_progress_bar(quiet, files.len() as u64);
    let mut total_input_bytes = 0u64;
    let result = (|| -> Result<()> {
        for path in &files {
            progress.set_message(path.display().to_string());
            total_input_bytes += compress_one_file(&mut archive, path)?;
            progress.inc(1);
        }
        archive.add_empty_directories(&empty_dirs)?;
        Ok(())
    })();
    progress.finish_and_clear();

    if let Err(e) = result {
        warn!("Compression failed; discarding archive");
        archive.discard()?;
        return Err(e);
    }
    archive.close()?;

    let archive_bytes = directory_size(&archive_path)?;
    let duration = start_time.elapsed();
    if !quiet {
        let ratio = if archive_bytes > 0 {
            total_input_bytes as f64 / archive_bytes as f64
        } else {
            0.0
        };
        eprintln!("✓ Compression complete");
        eprintln!("  Archive:     {}", archive_path.display());
        eprintln!("  Input:       {}", format_bytes(total_input_bytes));
        eprintln!("  Output:      {}", format_bytes(archive_bytes));
        eprintln!("  Ratio:       {:.2}x", ratio);
        eprintln!("  Time:        {:.3}s", duration.as_secs_f64());
    }
    info!("Compression completed in {:.3}s", duration.as_secs_f64());
    Ok(())
}

/// Compresses one input file, splitting it when it outgrows the split
/// threshold. Returns the number of raw bytes consumed.
fn compress_one_file(archive: &mut writer::Archive, path: &Path) -> Result<u64> {
    let orig_path = path.to_string_lossy().into_owned();
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open input file {}", orig_path))?;
    let mut reader = BufReader::new(file);

    let orig_uuid = Uuid::new_v4();
    let group_id = writer::group_id_for_path(&orig_path);
    let mut file_id = archive.create_file(&orig_path, group_id, orig_uuid, 0);

    let mut parser = MessageParser::new();
    let mut bytes = 0u64;
    while let Some(message) = parser
        .parse_next(&mut reader)
        .with_context(|| format!("Failed to parse {}", orig_path))?
    {
        bytes += message.num_bytes();
        archive.write_msg(file_id, &message)?;
        if archive.file_exceeds_split_threshold(file_id) {
            debug!("Splitting {} at {} bytes", orig_path, bytes);
            file_id = archive.split_file(file_id)?;
        }
    }
    archive.close_file(file_id)?;
    archive.mark_file_ready_for_segment(file_id)?;
    Ok(bytes)
}

fn decompress_command(
    archives_dir: &Path,
    output_dir: &Path,
    paths: &[String],
    quiet: bool,
) -> Result<()> {
    let start_time = Instant::now();
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let global_db = GlobalMetadataDb::open(&archives_dir.join(GLOBAL_METADATA_DB_NAME))
        .context("Failed to open global metadata DB")?;

    // Archives are visited in creation order so that splits of one file
    // concatenate correctly across archives.
    let archive_ids = if paths.len() == 1 {
        global_db.archive_ids_for_path(&paths[0])?
    } else {
        global_db.archive_ids()?
    };
    global_db.close().ok();

    if archive_ids.is_empty() {
        bail!("No archives found under {}", archives_dir.display());
    }

    let wanted: HashSet<&str> = paths.iter().map(String::as_str).collect();
    // Paths already started; first touch truncates, later splits append.
    let mut started: HashSet<PathBuf> = HashSet::new();
    let mut decompressed_paths: HashSet<String> = HashSet::new();
    let mut total_bytes = 0u64;

    for archive_id in &archive_ids {
        let archive_path = archives_dir.join(archive_id.to_string());
        let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default())
            .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
        archive.refresh_dictionaries()?;

        if wanted.is_empty() {
            archive.decompress_empty_directories(output_dir)?;
        }

        for meta in archive.files(&FileFilter::default())? {
            if !wanted.is_empty() && !wanted.contains(meta.orig_path.as_str()) {
                continue;
            }
            let out_path = output_dir.join(meta.orig_path.trim_start_matches('/'));
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let out_file = if started.insert(out_path.clone()) {
                fs::File::create(&out_path)
            } else {
                fs::OpenOptions::new().append(true).open(&out_path)
            }
            .with_context(|| format!("Failed to open output {}", out_path.display()))?;

            let mut out = BufWriter::new(out_file);
            archive.decompress_file(&meta, &mut out)?;
            out.flush()?;

            total_bytes += meta.num_uncompressed_bytes;
            decompressed_paths.insert(meta.orig_path.clone());
        }
    }

    // Report requested paths that exist in no archive.
    for path in &wanted {
        if !decompressed_paths.contains(*path) {
            warn!("'{}' not found in any archive", path);
        }
    }

    let duration = start_time.elapsed();
    if !quiet {
        eprintln!("✓ Decompression complete");
        eprintln!("  Files:       {}", decompressed_paths.len());
        eprintln!("  Output:      {}", format_bytes(total_bytes));
        eprintln!("  Time:        {:.3}s", duration.as_secs_f64());
    }
    info!(
        "Decompression completed in {:.3}s",
        duration.as_secs_f64()
    );
    Ok(())
}

/// Create a progress bar for per-file operations
fn create_progress_bar(quiet: bool, total: u64) -> ProgressBar {
    if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb
    }
}

/// Total size in bytes of all files under `dir`.
fn directory_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }
    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
