use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use logpack::archive::{reader, GLOBAL_METADATA_DB_NAME};
use logpack::config::ReaderConfig;
use logpack::meta::GlobalMetadataDb;
use logpack::query::{search_archive, Query};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// Search logpack archives with a wildcard pattern.
///
/// `*` matches any run of characters, `?` matches one. The pattern is
/// matched as a substring of each reconstructed message. Exits 0 on
/// success whether or not anything matched.
#[derive(Parser)]
#[command(name = "lpgrep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Archive-root directory (holds archives and the global metadata DB)
    #[arg(short, long, value_name = "DIR")]
    archives_dir: PathBuf,

    /// Wildcard pattern to search for
    #[arg(value_name = "PATTERN")]
    pattern: String,

    /// Match case-insensitively
    #[arg(short, long)]
    ignore_case: bool,

    /// Print only the number of matching messages
    #[arg(short, long)]
    count: bool,

    /// Prefix each match with its original file path
    #[arg(short = 'H', long)]
    with_filename: bool,

    /// Only messages with timestamp >= this, in ms since the epoch
    #[arg(long, value_name = "MS")]
    tge: Option<i64>,

    /// Only messages with timestamp <= this, in ms since the epoch
    #[arg(long, value_name = "MS")]
    tle: Option<i64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    let ts_range = if cli.tge.is_some() || cli.tle.is_some() {
        Some((cli.tge.unwrap_or(i64::MIN), cli.tle.unwrap_or(i64::MAX)))
    } else {
        None
    };

    let global_db = GlobalMetadataDb::open(&cli.archives_dir.join(GLOBAL_METADATA_DB_NAME))
        .context("Failed to open global metadata DB")?;
    let archive_ids = global_db.archive_ids()?;
    global_db.close().ok();
    debug!("Searching {} archives", archive_ids.len());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut total_matches = 0u64;

    for archive_id in &archive_ids {
        let archive_path = cli.archives_dir.join(archive_id.to_string());
        let mut archive = reader::Archive::open(&archive_path, &ReaderConfig::default())
            .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
        archive.refresh_dictionaries()?;

        // Dictionaries and IDs are archive-local, so each archive gets its
        // own compilation of the pattern.
        let query = Query::compile(
            &cli.pattern,
            !cli.ignore_case,
            ts_range,
            archive.logtype_dict(),
            archive.var_dict(),
        )?;

        let count_only = cli.count;
        let with_filename = cli.with_filename;
        let matches = search_archive(&mut archive, &query, &mut |meta, _msg_ix, text| {
            if count_only {
                return Ok(());
            }
            if with_filename {
                write!(out, "{}:", meta.orig_path)?;
            }
            if text.ends_with('\n') {
                write!(out, "{}", text)?;
            } else {
                writeln!(out, "{}", text)?;
            }
            Ok(())
        })?;
        total_matches += matches;
    }

    if cli.count {
        writeln!(out, "{}", total_matches)?;
    }
    out.flush()?;

    info!(
        "Matched {} messages in {:.3}s",
        total_matches,
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Set up logging based on verbosity flags
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}
