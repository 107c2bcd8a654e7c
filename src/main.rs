use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use parallel_blockzip::{ArchiveConfig, Archiver, Codec, Mode, Outcome, RunSummary};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

/// Extension appended to compressed archives.
const ARCHIVE_EXTENSION: &str = "bzp";
const EXIT_ABORTED: u8 = 130;
const MIB: u64 = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress a file into a block archive
    Compress {
        /// File to compress
        input: PathBuf,

        /// Output archive (defaults to the input path with .bzp appended)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Codec used for every chunk
        #[arg(long, value_enum, default_value_t = CodecArg::Gzip)]
        codec: CodecArg,

        /// Compression level (defaults to the codec's own default)
        #[arg(short, long)]
        level: Option<i32>,

        /// Number of worker threads (defaults to the number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Budget block size in MiB
        #[arg(long, default_value_t = 1)]
        block_size: u64,

        /// Memory available to in-flight chunks in MiB (defaults to free RAM)
        #[arg(long)]
        memory_limit: Option<u64>,
    },
    /// Restore the original file from a block archive
    Decompress {
        /// Archive to extract
        input: PathBuf,

        /// Output file (defaults to the input path without .bzp)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of worker threads (defaults to the number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Print the chunk index of an archive
    List {
        /// Archive to inspect
        input: PathBuf,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum CodecArg {
    Gzip,
    Zstd,
    Bzip2,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Gzip => Codec::Gzip,
            CodecArg::Zstd => Codec::Zstd,
            CodecArg::Bzip2 => Codec::Bzip2,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            level,
            jobs,
            block_size,
            memory_limit,
        } => {
            let output = output.unwrap_or_else(|| compressed_path(&input));
            let mut config = ArchiveConfig::default()
                .with_codec(codec.into())
                .with_block_size(block_size.saturating_mul(MIB));
            if let Some(level) = level {
                config = config.with_level(level);
            }
            if let Some(jobs) = jobs {
                config = config.with_workers(jobs);
            }
            if let Some(limit) = memory_limit {
                config = config.with_memory_limit(limit.saturating_mul(MIB));
            }
            run_with_progress(Archiver::compress(input, output, config))
        }
        Commands::Decompress {
            input,
            output,
            jobs,
        } => {
            let output = output.unwrap_or_else(|| restored_path(&input));
            let mut config = ArchiveConfig::default();
            if let Some(jobs) = jobs {
                config = config.with_workers(jobs);
            }
            run_with_progress(Archiver::decompress(input, output, config))
        }
        Commands::List { input } => {
            list_archive(&input)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn compressed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn restored_path(input: &Path) -> PathBuf {
    if input.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
        input.with_extension("")
    } else {
        let mut name = input.as_os_str().to_owned();
        name.push(".out");
        PathBuf::from(name)
    }
}

/// Runs the archiver on a scoped thread while the main thread drives the
/// progress bar. Ctrl-C aborts the run.
fn run_with_progress(archiver: Archiver) -> Result<ExitCode> {
    let handle = archiver.abort_handle();
    ctrlc::set_handler(move || {
        handle.abort();
    })
    .context("Failed to install Ctrl-C handler")?;

    let pb = ProgressBar::new(0);
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .context("Invalid progress bar template")?,
    );

    let result = thread::scope(|s| {
        let run = s.spawn(|| archiver.run());
        while !archiver.wait(Duration::from_millis(100)).is_terminal() && !run.is_finished() {
            let snapshot = archiver.progress();
            pb.set_length(snapshot.total);
            pb.set_position(snapshot.consumed);
        }
        run.join()
    });

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(_) => anyhow::bail!("Archiver thread panicked"),
    };
    let outcome = outcome.with_context(|| {
        format!(
            "Failed to {} '{}'",
            match archiver.mode() {
                Mode::Compress => "compress",
                Mode::Decompress => "decompress",
            },
            archiver.source().display()
        )
    });
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            pb.abandon();
            return Err(err);
        }
    };

    match outcome {
        Outcome::Completed(summary) => {
            pb.finish_with_message("Done!");
            report(&summary, archiver.destination());
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Aborted => {
            pb.abandon();
            warn!(
                "Interrupted; '{}' is incomplete",
                archiver.destination().display()
            );
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}

fn report(summary: &RunSummary, destination: &Path) {
    let secs = summary.elapsed.as_secs_f64();
    let mb = summary.bytes_in as f64 / MIB as f64;
    info!(
        "Wrote '{}': {} chunks, {} -> {} bytes with {} workers in {:.2?}",
        destination.display(),
        summary.chunks,
        summary.bytes_in,
        summary.bytes_out,
        summary.workers,
        summary.elapsed
    );
    if secs > 0.0 {
        info!("Throughput: {:.2} MB/s", mb / secs);
    }
}

fn list_archive(path: &Path) -> Result<()> {
    let index = parallel_blockzip::inspect_archive(path)
        .with_context(|| format!("Failed to read index of '{}'", path.display()))?;

    println!("codec:  {}", index.codec());
    println!("chunks: {}", index.len());
    println!("stored: {} bytes", index.data_len());
    println!("{:>10} {:>14} {:>12}", "chunk", "offset", "length");
    for entry in index.in_logical_order() {
        println!("{:>10} {:>14} {:>12}", entry.index, entry.offset, entry.length);
    }
    Ok(())
}
