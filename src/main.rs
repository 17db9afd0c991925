use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daemonize::Daemonize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xfrase::config::{self, PartialServerConfig};
use xfrase::hash::sha256_hex_file;
use xfrase::index::{
    assembly_from_genome_filename, metadata_path as index_metadata_path, CpgIndex, IndexMetadata,
    INDEX_EXTENSION,
};
use xfrase::interval::read_intervals;
use xfrase::methylome::{metadata_path, Methylome, MethylomeMetadata};
use xfrase::net::client;
use xfrase::net::server::{Server, ServerOptions};
use xfrase::output;

#[derive(Parser)]
#[command(name = "xfrase", version, about = "Methylome query server and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            // tracing has no level above error
            Self::Error | Self::Critical => "error",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a CpG index from a reference genome FASTA
    Index {
        /// Reference genome (FASTA, optionally gzipped)
        #[arg(short = 'g', long)]
        genome: PathBuf,
        /// Output index file; must end in .cpg_idx
        #[arg(short = 'x', long)]
        index: PathBuf,
        #[arg(short = 'v', long, value_enum, default_value_t = LogLevel::Info)]
        log_level: LogLevel,
    },
    /// Serve methylome queries over TCP
    Server {
        #[arg(short = 's', long)]
        hostname: Option<String>,
        #[arg(short = 'p', long)]
        port: Option<u16>,
        /// Directory of .m16 methylomes and their metadata
        #[arg(short = 'm', long)]
        methylome_dir: Option<PathBuf>,
        /// Directory of .cpg_idx indexes and their metadata
        #[arg(short = 'x', long)]
        index_dir: Option<PathBuf>,
        /// Most methylomes resident in memory at once
        #[arg(short = 'r', long)]
        max_resident: Option<usize>,
        /// Worker threads for the async runtime
        #[arg(short = 't', long)]
        threads: Option<usize>,
        /// Detach from the terminal and run in the background
        #[arg(short = 'd', long)]
        daemonize: bool,
        #[arg(short = 'v', long, value_enum)]
        log_level: Option<LogLevel>,
        #[arg(short = 'l', long)]
        log_file: Option<PathBuf>,
        /// TOML config file; CLI flags take precedence over its values
        #[arg(short = 'c', long)]
        config_file: Option<PathBuf>,
        /// Write the resolved configuration to this path and exit
        #[arg(long, value_name = "PATH")]
        make_config: Option<PathBuf>,
    },
    /// Query a server for counts over genomic intervals
    Lookup {
        #[arg(short = 'H', long)]
        hostname: String,
        #[arg(short = 'p', long, default_value_t = config::DEFAULT_PORT)]
        port: u16,
        /// Methylome accession to query
        #[arg(short = 'a', long)]
        accession: String,
        /// Local copy of the CpG index the methylome was built against
        #[arg(short = 'x', long)]
        index: PathBuf,
        /// BED-style intervals file
        #[arg(short = 'i', long)]
        intervals: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Write weighted-methylation BEDGRAPH instead of count columns
        #[arg(short = 's', long)]
        score: bool,
        #[arg(short = 'v', long)]
        verbose: bool,
    },
    /// Merge methylomes site-wise into one
    Merge {
        /// Output methylome file
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Input .m16 files, at least one
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short = 'v', long, value_enum, default_value_t = LogLevel::Info)]
        log_level: LogLevel,
    },
}

fn init_logging(directive: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Index {
            genome,
            index,
            log_level,
        } => {
            init_logging(log_level.as_directive(), None)?;
            command_index(&genome, &index)
        }
        Commands::Server {
            hostname,
            port,
            methylome_dir,
            index_dir,
            max_resident,
            threads,
            daemonize,
            log_level,
            log_file,
            config_file,
            make_config,
        } => {
            let cli = PartialServerConfig {
                hostname,
                port,
                methylome_dir,
                index_dir,
                max_resident,
                threads,
                log_level: log_level.map(|level| level.as_directive().to_string()),
                log_file,
                deadline_secs: None,
            };
            command_server(cli, config_file.as_deref(), make_config.as_deref(), daemonize)
        }
        Commands::Lookup {
            hostname,
            port,
            accession,
            index,
            intervals,
            output,
            score,
            verbose,
        } => {
            init_logging(if verbose { "debug" } else { "info" }, None)?;
            command_lookup(&hostname, port, &accession, &index, &intervals, &output, score)
        }
        Commands::Merge {
            output,
            inputs,
            log_level,
        } => {
            init_logging(log_level.as_directive(), None)?;
            command_merge(&output, &inputs)
        }
    }
}

fn command_index(genome: &Path, index_path: &Path) -> Result<()> {
    let extension_ok = index_path
        .to_str()
        .is_some_and(|p| p.ends_with(&format!(".{INDEX_EXTENSION}")));
    if !extension_ok {
        bail!(
            "index file must end in .{INDEX_EXTENSION}: {}",
            index_path.display()
        );
    }
    let assembly = assembly_from_genome_filename(genome)?;
    info!(genome = %genome.display(), assembly, "scanning genome");

    let index = CpgIndex::from_genome(genome)?;
    debug!(summary = %index.summary(), "index constructed");
    index.write(index_path)?;
    let index_hash = sha256_hex_file(index_path)?;
    IndexMetadata::new(&assembly, &index, index_hash)
        .write(index_metadata_path(index_path))?;
    info!(
        index = %index_path.display(),
        n_cpgs = index.n_cpgs_total,
        "index written"
    );
    Ok(())
}

fn command_server(
    cli: PartialServerConfig,
    config_file: Option<&Path>,
    make_config: Option<&Path>,
    daemonize: bool,
) -> Result<()> {
    let file = config::load_config_file(config_file)?;
    let mut resolved = config::resolve(cli, file)?;

    if let Some(path) = make_config {
        resolved.write(path)?;
        println!("wrote config to {}", path.display());
        return Ok(());
    }

    // the daemon changes its working directory; pin paths first
    resolved.methylome_dir = std::path::absolute(&resolved.methylome_dir)?;
    resolved.index_dir = std::path::absolute(&resolved.index_dir)?;
    if let Some(log_file) = resolved.log_file.take() {
        resolved.log_file = Some(std::path::absolute(log_file)?);
    }

    if daemonize {
        Daemonize::new()
            .working_directory("/")
            .start()
            .context("failed to daemonize")?;
    }
    init_logging(&resolved.log_level, resolved.log_file.as_deref())?;
    info!(
        hostname = %resolved.hostname,
        port = resolved.port,
        methylome_dir = %resolved.methylome_dir.display(),
        index_dir = %resolved.index_dir.display(),
        max_resident = resolved.max_resident,
        threads = resolved.threads,
        "starting server"
    );

    let options = ServerOptions {
        hostname: resolved.hostname.clone(),
        port: resolved.port,
        methylome_dir: resolved.methylome_dir.clone(),
        index_dir: resolved.index_dir.clone(),
        max_resident: resolved.max_resident,
        deadline: resolved.deadline(),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(resolved.threads.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let server = Server::bind(&options).await?;
        server.run().await
    })?;
    info!("server stopped");
    Ok(())
}

fn command_lookup(
    hostname: &str,
    port: u16,
    accession: &str,
    index_file: &Path,
    intervals_file: &Path,
    output_file: &Path,
    score: bool,
) -> Result<()> {
    let index_metadata = IndexMetadata::read(index_metadata_path(index_file))?;
    let index = CpgIndex::read(index_file, &index_metadata)?;
    debug!(n_cpgs = index.n_cpgs_total, "index loaded");

    let intervals = read_intervals(intervals_file, &index)?;
    info!(n_intervals = intervals.len(), "intervals loaded");
    let offsets = index.get_offsets(&intervals)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(client::lookup(
        hostname,
        port,
        accession,
        index.n_cpgs_total,
        &offsets,
    ))?;
    info!(status = %outcome.status, "transaction status");
    if !outcome.status.is_ok() {
        bail!("lookup failed: {}", outcome.status);
    }

    let mut out = BufWriter::new(File::create(output_file)?);
    if score {
        output::write_bedgraph(&mut out, &index, &intervals, &outcome.counts)?;
    } else {
        output::write_intervals(&mut out, &index, &intervals, &outcome.counts)?;
    }
    out.flush()?;
    info!(output = %output_file.display(), "results written");
    Ok(())
}

fn command_merge(output_file: &Path, inputs: &[PathBuf]) -> Result<()> {
    let first = &inputs[0];
    let first_metadata = MethylomeMetadata::read(metadata_path(first))?;
    let mut merged = Methylome::read(first, first_metadata.n_cpgs)?;
    info!(input = %first.display(), n_cpgs = first_metadata.n_cpgs, "loaded");

    for input in &inputs[1..] {
        let input_metadata = MethylomeMetadata::read(metadata_path(input))?;
        if input_metadata.index_hash != first_metadata.index_hash {
            bail!(
                "{} was built against a different index than {}",
                input.display(),
                first.display()
            );
        }
        let methylome = Methylome::read(input, input_metadata.n_cpgs)?;
        merged.merge(&methylome)?;
        info!(input = %input.display(), "merged");
    }

    merged.write(output_file)?;
    MethylomeMetadata::new(&first_metadata.assembly, &first_metadata.index_hash, &merged)
        .write(metadata_path(output_file))?;
    info!(output = %output_file.display(), "merged methylome written");
    Ok(())
}
