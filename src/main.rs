// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcbz::archive::{self, DEFAULT_GZIP_LEVEL};
use mcbz::progress::format_byte_size;
use mcbz::transfer::{LineSink, LineSource};
use mcbz::{
    export_collection, import_collection, inspect, Compression, Config, ContainerReader,
    ContainerWriter, Metadata, Progress, ReadError, WriterOptions,
};

/// Document collection transfer utility
#[derive(Parser)]
#[command(name = "mc", version, about)]
struct Cli {
    /// Number of documents per batch (default: MC_BATCH_SIZE or 1000)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export line-delimited documents into a container
    Export(ExportArgs),

    /// Import a container back into line-delimited documents
    Import(ImportArgs),

    /// Display metadata information about a container
    Inspect {
        /// Read a sample batch to check the body
        #[arg(long)]
        validate: bool,

        file: PathBuf,
    },

    /// Gzip a container file
    Compress {
        /// Output file path (default: INPUT.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression level (1-9, where 1 is fastest, 9 is best compression)
        #[arg(short, long, default_value_t = DEFAULT_GZIP_LEVEL)]
        level: u32,

        input: PathBuf,
    },

    /// Gunzip a compressed container file
    #[command(visible_aliases = ["extract", "decompress"])]
    Uncompress {
        /// Output file path (default: INPUT without .gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        input: PathBuf,
    },
}

#[derive(Args)]
struct ExportArgs {
    /// Database name recorded in the metadata
    #[arg(short, long)]
    database: String,

    /// Collection name recorded in the metadata
    #[arg(short, long)]
    collection: String,

    /// Where the documents came from
    #[arg(long, default_value = "localhost:27017")]
    source: String,

    /// Line-delimited input, `-` for stdin
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Store the body uncompressed
    #[arg(long)]
    no_compress: bool,

    /// zstd level (default: MC_COMPRESSION_LEVEL or 3)
    #[arg(long)]
    level: Option<i32>,

    output: PathBuf,
}

#[derive(Args)]
struct ImportArgs {
    /// Line-delimited output, `-` for stdout
    #[arg(long, default_value = "-")]
    output: PathBuf,

    input: PathBuf,
}

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env();
    init_tracing(&config.log_level, cli.json);
    config.validate().map_err(|e| anyhow!(e))?;

    let batch_size = cli.batch_size.unwrap_or(config.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    match cli.command {
        Command::Export(args) => run_export(args, &config, batch_size),
        Command::Import(args) => run_import(args, batch_size),
        Command::Inspect { validate, file } => {
            let report = inspect(&file, validate)
                .with_context(|| format!("failed to open {}", file.display()))?;
            print!("{}", report);
            Ok(())
        }
        Command::Compress {
            output,
            level,
            input,
        } => {
            let output = output.unwrap_or_else(|| archive::default_compressed_path(&input));
            archive::compress_file(&input, &output, level)
                .with_context(|| format!("failed to compress {}", input.display()))?;
            Ok(())
        }
        Command::Uncompress { output, input } => {
            let output = output.unwrap_or_else(|| archive::default_uncompressed_path(&input));
            archive::uncompress_file(&input, &output)
                .with_context(|| format!("failed to uncompress {}", input.display()))?;
            Ok(())
        }
    }
}

fn run_export(args: ExportArgs, config: &Config, batch_size: usize) -> anyhow::Result<()> {
    let compression = if args.no_compress {
        Compression::None
    } else {
        Compression::Zstd {
            level: args.level.unwrap_or(config.compression_level),
        }
    };
    let options = WriterOptions {
        compression,
        metadata_reserve: config.metadata_reserve,
        max_document_size: config.max_document_size,
        ..WriterOptions::default()
    };

    let input: Box<dyn BufRead> = if is_stdio(&args.input) {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open input {}", args.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut writer = ContainerWriter::create(&args.output, options)
        .with_context(|| format!("failed to create output file {}", args.output.display()))?;
    let metadata = Metadata::new(
        args.database,
        args.collection,
        args.source,
        Utc::now().timestamp(),
    );
    writer
        .set_initial_metadata(metadata.clone())
        .context("failed to write header")?;

    let mut source = LineSource::new(input);
    let mut progress = Progress::new("Exporting");
    let count = export_collection(&mut source, &mut writer, batch_size, &mut progress)
        .context("export failed")?;

    let written = writer
        .finalize(&metadata.with_document_count(count as i64))
        .context("failed to finalize container")?;
    writer.close().context("failed to close output")?;

    info!(
        docs = count,
        file = %args.output.display(),
        size = %format_byte_size(written.total_size),
        "Export completed"
    );
    Ok(())
}

fn run_import(args: ImportArgs, batch_size: usize) -> anyhow::Result<()> {
    let mut reader = ContainerReader::open(&args.input)
        .with_context(|| format!("failed to open input file {}", args.input.display()))?;

    let metadata = reader.read_header().map_err(|e| match e {
        ReadError::Format { found } if found.starts_with(&[0x1f, 0x8b]) => anyhow!(
            "{} is gzip compressed; run `mc uncompress` first",
            args.input.display()
        ),
        ReadError::Format { .. } => {
            anyhow!("invalid file format: the file may be corrupted or not an MCBZ file")
        }
        ReadError::Version { found, .. } => anyhow!(
            "unsupported file version {}: this file was created with a newer version of mc",
            found
        ),
        other => anyhow::Error::new(other).context("failed to read header"),
    })?;

    info!(
        source_db = %metadata.database,
        source_coll = %metadata.collection,
        documents = metadata.document_count,
        "Importing collection"
    );

    let output: Box<dyn Write> = if is_stdio(&args.output) {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create output {}", args.output.display()))?;
        Box::new(BufWriter::new(file))
    };

    let mut sink = LineSink::new(output);
    let mut progress = Progress::new("Importing");
    let count = import_collection(&mut reader, &mut sink, batch_size, &mut progress)
        .context("import failed")?;
    reader.close();

    info!(docs = count, file = %args.input.display(), "Import completed");
    Ok(())
}
