//! OpenCGA storage worker main executable

pub mod common;
pub mod conf;
pub mod err;
pub mod mongo;
pub mod sample_index;
pub mod variant;
pub mod variant_row;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "OpenCGA variant storage heavy lifting",
    long_about = "This tool builds and queries the sample genotype index and loads variants into MongoDB"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample genotype index commands.
    SampleIndex(SampleIndex),
    /// Variant row commands.
    Rows(Rows),
    /// MongoDB variant store commands.
    Mongo(Mongo),
}

/// Parsing of "sample-index *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct SampleIndex {
    /// The sub command to run
    #[command(subcommand)]
    command: SampleIndexCommands,
}

/// Enum supporting the parsing of "sample-index *" sub commands.
#[derive(Debug, Subcommand)]
enum SampleIndexCommands {
    Build(sample_index::cli::BuildArgs),
    Query(sample_index::cli::QueryArgs),
}

/// Parsing of "rows *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Rows {
    /// The sub command to run
    #[command(subcommand)]
    command: RowsCommands,
}

/// Enum supporting the parsing of "rows *" sub commands.
#[derive(Debug, Subcommand)]
enum RowsCommands {
    Convert(variant_row::cli::Args),
}

/// Parsing of "mongo *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Mongo {
    /// The sub command to run
    #[command(subcommand)]
    command: MongoCommands,
}

/// Enum supporting the parsing of "mongo *" sub commands.
#[derive(Debug, Subcommand)]
enum MongoCommands {
    Load(mongo::cli::LoadArgs),
    Query(mongo::cli::QueryArgs),
    RemoveStudy(mongo::cli::RemoveStudyArgs),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::SampleIndex(sample_index) => match &sample_index.command {
                SampleIndexCommands::Build(args) => {
                    sample_index::cli::run_build(&cli.common, args)?;
                }
                SampleIndexCommands::Query(args) => {
                    sample_index::cli::run_query(&cli.common, args)?;
                }
            },
            Commands::Rows(rows) => match &rows.command {
                RowsCommands::Convert(args) => {
                    variant_row::cli::run(&cli.common, args)?;
                }
            },
            Commands::Mongo(mongo) => match &mongo.command {
                MongoCommands::Load(args) => mongo::cli::run_load(&cli.common, args)?,
                MongoCommands::Query(args) => mongo::cli::run_query(&cli.common, args)?,
                MongoCommands::RemoveStudy(args) => {
                    mongo::cli::run_remove_study(&cli.common, args)?
                }
            },
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
