//! Implementation of the `rows convert` sub command.

use std::io::Write;
use std::time::Instant;

use thousands::Separable;

use crate::common::io::{open_write_maybe_gz, read_jsonl};
use crate::conf::{ConsistencyPolicy, StorageConfig};

use super::converter::RowToVariantConverter;
use super::{StudyConfig, VariantRow};

/// Command line arguments for `rows convert` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Reconstruct variants from sparse rows", long_about = None)]
pub struct Args {
    /// Optional path to the storage configuration JSON.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Path to the JSON file with the list of study configurations.
    #[arg(long)]
    pub path_studies: String,
    /// Path to the rows as JSON lines, optionally gzipped.
    #[arg(long)]
    pub path_input: String,
    /// Path to the output variants as JSON lines.
    #[arg(long)]
    pub path_output: String,
    /// Samples to return, in this order; all indexed samples if not given.
    #[arg(long)]
    pub sample: Vec<String>,
    /// Override the reaction on count mismatches.
    #[arg(long, value_enum)]
    pub consistency_policy: Option<ConsistencyPolicy>,
}

/// Main entry point for `rows convert` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let config = StorageConfig::load(args.path_config.as_deref())?;
    let policy = args
        .consistency_policy
        .unwrap_or(config.consistency_policy);
    let studies: Vec<StudyConfig> = serde_json::from_str(
        &std::fs::read_to_string(&args.path_studies)
            .map_err(|e| anyhow::anyhow!("could not read {}: {}", &args.path_studies, e))?,
    )
    .map_err(|e| anyhow::anyhow!("could not parse {}: {}", &args.path_studies, e))?;

    let mut converter =
        RowToVariantConverter::new(studies, policy).with_default_genotype(&config.default_genotype);
    if !args.sample.is_empty() {
        converter.set_returned_samples(Some(args.sample.clone()));
    }

    let rows: Vec<VariantRow> = read_jsonl(&args.path_input)?;
    tracing::info!("converting {} rows ...", rows.len().separate_with_commas());
    let mut writer = open_write_maybe_gz(&args.path_output)?;
    for row in &rows {
        let variant = converter.convert(row).map_err(|e| {
            anyhow::anyhow!(
                "could not convert row {}:{}:{}:{}: {}",
                &row.chromosome,
                row.start,
                &row.reference,
                &row.alternate,
                e
            )
        })?;
        serde_json::to_writer(&mut writer, &variant)?;
        writeln!(writer)?;
    }
    writer.flush()?;

    tracing::info!(
        "All of `rows convert` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
